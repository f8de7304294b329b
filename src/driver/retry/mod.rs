//! Configuration for connection retries.

mod strategy;

pub use self::strategy::*;
