#![deny(rustdoc::broken_intra_doc_links)]
//! Lorikeet is an async client library for Discord's gateway and voice APIs,
//! written in Rust. The library offers:
//!  * A persistent compressed gateway session with resume/replay semantics,
//!    delivering an ordered event stream through a local object cache that
//!    produces before/after pairs for every mutation event.
//!  * A rate-limited REST request layer with per-route throttling.
//!  * A standalone voice driver handling handshaking, IP discovery, RT(C)P
//!    packet construction, encryption, and drift-free audio pacing on
//!    dedicated real-time threads.
//!
//! ## Intents
//! Voice functionality requires the `GUILD_VOICE_STATES` intent; member and
//! presence hydration require their respective privileged intents.
//!
//! ## A note on blocking
//! Event handlers run on the async executor and must not block. Audio
//! encoding, encryption, and transmission run on their own threads and are
//! unaffected by executor load.

#![warn(clippy::pedantic)]
#![allow(
    // Allowed as they are too pedantic
    clippy::module_name_repetitions,
    clippy::wildcard_imports,
    clippy::too_many_lines,
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::missing_errors_doc,
)]

pub(crate) mod cache;
mod client;
mod config;
pub mod constants;
pub mod driver;
pub mod error;
pub mod events;
mod gateway;
pub mod http;
pub mod id;
pub(crate) mod info;
pub mod input;
mod intents;
pub mod model;
mod ws;

pub use crate::{
    cache::SharedCache,
    client::{Client, Context},
    config::Config,
    driver::Driver,
    error::{EmojiError, JoinError, JoinResult, StartError},
    events::{Event, EventHandler, MessageRef, WaitError},
    info::ConnectionInfo,
    intents::Intents,
};
