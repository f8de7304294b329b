//! Client and voice-join error handling.

use std::{error::Error as StdError, fmt};

pub use crate::driver::connection::error::{Error as ConnectionError, Result as ConnectionResult};

/// Error returned when a voice channel join cannot complete.
#[derive(Debug)]
#[non_exhaustive]
pub enum JoinError {
    /// The pending join was dropped, cancelled, or replaced.
    Dropped,
    /// The session has not finished identifying, so the bot's own user (and
    /// therefore the join request) cannot be formed yet.
    NotReady,
    /// No running session was available to carry the voice state update.
    NoSession,
    /// Connection details were not received from the gateway in the
    /// configured time.
    TimedOut,
    /// The driver failed to establish the voice connection.
    Driver(ConnectionError),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to join voice channel: ")?;
        match self {
            JoinError::Dropped => write!(f, "request was cancelled/dropped"),
            JoinError::NotReady => write!(f, "session has not identified yet"),
            JoinError::NoSession => write!(f, "no gateway session to signal"),
            JoinError::TimedOut => write!(f, "gateway response timed out"),
            JoinError::Driver(e) => write!(f, "internal driver error: {e}"),
        }
    }
}

impl StdError for JoinError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            JoinError::Driver(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConnectionError> for JoinError {
    fn from(e: ConnectionError) -> Self {
        JoinError::Driver(e)
    }
}

/// Convenience type for voice join error handling.
pub type JoinResult<T> = Result<T, JoinError>;

/// Error from an application-emoji management call.
#[derive(Debug)]
#[non_exhaustive]
pub enum EmojiError {
    /// The session has not identified yet, so the application identity that
    /// owns the emojis is unknown.
    NotReady,
    /// The underlying request failed.
    Http(crate::http::Error),
}

impl fmt::Display for EmojiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmojiError::NotReady => write!(f, "session has not identified yet"),
            EmojiError::Http(e) => e.fmt(f),
        }
    }
}

impl StdError for EmojiError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            EmojiError::Http(e) => Some(e),
            EmojiError::NotReady => None,
        }
    }
}

impl From<crate::http::Error> for EmojiError {
    fn from(e: crate::http::Error) -> Self {
        EmojiError::Http(e)
    }
}

/// Error returned by [`Client::start`](crate::Client::start).
#[derive(Debug)]
#[non_exhaustive]
pub enum StartError {
    /// The session was already started once on this client.
    AlreadyStarted,
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::AlreadyStarted => write!(f, "the client has already been started"),
        }
    }
}

impl StdError for StartError {}
