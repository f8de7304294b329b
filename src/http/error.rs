//! Request-layer errors, classified by server response.

use serde_json::Value;
use std::{error::Error as StdError, fmt};

/// A classified non-success response from the REST API.
#[derive(Clone, Debug)]
pub struct ApiError {
    /// HTTP status code, one of {400, 401, 403, 404, 405}.
    pub status: u16,
    /// The server's human-readable message, if it sent one.
    pub message: String,
    /// The raw response body.
    pub raw: Value,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "API responded with {}: {}", self.status, self.message)
    }
}

impl StdError for ApiError {}

/// Errors surfaced to request-client callers.
///
/// Throttling (429) never appears here; it is absorbed by retry.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A classified 4xx response.
    Api(ApiError),
    /// Transport or protocol failure beneath the request layer.
    Request(reqwest::Error),
    /// Payload (de)serialization failure.
    Json(serde_json::Error),
    /// A status outside the classified set, e.g. a 5xx.
    UnexpectedStatus(u16, Value),
}

impl From<ApiError> for Error {
    fn from(e: ApiError) -> Self {
        Error::Api(e)
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http request failed: ")?;
        match self {
            Error::Api(e) => e.fmt(f),
            Error::Request(e) => e.fmt(f),
            Error::Json(e) => e.fmt(f),
            Error::UnexpectedStatus(status, _) => write!(f, "unexpected status {status}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Api(e) => Some(e),
            Error::Request(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::UnexpectedStatus(..) => None,
        }
    }
}

/// Convenience type for request error handling.
pub type Result<T> = std::result::Result<T, Error>;
