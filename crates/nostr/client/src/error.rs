//! Client error types.

use nostr::{FilterError, Nip01Error};
use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid event: {0}")]
    Validation(#[from] Nip01Error),

    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("event {event_id} rejected by relay: {message}")]
    Rejected { event_id: String, message: String },

    #[error("subscription closed by relay: {0}")]
    Subscription(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    /// True for errors caused by the transport going away or never coming up.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Connection(_)
                | Self::ConnectionClosed
                | Self::NotConnected
                | Self::WebSocket(_)
                | Self::Io(_)
        )
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;
