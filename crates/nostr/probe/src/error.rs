use std::time::Duration;

use nostr::{KeyError, Nip01Error, Nip11Error};
use nostr_client::ClientError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("invalid relay information document: {0}")]
    Info(#[from] Nip11Error),

    #[error("{check} timed out after {timeout:?}")]
    Timeout {
        check: &'static str,
        timeout: Duration,
    },

    #[error("relay probe exceeded its deadline of {0:?}")]
    Deadline(Duration),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid key: {0}")]
    Key(#[from] KeyError),

    #[error("invalid event: {0}")]
    Event(#[from] Nip01Error),
}

pub type Result<T> = std::result::Result<T, ProbeError>;
