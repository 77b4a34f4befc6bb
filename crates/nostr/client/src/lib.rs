//! Nostr relay client.
//!
//! This crate exposes a small surface:
//! - one WebSocket connection per relay, with subscription routing and
//!   publish acknowledgement tracking
//! - optional SOCKS5 tunnelling for Tor relays
//! - fetch/stream helpers and an in-process relay for tests

pub mod actions;
pub mod error;
pub mod message;
pub mod relay;
pub mod relay_url;
pub mod subscription;
pub mod testing;
pub mod transport;

pub use actions::{fetch_events, stream_events};
pub use error::{ClientError, Result};
pub use message::{ClientMessage, RelayMessage};
pub use relay::{
    ConnectionState, Listener, PublishConfirmation, RelayConfig, RelayConnection,
};
pub use relay_url::{Network, RelayUrl, find_relay_urls};
pub use subscription::{Subscription, SubscriptionMessage};
pub use testing::{TestRelay, TestRelayOptions};
pub use transport::{FrameSink, FrameStream, Transport, WebSocketTransport};
