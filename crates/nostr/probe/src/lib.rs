//! Relay health probing.
//!
//! [`compute_relay_metadata`] checks one relay for connectivity, readability
//! and writability and fetches its NIP-11 document; [`probe_relays`] does the
//! same for many relays under a concurrency cap and per-relay deadline.

pub mod batch;
pub mod config;
pub mod error;
pub mod info;
pub mod metadata;
pub mod probe;

pub use batch::probe_relays;
pub use config::ProbeConfig;
pub use error::{ProbeError, Result};
pub use info::{InfoFetcher, ReqwestFetcher};
pub use metadata::{CheckOutcome, InfoOutcome, RelayMetadata};
pub use probe::{PROBE_EVENT_KIND, compute_relay_metadata, compute_relay_metadata_within};
