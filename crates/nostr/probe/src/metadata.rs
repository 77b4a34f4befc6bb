//! Point-in-time health snapshot of one relay.

use std::time::Duration;

use nostr::{RelayInformation, unix_now};
use nostr_client::{Network, RelayUrl};
use serde::Serialize;

/// Result of one probe check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    Success { rtt_ms: u64 },
    Failure { reason: String, elapsed_ms: u64 },
    /// Skipped because an earlier check failed.
    NotAttempted,
}

impl CheckOutcome {
    pub fn success(elapsed: Duration) -> Self {
        Self::Success {
            rtt_ms: millis(elapsed),
        }
    }

    pub fn failure(reason: impl Into<String>, elapsed: Duration) -> Self {
        Self::Failure {
            reason: reason.into(),
            elapsed_ms: millis(elapsed),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn rtt_ms(&self) -> Option<u64> {
        match self {
            Self::Success { rtt_ms } => Some(*rtt_ms),
            _ => None,
        }
    }
}

/// Outcome of fetching the NIP-11 document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum InfoOutcome {
    Fetched { document: RelayInformation },
    Failure { reason: String },
    NotAttempted,
}

impl InfoOutcome {
    pub fn document(&self) -> Option<&RelayInformation> {
        match self {
            Self::Fetched { document } => Some(document),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayMetadata {
    pub relay: RelayUrl,
    pub network: Network,
    /// Unix seconds when the probe finished.
    pub generated_at: u64,
    pub connectivity: CheckOutcome,
    pub readability: CheckOutcome,
    pub writability: CheckOutcome,
    pub info: InfoOutcome,
}

impl RelayMetadata {
    pub fn new(
        relay: RelayUrl,
        connectivity: CheckOutcome,
        readability: CheckOutcome,
        writability: CheckOutcome,
        info: InfoOutcome,
    ) -> Self {
        Self {
            network: relay.network(),
            relay,
            generated_at: unix_now(),
            connectivity,
            readability,
            writability,
            info,
        }
    }

    /// Snapshot for a relay whose probe never produced results.
    pub fn failed(relay: RelayUrl, reason: impl Into<String>, elapsed: Duration) -> Self {
        Self::new(
            relay,
            CheckOutcome::failure(reason, elapsed),
            CheckOutcome::NotAttempted,
            CheckOutcome::NotAttempted,
            InfoOutcome::NotAttempted,
        )
    }

    pub fn is_reachable(&self) -> bool {
        self.connectivity.is_success()
    }

    pub fn is_readable(&self) -> bool {
        self.readability.is_success()
    }

    pub fn is_writable(&self) -> bool {
        self.writability.is_success()
    }
}

fn millis(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
