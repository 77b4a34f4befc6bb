//! Health checks against a single relay.
//!
//! Connectivity, readability and writability are checked in that order over
//! one connection while the information document is fetched over HTTP in
//! parallel. Each check records its own outcome; a failed connection marks the
//! other two as not attempted rather than failed.
//!
//! Outcomes are recorded as soon as each check finishes, so a probe cut off by
//! its deadline still reports the checks that completed.

use std::time::{Duration, Instant};

use nostr::tag_parsing::tag;
use nostr::{EventTemplate, Filter, Keypair, finalize_event};
use nostr_client::{RelayConnection, RelayUrl, SubscriptionMessage};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ProbeConfig;
use crate::error::ProbeError;
use crate::info::InfoFetcher;
use crate::metadata::{CheckOutcome, InfoOutcome, RelayMetadata};

/// Kind of the write-check event: addressable, so repeat probes replace it.
pub const PROBE_EVENT_KIND: u16 = 30166;

/// Outcomes recorded so far for one relay.
#[derive(Debug, Default)]
struct Progress {
    connectivity: Option<CheckOutcome>,
    readability: Option<CheckOutcome>,
    writability: Option<CheckOutcome>,
    info: Option<InfoOutcome>,
    /// Start of the check currently running on the connection.
    check_started: Option<Instant>,
}

impl Progress {
    /// Snapshot from the recorded outcomes. A missing check fails with
    /// `unfinished`; the one that was running is charged its elapsed time.
    /// Without a connection, checks that never started stay not attempted.
    fn into_metadata(self, relay: &RelayUrl, unfinished: &str) -> RelayMetadata {
        let mut in_flight = self.check_started.map(|started| started.elapsed());
        let connected = self
            .connectivity
            .as_ref()
            .is_some_and(CheckOutcome::is_success);

        let connectivity = self.connectivity.unwrap_or_else(|| {
            CheckOutcome::failure(unfinished, in_flight.take().unwrap_or_default())
        });
        let mut settle = |outcome: Option<CheckOutcome>| {
            outcome.unwrap_or_else(|| {
                if connected {
                    CheckOutcome::failure(unfinished, in_flight.take().unwrap_or_default())
                } else {
                    CheckOutcome::NotAttempted
                }
            })
        };
        let readability = settle(self.readability);
        let writability = settle(self.writability);
        let info = self.info.unwrap_or_else(|| InfoOutcome::Failure {
            reason: unfinished.to_string(),
        });

        RelayMetadata::new(relay.clone(), connectivity, readability, writability, info)
    }
}

/// Probe one relay. Never fails: every problem lands in the snapshot.
pub async fn compute_relay_metadata(
    relay: &RelayUrl,
    config: &ProbeConfig,
    keys: &Keypair,
    fetcher: &dyn InfoFetcher,
) -> RelayMetadata {
    let progress = Mutex::new(Progress::default());
    record_checks(relay, config, keys, fetcher, &progress).await;
    conclude(relay, progress.into_inner(), "check did not finish")
}

/// [`compute_relay_metadata`] bounded by `deadline`.
///
/// Checks that finished before the deadline keep their outcomes; only those
/// still pending fail with [`ProbeError::Deadline`].
pub async fn compute_relay_metadata_within(
    relay: &RelayUrl,
    config: &ProbeConfig,
    keys: &Keypair,
    fetcher: &dyn InfoFetcher,
    deadline: Duration,
) -> RelayMetadata {
    let progress = Mutex::new(Progress::default());
    let finished = timeout(
        deadline,
        record_checks(relay, config, keys, fetcher, &progress),
    )
    .await;

    let unfinished = match finished {
        Ok(()) => "check did not finish".to_string(),
        Err(_) => {
            warn!(relay = %relay, ?deadline, "relay probe hit its deadline");
            ProbeError::Deadline(deadline).to_string()
        }
    };
    conclude(relay, progress.into_inner(), &unfinished)
}

fn conclude(relay: &RelayUrl, progress: Progress, unfinished: &str) -> RelayMetadata {
    let metadata = progress.into_metadata(relay, unfinished);
    info!(
        relay = %relay,
        reachable = metadata.is_reachable(),
        readable = metadata.is_readable(),
        writable = metadata.is_writable(),
        "relay probed"
    );
    metadata
}

async fn record_checks(
    relay: &RelayUrl,
    config: &ProbeConfig,
    keys: &Keypair,
    fetcher: &dyn InfoFetcher,
    progress: &Mutex<Progress>,
) {
    let info = async {
        let outcome = fetch_info(relay, config.info_timeout, fetcher).await;
        progress.lock().await.info = Some(outcome);
    };
    tokio::join!(info, run_checks(relay, config, keys, progress));
}

async fn fetch_info(relay: &RelayUrl, limit: Duration, fetcher: &dyn InfoFetcher) -> InfoOutcome {
    let fetched = timeout(limit, fetcher.fetch(relay)).await;
    match fetched {
        Ok(Ok(document)) => InfoOutcome::Fetched { document },
        Ok(Err(error)) => InfoOutcome::Failure {
            reason: error.to_string(),
        },
        Err(_) => InfoOutcome::Failure {
            reason: ProbeError::Timeout {
                check: "information document",
                timeout: limit,
            }
            .to_string(),
        },
    }
}

async fn run_checks(
    relay: &RelayUrl,
    config: &ProbeConfig,
    keys: &Keypair,
    progress: &Mutex<Progress>,
) {
    let started = Instant::now();
    progress.lock().await.check_started = Some(started);
    let connected = match RelayConnection::with_config(relay.as_str(), config.relay_config()) {
        Ok(connection) => connection.connect().await.map(|()| connection),
        Err(error) => Err(error),
    };
    let connection = match connected {
        Ok(connection) => connection,
        Err(error) => {
            debug!(relay = %relay, %error, "connectivity check failed");
            let mut progress = progress.lock().await;
            progress.connectivity = Some(CheckOutcome::failure(error.to_string(), started.elapsed()));
            progress.readability = Some(CheckOutcome::NotAttempted);
            progress.writability = Some(CheckOutcome::NotAttempted);
            return;
        }
    };
    {
        let mut progress = progress.lock().await;
        progress.connectivity = Some(CheckOutcome::success(started.elapsed()));
        progress.check_started = Some(Instant::now());
    }

    let readability = check_read(&connection, config.read_timeout).await;
    {
        let mut progress = progress.lock().await;
        progress.readability = Some(readability);
        progress.check_started = Some(Instant::now());
    }

    let writability = check_write(&connection, relay, keys, config.write_timeout).await;
    progress.lock().await.writability = Some(writability);

    if let Err(error) = connection.disconnect().await {
        debug!(relay = %relay, %error, "disconnect after probe failed");
    }
}

async fn check_read(connection: &RelayConnection, limit: Duration) -> CheckOutcome {
    let started = Instant::now();
    let mut subscription = match connection.subscribe(vec![Filter::new().limit(1)]).await {
        Ok(subscription) => subscription,
        Err(error) => return CheckOutcome::failure(error.to_string(), started.elapsed()),
    };

    let first = timeout(limit, subscription.recv()).await;
    let outcome = match first {
        Ok(Some(SubscriptionMessage::Event(_) | SubscriptionMessage::Eose)) => {
            CheckOutcome::success(started.elapsed())
        }
        Ok(Some(SubscriptionMessage::Closed(reason))) => {
            CheckOutcome::failure(format!("subscription closed: {reason}"), started.elapsed())
        }
        Ok(Some(SubscriptionMessage::ConnectionClosed) | None) => {
            CheckOutcome::failure("connection closed", started.elapsed())
        }
        Err(_) => CheckOutcome::failure(
            ProbeError::Timeout {
                check: "read check",
                timeout: limit,
            }
            .to_string(),
            started.elapsed(),
        ),
    };

    close(connection, subscription.id()).await;
    outcome
}

async fn check_write(
    connection: &RelayConnection,
    relay: &RelayUrl,
    keys: &Keypair,
    limit: Duration,
) -> CheckOutcome {
    let template = EventTemplate::now(PROBE_EVENT_KIND, vec![tag(["d", relay.as_str()])], "");
    let event = match finalize_event(&template, &keys.private_key) {
        Ok(event) => event,
        Err(error) => return CheckOutcome::failure(error.to_string(), Duration::ZERO),
    };

    let subscription = match connection.subscribe(vec![Filter::new().id(event.id.clone())]).await {
        Ok(subscription) => subscription,
        Err(error) => return CheckOutcome::failure(error.to_string(), Duration::ZERO),
    };

    let started = Instant::now();
    let published = timeout(limit, connection.publish(&event)).await;
    let outcome = match published {
        Ok(Ok(confirmation)) if confirmation.accepted => CheckOutcome::success(started.elapsed()),
        Ok(Ok(confirmation)) => CheckOutcome::failure(
            format!("rejected: {}", confirmation.message),
            started.elapsed(),
        ),
        Ok(Err(error)) => CheckOutcome::failure(error.to_string(), started.elapsed()),
        Err(_) => CheckOutcome::failure(
            ProbeError::Timeout {
                check: "write check",
                timeout: limit,
            }
            .to_string(),
            started.elapsed(),
        ),
    };

    close(connection, subscription.id()).await;
    outcome
}

async fn close(connection: &RelayConnection, subscription_id: &str) {
    if let Err(error) = connection.unsubscribe(subscription_id).await {
        debug!(relay = %connection.url(), subscription_id, %error, "probe cleanup failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relay() -> anyhow::Result<RelayUrl> {
        Ok(RelayUrl::parse("wss://relay.example.com")?)
    }

    #[test]
    fn deadline_keeps_finished_checks() -> anyhow::Result<()> {
        let progress = Progress {
            connectivity: Some(CheckOutcome::success(Duration::from_millis(12))),
            readability: Some(CheckOutcome::success(Duration::from_millis(30))),
            writability: None,
            info: Some(InfoOutcome::Failure {
                reason: "HTTP status 404".to_string(),
            }),
            check_started: Instant::now().checked_sub(Duration::from_millis(500)),
        };

        let metadata = progress.into_metadata(&relay()?, "out of time");
        assert_eq!(metadata.connectivity, CheckOutcome::success(Duration::from_millis(12)));
        assert_eq!(metadata.readability.rtt_ms(), Some(30));
        match &metadata.writability {
            CheckOutcome::Failure { reason, elapsed_ms } => {
                assert_eq!(reason, "out of time");
                assert!(*elapsed_ms >= 500);
            }
            other => anyhow::bail!("expected the running check to fail, got {other:?}"),
        }
        assert!(matches!(&metadata.info, InfoOutcome::Failure { reason } if reason == "HTTP status 404"));
        Ok(())
    }

    #[test]
    fn deadline_fails_checks_that_never_started_after_connecting() -> anyhow::Result<()> {
        let progress = Progress {
            connectivity: Some(CheckOutcome::success(Duration::from_millis(5))),
            check_started: Some(Instant::now()),
            ..Progress::default()
        };

        let metadata = progress.into_metadata(&relay()?, "out of time");
        assert!(metadata.is_reachable());
        assert!(matches!(&metadata.readability, CheckOutcome::Failure { reason, .. } if reason == "out of time"));
        assert!(matches!(
            &metadata.writability,
            CheckOutcome::Failure { reason, elapsed_ms: 0 } if reason == "out of time"
        ));
        assert!(matches!(&metadata.info, InfoOutcome::Failure { reason } if reason == "out of time"));
        Ok(())
    }

    #[test]
    fn deadline_while_connecting_skips_the_other_checks() -> anyhow::Result<()> {
        let progress = Progress {
            check_started: Some(Instant::now()),
            ..Progress::default()
        };

        let metadata = progress.into_metadata(&relay()?, "out of time");
        assert!(matches!(&metadata.connectivity, CheckOutcome::Failure { reason, .. } if reason == "out of time"));
        assert_eq!(metadata.readability, CheckOutcome::NotAttempted);
        assert_eq!(metadata.writability, CheckOutcome::NotAttempted);
        Ok(())
    }
}
