//! Probing many relays at once.

use std::sync::Arc;
use std::time::Duration;

use nostr_client::RelayUrl;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use crate::config::ProbeConfig;
use crate::error::Result;
use crate::info::InfoFetcher;
use crate::metadata::RelayMetadata;
use crate::probe::compute_relay_metadata_within;

/// Probe every relay on its own connection, at most `max_concurrency` at a
/// time, each bounded by `relay_deadline`.
///
/// Returns one snapshot per input relay, in input order. A relay cut off by
/// its deadline keeps the outcomes of the checks it finished.
pub async fn probe_relays(
    relays: Vec<RelayUrl>,
    config: &ProbeConfig,
    fetcher: Arc<dyn InfoFetcher>,
) -> Result<Vec<RelayMetadata>> {
    config.validate()?;
    if config.relay_deadline < config.check_budget() {
        warn!(
            deadline = ?config.relay_deadline,
            budget = ?config.check_budget(),
            "relay deadline is shorter than the check timeouts; slow relays will be cut off"
        );
    }
    let keys = Arc::new(config.keypair()?);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
    let shared_config = Arc::new(config.clone());

    let mut tasks = JoinSet::new();
    for (index, relay) in relays.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let config = Arc::clone(&shared_config);
        let keys = Arc::clone(&keys);
        let fetcher = Arc::clone(&fetcher);

        tasks.spawn(async move {
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return (index, RelayMetadata::failed(relay, "probe cancelled", Duration::ZERO));
            };
            let metadata = compute_relay_metadata_within(
                &relay,
                &config,
                &keys,
                fetcher.as_ref(),
                config.relay_deadline,
            )
            .await;
            (index, metadata)
        });
    }

    let mut results: Vec<Option<RelayMetadata>> = vec![None; relays.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, metadata)) => {
                if let Some(slot) = results.get_mut(index) {
                    *slot = Some(metadata);
                }
            }
            Err(error) => warn!(%error, "probe task failed"),
        }
    }

    Ok(results
        .into_iter()
        .zip(relays)
        .map(|(metadata, relay)| {
            metadata.unwrap_or_else(|| RelayMetadata::failed(relay, "probe task failed", Duration::ZERO))
        })
        .collect())
}
