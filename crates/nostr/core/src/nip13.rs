//! NIP-13: Proof of Work.
//!
//! Difficulty is the number of leading zero bits of the event id. Mining
//! varies a `["nonce", <counter>, <target>]` tag until the id reaches the
//! target. The search is CPU bound; [`spawn_miner`] moves it onto its own OS
//! thread and reports back over a oneshot channel so async callers are never
//! blocked.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::oneshot;

use crate::nip01::{Event, EventTemplate, Nip01Error, compute_id, get_public_key_hex, sign_id};
use crate::tag_parsing::{find_tag, is_tag, parse_tag_field};

pub const NONCE_TAG: &str = "nonce";

/// Iterations between deadline checks.
const DEADLINE_CHECK_INTERVAL: u64 = 256;

#[derive(Debug, Error)]
pub enum Nip13Error {
    #[error("proof of work timed out after {attempts} attempts (target {target} bits, best {best})")]
    Timeout { target: u32, best: u32, attempts: u64 },

    #[error("proof of work cancelled")]
    Cancelled,

    #[error("failed to start mining worker: {0}")]
    Worker(String),

    #[error(transparent)]
    Event(#[from] Nip01Error),
}

/// Leading zero bits of a hex id, read big-endian.
pub fn count_leading_zero_bits(id: &str) -> u32 {
    let mut bits = 0;
    for c in id.chars() {
        let Some(nibble) = c.to_digit(16) else {
            break;
        };
        if nibble == 0 {
            bits += 4;
        } else {
            bits += nibble.leading_zeros() - 28;
            break;
        }
    }
    bits
}

/// Actual difficulty of an event's id.
pub fn event_difficulty(event: &Event) -> u32 {
    count_leading_zero_bits(&event.id)
}

/// The target the author committed to in the nonce tag, if any.
pub fn committed_target(event: &Event) -> Option<u32> {
    find_tag(&event.tags, NONCE_TAG).and_then(|tag| parse_tag_field(tag, 2))
}

/// Search for a nonce giving at least `target_bits` leading zero bits, then sign.
///
/// Existing nonce tags on the template are replaced. A target of zero signs the
/// template unchanged without searching. `cancel` is checked on every
/// iteration and `deadline` every few hundred.
pub fn mine(
    template: &EventTemplate,
    secret_key: &[u8; 32],
    target_bits: u32,
    deadline: Instant,
    cancel: &AtomicBool,
) -> Result<Event, Nip13Error> {
    let pubkey = get_public_key_hex(secret_key)?;

    if target_bits == 0 {
        return Ok(sign(template, template.tags.clone(), pubkey, secret_key)?);
    }

    let mut tags: Vec<Vec<String>> = template
        .tags
        .iter()
        .filter(|tag| !is_tag(tag, NONCE_TAG))
        .cloned()
        .collect();
    tags.push(vec![
        NONCE_TAG.to_string(),
        "0".to_string(),
        target_bits.to_string(),
    ]);
    let nonce_index = tags.len() - 1;

    let mut best = 0;
    let mut nonce: u64 = 0;
    loop {
        if cancel.load(Ordering::Relaxed) {
            return Err(Nip13Error::Cancelled);
        }
        if nonce % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            return Err(Nip13Error::Timeout {
                target: target_bits,
                best,
                attempts: nonce,
            });
        }

        tags[nonce_index][1] = nonce.to_string();
        let id = compute_id(
            &pubkey,
            template.created_at,
            template.kind,
            &tags,
            &template.content,
        )?;
        let difficulty = count_leading_zero_bits(&id);
        if difficulty >= target_bits {
            let sig = sign_id(&id, secret_key)?;
            return Ok(Event {
                id,
                pubkey,
                created_at: template.created_at,
                kind: template.kind,
                tags,
                content: template.content.clone(),
                sig,
            });
        }
        best = best.max(difficulty);
        nonce += 1;
    }
}

fn sign(
    template: &EventTemplate,
    tags: Vec<Vec<String>>,
    pubkey: String,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let id = compute_id(
        &pubkey,
        template.created_at,
        template.kind,
        &tags,
        &template.content,
    )?;
    let sig = sign_id(&id, secret_key)?;
    Ok(Event {
        id,
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags,
        content: template.content.clone(),
        sig,
    })
}

/// A mining search running on a dedicated thread.
///
/// Dropping the handle cancels the search.
pub struct MiningHandle {
    cancel: Arc<AtomicBool>,
    result: oneshot::Receiver<Result<Event, Nip13Error>>,
}

impl MiningHandle {
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Wait for the worker's result without blocking the runtime.
    pub async fn wait(&mut self) -> Result<Event, Nip13Error> {
        (&mut self.result)
            .await
            .map_err(|_| Nip13Error::Worker("mining thread exited without a result".into()))?
    }
}

impl Drop for MiningHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Start [`mine`] on its own OS thread with a `timeout` deadline.
pub fn spawn_miner(
    template: EventTemplate,
    secret_key: [u8; 32],
    target_bits: u32,
    timeout: Duration,
) -> Result<MiningHandle, Nip13Error> {
    let cancel = Arc::new(AtomicBool::new(false));
    let (tx, rx) = oneshot::channel();
    let deadline = Instant::now() + timeout;
    let worker_cancel = Arc::clone(&cancel);

    std::thread::Builder::new()
        .name("nip13-miner".into())
        .spawn(move || {
            let result = mine(&template, &secret_key, target_bits, deadline, &worker_cancel);
            let _ = tx.send(result);
        })
        .map_err(|e| Nip13Error::Worker(e.to_string()))?;

    Ok(MiningHandle {
        cancel,
        result: rx,
    })
}
