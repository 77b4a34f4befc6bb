//! Nostr protocol primitives: events, filters, proof of work, keys and the
//! relay information document.

pub mod filter;
mod keys;
pub mod nip01;
pub mod nip11;
pub mod nip13;
pub mod nip42;
pub mod tag_parsing;

pub use filter::{Filter, FilterError, matches_any};
pub use keys::{KeyError, Keypair, NPUB_HRP, NSEC_HRP, decode_bech32, encode_bech32};
pub use nip01::{
    Event, EventTemplate, KindClassification, MAX_CREATED_AT, Nip01Error, UnsignedEvent,
    classify_kind, compute_id, finalize_event, generate_secret_key, get_event_hash,
    get_public_key, get_public_key_hex, serialize_event, sign_id, unix_now, validate_event,
    verify_event, verify_signature,
};
pub use nip11::{Limitation, NIP11_ACCEPT, Nip11Error, RelayInformation};
pub use nip13::{
    MiningHandle, Nip13Error, committed_target, count_leading_zero_bits, event_difficulty, mine,
    spawn_miner,
};
pub use nip42::{AUTH_KIND, auth_event_template, is_auth_event_for};
