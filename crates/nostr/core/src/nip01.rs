//! NIP-01: Basic protocol flow description.
//!
//! This module implements the core Nostr event structure and operations:
//! - Event structure (id, pubkey, created_at, kind, tags, content, sig)
//! - Canonical event serialization for hashing
//! - Event signing with BIP-340 Schnorr signatures (fresh auxiliary randomness per call)
//! - Event verification and field-tagged structural validation
//! - Kind classification (regular, replaceable, ephemeral, addressable)

use bitcoin::hashes::{Hash, sha256};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::{Keypair, Message, SecretKey, XOnlyPublicKey, schnorr};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Latest accepted `created_at` (9999-12-31T23:59:59Z).
pub const MAX_CREATED_AT: u64 = 253_402_300_799;

/// Errors that can occur during NIP-01 operations.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("id does not match the computed event id (got {id}, computed {computed})")]
    IdMismatch { id: String, computed: String },

    #[error("sig is not a valid signature for the event")]
    InvalidSignature,

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Nip01Error {
    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            reason: reason.into(),
        }
    }

    /// Name of the event field the error refers to, if any.
    pub fn field_name(&self) -> Option<&'static str> {
        match self {
            Self::InvalidField { field, .. } => Some(field),
            Self::IdMismatch { .. } => Some("id"),
            Self::InvalidSignature => Some("sig"),
            Self::Crypto(_) | Self::Serialization(_) => None,
        }
    }
}

/// A signed Nostr event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// 32-bytes lowercase hex-encoded sha256 of the serialized event data
    pub id: String,
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind (integer between 0 and 65535)
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
    /// 64-bytes lowercase hex signature
    pub sig: String,
}

/// An unsigned event (before signing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// 32-bytes lowercase hex-encoded public key of the event creator
    pub pubkey: String,
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

/// A template for creating events (without pubkey, which comes from the signing key).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    /// Unix timestamp in seconds
    pub created_at: u64,
    /// Event kind
    pub kind: u16,
    /// Array of arrays of strings (tags)
    pub tags: Vec<Vec<String>>,
    /// Arbitrary string content
    pub content: String,
}

impl EventTemplate {
    /// Template stamped with the current wall-clock time.
    pub fn now(kind: u16, tags: Vec<Vec<String>>, content: impl Into<String>) -> Self {
        Self {
            created_at: unix_now(),
            kind,
            tags,
            content: content.into(),
        }
    }
}

/// Event kind classification according to NIP-01.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindClassification {
    /// Events expected to be stored by relays
    Regular,
    /// Only latest event per pubkey+kind is stored
    Replaceable,
    /// Not expected to be stored by relays
    Ephemeral,
    /// Only latest event per pubkey+kind+d-tag is stored
    Addressable,
    /// Unknown classification
    Unknown,
}

// Standard event kinds
pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_RECOMMEND_RELAY: u16 = 2;
pub const KIND_CONTACTS: u16 = 3;

impl Event {
    /// Decode a wire event object, reporting the first offending field, then validate it.
    pub fn from_value(value: &Value) -> Result<Self, Nip01Error> {
        let object = value
            .as_object()
            .ok_or_else(|| Nip01Error::field("event", "expected a JSON object"))?;

        let kind = object
            .get("kind")
            .and_then(Value::as_u64)
            .ok_or_else(|| Nip01Error::field("kind", "expected a non-negative integer"))?;
        let kind = u16::try_from(kind)
            .map_err(|_| Nip01Error::field("kind", format!("{kind} is outside 0..=65535")))?;

        let event = Self {
            id: string_field(object, "id")?,
            pubkey: string_field(object, "pubkey")?,
            created_at: object
                .get("created_at")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    Nip01Error::field("created_at", "expected a non-negative integer")
                })?,
            kind,
            tags: tags_field(object)?,
            content: string_field(object, "content")?,
            sig: string_field(object, "sig")?,
        };

        validate_event(&event)?;
        Ok(event)
    }

    /// The signed-over portion of this event.
    pub fn unsigned(&self) -> UnsignedEvent {
        UnsignedEvent {
            pubkey: self.pubkey.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
        }
    }

    /// True when [`validate_event`] accepts this event.
    pub fn is_valid(&self) -> bool {
        validate_event(self).is_ok()
    }
}

fn string_field(object: &Map<String, Value>, field: &'static str) -> Result<String, Nip01Error> {
    object
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Nip01Error::field(field, "expected a string"))
}

fn tags_field(object: &Map<String, Value>) -> Result<Vec<Vec<String>>, Nip01Error> {
    let tags = object
        .get("tags")
        .and_then(Value::as_array)
        .ok_or_else(|| Nip01Error::field("tags", "expected an array of arrays"))?;

    tags.iter()
        .map(|tag| {
            tag.as_array()
                .ok_or_else(|| Nip01Error::field("tags", "expected an array of arrays"))?
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_owned)
                        .ok_or_else(|| Nip01Error::field("tags", "tag items must be strings"))
                })
                .collect()
        })
        .collect()
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

/// Generate a random 32-byte secret key.
pub fn generate_secret_key() -> [u8; 32] {
    loop {
        let mut key = [0u8; 32];
        rand::rng().fill_bytes(&mut key);
        if SecretKey::from_slice(&key).is_ok() {
            return key;
        }
    }
}

/// Get the public key (x-only, 32 bytes) from a secret key.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Crypto(e.to_string()))?;
    let (xonly, _parity) = sk.x_only_public_key(&secp);
    Ok(xonly.serialize())
}

/// Get the public key as a hex string from a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    Ok(hex::encode(get_public_key(secret_key)?))
}

/// Canonical serialization: `[0, pubkey, created_at, kind, tags, content]`.
///
/// Compact JSON, no whitespace. Strings escape `"` and `\`, the short forms
/// `\n \r \t \b \f`, remaining C0 controls as lowercase `\u00XX`, and keep every
/// other character (non-ASCII included) verbatim.
pub fn canonical_serialization(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String, Nip01Error> {
    serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))
        .map_err(|e| Nip01Error::Serialization(e.to_string()))
}

/// Hash the canonical serialization of the given fields into a hex event id.
pub fn compute_id(
    pubkey: &str,
    created_at: u64,
    kind: u16,
    tags: &[Vec<String>],
    content: &str,
) -> Result<String, Nip01Error> {
    let serialized = canonical_serialization(pubkey, created_at, kind, tags, content)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

/// Serialize an unsigned event for hashing.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    if !validate_unsigned_event(event) {
        return Err(Nip01Error::field(
            "pubkey",
            "must be a 64-character lowercase hex string",
        ));
    }

    canonical_serialization(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    )
}

/// Get the event hash (id) from an unsigned event.
pub fn get_event_hash(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let serialized = serialize_event(event)?;
    let hash = sha256::Hash::hash(serialized.as_bytes());
    Ok(hex::encode(hash.as_byte_array()))
}

/// Validate an unsigned event structure.
pub fn validate_unsigned_event(event: &UnsignedEvent) -> bool {
    is_lower_hex(&event.pubkey, 64)
}

pub(crate) fn is_lower_hex(value: &str, len: usize) -> bool {
    value.len() == len && value.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn hex_to_32(value: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(value).ok()?;
    bytes.try_into().ok()
}

/// Sign an event id with a BIP-340 Schnorr signature.
///
/// Each call draws fresh auxiliary randomness, so signing the same id twice
/// yields different (equally valid) signatures.
pub fn sign_id(id: &str, secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    let digest = hex_to_32(id)
        .ok_or_else(|| Nip01Error::field("id", "must be a 64-character hex string"))?;
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key).map_err(|e| Nip01Error::Crypto(e.to_string()))?;
    let keypair = Keypair::from_secret_key(&secp, &sk);

    let mut aux_rand = [0u8; 32];
    rand::rng().fill_bytes(&mut aux_rand);

    let message = Message::from_digest(digest);
    let sig = secp.sign_schnorr_with_aux_rand(&message, &keypair, &aux_rand);
    Ok(hex::encode(sig.serialize()))
}

/// Verify a Schnorr signature over an event id. Malformed inputs verify as `false`.
pub fn verify_signature(id: &str, pubkey: &str, sig: &str) -> bool {
    let Some(digest) = hex_to_32(id) else {
        return false;
    };
    let Ok(pubkey_bytes) = hex::decode(pubkey) else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(sig) else {
        return false;
    };
    let Ok(pubkey) = XOnlyPublicKey::from_slice(&pubkey_bytes) else {
        return false;
    };
    let Ok(sig) = schnorr::Signature::from_slice(&sig_bytes) else {
        return false;
    };

    let secp = Secp256k1::verification_only();
    secp.verify_schnorr(&sig, &Message::from_digest(digest), &pubkey)
        .is_ok()
}

/// Validate a signed event: field shapes, recomputed id, then signature.
pub fn validate_event(event: &Event) -> Result<(), Nip01Error> {
    if !is_lower_hex(&event.id, 64) {
        return Err(Nip01Error::field(
            "id",
            "must be a 64-character lowercase hex string",
        ));
    }
    if !is_lower_hex(&event.pubkey, 64) {
        return Err(Nip01Error::field(
            "pubkey",
            "must be a 64-character lowercase hex string",
        ));
    }
    if !is_lower_hex(&event.sig, 128) {
        return Err(Nip01Error::field(
            "sig",
            "must be a 128-character lowercase hex string",
        ));
    }
    if event.created_at > MAX_CREATED_AT {
        return Err(Nip01Error::field(
            "created_at",
            format!("{} is later than {MAX_CREATED_AT}", event.created_at),
        ));
    }
    if event.tags.iter().any(Vec::is_empty) {
        return Err(Nip01Error::field("tags", "tags must not be empty arrays"));
    }
    if event.tags.iter().flatten().any(|item| item.contains('\0')) {
        return Err(Nip01Error::field("tags", "tags cannot contain null characters"));
    }
    if event.content.contains('\0') {
        return Err(Nip01Error::field(
            "content",
            "content cannot contain null characters",
        ));
    }

    let computed = compute_id(
        &event.pubkey,
        event.created_at,
        event.kind,
        &event.tags,
        &event.content,
    )?;
    if computed != event.id {
        return Err(Nip01Error::IdMismatch {
            id: event.id.clone(),
            computed,
        });
    }

    if !verify_signature(&event.id, &event.pubkey, &event.sig) {
        return Err(Nip01Error::InvalidSignature);
    }

    Ok(())
}

/// Verify an event's signature and id.
pub fn verify_event(event: &Event) -> bool {
    validate_event(event).is_ok()
}

/// Sign an event template with a secret key, producing a complete signed event.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let pubkey = get_public_key_hex(secret_key)?;
    let id = compute_id(
        &pubkey,
        template.created_at,
        template.kind,
        &template.tags,
        &template.content,
    )?;
    let sig = sign_id(&id, secret_key)?;

    Ok(Event {
        id,
        pubkey,
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
        sig,
    })
}

/// Classify an event kind according to NIP-01 rules.
pub fn classify_kind(kind: u16) -> KindClassification {
    let k = u32::from(kind);

    // Regular: 1000 <= n < 10000 || 4 <= n < 45 || n == 1 || n == 2
    if (1000..10000).contains(&k) || (4..45).contains(&k) || k == 1 || k == 2 {
        return KindClassification::Regular;
    }

    // Replaceable: 10000 <= n < 20000 || n == 0 || n == 3
    if (10000..20000).contains(&k) || k == 0 || k == 3 {
        return KindClassification::Replaceable;
    }

    if (20000..30000).contains(&k) {
        return KindClassification::Ephemeral;
    }

    if (30000..40000).contains(&k) {
        return KindClassification::Addressable;
    }

    KindClassification::Unknown
}

/// Check if a kind is regular.
pub fn is_regular_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Regular)
}

/// Check if a kind is replaceable.
pub fn is_replaceable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Replaceable)
}

/// Check if a kind is ephemeral.
pub fn is_ephemeral_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Ephemeral)
}

/// Check if a kind is addressable.
pub fn is_addressable_kind(kind: u16) -> bool {
    matches!(classify_kind(kind), KindClassification::Addressable)
}
