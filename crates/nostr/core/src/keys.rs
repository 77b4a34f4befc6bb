//! Secp256k1 keypairs and their bech32 (`npub`/`nsec`) text encoding.

use bech32::{Bech32, Hrp};
use bitcoin::key::Secp256k1;
use bitcoin::secp256k1::SecretKey;
use thiserror::Error;

use crate::nip01::generate_secret_key;

pub const NSEC_HRP: &str = "nsec";
pub const NPUB_HRP: &str = "npub";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("bech32 encode error: {0}")]
    Bech32Encode(String),

    #[error("bech32 decode error: {0}")]
    Bech32Decode(String),

    #[error("invalid bech32 prefix: expected {expected}, got {got}")]
    InvalidHrp { expected: String, got: String },

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),
}

#[derive(Clone)]
pub struct Keypair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl Keypair {
    /// Fresh random keypair.
    pub fn generate() -> Self {
        let private_key = generate_secret_key();
        // A key produced by generate_secret_key is always in range.
        let secp = Secp256k1::new();
        let public_key = SecretKey::from_slice(&private_key)
            .map(|sk| sk.x_only_public_key(&secp).0.serialize())
            .unwrap_or_default();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn from_secret_key(private_key: [u8; 32]) -> Result<Self, KeyError> {
        let secp = Secp256k1::new();
        let sk = SecretKey::from_slice(&private_key)
            .map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        let (xonly, _parity) = sk.x_only_public_key(&secp);
        Ok(Self {
            private_key,
            public_key: xonly.serialize(),
        })
    }

    /// Accepts either 64 hex characters or an `nsec` string.
    pub fn from_secret_hex(secret: &str) -> Result<Self, KeyError> {
        let secret = secret.trim();
        if secret.starts_with(NSEC_HRP) {
            return Self::from_secret_key(decode_bech32(NSEC_HRP, secret)?);
        }
        let bytes = hex::decode(secret).map_err(|e| KeyError::InvalidSecretKey(e.to_string()))?;
        let len = bytes.len();
        let private_key: [u8; 32] = bytes.try_into().map_err(|_| KeyError::InvalidLength(len))?;
        Self::from_secret_key(private_key)
    }

    pub fn npub(&self) -> Result<String, KeyError> {
        encode_bech32(NPUB_HRP, &self.public_key)
    }

    pub fn nsec(&self) -> Result<String, KeyError> {
        encode_bech32(NSEC_HRP, &self.private_key)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }
}

pub fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String, KeyError> {
    let parsed_hrp = Hrp::parse(hrp).map_err(|e| KeyError::Bech32Encode(e.to_string()))?;
    bech32::encode::<Bech32>(parsed_hrp, data).map_err(|e| KeyError::Bech32Encode(e.to_string()))
}

/// Decode a bech32 string, requiring the given human-readable prefix.
pub fn decode_bech32(expected_hrp: &str, encoded: &str) -> Result<[u8; 32], KeyError> {
    let expected =
        Hrp::parse(expected_hrp).map_err(|e| KeyError::Bech32Decode(e.to_string()))?;
    let (hrp, data) =
        bech32::decode(encoded).map_err(|e| KeyError::Bech32Decode(e.to_string()))?;

    if hrp != expected {
        return Err(KeyError::InvalidHrp {
            expected: expected_hrp.to_string(),
            got: hrp.to_string(),
        });
    }

    let len = data.len();
    data.try_into().map_err(|_| KeyError::InvalidLength(len))
}
