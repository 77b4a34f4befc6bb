//! Probe configuration.
//!
//! Defaults come from [`ProbeConfig::default`]. A TOML file may override any
//! field, then `NOSTR_PROBE_TOR_PROXY` and `NOSTR_PROBE_SECRET_KEY` override
//! the file. Timeouts are written in (fractional) seconds.

use std::path::Path;
use std::time::Duration;

use nostr::Keypair;
use nostr_client::RelayConfig;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{ProbeError, Result};

pub const TOR_PROXY_ENV: &str = "NOSTR_PROBE_TOR_PROXY";
pub const SECRET_KEY_ENV: &str = "NOSTR_PROBE_SECRET_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProbeConfig {
    #[serde(with = "seconds")]
    pub connect_timeout: Duration,
    /// Wait for the first EVENT or EOSE.
    #[serde(with = "seconds")]
    pub read_timeout: Duration,
    /// Wait for the OK of the probe event.
    #[serde(with = "seconds")]
    pub write_timeout: Duration,
    #[serde(with = "seconds")]
    pub info_timeout: Duration,
    /// Overall budget for one relay, checks included. Checks still running
    /// when it expires are recorded as failed; finished ones are kept.
    #[serde(with = "seconds")]
    pub relay_deadline: Duration,
    pub max_concurrency: usize,
    /// SOCKS5 proxy for `.onion` relays, e.g. `127.0.0.1:9050`.
    pub tor_proxy: Option<String>,
    /// Hex or nsec key signing the write-check event. Ephemeral when unset.
    #[serde(skip_serializing)]
    pub secret_key: Option<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            info_timeout: Duration::from_secs(10),
            relay_deadline: Duration::from_secs(45),
            max_concurrency: 16,
            tor_proxy: None,
            secret_key: None,
        }
    }
}

impl ProbeConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Apply the process environment on top of the current values.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(proxy) = lookup(TOR_PROXY_ENV).filter(|value| !value.trim().is_empty()) {
            self.tor_proxy = Some(proxy.trim().to_string());
        }
        if let Some(key) = lookup(SECRET_KEY_ENV).filter(|value| !value.trim().is_empty()) {
            self.secret_key = Some(key.trim().to_string());
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(ProbeError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("read_timeout", self.read_timeout),
            ("write_timeout", self.write_timeout),
            ("info_timeout", self.info_timeout),
            ("relay_deadline", self.relay_deadline),
        ] {
            if value.is_zero() {
                return Err(ProbeError::Config(format!("{name} must be positive")));
            }
        }
        if self.relay_deadline < self.connect_timeout {
            return Err(ProbeError::Config(format!(
                "relay_deadline ({:?}) must not be shorter than connect_timeout ({:?})",
                self.relay_deadline, self.connect_timeout
            )));
        }
        Ok(())
    }

    /// Worst case of the sequential checks on one connection.
    pub fn check_budget(&self) -> Duration {
        self.connect_timeout
            .saturating_add(self.read_timeout)
            .saturating_add(self.write_timeout)
    }

    /// Keypair signing the write-check event.
    pub fn keypair(&self) -> Result<Keypair> {
        match &self.secret_key {
            Some(secret) => Ok(Keypair::from_secret_hex(secret)?),
            None => Ok(Keypair::generate()),
        }
    }

    /// Connection settings for one probe connection.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            connect_timeout: self.connect_timeout,
            publish_timeout: self.write_timeout,
            proxy: self.tor_proxy.clone(),
            proxy_all: false,
            ..RelayConfig::default()
        }
    }
}

mod seconds {
    use super::{Deserialize, Deserializer, Duration, Serializer};
    use serde::de::Error;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(D::Error::custom)
    }
}
