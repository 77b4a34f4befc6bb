//! Relay addresses.

use std::fmt;
use std::str::FromStr;

use serde::{Serialize, Serializer};
use url::Url;

use crate::error::{ClientError, Result};

/// Network a relay is reachable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Clearnet,
    Tor,
}

/// A normalized `ws://` or `wss://` relay URL.
///
/// Hosts are lowercased, a missing scheme defaults to `wss://`, fragments are
/// dropped and a bare trailing slash is removed, so equal relays compare equal.
/// `.onion` hosts must be a v2 (16 character) or v3 (56 character) address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelayUrl {
    url: Url,
    normalized: String,
}

impl RelayUrl {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ClientError::InvalidUrl("empty relay URL".to_string()));
        }

        let mut url = if trimmed.contains("://") {
            Url::parse(trimmed)?
        } else {
            Url::parse(&format!("wss://{trimmed}"))?
        };

        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err(ClientError::InvalidUrl(format!(
                "URL must use ws:// or wss:// scheme, got: {}",
                url.scheme()
            )));
        }
        let Some(host) = url.host_str().filter(|host| !host.is_empty()) else {
            return Err(ClientError::InvalidUrl(format!("missing host in {trimmed}")));
        };
        if host.ends_with(".onion") && !is_onion_address(host) {
            return Err(ClientError::InvalidUrl(format!("invalid onion address: {host}")));
        }
        url.set_fragment(None);

        let mut normalized = url.to_string();
        if url.query().is_none() {
            while normalized.ends_with('/') {
                normalized.pop();
            }
        }

        Ok(Self { url, normalized })
    }

    pub fn as_str(&self) -> &str {
        &self.normalized
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .unwrap_or(if self.is_secure() { 443 } else { 80 })
    }

    pub fn is_secure(&self) -> bool {
        self.url.scheme() == "wss"
    }

    pub fn network(&self) -> Network {
        if self.host().ends_with(".onion") {
            Network::Tor
        } else {
            Network::Clearnet
        }
    }

    /// HTTP(S) address of the relay information document.
    pub fn info_url(&self) -> Result<Url> {
        let mut url = self.url.clone();
        let scheme = if self.is_secure() { "https" } else { "http" };
        url.set_scheme(scheme)
            .map_err(|()| ClientError::InvalidUrl(format!("cannot derive {scheme} URL for {self}")))?;
        Ok(url)
    }
}

fn is_onion_address(host: &str) -> bool {
    host.strip_suffix(".onion").is_some_and(|label| {
        matches!(label.len(), 16 | 56)
            && label
                .bytes()
                .all(|b| b.is_ascii_lowercase() || (b'2'..=b'7').contains(&b))
    })
}

/// Characters that end a URL embedded in prose.
const DELIMITERS: &[char] = &['<', '>', '"', '\'', '`', '(', ')', '{', '}', '|', '\\', '^'];

/// Punctuation stripped from the end of a candidate, e.g. a full stop.
const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', '\'', '"'];

/// Every distinct valid `ws://`/`wss://` relay URL in `text`, normalized, in
/// order of first appearance. Invalid candidates are skipped.
pub fn find_relay_urls(text: &str) -> Vec<RelayUrl> {
    let mut relays: Vec<RelayUrl> = Vec::new();
    let mut position = 0;
    while let Some(start) = next_scheme(text, position) {
        let end = text[start..]
            .find(|c: char| c.is_whitespace() || DELIMITERS.contains(&c))
            .map_or(text.len(), |len| start + len);
        position = end;

        let candidate = text[start..end].trim_end_matches(|c: char| TRAILING.contains(&c));
        if let Ok(relay) = RelayUrl::parse(candidate)
            && !relays.contains(&relay)
        {
            relays.push(relay);
        }
    }
    relays
}

/// Byte offset of the next `ws://` or `wss://` at a word boundary.
fn next_scheme(text: &str, from: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    (from..bytes.len()).find(|&i| {
        let scheme = [b"ws://".as_slice(), b"wss://".as_slice()].iter().any(|scheme| {
            bytes
                .get(i..i + scheme.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(scheme))
        });
        let boundary = i == 0 || {
            let previous = bytes[i - 1];
            !(previous.is_ascii_alphanumeric() || matches!(previous, b'+' | b'-' | b'.'))
        };
        scheme && boundary
    })
}

impl fmt::Display for RelayUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.normalized)
    }
}

impl FromStr for RelayUrl {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for RelayUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.normalized)
    }
}
