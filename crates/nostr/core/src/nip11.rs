//! NIP-11: Relay Information Document
//!
//! Relays serve this document over HTTP(S) on their websocket URL when the
//! request carries `Accept: application/nostr+json`. Parsing is lenient:
//! missing or wrongly typed fields are treated as absent and unknown fields
//! are kept in [`RelayInformation::extra`]. Only a body that is not a JSON
//! object is an error.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

/// Media type requested when fetching the document.
pub const NIP11_ACCEPT: &str = "application/nostr+json";

#[derive(Debug, Error)]
pub enum Nip11Error {
    #[error("relay information is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("relay information must be a JSON object")]
    NotAnObject,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RelayInformation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Administrative contact pubkey (hex)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pubkey: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supported_nips: Option<Vec<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub software: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub privacy_policy: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terms_of_service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limitation: Option<Limitation>,
    /// Fields not modelled above, verbatim.
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// Server limitations
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Limitation {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_message_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subscriptions: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_subid_length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_event_tags: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_content_length: Option<u64>,
    /// Minimum PoW difficulty (NIP-13)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_pow_difficulty: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_required: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub restricted_writes: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_lower_limit: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at_upper_limit: Option<u64>,
}

const KNOWN_FIELDS: &[&str] = &[
    "name",
    "description",
    "banner",
    "icon",
    "pubkey",
    "contact",
    "supported_nips",
    "software",
    "version",
    "privacy_policy",
    "terms_of_service",
    "limitation",
];

impl RelayInformation {
    /// Parse an HTTP response body.
    pub fn parse(body: &str) -> Result<Self, Nip11Error> {
        let value: Value = serde_json::from_str(body)?;
        Self::from_value(&value)
    }

    pub fn from_value(value: &Value) -> Result<Self, Nip11Error> {
        let object = value.as_object().ok_or(Nip11Error::NotAnObject)?;
        let text = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_owned);

        Ok(Self {
            name: text("name"),
            description: text("description"),
            banner: text("banner"),
            icon: text("icon"),
            pubkey: text("pubkey"),
            contact: text("contact"),
            supported_nips: object
                .get("supported_nips")
                .and_then(Value::as_array)
                .map(|nips| {
                    nips.iter()
                        .filter_map(|nip| nip.as_u64().and_then(|n| u32::try_from(n).ok()))
                        .collect()
                }),
            software: text("software"),
            version: text("version"),
            privacy_policy: text("privacy_policy"),
            terms_of_service: text("terms_of_service"),
            limitation: object
                .get("limitation")
                .and_then(Value::as_object)
                .map(Limitation::from_object),
            extra: object
                .iter()
                .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect(),
        })
    }

    pub fn supports_nip(&self, nip: u32) -> bool {
        self.supported_nips
            .as_ref()
            .is_some_and(|nips| nips.contains(&nip))
    }
}

impl Limitation {
    fn from_object(object: &Map<String, Value>) -> Self {
        let number = |key: &str| object.get(key).and_then(Value::as_u64);
        let flag = |key: &str| object.get(key).and_then(Value::as_bool);

        Self {
            max_message_length: number("max_message_length"),
            max_subscriptions: number("max_subscriptions"),
            max_limit: number("max_limit"),
            max_subid_length: number("max_subid_length"),
            max_event_tags: number("max_event_tags"),
            max_content_length: number("max_content_length"),
            min_pow_difficulty: number("min_pow_difficulty"),
            auth_required: flag("auth_required"),
            payment_required: flag("payment_required"),
            restricted_writes: flag("restricted_writes"),
            created_at_lower_limit: number("created_at_lower_limit"),
            created_at_upper_limit: number("created_at_upper_limit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_full_document() -> anyhow::Result<()> {
        let body = json!({
            "name": "relay.example",
            "description": "test relay",
            "pubkey": "ab".repeat(32),
            "contact": "mailto:ops@relay.example",
            "supported_nips": [1, 11, 42],
            "software": "git+https://example.invalid/relay.git",
            "version": "1.2.3",
            "limitation": {"max_subscriptions": 20, "auth_required": true, "min_pow_difficulty": 8},
            "relay_countries": ["DE"]
        })
        .to_string();

        let info = RelayInformation::parse(&body)?;
        assert_eq!(info.name.as_deref(), Some("relay.example"));
        assert_eq!(info.supported_nips, Some(vec![1, 11, 42]));
        assert!(info.supports_nip(42));
        assert!(!info.supports_nip(50));
        let limitation = info.limitation.unwrap_or_default();
        assert_eq!(limitation.max_subscriptions, Some(20));
        assert_eq!(limitation.auth_required, Some(true));
        assert_eq!(limitation.min_pow_difficulty, Some(8));
        assert_eq!(info.extra.get("relay_countries"), Some(&json!(["DE"])));
        Ok(())
    }

    #[test]
    fn wrong_types_are_treated_as_absent() -> anyhow::Result<()> {
        let info = RelayInformation::from_value(&json!({
            "name": 42,
            "supported_nips": "1,11",
            "limitation": [],
            "version": "0.1"
        }))?;
        assert_eq!(info.name, None);
        assert_eq!(info.supported_nips, None);
        assert_eq!(info.limitation, None);
        assert_eq!(info.version.as_deref(), Some("0.1"));
        Ok(())
    }

    #[test]
    fn empty_object_is_valid() -> anyhow::Result<()> {
        assert_eq!(RelayInformation::parse("{}")?, RelayInformation::default());
        Ok(())
    }

    #[test]
    fn non_object_bodies_fail() {
        assert!(matches!(RelayInformation::parse("<html>"), Err(Nip11Error::Json(_))));
        assert!(matches!(RelayInformation::parse("[1,2]"), Err(Nip11Error::NotAnObject)));
    }
}
