//! Subscription filters (NIP-01 `REQ` payloads).
//!
//! Present fields combine with AND, values inside one field combine with OR.
//! `ids` and `authors` match the full hex value exactly. A tag constraint
//! `#x: [v, ..]` matches when the event carries an `x` tag whose first value
//! is one of `v`. `limit` only bounds the relay's result set and is never
//! evaluated by [`Filter::matches`].

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::nip01::{Event, is_lower_hex};
use crate::tag_parsing::tag_values;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("invalid {field}: {value:?} is not a 64-character hex string")]
    InvalidHex { field: &'static str, value: String },

    #[error("invalid tag name {0:?}: expected a single letter a-z or A-Z")]
    InvalidTagName(String),

    #[error("since ({since}) must not be greater than until ({until})")]
    InvalidRange { since: u64, until: u64 },

    #[error("limit must be a positive integer")]
    InvalidLimit,

    #[error("invalid {field}: {reason}")]
    InvalidType { field: String, reason: &'static str },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub ids: Option<Vec<String>>,
    pub authors: Option<Vec<String>>,
    pub kinds: Option<Vec<u16>>,
    /// Tag letter to accepted first values.
    pub tags: BTreeMap<char, Vec<String>>,
    pub since: Option<u64>,
    pub until: Option<u64>,
    pub limit: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids
            .get_or_insert_with(Vec::new)
            .extend(ids.into_iter().map(Into::into));
        self
    }

    pub fn id(self, id: impl Into<String>) -> Self {
        self.ids([id.into()])
    }

    pub fn authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors
            .get_or_insert_with(Vec::new)
            .extend(authors.into_iter().map(Into::into));
        self
    }

    pub fn author(self, author: impl Into<String>) -> Self {
        self.authors([author.into()])
    }

    pub fn kinds(mut self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.kinds.get_or_insert_with(Vec::new).extend(kinds);
        self
    }

    pub fn kind(self, kind: u16) -> Self {
        self.kinds([kind])
    }

    /// Add accepted values for the single-letter tag `letter`.
    pub fn tag<I, S>(mut self, letter: char, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags
            .entry(letter)
            .or_default()
            .extend(values.into_iter().map(Into::into));
        self
    }

    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: u64) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when no constraint is present (matches every event).
    pub fn is_empty(&self) -> bool {
        self.ids.is_none()
            && self.authors.is_none()
            && self.kinds.is_none()
            && self.tags.is_empty()
            && self.since.is_none()
            && self.until.is_none()
            && self.limit.is_none()
    }

    /// Canonical form: hex lowercased, every collection sorted and deduplicated,
    /// empty collections removed. Idempotent.
    pub fn normalize(mut self) -> Self {
        self.ids = normalize_hex(self.ids.take());
        self.authors = normalize_hex(self.authors.take());
        self.kinds = self.kinds.take().and_then(|mut kinds| {
            kinds.sort_unstable();
            kinds.dedup();
            (!kinds.is_empty()).then_some(kinds)
        });
        self.tags = std::mem::take(&mut self.tags)
            .into_iter()
            .filter_map(|(letter, mut values)| {
                values.sort();
                values.dedup();
                (!values.is_empty()).then_some((letter, values))
            })
            .collect();
        self
    }

    pub fn validate(&self) -> Result<(), FilterError> {
        for (field, values) in [("ids", &self.ids), ("authors", &self.authors)] {
            if let Some(bad) = values
                .iter()
                .flatten()
                .find(|value| !is_lower_hex(&value.to_ascii_lowercase(), 64))
            {
                return Err(FilterError::InvalidHex {
                    field,
                    value: bad.clone(),
                });
            }
        }

        if let Some(letter) = self.tags.keys().find(|letter| !letter.is_ascii_alphabetic()) {
            return Err(FilterError::InvalidTagName(letter.to_string()));
        }

        if let (Some(since), Some(until)) = (self.since, self.until)
            && since > until
        {
            return Err(FilterError::InvalidRange { since, until });
        }

        if self.limit == Some(0) {
            return Err(FilterError::InvalidLimit);
        }

        Ok(())
    }

    /// Ids and authors compare exactly; call [`Filter::normalize`] first to
    /// accept uppercase hex.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ids) = &self.ids
            && !ids.iter().any(|id| *id == event.id)
        {
            return false;
        }

        if let Some(authors) = &self.authors
            && !authors.iter().any(|author| *author == event.pubkey)
        {
            return false;
        }

        if let Some(kinds) = &self.kinds
            && !kinds.contains(&event.kind)
        {
            return false;
        }

        if let Some(since) = self.since
            && event.created_at < since
        {
            return false;
        }

        if let Some(until) = self.until
            && event.created_at > until
        {
            return false;
        }

        self.tags.iter().all(|(letter, accepted)| {
            let name = letter.to_string();
            tag_values(&event.tags, &name).any(|value| accepted.iter().any(|v| v == value))
        })
    }

    /// Wire JSON object (`{"kinds":[1],"#t":["nostr"],...}`).
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        if let Some(ids) = &self.ids {
            object.insert("ids".into(), Value::from(ids.clone()));
        }
        if let Some(authors) = &self.authors {
            object.insert("authors".into(), Value::from(authors.clone()));
        }
        if let Some(kinds) = &self.kinds {
            object.insert("kinds".into(), Value::from(kinds.clone()));
        }
        for (letter, values) in &self.tags {
            object.insert(format!("#{letter}"), Value::from(values.clone()));
        }
        if let Some(since) = self.since {
            object.insert("since".into(), Value::from(since));
        }
        if let Some(until) = self.until {
            object.insert("until".into(), Value::from(until));
        }
        if let Some(limit) = self.limit {
            object.insert("limit".into(), Value::from(limit));
        }
        Value::Object(object)
    }

    /// Parse a wire JSON object. Unknown keys are ignored.
    pub fn from_value(value: &Value) -> Result<Self, FilterError> {
        let object = value.as_object().ok_or(FilterError::InvalidType {
            field: "filter".into(),
            reason: "expected a JSON object",
        })?;

        let mut filter = Self::new();
        for (key, value) in object {
            match key.as_str() {
                "ids" => filter.ids = Some(string_list(key, value)?),
                "authors" => filter.authors = Some(string_list(key, value)?),
                "kinds" => {
                    let kinds = value
                        .as_array()
                        .and_then(|items| {
                            items
                                .iter()
                                .map(|kind| kind.as_u64().and_then(|k| u16::try_from(k).ok()))
                                .collect::<Option<Vec<u16>>>()
                        })
                        .ok_or_else(|| FilterError::InvalidType {
                            field: key.clone(),
                            reason: "expected an array of integers in 0..=65535",
                        })?;
                    filter.kinds = Some(kinds);
                }
                "since" => filter.since = Some(timestamp(key, value)?),
                "until" => filter.until = Some(timestamp(key, value)?),
                "limit" => filter.limit = Some(timestamp(key, value)?),
                tag if tag.starts_with('#') => {
                    let mut chars = tag[1..].chars();
                    let letter = match (chars.next(), chars.next()) {
                        (Some(letter), None) if letter.is_ascii_alphabetic() => letter,
                        _ => return Err(FilterError::InvalidTagName(tag[1..].to_string())),
                    };
                    filter.tags.insert(letter, string_list(key, value)?);
                }
                _ => {}
            }
        }

        filter.validate()?;
        Ok(filter)
    }
}

/// True when any filter matches (OR across the filters of one subscription).
pub fn matches_any(filters: &[Filter], event: &Event) -> bool {
    filters.iter().any(|filter| filter.matches(event))
}

fn normalize_hex(values: Option<Vec<String>>) -> Option<Vec<String>> {
    let mut values: Vec<String> = values?
        .into_iter()
        .map(|value| value.to_ascii_lowercase())
        .collect();
    values.sort();
    values.dedup();
    (!values.is_empty()).then_some(values)
}

fn string_list(field: &str, value: &Value) -> Result<Vec<String>, FilterError> {
    value
        .as_array()
        .and_then(|items| {
            items
                .iter()
                .map(|item| item.as_str().map(str::to_owned))
                .collect::<Option<Vec<String>>>()
        })
        .ok_or_else(|| FilterError::InvalidType {
            field: field.to_string(),
            reason: "expected an array of strings",
        })
}

fn timestamp(field: &str, value: &Value) -> Result<u64, FilterError> {
    value.as_u64().ok_or_else(|| FilterError::InvalidType {
        field: field.to_string(),
        reason: "expected a non-negative integer",
    })
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const T: u64 = 1_700_000_000;

    fn event(kind: u16, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: "ab".repeat(32),
            pubkey: "cd".repeat(32),
            created_at: T,
            kind,
            tags,
            content: String::new(),
            sig: "ef".repeat(64),
        }
    }

    fn tag(name: &str, value: &str) -> Vec<String> {
        vec![name.to_string(), value.to_string()]
    }

    #[test]
    fn kinds_match() {
        let note = event(1, vec![]);
        assert!(Filter::new().kind(1).matches(&note));
        assert!(!Filter::new().kind(2).matches(&note));
        assert!(Filter::new().kinds([2, 1]).matches(&note));
    }

    #[test]
    fn time_bounds_are_inclusive() {
        let note = event(1, vec![]);
        assert!(Filter::new().since(T - 1).until(T + 1).matches(&note));
        assert!(Filter::new().since(T).until(T).matches(&note));
        assert!(!Filter::new().since(T + 1).matches(&note));
        assert!(!Filter::new().until(T - 1).matches(&note));
    }

    #[test]
    fn ids_and_authors_need_full_value() {
        let note = event(1, vec![]);
        assert!(Filter::new().id("ab".repeat(32)).matches(&note));
        assert!(!Filter::new().id("abab").matches(&note));
        assert!(!Filter::new().author("cdcd").matches(&note));
        assert!(Filter::new().author("cd".repeat(32)).matches(&note));
    }

    #[test]
    fn ids_and_authors_match_exactly_until_normalized() {
        let note = event(1, vec![]);
        let upper_id = Filter::new().id("AB".repeat(32));
        let upper_author = Filter::new().author("CD".repeat(32));
        assert!(!upper_id.matches(&note));
        assert!(!upper_author.matches(&note));
        assert!(upper_id.normalize().matches(&note));
        assert!(upper_author.normalize().matches(&note));
    }

    #[test]
    fn tags_match_first_value() {
        let note = event(1, vec![tag("t", "nostr"), vec!["p".into(), "x".into(), "nostr".into()]]);
        assert!(Filter::new().tag('t', ["rust", "nostr"]).matches(&note));
        assert!(!Filter::new().tag('t', ["rust"]).matches(&note));
        assert!(!Filter::new().tag('p', ["nostr"]).matches(&note));
        assert!(!Filter::new().tag('e', ["nostr"]).matches(&note));
    }

    #[test]
    fn fields_combine_with_and() {
        let note = event(1, vec![tag("t", "nostr")]);
        assert!(Filter::new().kind(1).tag('t', ["nostr"]).matches(&note));
        assert!(!Filter::new().kind(1).tag('t', ["rust"]).matches(&note));
        assert!(!Filter::new().kind(7).tag('t', ["nostr"]).matches(&note));
    }

    #[test]
    fn limit_is_not_a_membership_test() {
        assert!(Filter::new().limit(1).matches(&event(1, vec![])));
    }

    #[test]
    fn matches_any_is_or() {
        let note = event(1, vec![]);
        let filters = vec![Filter::new().kind(2), Filter::new().kind(1)];
        assert!(matches_any(&filters, &note));
        assert!(!matches_any(&filters[..1], &note));
    }

    #[test]
    fn normalize_is_idempotent() {
        let raw = Filter::new()
            .ids(["BB".repeat(32), "aa".repeat(32), "bb".repeat(32)])
            .authors(Vec::<String>::new())
            .kinds([3, 1, 3])
            .tag('t', ["b", "a", "b"])
            .tag('e', Vec::<String>::new())
            .since(5);

        let once = raw.normalize();
        assert_eq!(once.ids, Some(vec!["aa".repeat(32), "bb".repeat(32)]));
        assert_eq!(once.authors, None);
        assert_eq!(once.kinds, Some(vec![1, 3]));
        assert_eq!(once.tags.get(&'t'), Some(&vec!["a".to_string(), "b".to_string()]));
        assert!(!once.tags.contains_key(&'e'));
        assert_eq!(once.clone().normalize(), once);
    }

    #[test]
    fn validate_rejects_bad_fields() {
        assert!(matches!(
            Filter::new().id("xyz").validate(),
            Err(FilterError::InvalidHex { field: "ids", .. })
        ));
        assert!(matches!(
            Filter::new().since(10).until(5).validate(),
            Err(FilterError::InvalidRange { .. })
        ));
        assert_eq!(Filter::new().limit(0).validate(), Err(FilterError::InvalidLimit));
        assert!(matches!(
            Filter::new().tag('1', ["x"]).validate(),
            Err(FilterError::InvalidTagName(_))
        ));
        assert_eq!(Filter::new().kind(1).limit(10).validate(), Ok(()));
    }

    #[test]
    fn wire_object_parses_and_renders() -> anyhow::Result<()> {
        let wire = json!({
            "kinds": [1, 30166],
            "#d": ["wss://relay.example"],
            "since": 10,
            "limit": 1,
            "search": "ignored"
        });
        let filter = Filter::from_value(&wire)?;
        assert_eq!(filter.kinds, Some(vec![1, 30166]));
        assert_eq!(filter.tags.get(&'d'), Some(&vec!["wss://relay.example".to_string()]));

        let rendered = filter.to_value();
        assert_eq!(rendered["#d"], json!(["wss://relay.example"]));
        assert_eq!(rendered["limit"], json!(1));
        assert!(rendered.get("search").is_none());
        assert!(rendered.get("ids").is_none());

        let decoded: Filter = serde_json::from_value(rendered)?;
        assert_eq!(decoded, filter);
        Ok(())
    }

    #[test]
    fn wire_object_rejects_bad_types() {
        assert!(Filter::from_value(&json!({"kinds": [70000]})).is_err());
        assert!(Filter::from_value(&json!({"#tag": ["x"]})).is_err());
        assert!(Filter::from_value(&json!({"ids": "ab"})).is_err());
        assert!(Filter::from_value(&json!({"since": -1})).is_err());
        assert!(Filter::from_value(&json!([])).is_err());
    }
}
