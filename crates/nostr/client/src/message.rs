//! NIP-01 wire frames.
//!
//! Inbound text is parsed once into [`RelayMessage`]; everything downstream
//! matches on the variant. Frames with an unrecognised tag parse to
//! [`RelayMessage::Unknown`] so the caller can skip them without treating
//! them as malformed.

use crate::error::{ClientError, Result};
use nostr::{Event, Filter};
use serde_json::{Value, json};

/// Frame sent by a client to a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// `["EVENT", <event>]`
    Event(Event),
    /// `["REQ", <subscription_id>, <filter>, ...]`
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },
    /// `["CLOSE", <subscription_id>]`
    Close { subscription_id: String },
    /// `["AUTH", <event>]`
    Auth(Event),
}

/// Frame received from a relay.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayMessage {
    Event(String, Event),
    Ok(String, bool, String),
    Eose(String),
    Notice(String),
    Closed(String, String),
    Auth(String),
    Unknown(String),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Event(event) => json!(["EVENT", event]),
            Self::Req {
                subscription_id,
                filters,
            } => {
                let mut frame = vec![json!("REQ"), json!(subscription_id)];
                frame.extend(filters.iter().map(Filter::to_value));
                Value::Array(frame)
            }
            Self::Close { subscription_id } => json!(["CLOSE", subscription_id]),
            Self::Auth(event) => json!(["AUTH", event]),
        };
        Ok(serde_json::to_string(&value)?)
    }

    /// Parse a client frame (relay side).
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let array = frame_array(&value)?;

        match frame_tag(array)? {
            "EVENT" => Ok(Self::Event(event_at(array, 1, "EVENT")?)),
            "AUTH" => Ok(Self::Auth(event_at(array, 1, "AUTH")?)),
            "REQ" => {
                let subscription_id = string_at(array, 1, "REQ subscription id")?;
                let filters = array[2..]
                    .iter()
                    .map(Filter::from_value)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(Self::Req {
                    subscription_id,
                    filters,
                })
            }
            "CLOSE" => Ok(Self::Close {
                subscription_id: string_at(array, 1, "CLOSE subscription id")?,
            }),
            other => Err(ClientError::Protocol(format!(
                "unknown client message kind: {other}"
            ))),
        }
    }
}

impl RelayMessage {
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;
        let array = frame_array(&value)?;

        match frame_tag(array)? {
            "EVENT" => {
                if array.len() < 3 {
                    return Err(ClientError::Protocol("invalid EVENT message".to_string()));
                }
                let subscription_id = string_at(array, 1, "EVENT subscription id")?;
                let event = event_at(array, 2, "EVENT")?;
                Ok(Self::Event(subscription_id, event))
            }
            "OK" => {
                if array.len() < 3 {
                    return Err(ClientError::Protocol("invalid OK message".to_string()));
                }
                let event_id = string_at(array, 1, "OK event id")?;
                let accepted = array[2]
                    .as_bool()
                    .ok_or_else(|| ClientError::Protocol("invalid OK accepted flag".to_string()))?;
                // Some relays omit the message on success.
                let message = match array.get(3) {
                    None => String::new(),
                    Some(_) => string_at(array, 3, "OK message text")?,
                };
                Ok(Self::Ok(event_id, accepted, message))
            }
            "EOSE" => Ok(Self::Eose(string_at(array, 1, "EOSE subscription id")?)),
            "NOTICE" => Ok(Self::Notice(string_at(array, 1, "NOTICE message text")?)),
            "CLOSED" => {
                let subscription_id = string_at(array, 1, "CLOSED subscription id")?;
                let reason = match array.get(2) {
                    None => String::new(),
                    Some(_) => string_at(array, 2, "CLOSED reason")?,
                };
                Ok(Self::Closed(subscription_id, reason))
            }
            "AUTH" => Ok(Self::Auth(string_at(array, 1, "AUTH challenge")?)),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }

    /// Encode as a relay would send it.
    pub fn to_json(&self) -> Result<String> {
        let value = match self {
            Self::Event(subscription_id, event) => json!(["EVENT", subscription_id, event]),
            Self::Ok(event_id, accepted, message) => json!(["OK", event_id, accepted, message]),
            Self::Eose(subscription_id) => json!(["EOSE", subscription_id]),
            Self::Notice(message) => json!(["NOTICE", message]),
            Self::Closed(subscription_id, reason) => json!(["CLOSED", subscription_id, reason]),
            Self::Auth(challenge) => json!(["AUTH", challenge]),
            Self::Unknown(tag) => json!([tag]),
        };
        Ok(serde_json::to_string(&value)?)
    }

    /// Subscription id carried by `EVENT`, `EOSE` and `CLOSED` frames.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            Self::Event(id, _) | Self::Eose(id) | Self::Closed(id, _) => Some(id),
            _ => None,
        }
    }
}

fn frame_array(value: &Value) -> Result<&[Value]> {
    let array = value
        .as_array()
        .ok_or_else(|| ClientError::Protocol("expected JSON array message".to_string()))?;
    if array.is_empty() {
        return Err(ClientError::Protocol("empty message".to_string()));
    }
    Ok(array)
}

fn frame_tag(array: &[Value]) -> Result<&str> {
    array[0]
        .as_str()
        .ok_or_else(|| ClientError::Protocol("missing message kind".to_string()))
}

fn string_at(array: &[Value], index: usize, what: &str) -> Result<String> {
    array
        .get(index)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| ClientError::Protocol(format!("invalid {what}")))
}

fn event_at(array: &[Value], index: usize, what: &str) -> Result<Event> {
    let payload = array
        .get(index)
        .ok_or_else(|| ClientError::Protocol(format!("invalid {what} message")))?;
    serde_json::from_value(payload.clone())
        .map_err(|error| ClientError::Protocol(format!("invalid {what} payload: {error}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> Event {
        Event {
            id: "id".to_string(),
            pubkey: "pubkey".to_string(),
            created_at: 1,
            kind: 1,
            tags: vec![],
            content: "hello".to_string(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn parse_known_message_kinds() -> Result<()> {
        let expected_messages = vec![
            RelayMessage::Event("sub".to_string(), sample_event()),
            RelayMessage::Ok("event-id".to_string(), true, "accepted".to_string()),
            RelayMessage::Ok("event-id".to_string(), false, "blocked: no".to_string()),
            RelayMessage::Eose("sub".to_string()),
            RelayMessage::Notice("relay notice".to_string()),
            RelayMessage::Closed("sub".to_string(), "error: shutting down".to_string()),
            RelayMessage::Auth("challenge-token".to_string()),
        ];

        for expected in expected_messages {
            let parsed = RelayMessage::parse(&expected.to_json()?)?;
            assert_eq!(parsed, expected);
        }

        Ok(())
    }

    #[test]
    fn parse_unknown_message_kind() -> Result<()> {
        let parsed = RelayMessage::parse(r#"["COUNT","sub",{"count":3}]"#)?;
        assert_eq!(parsed, RelayMessage::Unknown("COUNT".to_string()));
        Ok(())
    }

    #[test]
    fn parse_short_ok_without_message() -> Result<()> {
        let parsed = RelayMessage::parse(r#"["OK","event-id",true]"#)?;
        assert_eq!(
            parsed,
            RelayMessage::Ok("event-id".to_string(), true, String::new())
        );
        Ok(())
    }

    #[test]
    fn parse_malformed_frames() {
        struct Case {
            name: &'static str,
            input: &'static str,
            expected_error_fragment: &'static str,
        }

        let cases = vec![
            Case {
                name: "not json",
                input: "EVENT sub",
                expected_error_fragment: "serialization error",
            },
            Case {
                name: "non-array payload",
                input: r#"{"kind":"EVENT"}"#,
                expected_error_fragment: "expected JSON array message",
            },
            Case {
                name: "empty array",
                input: "[]",
                expected_error_fragment: "empty message",
            },
            Case {
                name: "kind is not string",
                input: "[123]",
                expected_error_fragment: "missing message kind",
            },
            Case {
                name: "event too short",
                input: r#"["EVENT","sub"]"#,
                expected_error_fragment: "invalid EVENT message",
            },
            Case {
                name: "event subscription id type",
                input: r#"["EVENT",123,{"id":"id"}]"#,
                expected_error_fragment: "invalid EVENT subscription id",
            },
            Case {
                name: "event payload shape",
                input: r#"["EVENT","sub",{"id":"id"}]"#,
                expected_error_fragment: "invalid EVENT payload",
            },
            Case {
                name: "ok too short",
                input: r#"["OK","event-id"]"#,
                expected_error_fragment: "invalid OK message",
            },
            Case {
                name: "ok accepted type",
                input: r#"["OK","event-id","yes","accepted"]"#,
                expected_error_fragment: "invalid OK accepted flag",
            },
            Case {
                name: "ok message text type",
                input: r#"["OK","event-id",true,42]"#,
                expected_error_fragment: "invalid OK message text",
            },
            Case {
                name: "eose too short",
                input: r#"["EOSE"]"#,
                expected_error_fragment: "invalid EOSE subscription id",
            },
            Case {
                name: "notice text type",
                input: r#"["NOTICE",{"text":"msg"}]"#,
                expected_error_fragment: "invalid NOTICE message text",
            },
            Case {
                name: "closed reason type",
                input: r#"["CLOSED","sub",7]"#,
                expected_error_fragment: "invalid CLOSED reason",
            },
            Case {
                name: "auth challenge type",
                input: r#"["AUTH",{"challenge":"token"}]"#,
                expected_error_fragment: "invalid AUTH challenge",
            },
        ];

        for case in cases {
            let result = RelayMessage::parse(case.input);
            assert!(result.is_err(), "{}: expected an error", case.name);

            if let Err(error) = result {
                let rendered = error.to_string();
                assert!(
                    rendered.contains(case.expected_error_fragment),
                    "{}: expected error fragment '{}' in '{}'",
                    case.name,
                    case.expected_error_fragment,
                    rendered
                );
            }
        }
    }

    #[test]
    fn client_frames_encode_to_wire_shape() -> Result<()> {
        let req = ClientMessage::Req {
            subscription_id: "sub-1".to_string(),
            filters: vec![Filter::new().kind(1), Filter::new().tag('t', ["nostr"]).limit(5)],
        };
        assert_eq!(
            req.to_json()?,
            r##"["REQ","sub-1",{"kinds":[1]},{"#t":["nostr"],"limit":5}]"##
        );

        let close = ClientMessage::Close {
            subscription_id: "sub-1".to_string(),
        };
        assert_eq!(close.to_json()?, r#"["CLOSE","sub-1"]"#);
        Ok(())
    }

    #[test]
    fn client_frames_parse_back() -> Result<()> {
        let frames = vec![
            ClientMessage::Event(sample_event()),
            ClientMessage::Auth(sample_event()),
            ClientMessage::Req {
                subscription_id: "s".to_string(),
                filters: vec![Filter::new().kinds([1, 7]).since(3)],
            },
            ClientMessage::Close {
                subscription_id: "s".to_string(),
            },
        ];

        for frame in frames {
            assert_eq!(ClientMessage::parse(&frame.to_json()?)?, frame);
        }
        assert!(ClientMessage::parse(r#"["COUNT","s"]"#).is_err());
        Ok(())
    }
}
