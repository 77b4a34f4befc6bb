//! NIP-42: Authentication of clients to relays.

use crate::nip01::{Event, EventTemplate, unix_now};
use crate::tag_parsing::{find_tag_value, tag};

pub const AUTH_KIND: u16 = 22242;

/// Unsigned kind-22242 template answering `challenge` from `relay_url`.
pub fn auth_event_template(relay_url: &str, challenge: &str) -> EventTemplate {
    EventTemplate {
        created_at: unix_now(),
        kind: AUTH_KIND,
        tags: vec![tag(["relay", relay_url]), tag(["challenge", challenge])],
        content: String::new(),
    }
}

/// Whether `event` is an auth event for this relay and challenge.
///
/// Relay URLs compare without a trailing slash. Signature validity is not
/// checked here.
pub fn is_auth_event_for(event: &Event, relay_url: &str, challenge: &str) -> bool {
    event.kind == AUTH_KIND
        && find_tag_value(&event.tags, "challenge") == Some(challenge)
        && find_tag_value(&event.tags, "relay")
            .is_some_and(|url| url.trim_end_matches('/') == relay_url.trim_end_matches('/'))
}
