//! End-to-end checks across event signing, wire decoding, filters and proof of work.

use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use nostr::nip13::{committed_target, event_difficulty};
use nostr::{
    Event, EventTemplate, Filter, Keypair, Nip01Error, compute_id, finalize_event, mine,
    serialize_event,
};
use serde_json::json;

const VECTOR_SECRET: &str = "7f7ff03d123792d6ac594bfa67bf6d0c0ab55b6b1fdb6249303fe861f1ccba9a";

fn hello_template() -> EventTemplate {
    EventTemplate {
        created_at: 1_700_000_000,
        kind: 1,
        tags: vec![],
        content: "hello".to_string(),
    }
}

#[test]
fn signed_event_survives_the_wire() -> anyhow::Result<()> {
    let keys = Keypair::generate();
    let event = finalize_event(&hello_template(), &keys.private_key)?;

    let wire = serde_json::to_string(&json!(["EVENT", "sub", event]))?;
    let frame: serde_json::Value = serde_json::from_str(&wire)?;
    let decoded = Event::from_value(&frame[2])?;

    assert_eq!(decoded.id, event.id);
    assert_eq!(decoded.pubkey, keys.public_key_hex());
    Ok(())
}

#[test]
fn content_mutation_is_an_id_mismatch() -> anyhow::Result<()> {
    let keys = Keypair::generate();
    let event = finalize_event(&hello_template(), &keys.private_key)?;

    let mut wire = serde_json::to_value(&event)?;
    wire["content"] = json!("hellO");
    let err = match Event::from_value(&wire) {
        Ok(_) => anyhow::bail!("mutated content must not validate"),
        Err(err) => err,
    };
    assert!(matches!(err, Nip01Error::IdMismatch { .. }));
    assert_eq!(wire["sig"], json!(event.sig));
    Ok(())
}

#[test]
fn reference_vector_id() -> anyhow::Result<()> {
    let keys = Keypair::from_secret_hex(VECTOR_SECRET)?;
    let event = finalize_event(&hello_template(), &keys.private_key)?;

    assert_eq!(
        serialize_event(&event.unsigned())?,
        "[0,\"17162c921dc4d2518f9a101db33695df1afb56ab82f5ff3e5da6eec3ca5cd917\",1700000000,1,[],\"hello\"]"
    );
    assert_eq!(
        event.id,
        "4601ba921e79b93ee9610fc66536bcab72e34da88d62bf03c662440682a45033"
    );
    assert_eq!(
        compute_id(&event.pubkey, 1_700_000_000, 1, &[], "hello")?,
        event.id
    );
    Ok(())
}

#[test]
fn mined_event_is_selected_by_filters() -> anyhow::Result<()> {
    let keys = Keypair::generate();
    let template = EventTemplate {
        tags: vec![vec!["t".into(), "pow".into()]],
        ..hello_template()
    };
    let cancel = AtomicBool::new(false);
    let event = mine(
        &template,
        &keys.private_key,
        6,
        Instant::now() + Duration::from_secs(30),
        &cancel,
    )?;

    assert!(event_difficulty(&event) >= 6);
    assert_eq!(committed_target(&event), Some(6));

    let filter = Filter::new()
        .author(keys.public_key_hex())
        .kind(1)
        .tag('t', ["pow"])
        .since(1_699_999_999)
        .until(1_700_000_001);
    assert!(filter.matches(&event));
    assert!(!filter.clone().kind(2).normalize().matches(&Event {
        kind: 3,
        ..event.clone()
    }));
    Ok(())
}
