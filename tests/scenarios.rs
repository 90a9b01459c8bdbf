//! End-to-end scenario tests driven directly through the WAL message
//! processor and transformation engine, covering insert/update/delete/
//! truncate and the `extract`/`filter` built-ins operating on the events
//! those row changes produce.

use pgo_logrepl::event::Op;
use pgo_logrepl::replication::MessageProcessor;
use pgo_logrepl::transform::{Outcome, TransformConfig, TransformationRegistry};

fn relation_bytes(oid: u32, replica_identity: u8, columns: &[(&str, u32)]) -> Vec<u8> {
    let mut buf = vec![b'R'];
    buf.extend_from_slice(&oid.to_be_bytes());
    buf.extend_from_slice(b"public\0");
    buf.extend_from_slice(b"accounts\0");
    buf.push(replica_identity);
    buf.extend_from_slice(&(columns.len() as i16).to_be_bytes());
    for (name, type_oid) in columns {
        buf.push(1); // key flag, irrelevant to these tests
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&type_oid.to_be_bytes());
        buf.extend_from_slice(&(-1i32).to_be_bytes());
    }
    buf
}

fn text_tuple(values: &[&str]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(values.len() as i16).to_be_bytes());
    for v in values {
        buf.push(b't');
        buf.extend_from_slice(&(v.len() as i32).to_be_bytes());
        buf.extend_from_slice(v.as_bytes());
    }
    buf
}

fn insert_bytes(oid: u32, values: &[&str]) -> Vec<u8> {
    let mut buf = vec![b'I'];
    buf.extend_from_slice(&oid.to_be_bytes());
    buf.push(b'N');
    buf.extend(text_tuple(values));
    buf
}

/// Update under REPLICA IDENTITY FULL: the wire message carries an 'O' old
/// tuple ahead of the new one.
fn update_full_bytes(oid: u32, old: &[&str], new: &[&str]) -> Vec<u8> {
    let mut buf = vec![b'U'];
    buf.extend_from_slice(&oid.to_be_bytes());
    buf.push(b'O');
    buf.extend(text_tuple(old));
    buf.push(b'N');
    buf.extend(text_tuple(new));
    buf
}

fn delete_full_bytes(oid: u32, old: &[&str]) -> Vec<u8> {
    let mut buf = vec![b'D'];
    buf.extend_from_slice(&oid.to_be_bytes());
    buf.push(b'O');
    buf.extend(text_tuple(old));
    buf
}

fn truncate_bytes(oids: &[u32]) -> Vec<u8> {
    let mut buf = vec![b'T'];
    buf.extend_from_slice(&(oids.len() as u32).to_be_bytes());
    buf.push(0);
    for oid in oids {
        buf.extend_from_slice(&oid.to_be_bytes());
    }
    buf
}

const TEXT_OID: u32 = 25;

#[test]
fn insert_produces_create_event_with_only_after() {
    let mut processor = MessageProcessor::new();
    processor
        .process(
            &relation_bytes(1, b'd', &[("id", TEXT_OID), ("email", TEXT_OID)]),
            0,
            "pg1",
            "appdb",
            0,
        )
        .unwrap();

    let events = processor
        .process(&insert_bytes(1, &["1", "a@example.com"]), 10, "pg1", "appdb", 1000)
        .unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.payload.op, Op::Create);
    assert!(event.payload.before.is_none());
    assert_eq!(event.payload.after.as_ref().unwrap()["email"], "a@example.com");
}

#[test]
fn update_under_replica_identity_full_carries_before_and_after() {
    let mut processor = MessageProcessor::new();
    processor
        .process(
            &relation_bytes(2, b'f', &[("id", TEXT_OID), ("email", TEXT_OID)]),
            0,
            "pg1",
            "appdb",
            0,
        )
        .unwrap();

    let events = processor
        .process(
            &update_full_bytes(2, &["1", "old@example.com"], &["1", "new@example.com"]),
            20,
            "pg1",
            "appdb",
            2000,
        )
        .unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.payload.op, Op::Update);
    assert_eq!(event.payload.before.as_ref().unwrap()["email"], "old@example.com");
    assert_eq!(event.payload.after.as_ref().unwrap()["email"], "new@example.com");
}

#[test]
fn delete_produces_event_with_only_before() {
    let mut processor = MessageProcessor::new();
    processor
        .process(
            &relation_bytes(3, b'f', &[("id", TEXT_OID), ("email", TEXT_OID)]),
            0,
            "pg1",
            "appdb",
            0,
        )
        .unwrap();

    let events = processor
        .process(&delete_full_bytes(3, &["1", "gone@example.com"]), 30, "pg1", "appdb", 3000)
        .unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.payload.op, Op::Delete);
    assert!(event.payload.after.is_none());
    assert_eq!(event.payload.before.as_ref().unwrap()["email"], "gone@example.com");
}

#[test]
fn truncate_produces_event_for_cached_relation() {
    let mut processor = MessageProcessor::new();
    processor
        .process(
            &relation_bytes(4, b'd', &[("id", TEXT_OID)]),
            0,
            "pg1",
            "appdb",
            0,
        )
        .unwrap();

    let events = processor.process(&truncate_bytes(&[4]), 40, "pg1", "appdb", 4000).unwrap();

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert_eq!(event.payload.op, Op::Truncate);
    assert_eq!(event.payload.source.table, "accounts");
}

#[test]
fn extract_transformation_keeps_only_configured_fields() {
    let mut processor = MessageProcessor::new();
    processor
        .process(
            &relation_bytes(5, b'd', &[("id", TEXT_OID), ("email", TEXT_OID), ("ssn", TEXT_OID)]),
            0,
            "pg1",
            "appdb",
            0,
        )
        .unwrap();
    let events = processor
        .process(&insert_bytes(5, &["1", "a@example.com", "secret"]), 50, "pg1", "appdb", 5000)
        .unwrap();

    let registry = TransformationRegistry::with_builtins();
    let chain = registry
        .build_chain(&[TransformConfig {
            transform_type: "extract".to_string(),
            config: serde_json::json!({"fields": ["id", "email"]}),
        }])
        .unwrap();

    let Outcome::Pass(event) = chain.apply(events.into_iter().next().unwrap()).unwrap() else {
        panic!("extract must not drop");
    };
    let after = event.payload.after.unwrap();
    assert!(after.contains_key("id"));
    assert!(after.contains_key("email"));
    assert!(!after.contains_key("ssn"));
}

#[test]
fn filter_transformation_drops_events_by_operation() {
    let mut processor = MessageProcessor::new();
    processor
        .process(&relation_bytes(6, b'd', &[("id", TEXT_OID)]), 0, "pg1", "appdb", 0)
        .unwrap();
    let insert_events = processor.process(&insert_bytes(6, &["1"]), 60, "pg1", "appdb", 6000).unwrap();
    let truncate_events = processor.process(&truncate_bytes(&[6]), 70, "pg1", "appdb", 7000).unwrap();

    let registry = TransformationRegistry::with_builtins();
    let chain = registry
        .build_chain(&[TransformConfig {
            transform_type: "filter".to_string(),
            config: serde_json::json!({"operations": ["c"]}),
        }])
        .unwrap();

    assert!(matches!(
        chain.apply(insert_events.into_iter().next().unwrap()).unwrap(),
        Outcome::Pass(_)
    ));
    assert!(matches!(
        chain.apply(truncate_events.into_iter().next().unwrap()).unwrap(),
        Outcome::Drop
    ));
}
