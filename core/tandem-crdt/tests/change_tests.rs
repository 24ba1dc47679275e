use serde_json::json;
use tandem_crdt::{
    Change, CrdtError, FORMAT_VERSION, MAX_COUNTER, ReplicationStore, decode_change,
    encode_change,
};
use tandem_types::PeerId;

fn sample() -> Change {
    Change {
        actor: PeerId::parse("H1").unwrap(),
        counter: 9,
        key: "session".into(),
        value: json!({"cmd": "start", "scene": 4}),
    }
}

#[test]
fn format_version_is_one() {
    assert_eq!(FORMAT_VERSION, 1);
}

#[test]
fn encode_then_decode_preserves_change() {
    let change = sample();
    assert_eq!(decode_change(&encode_change(&change)).unwrap(), change);
}

#[test]
fn decode_ignores_unknown_fields_from_newer_peers() {
    let bytes = br#"{"formatVersion":7,"actor":"C1","counter":2,"key":"pose","value":1,"deps":["x"],"origin":{"a":1}}"#;
    let change = decode_change(bytes).unwrap();
    assert_eq!(change.key, "pose");
    assert_eq!(change.counter, 2);
}

#[test]
fn decode_accepts_null_value() {
    let bytes = br#"{"formatVersion":1,"actor":"C1","counter":2,"key":"pose","value":null}"#;
    assert_eq!(decode_change(bytes).unwrap().value, json!(null));
}

#[test]
fn decode_rejects_missing_format_version() {
    let bytes = br#"{"actor":"C1","counter":2,"key":"pose","value":1}"#;
    assert!(matches!(decode_change(bytes), Err(CrdtError::Malformed(_))));
}

#[test]
fn decode_rejects_missing_value() {
    let bytes = br#"{"formatVersion":1,"actor":"C1","counter":2,"key":"pose"}"#;
    assert!(decode_change(bytes).is_err());
}

#[test]
fn decode_rejects_invalid_actor() {
    let bytes = br#"{"formatVersion":1,"actor":"","counter":2,"key":"pose","value":1}"#;
    assert!(matches!(decode_change(bytes), Err(CrdtError::Malformed(_))));
}

#[test]
fn decode_rejects_zero_counter() {
    let bytes = br#"{"formatVersion":1,"actor":"C1","counter":0,"key":"pose","value":1}"#;
    assert!(matches!(decode_change(bytes), Err(CrdtError::Invalid(_))));
}

#[test]
fn decode_rejects_counters_without_headroom() {
    let bytes = format!(
        r#"{{"formatVersion":1,"actor":"C1","counter":{},"key":"pose","value":1}}"#,
        u64::MAX
    );
    assert!(matches!(
        decode_change(bytes.as_bytes()),
        Err(CrdtError::Invalid("counter out of range"))
    ));

    let edge = format!(
        r#"{{"formatVersion":1,"actor":"C1","counter":{MAX_COUNTER},"key":"pose","value":1}}"#
    );
    assert_eq!(decode_change(edge.as_bytes()).unwrap().counter, MAX_COUNTER);
}

#[test]
fn huge_remote_counter_leaves_the_store_writable() {
    let mut store = ReplicationStore::new(PeerId::parse("H1").unwrap());
    let hostile = format!(
        r#"{{"formatVersion":1,"actor":"C1","counter":{},"key":"pose","value":1}}"#,
        u64::MAX
    );
    assert!(store.merge(hostile.as_bytes()).is_err());

    let edge = format!(
        r#"{{"formatVersion":1,"actor":"C1","counter":{MAX_COUNTER},"key":"pose","value":1}}"#
    );
    store.merge(edge.as_bytes()).unwrap();

    let local = store.apply("pose", json!(2));
    assert_eq!(local.counter, MAX_COUNTER + 1);
    assert_eq!(store.snapshot().get("pose"), Some(&json!(2)));
}

#[test]
fn decode_rejects_zero_format_version() {
    let bytes = br#"{"formatVersion":0,"actor":"C1","counter":1,"key":"pose","value":1}"#;
    assert!(matches!(decode_change(bytes), Err(CrdtError::Invalid(_))));
}

#[test]
fn decode_rejects_empty_key() {
    let bytes = br#"{"formatVersion":1,"actor":"C1","counter":1,"key":"","value":1}"#;
    assert!(matches!(decode_change(bytes), Err(CrdtError::Invalid("empty key"))));
}

#[test]
fn decode_rejects_non_object_payloads() {
    let payloads: [&[u8]; 5] = [b"", b"[]", b"42", b"\"change\"", b"\xff\xfe"];
    for bytes in payloads {
        assert!(decode_change(bytes).is_err());
    }
}

#[test]
fn decode_rejects_trailing_garbage() {
    let mut bytes = encode_change(&sample());
    bytes.extend_from_slice(b"{}");
    assert!(decode_change(&bytes).is_err());
}
