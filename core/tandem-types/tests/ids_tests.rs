use proptest::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;
use tandem_types::{Error, MAX_PEER_ID_LEN, PeerId};

// ── Generation ────────────────────────────────────────────────────

#[test]
fn generated_ids_are_unique() {
    let a = PeerId::generate();
    let b = PeerId::generate();
    assert_ne!(a, b);
}

#[test]
fn generated_id_is_a_valid_peer_id() {
    let id = PeerId::generate();
    let reparsed = PeerId::parse(id.as_str()).unwrap();
    assert_eq!(id, reparsed);
    assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
}

// ── Parsing ───────────────────────────────────────────────────────

#[test]
fn parse_accepts_simple_ids() {
    for s in ["H1", "headless-01", "lab_rig", "a", "kiosk 3"] {
        assert!(PeerId::parse(s).is_ok(), "{s:?} should be accepted");
    }
}

#[test]
fn parse_rejects_empty() {
    let err = PeerId::parse("").unwrap_err();
    assert!(matches!(err, Error::InvalidPeerId { reason: "empty", .. }));
}

#[test]
fn parse_rejects_too_long() {
    let long = "a".repeat(MAX_PEER_ID_LEN + 1);
    assert!(PeerId::parse(&long).is_err());

    let max = "a".repeat(MAX_PEER_ID_LEN);
    assert!(PeerId::parse(&max).is_ok());
}

#[test]
fn parse_rejects_bad_edges() {
    for s in ["-abc", "abc-", "_x", "x_", " x", "x "] {
        assert!(PeerId::parse(s).is_err(), "{s:?} should be rejected");
    }
}

#[test]
fn parse_rejects_unsupported_characters() {
    for s in ["a/b", "a.b", "héllo", "a\tb", "a\nb"] {
        assert!(PeerId::parse(s).is_err(), "{s:?} should be rejected");
    }
}

#[test]
fn parse_rejects_consecutive_spaces() {
    assert!(PeerId::parse("a  b").is_err());
    assert!(PeerId::parse("a b").is_ok());
}

#[test]
fn from_str_matches_parse() {
    let id = PeerId::from_str("H1").unwrap();
    assert_eq!(id, PeerId::parse("H1").unwrap());
    assert!(PeerId::from_str("").is_err());
}

// ── Traits ────────────────────────────────────────────────────────

#[test]
fn display_is_the_raw_string() {
    let id = PeerId::parse("C1").unwrap();
    assert_eq!(id.to_string(), "C1");
    assert_eq!(id.as_ref(), "C1");
}

#[test]
fn ordering_is_bytewise() {
    let c = PeerId::parse("C1").unwrap();
    let h = PeerId::parse("H1").unwrap();
    assert!(c < h);
}

#[test]
fn hash_and_eq() {
    let id = PeerId::parse("H1").unwrap();
    let mut set = HashSet::new();
    set.insert(id.clone());
    set.insert(id);
    assert_eq!(set.len(), 1);
}

#[test]
fn serde_is_a_plain_string() {
    let id = PeerId::parse("H1").unwrap();
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"H1\"");

    let back: PeerId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn serde_rejects_invalid_ids() {
    assert!(serde_json::from_str::<PeerId>("\"\"").is_err());
    assert!(serde_json::from_str::<PeerId>("\"bad/id\"").is_err());
}

proptest! {
    #[test]
    fn alphanumeric_ids_always_parse(s in "[a-zA-Z0-9]{1,64}") {
        prop_assert!(PeerId::parse(&s).is_ok());
    }

    #[test]
    fn parse_never_panics(s in "\\PC{0,80}") {
        let _ = PeerId::parse(&s);
    }
}
