use std::str::FromStr;
use tandem_types::{PeerId, PeerIdentity, Role};

#[test]
fn only_controller_dials() {
    assert!(Role::Controller.dials());
    assert!(!Role::Headless.dials());
}

#[test]
fn role_display_and_parse() {
    assert_eq!(Role::Controller.to_string(), "controller");
    assert_eq!(Role::Headless.to_string(), "headless");
    assert_eq!(Role::from_str("Headless").unwrap(), Role::Headless);
    assert_eq!(Role::from_str("CONTROLLER").unwrap(), Role::Controller);
    assert!(Role::from_str("observer").is_err());
}

#[test]
fn role_serde_lowercase() {
    let json = serde_json::to_string(&Role::Headless).unwrap();
    assert_eq!(json, "\"headless\"");
    let back: Role = serde_json::from_str("\"controller\"").unwrap();
    assert_eq!(back, Role::Controller);
}

#[test]
fn headless_uses_the_supplied_id() {
    let h1 = PeerId::parse("H1").unwrap();
    let identity = PeerIdentity::resolve(&h1, Role::Headless);

    assert_eq!(identity.local, h1);
    assert_eq!(identity.remote, None);
    assert_eq!(identity.role, Role::Headless);
}

#[test]
fn headless_id_is_stable_across_resolves() {
    let h1 = PeerId::parse("H1").unwrap();
    let first = PeerIdentity::resolve(&h1, Role::Headless);
    let second = PeerIdentity::resolve(&h1, Role::Headless);
    assert_eq!(first, second);
}

#[test]
fn controller_gets_a_fresh_id_and_dials_headless() {
    let h1 = PeerId::parse("H1").unwrap();
    let first = PeerIdentity::resolve(&h1, Role::Controller);
    let second = PeerIdentity::resolve(&h1, Role::Controller);

    assert_ne!(first.local, h1);
    assert_eq!(first.remote, Some(h1.clone()));
    assert_ne!(first.local, second.local);
}
