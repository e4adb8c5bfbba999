//! Tests for the pac-core library module.

use super::*;

#[test]
fn test_event_id_generation() {
    let id1 = EventId::new();
    let id2 = EventId::new();

    assert_ne!(id1, id2);
    assert!(!id1.as_str().is_empty());
}

#[test]
fn test_event_id_parse() {
    let id = EventId::new();

    let parsed: EventId = id.as_str().parse().unwrap();
    assert_eq!(parsed, id);

    let invalid = "not-a-ulid".parse::<EventId>();
    assert!(matches!(invalid, Err(ParseError::InvalidFormat { .. })));
}

/// Verify that secret values never appear in debug output.
#[test]
fn test_secret_value_debug_is_redacted() {
    let secret = SecretValue::from_string("hunter2".to_string());

    let printed = format!("{:?}", secret);

    assert!(!printed.contains("hunter2"));
    assert_eq!(secret.expose_secret(), "hunter2");
}

#[test]
fn test_secret_value_trailing_whitespace() {
    assert!(SecretValue::from_string("abc\n".to_string()).has_trailing_whitespace());
    assert!(SecretValue::from_string("abc ".to_string()).has_trailing_whitespace());
    assert!(!SecretValue::from_string("abc".to_string()).has_trailing_whitespace());
}

#[test]
fn test_trigger_type_wire_names_round_trip() {
    for trigger in [
        TriggerType::Push,
        TriggerType::PullRequest,
        TriggerType::PullRequestClosed,
        TriggerType::Retest,
        TriggerType::Cancel,
        TriggerType::Incoming,
    ] {
        assert_eq!(TriggerType::from_wire(trigger.as_str()), trigger);
    }
    assert_eq!(TriggerType::from_wire("nonsense"), TriggerType::None);
}
