use triad_engine::protocol::BridgeMessage;
use uuid::Uuid;

/// Helper: serialize a message to JSON and deserialize it back, asserting the
/// round-trip produces an equivalent value (via Debug representation).
fn roundtrip(msg: &BridgeMessage) {
    let json = serde_json::to_string(msg).expect("serialize");
    let back: BridgeMessage = serde_json::from_str(&json).expect("deserialize");
    assert_eq!(format!("{:?}", msg), format!("{:?}", back));
}

#[test]
fn sync_started_roundtrip() {
    roundtrip(&BridgeMessage::SyncStarted { correlation_id: Uuid::new_v4(), project_identifier: Some("PROJ".into()) });
    roundtrip(&BridgeMessage::SyncStarted { correlation_id: Uuid::new_v4(), project_identifier: None });
}

#[test]
fn sync_finished_roundtrip() {
    roundtrip(&BridgeMessage::SyncFinished {
        correlation_id: Uuid::new_v4(),
        project_identifier: Some("PROJ".into()),
        issues_synced: 12,
        errors: 2,
        duration_ms: 840,
    });
}

#[test]
fn issue_changed_roundtrip() {
    roundtrip(&BridgeMessage::IssueChanged {
        project_identifier: "PROJ".into(),
        h_identifier: "PROJ-5".into(),
        target_system: "v".into(),
        kind: "create".into(),
    });
}

#[test]
fn review_requested_roundtrip() {
    roundtrip(&BridgeMessage::ReviewRequested {
        project_identifier: "PROJ".into(),
        h_identifier: "PROJ-5".into(),
        status: "in_review".into(),
    });
}

#[test]
fn sync_error_roundtrip() {
    roundtrip(&BridgeMessage::SyncError {
        correlation_id: Uuid::new_v4(),
        project_identifier: Some("PROJ".into()),
        message: "transport error".into(),
    });
}

#[test]
fn config_reloaded_roundtrip() {
    roundtrip(&BridgeMessage::ConfigReloaded);
}

#[test]
fn json_uses_snake_case_tags() {
    let json = serde_json::to_value(&BridgeMessage::ConfigReloaded).unwrap();
    assert_eq!(json["type"], "config_reloaded");

    let json = serde_json::to_value(&BridgeMessage::SyncStarted { correlation_id: Uuid::new_v4(), project_identifier: None }).unwrap();
    assert_eq!(json["type"], "sync_started");

    let json = serde_json::to_value(&BridgeMessage::IssueChanged {
        project_identifier: "PROJ".into(),
        h_identifier: "PROJ-1".into(),
        target_system: "b".into(),
        kind: "update".into(),
    })
    .unwrap();
    assert_eq!(json["type"], "issue_changed");
}

#[test]
fn payload_is_nested_under_payload_key() {
    let json = serde_json::to_value(&BridgeMessage::SyncError { correlation_id: Uuid::new_v4(), project_identifier: None, message: "x".into() }).unwrap();
    assert!(json.get("payload").is_some());
    assert_eq!(json["payload"]["message"], "x");
}
