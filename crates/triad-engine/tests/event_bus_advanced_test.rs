use std::sync::{Arc, Barrier};
use std::thread;

use triad_engine::protocol::BridgeMessage;
use triad_engine::EventBus;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event publishing
// ---------------------------------------------------------------------------

#[test]
fn publish_issue_changed_to_subscribers() {
    let bus = EventBus::new();
    let rx = bus.subscribe();

    bus.publish(BridgeMessage::IssueChanged {
        project_identifier: "PROJ".into(),
        h_identifier: "PROJ-1".into(),
        target_system: "b".into(),
        kind: "update".into(),
    });

    let received = rx.try_recv().expect("subscriber should receive event");
    match received {
        BridgeMessage::IssueChanged { h_identifier, target_system, .. } => {
            assert_eq!(h_identifier, "PROJ-1");
            assert_eq!(target_system, "b");
        }
        other => panic!("expected IssueChanged, got {other:?}"),
    }
}

#[test]
fn publish_multiple_events_in_order() {
    let bus = EventBus::new();
    let rx = bus.subscribe();

    let keys = ["PROJ-1", "PROJ-2", "PROJ-3", "PROJ-4", "PROJ-5"];
    for k in &keys {
        bus.publish(BridgeMessage::IssueChanged {
            project_identifier: "PROJ".into(),
            h_identifier: (*k).into(),
            target_system: "v".into(),
            kind: "create".into(),
        });
    }

    for k in &keys {
        let msg = rx.try_recv().expect("should receive message");
        match msg {
            BridgeMessage::IssueChanged { h_identifier, .. } => assert_eq!(h_identifier, *k),
            other => panic!("expected IssueChanged, got {other:?}"),
        }
    }

    assert!(rx.try_recv().is_err());
}

#[test]
fn publish_with_no_subscribers_does_not_panic() {
    let bus = EventBus::new();
    assert_eq!(bus.subscriber_count(), 0);

    bus.publish(BridgeMessage::ConfigReloaded);
    bus.publish(BridgeMessage::SyncStarted { correlation_id: Uuid::new_v4(), project_identifier: None });

    assert_eq!(bus.subscriber_count(), 0);
}

// ---------------------------------------------------------------------------
// Subscriber management
// ---------------------------------------------------------------------------

#[test]
fn multiple_subscribers_all_receive() {
    let bus = EventBus::new();
    let receivers: Vec<_> = (0..5).map(|_| bus.subscribe()).collect();

    let correlation_id = Uuid::new_v4();
    bus.publish(BridgeMessage::SyncFinished {
        correlation_id,
        project_identifier: Some("PROJ".into()),
        issues_synced: 3,
        errors: 0,
        duration_ms: 120,
    });

    for (i, rx) in receivers.iter().enumerate() {
        let msg = rx.try_recv().unwrap_or_else(|_| panic!("subscriber {i} should have received the message"));
        match msg {
            BridgeMessage::SyncFinished { correlation_id: cid, .. } => assert_eq!(cid, correlation_id),
            other => panic!("subscriber {i} got unexpected {other:?}"),
        }
    }
}

#[test]
fn subscriber_count_tracks_drops() {
    let bus = EventBus::new();
    assert_eq!(bus.subscriber_count(), 0);

    let rx1 = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 1);

    let rx2 = bus.subscribe();
    let rx3 = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 3);

    drop(rx1);
    bus.publish(BridgeMessage::ConfigReloaded);
    assert_eq!(bus.subscriber_count(), 2);

    assert!(rx2.try_recv().is_ok());
    assert!(rx3.try_recv().is_ok());
}

// ---------------------------------------------------------------------------
// Message variants
// ---------------------------------------------------------------------------

#[test]
fn review_requested_carries_status() {
    let bus = EventBus::new();
    let rx = bus.subscribe();

    bus.publish(BridgeMessage::ReviewRequested {
        project_identifier: "PROJ".into(),
        h_identifier: "PROJ-7".into(),
        status: "in_review".into(),
    });

    match rx.try_recv().unwrap() {
        BridgeMessage::ReviewRequested { status, h_identifier, .. } => {
            assert_eq!(status, "in_review");
            assert_eq!(h_identifier, "PROJ-7");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn sync_error_carries_message_and_optional_project() {
    let bus = EventBus::new();
    let rx = bus.subscribe();

    let correlation_id = Uuid::new_v4();
    bus.publish(BridgeMessage::SyncError {
        correlation_id,
        project_identifier: None,
        message: "circuit open for System H".into(),
    });

    match rx.try_recv().unwrap() {
        BridgeMessage::SyncError { correlation_id: cid, project_identifier, message } => {
            assert_eq!(cid, correlation_id);
            assert!(project_identifier.is_none());
            assert!(message.contains("circuit open"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn bridge_message_roundtrips_through_json() {
    let original = BridgeMessage::IssueChanged {
        project_identifier: "PROJ".into(),
        h_identifier: "PROJ-9".into(),
        target_system: "v".into(),
        kind: "delete".into(),
    };

    let json = serde_json::to_string(&original).expect("serialize");
    let deserialized: BridgeMessage = serde_json::from_str(&json).expect("deserialize");

    match (&original, &deserialized) {
        (
            BridgeMessage::IssueChanged { h_identifier: a, target_system: b, .. },
            BridgeMessage::IssueChanged { h_identifier: c, target_system: d, .. },
        ) => {
            assert_eq!(a, c);
            assert_eq!(b, d);
        }
        _ => panic!("roundtrip changed message type"),
    }

    let finished = BridgeMessage::SyncFinished {
        correlation_id: Uuid::new_v4(),
        project_identifier: Some("PROJ".into()),
        issues_synced: 42,
        errors: 1,
        duration_ms: 999,
    };
    let json2 = serde_json::to_string(&finished).unwrap();
    let rt2: BridgeMessage = serde_json::from_str(&json2).unwrap();
    match rt2 {
        BridgeMessage::SyncFinished { issues_synced, errors, .. } => {
            assert_eq!(issues_synced, 42);
            assert_eq!(errors, 1);
        }
        _ => panic!("roundtrip failed for SyncFinished"),
    }
}

// ---------------------------------------------------------------------------
// Concurrent access
// ---------------------------------------------------------------------------

#[test]
fn concurrent_publish_and_subscribe() {
    let bus = EventBus::new();
    let num_publishers = 4;
    let msgs_per_publisher = 50;
    let rx = bus.subscribe();
    let barrier = Arc::new(Barrier::new(num_publishers + 1));

    let mut handles = Vec::new();
    for pub_id in 0..num_publishers {
        let bus_clone = bus.clone();
        let barrier_clone = Arc::clone(&barrier);
        let handle = thread::spawn(move || {
            barrier_clone.wait();
            for i in 0..msgs_per_publisher {
                bus_clone.publish(BridgeMessage::IssueChanged {
                    project_identifier: format!("PROJ-{pub_id}"),
                    h_identifier: format!("PROJ-{pub_id}-{i}"),
                    target_system: "b".into(),
                    kind: "update".into(),
                });
            }
        });
        handles.push(handle);
    }

    barrier.wait();

    for h in handles {
        h.join().expect("publisher thread panicked");
    }

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }

    assert_eq!(received, num_publishers * msgs_per_publisher, "expected every published message to be delivered");
}

#[test]
fn slow_consumer_does_not_lose_messages() {
    let bus = EventBus::new();
    let rx = bus.subscribe();

    let count = 1000;
    for i in 0..count {
        bus.publish(BridgeMessage::IssueChanged {
            project_identifier: "PROJ".into(),
            h_identifier: format!("PROJ-{i}"),
            target_system: "h".into(),
            kind: "update".into(),
        });
    }

    let mut received = 0;
    while rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, count);
}

// ---------------------------------------------------------------------------
// Edge cases
// ---------------------------------------------------------------------------

#[test]
fn dropped_subscriber_is_pruned_on_next_publish() {
    let bus = EventBus::new();
    let rx1 = bus.subscribe();
    let rx2 = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);

    drop(rx1);
    bus.publish(BridgeMessage::ConfigReloaded);
    assert_eq!(bus.subscriber_count(), 1);

    assert!(rx2.try_recv().is_ok());
}

#[test]
fn bus_clone_shares_subscribers() {
    let bus1 = EventBus::new();
    let bus2 = bus1.clone();

    let rx = bus1.subscribe();
    assert_eq!(bus2.subscriber_count(), 1);

    bus2.publish(BridgeMessage::ConfigReloaded);
    assert!(matches!(rx.try_recv().unwrap(), BridgeMessage::ConfigReloaded));
}

#[test]
fn default_creates_empty_bus() {
    let bus = EventBus::default();
    assert_eq!(bus.subscriber_count(), 0);
}
