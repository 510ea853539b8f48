use triad_engine::protocol::BridgeMessage;
use triad_engine::EventBus;
use uuid::Uuid;

#[test]
fn new_bus_has_no_subscribers() {
    let bus = EventBus::new();
    assert_eq!(bus.subscriber_count(), 0);
}

#[test]
fn subscribe_increments_count() {
    let bus = EventBus::new();
    let _rx1 = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 1);
    let _rx2 = bus.subscribe();
    assert_eq!(bus.subscriber_count(), 2);
}

#[test]
fn publish_delivers_to_subscriber() {
    let bus = EventBus::new();
    let rx = bus.subscribe();

    bus.publish(BridgeMessage::ConfigReloaded);

    let msg = rx.try_recv().expect("should receive message");
    assert!(matches!(msg, BridgeMessage::ConfigReloaded));
}

#[test]
fn publish_delivers_to_multiple_subscribers() {
    let bus = EventBus::new();
    let rx1 = bus.subscribe();
    let rx2 = bus.subscribe();
    let rx3 = bus.subscribe();

    bus.publish(BridgeMessage::SyncStarted { correlation_id: Uuid::new_v4(), project_identifier: Some("PROJ".into()) });

    assert!(matches!(rx1.try_recv().unwrap(), BridgeMessage::SyncStarted { .. }));
    assert!(matches!(rx2.try_recv().unwrap(), BridgeMessage::SyncStarted { .. }));
    assert!(matches!(rx3.try_recv().unwrap(), BridgeMessage::SyncStarted { .. }));
}

#[test]
fn dropped_receiver_is_pruned_on_publish() {
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
fn messages_are_delivered_in_publish_order() {
    let bus = EventBus::new();
    let rx = bus.subscribe();

    bus.publish(BridgeMessage::ConfigReloaded);
    bus.publish(BridgeMessage::SyncError { correlation_id: Uuid::new_v4(), project_identifier: None, message: "boom".into() });
    bus.publish(BridgeMessage::ConfigReloaded);

    assert!(matches!(rx.try_recv().unwrap(), BridgeMessage::ConfigReloaded));
    assert!(matches!(rx.try_recv().unwrap(), BridgeMessage::SyncError { .. }));
    assert!(matches!(rx.try_recv().unwrap(), BridgeMessage::ConfigReloaded));
}

#[test]
fn subscriber_does_not_receive_messages_published_before_subscription() {
    let bus = EventBus::new();

    bus.publish(BridgeMessage::ConfigReloaded);

    let rx = bus.subscribe();
    assert!(rx.try_recv().is_err());
}

#[test]
fn clone_shares_subscribers() {
    let bus1 = EventBus::new();
    let bus2 = bus1.clone();

    let rx = bus1.subscribe();
    assert_eq!(bus2.subscriber_count(), 1);

    bus2.publish(BridgeMessage::ConfigReloaded);
    assert!(rx.try_recv().is_ok());
}
