mod support;

use std::sync::Arc;

use mqtt_client::SubscriptionStatus;
use mqtt_core::{Packet, QoS, SubscribeAck, SubscribeReturnCode};

use support::{connected_client, Received};

#[test]
fn repeated_subscribe_sends_exactly_one_subscribe_packet() {
    let (client, mut conn) = connected_client("sub-idempotent");
    let client = Arc::new(client);

    let first_client = client.clone();
    let first = std::thread::spawn(move || first_client.subscribe("a/b", QoS::AtLeastOnce));

    let packet_id = match conn.read_packet() {
        Received::Subscribe { packet_id, subscriptions } => {
            assert_eq!(subscriptions, vec![("a/b".to_string(), QoS::AtLeastOnce)]);
            packet_id
        }
        other => panic!("expected Subscribe, got {:?}", other),
    };

    conn.write_packet(Packet::SubscribeAck(SubscribeAck {
        packet_id,
        status: vec![SubscribeReturnCode::Success(QoS::AtLeastOnce)],
    }));

    let first = first.join().unwrap().unwrap();

    // A second subscribe for the same filter, now that it's active, must
    // reuse the existing broker-side subscription instead of writing
    // another Subscribe packet — and must hand back the same Subscription,
    // not a second independent handle.
    let second = client.subscribe("a/b", QoS::AtLeastOnce).unwrap();
    assert_eq!(second.status(), SubscriptionStatus::Active(QoS::AtLeastOnce));

    conn.write_packet(Packet::Publish(mqtt_core::Publish {
        dup: false,
        qos: QoS::AtLeastOnce,
        retain: false,
        topic: "a/b",
        packet_id: Some(1),
        payload: b"x",
    }));

    assert_eq!(conn.read_packet(), Received::PublishAck(1));

    // Both handles share a single channel, so the message is delivered
    // exactly once regardless of which handle drains it.
    let message = second.messages().recv().expect("delivered message");
    assert_eq!(message.payload.as_slice(), b"x");
    assert!(
        first.messages().try_recv().is_err(),
        "message already drained through the shared handle"
    );
}

#[test]
fn rejected_subscribe_surfaces_as_an_error() {
    let (client, mut conn) = connected_client("sub-rejected");

    let handle = std::thread::spawn(move || client.subscribe("a/b", QoS::AtMostOnce));

    let packet_id = match conn.read_packet() {
        Received::Subscribe { packet_id, .. } => packet_id,
        other => panic!("expected Subscribe, got {:?}", other),
    };

    conn.write_packet(Packet::SubscribeAck(SubscribeAck {
        packet_id,
        status: vec![SubscribeReturnCode::Failure],
    }));

    match handle.join().unwrap() {
        Err(_) => {}
        Ok(_) => panic!("broker rejected the subscribe but subscribe() succeeded"),
    }
}

#[test]
fn unsubscribe_resolves_by_packet_id() {
    let (client, mut conn) = connected_client("unsub");
    let client = Arc::new(client);

    let sub_client = client.clone();
    let handle = std::thread::spawn(move || sub_client.subscribe("a/b", QoS::AtMostOnce));

    let packet_id = match conn.read_packet() {
        Received::Subscribe { packet_id, .. } => packet_id,
        other => panic!("expected Subscribe, got {:?}", other),
    };
    conn.write_packet(Packet::SubscribeAck(SubscribeAck {
        packet_id,
        status: vec![SubscribeReturnCode::Success(QoS::AtMostOnce)],
    }));
    handle.join().unwrap().unwrap();

    assert!(client.subscription_status("a/b").is_some());

    let unsub_client = client.clone();
    let handle = std::thread::spawn(move || unsub_client.unsubscribe("a/b"));

    let packet_id = match conn.read_packet() {
        Received::Unsubscribe { packet_id, topic_filters } => {
            assert_eq!(topic_filters, vec!["a/b".to_string()]);
            packet_id
        }
        other => panic!("expected Unsubscribe, got {:?}", other),
    };
    conn.write_packet(Packet::UnsubscribeAck(mqtt_core::UnsubscribeAck { packet_id }));
    handle.join().unwrap().unwrap();

    assert!(client.subscription_status("a/b").is_none());
}
