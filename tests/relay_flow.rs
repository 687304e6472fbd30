//! End-to-end relay flow over the in-memory channel broker.
//!
//! Run with: cargo test --test relay_flow

use std::sync::Arc;
use std::time::Duration;

use streamrelay::bus::{init_stream_client, ChannelBroker};
use streamrelay::codec::RecordCodec;
use streamrelay::config::{Config, LifecycleConfig};
use streamrelay::consumer::StreamConsumer;
use streamrelay::gateway::{IngestionGateway, StreamStatus};
use streamrelay::lifecycle::{Component, LifecycleCoordinator, LifecycleState, ShutdownReason};
use streamrelay::producer::{LoggingDeliveryHandler, StreamProducer};
use streamrelay::registry::testing::RecordingConnection;
use streamrelay::registry::SubscriberRegistry;
use streamrelay::storage::{MessageStore, MockMessageStore};

struct Relay {
    coordinator: LifecycleCoordinator,
    gateway: IngestionGateway,
    registry: Arc<SubscriberRegistry>,
    store: Arc<MockMessageStore>,
}

fn relay(topic: &str) -> Relay {
    let (sink, source) = ChannelBroker::new(topic, 64).split();
    let codec = RecordCodec::new(topic);
    let registry = Arc::new(SubscriberRegistry::new());
    let store = Arc::new(MockMessageStore::new());

    let producer = Arc::new(StreamProducer::new(
        Arc::new(sink),
        Arc::new(LoggingDeliveryHandler),
    ));
    let consumer = StreamConsumer::new(
        Box::new(source),
        codec.clone(),
        registry.clone(),
        Duration::from_millis(10),
    );
    let gateway = IngestionGateway::new(
        store.clone(),
        codec,
        producer.clone(),
        Duration::from_secs(1),
    );

    let mut coordinator = LifecycleCoordinator::new(
        registry.clone(),
        producer,
        &LifecycleConfig {
            grace_period_secs: 2,
            max_run_time_secs: None,
        },
    );
    coordinator.start(consumer).unwrap();

    Relay {
        coordinator,
        gateway,
        registry,
        store,
    }
}

async fn wait_for_frames(conn: &RecordingConnection, count: usize) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while conn.received().len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscriber did not receive the expected frames");
}

#[tokio::test]
async fn test_submitted_message_reaches_every_subscriber() {
    let mut relay = relay("chat");
    let first = Arc::new(RecordingConnection::new());
    let second = Arc::new(RecordingConnection::new());
    relay.registry.register(first.clone()).await.unwrap();
    relay.registry.register(second.clone()).await.unwrap();

    let submission = relay.gateway.submit("alice", "hi").await.unwrap();
    assert!(matches!(
        submission.stream,
        StreamStatus::Delivered { partition: 0, offset: 0 }
    ));

    wait_for_frames(&first, 1).await;
    wait_for_frames(&second, 1).await;

    let codec = RecordCodec::new("chat");
    let record = streamrelay::bus::StreamRecord::outbound("chat", None, first.received()[0].clone());
    assert_eq!(codec.decode(&record).unwrap(), submission.message);
    assert_eq!(first.received(), second.received());

    let (reason, report) = relay.coordinator.run_until_shutdown(async {}).await;
    assert_eq!(reason, ShutdownReason::Signal);
    assert!(report.is_clean(), "unclean: {:?}", report.unclean);
    assert!(first.is_closed() && second.is_closed());
}

#[tokio::test]
async fn test_subscribers_see_messages_in_submission_order() {
    let mut relay = relay("ordered");
    let conn = Arc::new(RecordingConnection::new());
    relay.registry.register(conn.clone()).await.unwrap();

    let mut expected = Vec::new();
    for i in 0..10 {
        let submission = relay
            .gateway
            .submit("alice", &format!("message {}", i))
            .await
            .unwrap();
        assert!(submission.is_fully_streamed());
        expected.push(submission.message);
    }

    wait_for_frames(&conn, expected.len()).await;

    let codec = RecordCodec::new("ordered");
    let received: Vec<_> = conn
        .received()
        .into_iter()
        .map(|payload| {
            let record = streamrelay::bus::StreamRecord::outbound("ordered", None, payload);
            codec.decode(&record).unwrap()
        })
        .collect();
    assert_eq!(received, expected);
    assert_eq!(relay.store.list().await.unwrap(), expected);

    relay.coordinator.drain().await;
}

#[tokio::test]
async fn test_failed_subscriber_does_not_starve_others() {
    let mut relay = relay("isolation");
    let healthy = Arc::new(RecordingConnection::new());
    let broken = Arc::new(RecordingConnection::new());
    relay.registry.register(healthy.clone()).await.unwrap();
    let broken_id = relay.registry.register(broken.clone()).await.unwrap();

    broken.set_failing(true);
    relay.gateway.submit("alice", "one").await.unwrap();
    wait_for_frames(&healthy, 1).await;

    relay.gateway.submit("alice", "two").await.unwrap();
    wait_for_frames(&healthy, 2).await;

    assert!(!relay.registry.contains(broken_id).await);
    assert!(broken.received().is_empty());

    let report = relay.coordinator.drain().await;
    assert!(!report.clean.contains(&Component::Subscriber(broken_id)));
    assert_eq!(relay.coordinator.current_state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn test_stream_client_from_default_config() {
    let config = Config::for_test();
    let client = init_stream_client(&config.messaging).await.unwrap();
    assert_eq!(client.topic, config.messaging.kafka.topic);
}
