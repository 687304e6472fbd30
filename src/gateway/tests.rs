use super::*;
use crate::bus::{BusError, MockRecordSink, SinkBehavior};
use crate::producer::LoggingDeliveryHandler;
use crate::storage::MockMessageStore;

const TOPIC: &str = "chat";

struct Harness {
    gateway: IngestionGateway,
    store: Arc<MockMessageStore>,
    sink: Arc<MockRecordSink>,
    producer: Arc<StreamProducer>,
}

fn harness(behavior: SinkBehavior) -> Harness {
    let store = Arc::new(MockMessageStore::new());
    let sink = Arc::new(MockRecordSink::with_behavior(behavior));
    let producer = Arc::new(StreamProducer::new(
        sink.clone(),
        Arc::new(LoggingDeliveryHandler),
    ));
    let gateway = IngestionGateway::new(
        store.clone(),
        RecordCodec::new(TOPIC),
        producer.clone(),
        Duration::from_millis(50),
    );
    Harness {
        gateway,
        store,
        sink,
        producer,
    }
}

#[tokio::test]
async fn test_submit_persists_and_publishes_once() {
    let h = harness(SinkBehavior::Confirm);

    let submission = h.gateway.submit("alice", "hi").await.unwrap();

    assert!(submission.is_fully_streamed());
    let id = submission.message.id().expect("identity assigned on persist");
    assert_eq!(submission.message.sender, "alice");
    assert_eq!(submission.message.body, "hi");

    let published = h.sink.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].topic, TOPIC);
    assert_eq!(published[0].key.as_deref(), Some(id.to_string().as_str()));
    let codec = RecordCodec::new(TOPIC);
    assert_eq!(codec.decode(&published[0]).unwrap(), submission.message);
}

#[tokio::test]
async fn test_failed_delivery_is_partial_success() {
    let h = harness(SinkBehavior::Fail(DeliveryFailure::Transient(
        "broker unreachable".to_string(),
    )));

    let submission = h.gateway.submit("alice", "hi").await.unwrap();

    assert!(!submission.is_fully_streamed());
    assert!(matches!(submission.stream, StreamStatus::Failed { .. }));

    let id = submission.message.id().unwrap();
    assert_eq!(h.store.get(id).await, Some(submission.message.clone()));
    assert_eq!(h.gateway.list().await.unwrap(), vec![submission.message]);
}

#[tokio::test]
async fn test_missing_report_is_unconfirmed() {
    let h = harness(SinkBehavior::Hold);

    let submission = h.gateway.submit("alice", "hi").await.unwrap();

    assert_eq!(submission.stream, StreamStatus::Unconfirmed);
    assert_eq!(h.store.count().await, 1);
    assert_eq!(h.sink.published_count(), 1);
}

#[tokio::test]
async fn test_enqueue_refusal_keeps_stored_message() {
    let h = harness(SinkBehavior::Refuse(BusError::Transport(
        "local queue full".to_string(),
    )));

    let submission = h.gateway.submit("bob", "queued?").await.unwrap();

    assert!(matches!(submission.stream, StreamStatus::Failed { .. }));
    assert_eq!(h.store.count().await, 1);
    assert_eq!(h.sink.published_count(), 0);
}

#[tokio::test]
async fn test_storage_failure_publishes_nothing() {
    let h = harness(SinkBehavior::Confirm);
    h.store.set_fail_on_create(true);

    let result = h.gateway.submit("alice", "hi").await;

    assert!(matches!(result, Err(IngestError::Storage(_))));
    assert_eq!(h.sink.published_count(), 0);
}

#[tokio::test]
async fn test_empty_fields_are_rejected_before_persisting() {
    let h = harness(SinkBehavior::Confirm);

    assert!(matches!(
        h.gateway.submit("  ", "hi").await,
        Err(IngestError::Invalid(_))
    ));
    assert!(matches!(
        h.gateway.submit("alice", "").await,
        Err(IngestError::Invalid(_))
    ));
    assert_eq!(h.store.count().await, 0);
    assert_eq!(h.sink.published_count(), 0);
}

#[tokio::test]
async fn test_submit_after_producer_shutdown_is_not_streamed() {
    let h = harness(SinkBehavior::Confirm);
    h.producer.shutdown(Duration::from_millis(10)).await;

    let submission = h.gateway.submit("alice", "late").await.unwrap();

    assert!(matches!(submission.stream, StreamStatus::Failed { .. }));
    assert_eq!(h.store.count().await, 1);
}

#[test]
fn test_stream_status_serialization() {
    let delivered = serde_json::to_value(StreamStatus::Delivered {
        partition: 0,
        offset: 4,
    })
    .unwrap();
    assert_eq!(
        delivered,
        serde_json::json!({"status": "delivered", "partition": 0, "offset": 4})
    );

    let unconfirmed = serde_json::to_value(StreamStatus::Unconfirmed).unwrap();
    assert_eq!(unconfirmed, serde_json::json!({"status": "unconfirmed"}));
}
