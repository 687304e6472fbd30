use super::*;
use crate::bus::{MockRecordSink, ScriptedPoll, ScriptedRecordSource, SinkBehavior, StreamRecord};
use crate::codec::RecordCodec;
use crate::producer::LoggingDeliveryHandler;
use crate::registry::testing::RecordingConnection;

struct Harness {
    coordinator: LifecycleCoordinator,
    registry: Arc<SubscriberRegistry>,
    producer: Arc<StreamProducer>,
}

fn config(grace_period_secs: u64, max_run_time_secs: Option<u64>) -> LifecycleConfig {
    LifecycleConfig {
        grace_period_secs,
        max_run_time_secs,
    }
}

fn harness(config: LifecycleConfig, sink: SinkBehavior) -> Harness {
    let registry = Arc::new(SubscriberRegistry::new());
    let producer = Arc::new(StreamProducer::new(
        Arc::new(MockRecordSink::with_behavior(sink)),
        Arc::new(LoggingDeliveryHandler),
    ));
    let coordinator = LifecycleCoordinator::new(registry.clone(), producer.clone(), &config);
    Harness {
        coordinator,
        registry,
        producer,
    }
}

fn consumer(registry: &Arc<SubscriberRegistry>, script: Vec<ScriptedPoll>) -> StreamConsumer {
    StreamConsumer::new(
        Box::new(ScriptedRecordSource::new(script)),
        RecordCodec::new("chat"),
        registry.clone(),
        Duration::from_millis(100),
    )
}

#[tokio::test(start_paused = true)]
async fn test_start_enters_running_once() {
    let mut h = harness(config(5, None), SinkBehavior::Confirm);
    assert_eq!(h.coordinator.current_state(), LifecycleState::Starting);

    let first = consumer(&h.registry, Vec::new());
    h.coordinator.start(first).unwrap();
    assert_eq!(h.coordinator.current_state(), LifecycleState::Running);

    let second = consumer(&h.registry, Vec::new());
    assert!(matches!(
        h.coordinator.start(second),
        Err(LifecycleError::InvalidState {
            expected: LifecycleState::Starting,
            actual: LifecycleState::Running,
        })
    ));

    h.coordinator.drain().await;
}

#[tokio::test(start_paused = true)]
async fn test_signal_drains_every_component_cleanly() {
    let mut h = harness(config(5, None), SinkBehavior::Confirm);
    let c = consumer(&h.registry, Vec::new());
    h.coordinator.start(c).unwrap();

    let conn = Arc::new(RecordingConnection::new());
    let id = h.registry.register(conn.clone()).await.unwrap();
    let mut state = h.coordinator.state();

    let (reason, report) = h.coordinator.run_until_shutdown(async {}).await;

    assert_eq!(reason, ShutdownReason::Signal);
    assert!(report.is_clean(), "unclean: {:?}", report.unclean);
    assert!(report.clean.contains(&Component::Consumer));
    assert!(report.clean.contains(&Component::Producer));
    assert!(report.clean.contains(&Component::Subscriber(id)));
    assert!(conn.is_closed());

    assert!(!h.registry.is_accepting().await);
    assert!(h.registry.is_empty().await);
    assert!(!h.producer.is_accepting());
    assert_eq!(*state.borrow_and_update(), LifecycleState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_slow_subscriber_close_is_abandoned_at_grace_period() {
    let mut h = harness(config(5, None), SinkBehavior::Confirm);
    let c = consumer(&h.registry, Vec::new());
    h.coordinator.start(c).unwrap();

    let slow = Arc::new(RecordingConnection::slow_close(Duration::from_secs(10)));
    let id = h.registry.register(slow.clone()).await.unwrap();

    let started = Instant::now();
    let report = h.coordinator.drain().await;

    assert!(started.elapsed() <= Duration::from_secs(5));
    assert!(report.elapsed <= Duration::from_secs(5));
    assert_eq!(h.coordinator.current_state(), LifecycleState::Stopped);
    assert_eq!(report.unclean, vec![Component::Subscriber(id)]);
    assert!(report.clean.contains(&Component::Consumer));
    assert!(report.clean.contains(&Component::Producer));
    assert!(!slow.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_max_run_time_triggers_drain() {
    let mut h = harness(config(5, Some(3)), SinkBehavior::Confirm);
    let c = consumer(&h.registry, Vec::new());
    h.coordinator.start(c).unwrap();

    let started = Instant::now();
    let reason = h
        .coordinator
        .wait_for_shutdown(std::future::pending::<()>())
        .await;

    assert_eq!(reason, ShutdownReason::MaxRunTime);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(h.coordinator.drain().await.is_clean());
}

#[tokio::test(start_paused = true)]
async fn test_fatal_consumer_error_surfaces_and_is_reported() {
    let mut h = harness(config(5, None), SinkBehavior::Confirm);
    let c = consumer(
        &h.registry,
        vec![ScriptedPoll::Error(BusError::Authorization(
            "topic not authorized".to_string(),
        ))],
    );
    h.coordinator.start(c).unwrap();

    let reason = h
        .coordinator
        .wait_for_shutdown(std::future::pending::<()>())
        .await;
    assert!(reason.is_failure());

    let report = h.coordinator.drain().await;
    assert_eq!(report.unclean, vec![Component::Consumer]);
    assert!(report.clean.contains(&Component::Producer));
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_publishes_mark_producer_unclean() {
    let mut h = harness(config(2, None), SinkBehavior::Hold);
    let c = consumer(&h.registry, Vec::new());
    h.coordinator.start(c).unwrap();

    let record = StreamRecord::outbound("chat", Some("1".to_string()), b"{}".to_vec());
    let receipt = h.producer.publish(record).unwrap();

    let report = h.coordinator.drain().await;

    assert_eq!(report.unclean, vec![Component::Producer]);
    assert!(report.elapsed <= Duration::from_secs(2));
    assert!(!receipt.outcome().await.is_delivered());
}

#[tokio::test(start_paused = true)]
async fn test_registrations_rejected_once_draining() {
    let mut h = harness(config(1, None), SinkBehavior::Confirm);
    let c = consumer(&h.registry, Vec::new());
    h.coordinator.start(c).unwrap();

    h.coordinator.drain().await;

    let late = Arc::new(RecordingConnection::new());
    assert!(h.registry.register(late).await.is_err());
}
