use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use tower::ServiceExt;

use super::*;
use crate::bus::{DeliveryFailure, MockRecordSink, SinkBehavior};
use crate::codec::RecordCodec;
use crate::producer::{LoggingDeliveryHandler, StreamProducer};
use crate::storage::{MessageStore, MockMessageStore};

struct TestApp {
    router: Router,
    store: Arc<MockMessageStore>,
    sink: Arc<MockRecordSink>,
    registry: Arc<SubscriberRegistry>,
    _lifecycle: watch::Sender<LifecycleState>,
}

fn app(behavior: SinkBehavior, lifecycle: LifecycleState) -> TestApp {
    let store = Arc::new(MockMessageStore::new());
    let sink = Arc::new(MockRecordSink::with_behavior(behavior));
    let producer = Arc::new(StreamProducer::new(
        sink.clone(),
        Arc::new(LoggingDeliveryHandler),
    ));
    let gateway = Arc::new(IngestionGateway::new(
        store.clone(),
        RecordCodec::new("chat"),
        producer,
        Duration::from_millis(50),
    ));
    let (lifecycle_tx, lifecycle_rx) = watch::channel(lifecycle);
    let registry = Arc::new(SubscriberRegistry::new());
    let state = AppState {
        gateway,
        registry: registry.clone(),
        lifecycle: lifecycle_rx,
        subscriber_buffer: 16,
    };
    TestApp {
        router: router(state, &ServerConfig::default()),
        store,
        sink,
        registry,
        _lifecycle: lifecycle_tx,
    }
}

fn post_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/messages")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_submit_streamed_message_returns_created() {
    let app = app(SinkBehavior::Confirm, LifecycleState::Running);

    let resp = app
        .router
        .oneshot(post_json(r#"{"sender":"alice","body":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    let json = json_body(resp).await;
    assert_eq!(json["message"]["id"], 1);
    assert_eq!(json["message"]["sender"], "alice");
    assert_eq!(json["message"]["text"], "hi");
    assert_eq!(json["stream"]["status"], "delivered");
    assert_eq!(app.sink.published_count(), 1);
}

#[tokio::test]
async fn test_submit_accepts_text_alias() {
    let app = app(SinkBehavior::Confirm, LifecycleState::Running);

    let resp = app
        .router
        .oneshot(post_json(r#"{"sender":"bob","text":"yo"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::CREATED);
    assert_eq!(app.store.count().await, 1);
}

#[tokio::test]
async fn test_unstreamed_message_returns_accepted() {
    let app = app(
        SinkBehavior::Fail(DeliveryFailure::Rejected("topic deleted".to_string())),
        LifecycleState::Running,
    );

    let resp = app
        .router
        .oneshot(post_json(r#"{"sender":"alice","body":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let json = json_body(resp).await;
    assert_eq!(json["stream"]["status"], "failed");
    assert!(json["stream"]["reason"]
        .as_str()
        .unwrap()
        .contains("topic deleted"));
    assert_eq!(app.store.count().await, 1);
}

#[tokio::test]
async fn test_invalid_submissions_return_bad_request() {
    for body in [
        r#"{"sender":"","body":"hi"}"#,
        r#"{"sender":"alice","body":"   "}"#,
        r#"{"sender":"alice"}"#,
        "not json",
    ] {
        let app = app(SinkBehavior::Confirm, LifecycleState::Running);
        let resp = app.router.oneshot(post_json(body)).await.unwrap();

        assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "body: {}", body);
        let json = json_body(resp).await;
        assert_eq!(json["status"], 400);
        assert_eq!(app.store.count().await, 0);
    }
}

#[tokio::test]
async fn test_storage_failure_returns_internal_error() {
    let app = app(SinkBehavior::Confirm, LifecycleState::Running);
    app.store.set_fail_on_create(true);

    let resp = app
        .router
        .oneshot(post_json(r#"{"sender":"alice","body":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.sink.published_count(), 0);
}

#[tokio::test]
async fn test_submit_rejected_while_draining() {
    let app = app(SinkBehavior::Confirm, LifecycleState::Draining);

    let resp = app
        .router
        .oneshot(post_json(r#"{"sender":"alice","body":"hi"}"#))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.store.count().await, 0);
}

#[tokio::test]
async fn test_list_messages() {
    let app = app(SinkBehavior::Confirm, LifecycleState::Running);
    app.store
        .create(crate::model::NewMessage::new("alice", "one"))
        .await
        .unwrap();

    let resp = app.router.oneshot(get("/api/messages")).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json = json_body(resp).await;
    assert_eq!(json.as_array().unwrap().len(), 1);
    assert_eq!(json[0]["text"], "one");
}

#[tokio::test]
async fn test_health_reflects_lifecycle() {
    let running = app(SinkBehavior::Confirm, LifecycleState::Running);
    let resp = running.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json_body(resp).await["status"], "running");

    let starting = app(SinkBehavior::Confirm, LifecycleState::Starting);
    let resp = starting.router.oneshot(get("/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

/// Serve the router on an ephemeral port; WebSocket upgrades need a real connection.
async fn serve(router: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn wait_for_subscribers(registry: &SubscriberRegistry, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while registry.len().await != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_ws_subscriber_receives_broadcasts() {
    use futures::{SinkExt, StreamExt};

    let app = app(SinkBehavior::Confirm, LifecycleState::Running);
    let addr = serve(app.router).await;

    let (mut socket, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    wait_for_subscribers(&app.registry, 1).await;

    let summary = app
        .registry
        .broadcast(bytes::Bytes::from_static(br#"{"sender":"alice","text":"hi"}"#))
        .await;
    assert_eq!(summary.delivered, 1);

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(frame.to_text().unwrap(), r#"{"sender":"alice","text":"hi"}"#);

    socket.close(None).await.unwrap();
    wait_for_subscribers(&app.registry, 0).await;
}

#[tokio::test]
async fn test_ws_upgrade_refused_while_draining() {
    let app = app(SinkBehavior::Confirm, LifecycleState::Draining);
    let addr = serve(app.router).await;

    let err = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(resp) => {
            assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        }
        other => panic!("expected HTTP rejection, got {other:?}"),
    }
    assert!(app.registry.is_empty().await);
}
