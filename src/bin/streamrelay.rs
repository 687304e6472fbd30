//! streamrelay: event stream relay service
//!
//! Consumes the configured topic and pushes every record to connected WebSocket
//! subscribers; accepts messages over HTTP, stores them and publishes them
//! back onto the topic.
//!
//! ## Architecture
//! ```text
//! [HTTP POST] -> [IngestionGateway] -> [SQLite/Postgres]
//!                        |
//!                        v
//!                 [StreamProducer] -> [Kafka/channel] -> [StreamConsumer] -> [/ws subscribers]
//! ```
//!
//! ## Configuration
//! - First argument: optional config file path
//! - STREAMRELAY_CONFIG: config file path
//! - STREAMRELAY_*: overrides, e.g. STREAMRELAY_MESSAGING__KAFKA__TOPIC
//! - STREAMRELAY_LOG: log filter (default: info)

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};

use streamrelay::bus::init_stream_client;
use streamrelay::codec::RecordCodec;
use streamrelay::config::Config;
use streamrelay::consumer::StreamConsumer;
use streamrelay::gateway::IngestionGateway;
use streamrelay::http::{router, AppState};
use streamrelay::lifecycle::{shutdown_signal, LifecycleCoordinator, LifecycleState};
use streamrelay::producer::{LoggingDeliveryHandler, StreamProducer};
use streamrelay::registry::SubscriberRegistry;
use streamrelay::storage::init_storage;
use streamrelay::utils::bootstrap::init_tracing;
use streamrelay::utils::retry::{connect_with_retry, connection_backoff};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        messaging = ?config.messaging.messaging_type,
        storage = ?config.storage.storage_type,
        topic = %config.messaging.kafka.topic,
        "Starting streamrelay"
    );

    let store = init_storage(&config.storage).await?;

    let client = connect_with_retry("stream broker", connection_backoff(), || {
        init_stream_client(&config.messaging)
    })
    .await?;

    let listener = tokio::net::TcpListener::bind(config.server.bind_address()).await?;

    let registry = Arc::new(SubscriberRegistry::new());
    let codec = RecordCodec::new(&client.topic);
    let producer = Arc::new(StreamProducer::new(
        client.sink,
        Arc::new(LoggingDeliveryHandler),
    ));
    let consumer = StreamConsumer::new(
        client.source,
        codec.clone(),
        Arc::clone(&registry),
        config.relay.poll_timeout(),
    )
    .with_commit_offsets(config.relay.commit_offsets);
    let gateway = Arc::new(IngestionGateway::new(
        store,
        codec,
        Arc::clone(&producer),
        config.relay.confirm_timeout(),
    ));

    let mut coordinator =
        LifecycleCoordinator::new(Arc::clone(&registry), producer, &config.lifecycle);

    let state = AppState {
        gateway,
        registry,
        lifecycle: coordinator.state(),
        subscriber_buffer: config.relay.subscriber_buffer,
    };
    let app = router(state, &config.server);

    coordinator.start(consumer)?;

    info!(address = %listener.local_addr()?, "HTTP server listening");
    let server_stop = coordinator.state();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(until_not_running(server_stop))
            .await
    });

    let (reason, report) = coordinator.run_until_shutdown(shutdown_signal()).await;

    match tokio::time::timeout(config.lifecycle.grace_period(), server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!(error = %e, "HTTP server failed"),
        Ok(Err(e)) => error!(error = %e, "HTTP server task panicked"),
        Err(_) => warn!("HTTP server did not stop within the grace period"),
    }

    let unclean: Vec<String> = report.unclean.iter().map(|c| c.to_string()).collect();
    info!(
        reason = ?reason,
        clean = report.clean.len(),
        unclean = ?unclean,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "streamrelay stopped"
    );

    if reason.is_failure() {
        return Err(format!("relay stopped after component failure: {:?}", reason).into());
    }
    Ok(())
}

/// Resolves once the relay leaves `running`.
async fn until_not_running(mut state: watch::Receiver<LifecycleState>) {
    while *state.borrow_and_update() == LifecycleState::Running {
        if state.changed().await.is_err() {
            return;
        }
    }
}
