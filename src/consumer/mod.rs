//! Stream consumer: poll → decode → broadcast loop.
//!
//! Poll timeouts are silent. Transient poll errors are logged and the loop keeps
//! polling; fatal ones end the loop with [`ConsumerError::Fatal`]. Records that
//! fail to decode are logged and skipped. The stop signal is checked at the top
//! of every iteration, so the loop exits within one poll interval.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::bus::{BusError, RecordSource, StreamRecord};
use crate::codec::RecordCodec;
use crate::registry::SubscriberRegistry;

/// Where the consume loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerState {
    Idle,
    Polling,
    Decoding,
    Dispatching,
    Stopped,
}

/// Consumer errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConsumerError {
    #[error("Fatal stream error: {0}")]
    Fatal(BusError),
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub dispatched: u64,
    pub decode_failures: u64,
    pub transient_errors: u64,
}

/// Drives the consume loop against one [`RecordSource`].
pub struct StreamConsumer {
    source: Box<dyn RecordSource>,
    codec: RecordCodec,
    registry: Arc<SubscriberRegistry>,
    poll_timeout: Duration,
    commit_offsets: bool,
    state: watch::Sender<ConsumerState>,
}

impl StreamConsumer {
    pub fn new(
        source: Box<dyn RecordSource>,
        codec: RecordCodec,
        registry: Arc<SubscriberRegistry>,
        poll_timeout: Duration,
    ) -> Self {
        let (state, _) = watch::channel(ConsumerState::Idle);
        Self {
            source,
            codec,
            registry,
            poll_timeout,
            commit_offsets: true,
            state,
        }
    }

    /// Disable offset commits (replay from the reset policy on restart).
    pub fn with_commit_offsets(mut self, commit: bool) -> Self {
        self.commit_offsets = commit;
        self
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    /// Run until `stop` turns true or a fatal error occurs.
    ///
    /// The source is closed on the way out in both cases.
    pub async fn run(
        mut self,
        mut stop: watch::Receiver<bool>,
    ) -> Result<ConsumerStats, ConsumerError> {
        info!(topic = %self.codec.topic(), "Stream consumer started");
        let mut stats = ConsumerStats::default();

        let result = loop {
            if *stop.borrow_and_update() {
                break Ok(stats);
            }

            self.state.send_replace(ConsumerState::Polling);
            let record = match self.source.poll(self.poll_timeout).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "Fatal stream error, stopping consumer");
                    break Err(ConsumerError::Fatal(e));
                }
                Err(e) => {
                    stats.transient_errors += 1;
                    warn!(error = %e, "Transient stream error, continuing");
                    continue;
                }
            };
            stats.received += 1;

            if self.handle_record(&record).await {
                stats.dispatched += 1;
            } else {
                stats.decode_failures += 1;
            }

            if self.commit_offsets {
                if let Err(e) = self.source.commit(&record).await {
                    if e.is_fatal() {
                        error!(error = %e, "Fatal error committing offset, stopping consumer");
                        break Err(ConsumerError::Fatal(e));
                    }
                    warn!(error = %e, offset = ?record.offset, "Failed to commit offset");
                }
            }
        };

        self.source.close().await;
        self.state.send_replace(ConsumerState::Stopped);
        info!(
            received = stats.received,
            dispatched = stats.dispatched,
            decode_failures = stats.decode_failures,
            "Stream consumer stopped"
        );
        result
    }

    /// Decode and broadcast one record. Returns false if it was dropped.
    async fn handle_record(&self, record: &StreamRecord) -> bool {
        self.state.send_replace(ConsumerState::Decoding);
        match self.codec.decode(record) {
            Ok(message) => {
                debug!(
                    topic = %record.topic,
                    partition = ?record.partition,
                    offset = ?record.offset,
                    message_id = ?message.id(),
                    "Consumed message"
                );
            }
            Err(e) => {
                warn!(
                    topic = %record.topic,
                    partition = ?record.partition,
                    offset = ?record.offset,
                    error = %e,
                    "Dropping undecodable record"
                );
                return false;
            }
        }

        self.state.send_replace(ConsumerState::Dispatching);
        self.registry.broadcast(record.payload.clone()).await;
        true
    }
}
