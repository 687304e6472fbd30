//! Startup ordering and bounded, coordinated shutdown.
//!
//! States move `starting → running → draining → stopped`. Draining stops new
//! subscriber registrations, signals the consumer to stop, flushes the
//! producer and closes every registered connection. All of that runs
//! concurrently under one grace-period deadline; components that have not
//! confirmed by then are abandoned and listed in the [`DrainReport`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture, FutureExt};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::bus::BusError;
use crate::config::LifecycleConfig;
use crate::consumer::{ConsumerError, ConsumerStats, StreamConsumer};
use crate::producer::StreamProducer;
use crate::registry::{ConnectionId, SubscriberRegistry};

/// Coordinator state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// What moved the coordinator out of `running`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownReason {
    Signal,
    MaxRunTime,
    ComponentFailed(String),
}

impl ShutdownReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, ShutdownReason::ComponentFailed(_))
    }
}

/// A component taking part in the drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Component {
    Consumer,
    Producer,
    Subscriber(ConnectionId),
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Consumer => f.write_str("consumer"),
            Component::Producer => f.write_str("producer"),
            Component::Subscriber(id) => write!(f, "subscriber {}", id),
        }
    }
}

/// Which components confirmed a clean shutdown within the grace period.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub clean: Vec<Component>,
    pub unclean: Vec<Component>,
    pub elapsed: Duration,
}

impl DrainReport {
    pub fn is_clean(&self) -> bool {
        self.unclean.is_empty()
    }
}

/// Lifecycle errors.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Invalid lifecycle transition: expected {expected}, was {actual}")]
    InvalidState {
        expected: LifecycleState,
        actual: LifecycleState,
    },
}

type ConsumerExit = Result<ConsumerStats, ConsumerError>;

enum Wake {
    Signal,
    MaxRunTime,
    Consumer(Result<ConsumerExit, JoinError>),
}

/// Owns the consumer task and the drain sequence.
pub struct LifecycleCoordinator {
    state: watch::Sender<LifecycleState>,
    registry: Arc<SubscriberRegistry>,
    producer: Arc<StreamProducer>,
    grace_period: Duration,
    max_run_time: Option<Duration>,
    consumer_stop: watch::Sender<bool>,
    consumer_task: Option<JoinHandle<ConsumerExit>>,
    consumer_exit: Option<ConsumerExit>,
}

impl LifecycleCoordinator {
    pub fn new(
        registry: Arc<SubscriberRegistry>,
        producer: Arc<StreamProducer>,
        config: &LifecycleConfig,
    ) -> Self {
        let (state, _) = watch::channel(LifecycleState::Starting);
        let (consumer_stop, _) = watch::channel(false);
        Self {
            state,
            registry,
            producer,
            grace_period: config.grace_period(),
            max_run_time: config.max_run_time(),
            consumer_stop,
            consumer_task: None,
            consumer_exit: None,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn current_state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Spawn the consumer loop and enter `running`.
    ///
    /// Broker connections must already be up: the consumer owns its source and
    /// the producer its sink.
    pub fn start(&mut self, consumer: StreamConsumer) -> Result<(), LifecycleError> {
        self.expect_state(LifecycleState::Starting)?;

        let stop = self.consumer_stop.subscribe();
        self.consumer_task = Some(tokio::spawn(consumer.run(stop)));
        self.state.send_replace(LifecycleState::Running);
        info!(
            grace_period_secs = self.grace_period.as_secs_f64(),
            max_run_time_secs = self.max_run_time.map(|d| d.as_secs()),
            "Relay running"
        );
        Ok(())
    }

    /// Wait for `signal`, the configured maximum run time, or the consumer
    /// exiting on its own, whichever comes first.
    pub async fn wait_for_shutdown<S>(&mut self, signal: S) -> ShutdownReason
    where
        S: Future<Output = ()>,
    {
        let limit = self.max_run_time;
        let max_run_time = async move {
            match limit {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        let task = self.consumer_task.as_mut();
        let consumer_exit = async move {
            match task {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        };

        let woke = tokio::select! {
            _ = signal => Wake::Signal,
            _ = max_run_time => Wake::MaxRunTime,
            joined = consumer_exit => Wake::Consumer(joined),
        };

        let reason = match woke {
            Wake::Signal => ShutdownReason::Signal,
            Wake::MaxRunTime => ShutdownReason::MaxRunTime,
            Wake::Consumer(joined) => {
                let exit = joined.unwrap_or_else(|e| {
                    Err(ConsumerError::Fatal(BusError::Broker(format!(
                        "consumer task failed: {}",
                        e
                    ))))
                });
                let reason = match &exit {
                    Err(e) => ShutdownReason::ComponentFailed(format!("consumer: {}", e)),
                    Ok(_) => ShutdownReason::ComponentFailed("consumer exited unexpectedly".to_string()),
                };
                self.consumer_task = None;
                self.consumer_exit = Some(exit);
                reason
            }
        };

        match &reason {
            ShutdownReason::ComponentFailed(detail) => {
                error!(reason = %detail, "Component failed, draining")
            }
            other => info!(reason = ?other, "Shutdown requested, draining"),
        }
        reason
    }

    /// Run the drain sequence, bounded by the grace period.
    pub async fn drain(&mut self) -> DrainReport {
        let started = Instant::now();
        let deadline = started + self.grace_period;
        self.state.send_replace(LifecycleState::Draining);

        let connections = self.registry.drain().await;
        self.consumer_stop.send_replace(true);

        let mut steps: Vec<BoxFuture<'static, (Component, bool)>> = Vec::new();

        let consumer_task = self.consumer_task.take();
        let consumer_exit = self.consumer_exit.take();
        steps.push(
            async move {
                let clean = match (consumer_task, consumer_exit) {
                    (Some(mut task), _) => {
                        match tokio::time::timeout_at(deadline, &mut task).await {
                            Ok(Ok(exit)) => exit.is_ok(),
                            Ok(Err(e)) => {
                                error!(error = %e, "Consumer task panicked");
                                false
                            }
                            Err(_) => {
                                task.abort();
                                false
                            }
                        }
                    }
                    (None, Some(exit)) => exit.is_ok(),
                    (None, None) => true,
                };
                (Component::Consumer, clean)
            }
            .boxed(),
        );

        let producer = Arc::clone(&self.producer);
        steps.push(
            async move {
                // Bounded by `remaining`: the producer abandons its in-flight
                // records itself once the deadline passes.
                let remaining = deadline.saturating_duration_since(Instant::now());
                let report = producer.shutdown(remaining).await;
                (Component::Producer, report.is_clean())
            }
            .boxed(),
        );

        for (id, connection) in connections {
            steps.push(
                async move {
                    let closed = tokio::time::timeout_at(deadline, connection.close())
                        .await
                        .is_ok();
                    (Component::Subscriber(id), closed)
                }
                .boxed(),
            );
        }

        let mut report = DrainReport::default();
        for (component, clean) in join_all(steps).await {
            if clean {
                report.clean.push(component);
            } else {
                report.unclean.push(component);
            }
        }
        report.elapsed = started.elapsed();

        self.state.send_replace(LifecycleState::Stopped);
        if report.is_clean() {
            info!(elapsed_ms = report.elapsed.as_millis() as u64, "Relay stopped cleanly");
        } else {
            let unclean: Vec<String> = report.unclean.iter().map(|c| c.to_string()).collect();
            warn!(
                elapsed_ms = report.elapsed.as_millis() as u64,
                unclean = ?unclean,
                "Relay stopped; some components did not shut down cleanly"
            );
        }
        report
    }

    /// `wait_for_shutdown` followed by `drain`.
    pub async fn run_until_shutdown<S>(&mut self, signal: S) -> (ShutdownReason, DrainReport)
    where
        S: Future<Output = ()>,
    {
        let reason = self.wait_for_shutdown(signal).await;
        let report = self.drain().await;
        (reason, report)
    }

    fn expect_state(&self, expected: LifecycleState) -> Result<(), LifecycleError> {
        let actual = self.current_state();
        if actual == expected {
            Ok(())
        } else {
            Err(LifecycleError::InvalidState { expected, actual })
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests;
