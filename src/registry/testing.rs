//! In-memory connection used by tests and local tooling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use super::{SendError, SubscriberConnection};

/// Connection that records every payload it is sent.
#[derive(Default)]
pub struct RecordingConnection {
    received: Mutex<Vec<Bytes>>,
    failing: AtomicBool,
    closed: AtomicBool,
    close_delay: Option<Duration>,
}

impl RecordingConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connection whose every send fails.
    pub fn failing() -> Self {
        let conn = Self::default();
        conn.failing.store(true, Ordering::SeqCst);
        conn
    }

    /// Connection whose close takes `delay`.
    pub fn slow_close(delay: Duration) -> Self {
        Self {
            close_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn received(&self) -> Vec<Bytes> {
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SubscriberConnection for RecordingConnection {
    fn send(&self, payload: Bytes) -> Result<(), SendError> {
        if self.failing.load(Ordering::SeqCst) || self.is_closed() {
            return Err(SendError::Disconnected);
        }
        self.received
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(payload);
        Ok(())
    }

    fn is_alive(&self) -> bool {
        !self.is_closed() && !self.failing.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if let Some(delay) = self.close_delay {
            tokio::time::sleep(delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
    }
}
