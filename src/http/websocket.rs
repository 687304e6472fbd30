//! Subscriber WebSocket endpoint.
//!
//! Each socket gets a writer task fed by a bounded queue, so a registry
//! broadcast never waits on the network. Client frames are read only to notice
//! `Close` and disconnects.

use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use bytes::Bytes;
use futures::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{AppResult, AppState};
use crate::registry::{SendError, SubscriberConnection};

/// Bound on sending the Close frame and releasing the sink.
const CLOSE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);

/// Registry handle for one WebSocket.
///
/// Dropping the handle closes the socket.
pub struct WsConnection {
    frames: mpsc::Sender<Bytes>,
    alive: Arc<AtomicBool>,
    close: watch::Sender<bool>,
    done: watch::Receiver<bool>,
}

impl WsConnection {
    /// Spawn the writer task for `sink` with room for `buffer` queued frames.
    pub fn spawn<S>(sink: S, buffer: usize) -> Self
    where
        S: Sink<Message> + Unpin + Send + 'static,
        S::Error: Display,
    {
        let (frames_tx, frames_rx) = mpsc::channel(buffer.max(1));
        let (close_tx, close_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(false);
        let alive = Arc::new(AtomicBool::new(true));

        tokio::spawn(write_frames(
            sink,
            frames_rx,
            close_rx,
            Arc::clone(&alive),
            done_tx,
        ));

        Self {
            frames: frames_tx,
            alive,
            close: close_tx,
            done: done_rx,
        }
    }

    /// Resolves once the writer has released the socket.
    pub async fn closed(&self) {
        wait_until_set(self.done.clone()).await;
    }
}

#[async_trait]
impl SubscriberConnection for WsConnection {
    fn send(&self, payload: Bytes) -> Result<(), SendError> {
        if !self.is_alive() {
            return Err(SendError::Disconnected);
        }
        self.frames.try_send(payload).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::Disconnected,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Relaxed)
    }

    async fn close(&self) {
        self.close.send_replace(true);
        self.closed().await;
    }
}

async fn wait_until_set(mut flag: watch::Receiver<bool>) {
    loop {
        if *flag.borrow_and_update() {
            return;
        }
        if flag.changed().await.is_err() {
            return;
        }
    }
}

async fn write_frames<S>(
    mut sink: S,
    mut frames: mpsc::Receiver<Bytes>,
    close: watch::Receiver<bool>,
    alive: Arc<AtomicBool>,
    done: watch::Sender<bool>,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let exit = loop {
        let payload = tokio::select! {
            biased;

            _ = wait_until_set(close.clone()) => break WriterExit::Closed,

            frame = frames.recv() => match frame {
                Some(payload) => payload,
                None => break WriterExit::Closed,
            },
        };

        let text = match String::from_utf8(payload.to_vec()) {
            Ok(text) => text,
            Err(_) => {
                warn!("Skipping non-UTF-8 payload");
                continue;
            }
        };

        // A peer that stopped reading must not hold the writer past a close.
        tokio::select! {
            biased;

            _ = wait_until_set(close.clone()) => break WriterExit::Closed,

            sent = sink.send(Message::Text(text.into())) => {
                if let Err(e) = sent {
                    debug!(error = %e, "WebSocket write failed");
                    break WriterExit::Failed;
                }
            }
        }
    };

    alive.store(false, Ordering::Relaxed);
    if exit == WriterExit::Closed {
        let _ = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, sink.send(Message::Close(None)))
            .await;
    }
    let _ = tokio::time::timeout(CLOSE_HANDSHAKE_TIMEOUT, sink.close()).await;
    done.send_replace(true);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterExit {
    Closed,
    Failed,
}

/// `GET /ws`
pub async fn subscribe(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> AppResult<impl IntoResponse> {
    state.ensure_running()?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state)))
}

/// The registry owns the connection; this task keeps only its id and the
/// writer's done signal. Whoever removes the connection closes it.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, mut incoming) = socket.split();
    let connection = WsConnection::spawn(sink, state.subscriber_buffer);
    let done = connection.done.clone();

    let id = match state.registry.register(Arc::new(connection)).await {
        Ok(id) => id,
        Err(e) => {
            // Dropping the rejected handle closes the writer.
            debug!(error = %e, "Rejecting subscriber");
            wait_until_set(done).await;
            return;
        }
    };
    info!(connection_id = %id, "Subscriber connected");

    loop {
        tokio::select! {
            frame = incoming.next() => match frame {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(connection_id = %id, error = %e, "WebSocket read failed");
                    break;
                }
                Some(Ok(_)) => {}
            },
            _ = wait_until_set(done.clone()) => break,
        }
    }

    if let Some(connection) = state.registry.deregister(id).await {
        connection.close().await;
    }
    info!(connection_id = %id, "Subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;

    use super::*;
    use crate::registry::SubscriberRegistry;

    #[tokio::test]
    async fn test_frames_are_written_as_text_in_order() {
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        let conn = WsConnection::spawn(sink, 8);

        conn.send(Bytes::from_static(b"{\"n\":1}")).unwrap();
        conn.send(Bytes::from_static(b"{\"n\":2}")).unwrap();

        assert_eq!(written.next().await, Some(Message::Text("{\"n\":1}".into())));
        assert_eq!(written.next().await, Some(Message::Text("{\"n\":2}".into())));
    }

    #[tokio::test]
    async fn test_full_buffer_reports_backpressure() {
        // Writer blocks on a sink that is never drained past its buffer.
        let (sink, _written) = futures::channel::mpsc::channel::<Message>(0);
        let conn = WsConnection::spawn(sink, 1);

        let mut saw_backpressure = false;
        for _ in 0..16 {
            if conn.send(Bytes::from_static(b"x")) == Err(SendError::Backpressure) {
                saw_backpressure = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(saw_backpressure);
    }

    #[tokio::test]
    async fn test_close_sends_close_frame_and_marks_dead() {
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        let conn = WsConnection::spawn(sink, 8);

        tokio::time::timeout(Duration::from_secs(1), conn.close())
            .await
            .unwrap();

        assert!(!conn.is_alive());
        assert_eq!(written.next().await, Some(Message::Close(None)));
        assert_eq!(conn.send(Bytes::from_static(b"late")), Err(SendError::Disconnected));
    }

    #[tokio::test]
    async fn test_dropped_peer_marks_connection_dead() {
        let (sink, written) = fmpsc::unbounded::<Message>();
        drop(written);
        let conn = WsConnection::spawn(sink, 8);

        conn.send(Bytes::from_static(b"{}")).unwrap();
        tokio::time::timeout(Duration::from_secs(1), conn.closed())
            .await
            .unwrap();

        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_subscriber_dropped_for_backpressure_is_closed() {
        // Peer stopped reading: the writer is stuck mid-send.
        let (sink, _written) = fmpsc::channel::<Message>(0);
        let conn = Arc::new(WsConnection::spawn(sink, 1));
        let registry = SubscriberRegistry::new();
        let id = registry.register(conn.clone()).await.unwrap();

        for _ in 0..16 {
            registry.broadcast(Bytes::from_static(b"{}")).await;
            tokio::task::yield_now().await;
        }
        assert!(!registry.contains(id).await);

        tokio::time::timeout(Duration::from_secs(5), conn.closed())
            .await
            .unwrap();
        assert!(!conn.is_alive());
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_writer() {
        let (sink, mut written) = fmpsc::unbounded::<Message>();
        let conn = WsConnection::spawn(sink, 8);
        let done = conn.done.clone();

        drop(conn);
        tokio::time::timeout(Duration::from_secs(1), wait_until_set(done))
            .await
            .unwrap();
        assert_eq!(written.next().await, Some(Message::Close(None)));
    }
}
