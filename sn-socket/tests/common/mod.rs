//! Shared test utilities for integration tests.
//!
//! `MockServer` hands out in-memory transports: everything the manager writes
//! is recorded, and tests push inbound events into the live connection.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use sn_core::config::RealtimeConfig;
use sn_core::error::{SnError, SnResult};
use sn_socket::{
    ConnectionManager, ConnectionSnapshot, Connector, FrameSink, FrameStream, TransportEvent,
    TransportPair,
};

#[derive(Default)]
struct MockState {
    connects: usize,
    connect_times: Vec<tokio::time::Instant>,
    /// Number of upcoming connects to refuse.
    refuse_next: usize,
    refuse_all: bool,
    /// Writes never complete while set.
    stall_writes: bool,
    tokens: Vec<String>,
    sent: Vec<String>,
    graceful_closes: usize,
    inbound: Option<mpsc::UnboundedSender<TransportEvent>>,
}

#[derive(Clone, Default)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MockConnector {
            server: self.clone(),
        })
    }

    pub fn refuse_all(&self, refuse: bool) {
        self.lock().refuse_all = refuse;
    }

    pub fn stall_writes(&self, stall: bool) {
        self.lock().stall_writes = stall;
    }

    pub fn refuse_next(&self, count: usize) {
        self.lock().refuse_next = count;
    }

    pub fn connects(&self) -> usize {
        self.lock().connects
    }

    /// When each connection attempt happened (tokio clock).
    pub fn connect_times(&self) -> Vec<tokio::time::Instant> {
        self.lock().connect_times.clone()
    }

    pub fn tokens(&self) -> Vec<String> {
        self.lock().tokens.clone()
    }

    pub fn graceful_closes(&self) -> usize {
        self.lock().graceful_closes
    }

    /// Every text written by the client, across connections.
    pub fn sent(&self) -> Vec<String> {
        self.lock().sent.clone()
    }

    /// Sent frames parsed as JSON.
    pub fn sent_json(&self) -> Vec<serde_json::Value> {
        self.sent()
            .iter()
            .map(|s| serde_json::from_str(s).unwrap())
            .collect()
    }

    /// Push a text message into the live connection.
    pub fn push(&self, text: impl Into<String>) -> bool {
        self.push_event(TransportEvent::Text(text.into()))
    }

    /// Close the live connection from the server side.
    pub fn drop_connection(&self, code: Option<u16>) -> bool {
        let pushed = self.push_event(TransportEvent::Closed {
            code,
            reason: "server closed".into(),
        });
        self.lock().inbound = None;
        pushed
    }

    fn push_event(&self, event: TransportEvent) -> bool {
        match &self.lock().inbound {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    pub async fn wait_for_sent(&self, count: usize) {
        wait_until(|| self.sent().len() >= count).await;
    }

    pub async fn wait_for_connects(&self, count: usize) {
        wait_until(|| self.connects() >= count).await;
    }
}

struct MockConnector {
    server: MockServer,
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, session_token: &str) -> SnResult<TransportPair> {
        let mut state = self.server.lock();
        state.connects += 1;
        state.connect_times.push(tokio::time::Instant::now());
        state.tokens.push(session_token.to_string());

        if state.refuse_all {
            return Err(SnError::Transport("connection refused".into()));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(SnError::Transport("connection refused".into()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.inbound = Some(tx);
        Ok(TransportPair::new(
            MockSink {
                server: self.server.clone(),
            },
            MockStream { rx },
        ))
    }
}

struct MockSink {
    server: MockServer,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send_text(&mut self, text: String) -> SnResult<()> {
        let stalled = self.server.lock().stall_writes;
        if stalled {
            std::future::pending::<()>().await;
        }
        self.server.lock().sent.push(text);
        Ok(())
    }

    async fn close(&mut self) -> SnResult<()> {
        self.server.lock().graceful_closes += 1;
        Ok(())
    }
}

struct MockStream {
    rx: mpsc::UnboundedReceiver<TransportEvent>,
}

#[async_trait]
impl FrameStream for MockStream {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.rx.recv().await
    }
}

/// Realtime settings with the default backoff and a small attempt limit.
pub fn test_realtime_config(max_attempts: u32) -> RealtimeConfig {
    RealtimeConfig {
        max_attempts,
        ..RealtimeConfig::default()
    }
}

pub fn create_manager(server: &MockServer, max_attempts: u32) -> Arc<ConnectionManager> {
    Arc::new(ConnectionManager::new(
        server.connector(),
        &test_realtime_config(max_attempts),
    ))
}

/// Wait until the manager publishes a snapshot matching `predicate`.
pub async fn wait_for_snapshot<F>(manager: &ConnectionManager, predicate: F) -> ConnectionSnapshot
where
    F: Fn(&ConnectionSnapshot) -> bool,
{
    let mut rx = manager.state_receiver();
    let snapshot = tokio::time::timeout(Duration::from_secs(600), rx.wait_for(|s| predicate(s)))
        .await
        .expect("timed out waiting for snapshot")
        .expect("state channel closed")
        .clone();
    snapshot
}

/// Poll `condition` until it holds.
pub async fn wait_until<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..2_000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

/// Run `future` and fail the test if it does not finish.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(600), future)
        .await
        .expect("operation timed out")
}

/// A pushed `new_message` frame.
pub fn new_message_frame(chat_id: &str, id: &str, content: &str) -> String {
    serde_json::json!({
        "type": "new_message",
        "chat_id": chat_id,
        "data": {
            "id": id,
            "chat_id": chat_id,
            "sender_id": "u2",
            "content": content,
            "sent_at": "2024-07-01T10:30:00Z",
            "sender": { "first_name": "Ada", "last_name": "L", "avatar_url": null }
        }
    })
    .to_string()
}

/// A pushed `notification` frame.
pub fn notification_frame(id: u64) -> String {
    serde_json::json!({
        "type": "notification",
        "data": {
            "type": "notification",
            "notification": {
                "id": id,
                "user_id": "u1",
                "type": "follow_request",
                "reference_id": "u2",
                "actor_id": "u2",
                "is_read": false,
                "created_at": "2024-07-01T10:30:00Z"
            },
            "data": {}
        }
    })
    .to_string()
}
