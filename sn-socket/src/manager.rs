//! Connection manager.
//!
//! Owns the single streaming connection of a session. A supervisor task per
//! session holds the transport exclusively. It performs every write, pumps
//! inbound frames into the [`Router`], and drives the [`BackoffPolicy`] when
//! the connection drops.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use sn_core::config::{AppConfig, RealtimeConfig};
use sn_core::error::{SnError, SnResult};

use crate::backoff::{BackoffPolicy, FailureAction, ReconnectConfig, ReconnectState};
use crate::frame::{Frame, Topic};
use crate::queue::{OutboundQueue, QueueStats};
use crate::router::{Router, SubscriptionHandle};
use crate::transport::{Connector, FrameSink, TransportEvent, TransportPair, WsConnector};

/// How long `close()` waits for the supervisor before aborting it.
const SUPERVISOR_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// Everything a state listener gets to see.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub reconnect: ReconnectState,
    /// Failed attempts since the last successful open.
    pub retry_count: u32,
    pub last_open: Option<DateTime<Utc>>,
    /// A session was opened and not closed since.
    pub session_active: bool,
    /// Reason of the last failure, if any.
    pub last_error: Option<String>,
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            reconnect: ReconnectState::Idle,
            retry_count: 0,
            last_open: None,
            session_active: false,
            last_error: None,
        }
    }
}

impl ConnectionSnapshot {
    /// Automatic reconnection gave up; a manual retry is needed.
    pub fn is_failed(&self) -> bool {
        self.reconnect == ReconnectState::Failed
    }
}

/// Returned by [`ConnectionManager::send_chat_message`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendReceipt {
    /// Position in the outbound queue.
    pub seq: u64,
    /// Client-generated id carried in the frame.
    pub client_id: String,
}

pub type StateCallback = Arc<dyn Fn(&ConnectionSnapshot) + Send + Sync>;

/// How a single connection ended.
enum ConnectionEnd {
    Shutdown,
    Closed { code: Option<u16>, reason: String },
    Failed(String),
}

struct Shared {
    connector: Arc<dyn Connector>,
    router: Router,
    queue: OutboundQueue,
    policy: Mutex<BackoffPolicy>,
    state_tx: watch::Sender<ConnectionSnapshot>,
    listeners: Mutex<Vec<(u64, StateCallback)>>,
    /// Held from the snapshot update until every listener has run.
    delivery: Mutex<()>,
    next_listener_id: AtomicU64,
    outbound_ready: Notify,
}

struct Session {
    token: String,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Streaming connection manager.
///
/// Share it as `Arc<ConnectionManager>`. UI code only needs
/// [`subscribe`](Self::subscribe), [`send_chat_message`](Self::send_chat_message)
/// and [`connection_state`](Self::connection_state).
///
/// - `open` starts a supervisor task that connects, rejoins chat rooms,
///   flushes the outbound queue and dispatches inbound frames
/// - drops are retried with capped exponential backoff until the policy
///   gives up; `retry` restarts from `Failed`
/// - `close` cancels pending timers, waits for the supervisor and clears
///   subscriptions and queued frames
/// - dropping the manager aborts the supervisor
pub struct ConnectionManager {
    shared: Arc<Shared>,
    session: tokio::sync::Mutex<Option<Session>>,
    shutdown_timeout: Duration,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, config: &RealtimeConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionSnapshot::default());
        Self {
            shared: Arc::new(Shared {
                connector,
                router: Router::new(config.seen_window_capacity),
                queue: OutboundQueue::new(config.outbound_queue_capacity),
                policy: Mutex::new(BackoffPolicy::new(ReconnectConfig::from(config))),
                state_tx,
                listeners: Mutex::new(Vec::new()),
                delivery: Mutex::new(()),
                next_listener_id: AtomicU64::new(1),
                outbound_ready: Notify::new(),
            }),
            session: tokio::sync::Mutex::new(None),
            shutdown_timeout: SUPERVISOR_SHUTDOWN_TIMEOUT,
        }
    }

    /// Grace period the supervisor gets to stop before it is aborted.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Manager talking WebSocket to the configured server.
    pub fn from_config(config: &AppConfig) -> SnResult<Self> {
        let connector = WsConnector::from_config(config)?;
        Ok(Self::new(Arc::new(connector), &config.realtime))
    }

    /// Open a session.
    ///
    /// No-op while `Open` or `Connecting` for the same session token. Any
    /// other running session is stopped first.
    pub async fn open(&self, session_token: &str) -> SnResult<()> {
        let mut session = self.session.lock().await;

        if let Some(current) = session.as_ref() {
            let state = self.connection_state();
            if current.token == session_token
                && !current.task.is_finished()
                && matches!(state, ConnectionState::Open | ConnectionState::Connecting)
            {
                debug!("already {state} for this session, skipping open");
                return Ok(());
            }
        }

        if let Some(previous) = session.take() {
            let same_session = previous.token == session_token;
            stop_supervisor(previous, self.shutdown_timeout).await;
            if !same_session {
                info!("switching session, dropping previous subscriptions");
                self.shared.router.clear();
                self.shared.queue.clear();
            }
        }

        {
            let mut policy = self.shared.policy();
            policy.on_user_close();
            policy.on_open()?;
        }
        self.shared.publish(None, |s| {
            s.state = ConnectionState::Connecting;
            s.reconnect = ReconnectState::Connecting;
            s.retry_count = 0;
            s.session_active = true;
            s.last_error = None;
        });

        *session = Some(self.spawn_supervisor(session_token.to_string()));
        Ok(())
    }

    /// Close the session.
    ///
    /// Cancels any pending reconnect, shuts the transport down gracefully,
    /// clears subscriptions and drops queued frames. No callback fires for
    /// inbound frames after this returns. State listeners stay registered.
    pub async fn close(&self) {
        let mut session = self.session.lock().await;

        if let Some(current) = session.take() {
            current.shutdown_tx.send_replace(true);
            self.shared.publish(None, |s| s.state = ConnectionState::Closing);
            stop_supervisor(current, self.shutdown_timeout).await;
        }

        self.shared.policy().on_user_close();
        self.shared.router.clear();
        let dropped = self.shared.queue.clear();
        if dropped > 0 {
            info!("dropped {dropped} queued frame(s) on close");
        }

        self.shared.publish(None, |s| {
            s.state = ConnectionState::Disconnected;
            s.reconnect = ReconnectState::Idle;
            s.retry_count = 0;
            s.session_active = false;
        });
    }

    /// Explicit user retry after automatic reconnection gave up.
    pub async fn retry(&self) -> SnResult<()> {
        let mut session = self.session.lock().await;

        let token = match session.as_ref() {
            Some(current) => current.token.clone(),
            None => return Err(SnError::InvalidState("retry without a session".into())),
        };

        self.shared.policy().on_retry()?;
        info!("manual retry requested");

        if let Some(previous) = session.take() {
            stop_supervisor(previous, self.shutdown_timeout).await;
        }
        self.shared.publish(None, |s| {
            s.state = ConnectionState::Connecting;
            s.reconnect = ReconnectState::Connecting;
            s.retry_count = 0;
            s.last_error = None;
        });

        *session = Some(self.spawn_supervisor(token));
        Ok(())
    }

    fn spawn_supervisor(&self, token: String) -> Session {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::clone(&self.shared);
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            run_session(shared, task_token, shutdown_rx).await;
        });
        Session {
            token,
            shutdown_tx,
            task,
        }
    }

    /// Queue a frame for sending.
    ///
    /// Written immediately while `Open`, otherwise on the next `Open`.
    /// Never blocks on the transport. Returns the queue sequence number.
    pub fn send(&self, frame: Frame) -> SnResult<u64> {
        if frame.frame_type().is_inbound() || frame.frame_type().is_unknown() {
            return Err(SnError::InvalidFrame(format!(
                "{} frames cannot be sent",
                frame.frame_type()
            )));
        }

        let outcome = self.shared.queue.enqueue(frame);
        self.shared.outbound_ready.notify_one();
        Ok(outcome.seq)
    }

    /// Send a chat message with a fresh client id.
    pub fn send_chat_message(&self, chat_id: &str, content: &str) -> SnResult<SendReceipt> {
        if chat_id.trim().is_empty() {
            return Err(SnError::InvalidFrame("chat id is empty".into()));
        }
        if content.trim().is_empty() {
            return Err(SnError::InvalidFrame("message content is empty".into()));
        }

        let client_id = uuid::Uuid::new_v4().to_string();
        let seq = self.send(Frame::chat_message(chat_id, content, client_id.as_str()))?;
        Ok(SendReceipt { seq, client_id })
    }

    /// Subscribe to a topic.
    ///
    /// The first subscriber of a chat while `Open` also joins the chat room.
    /// Later reconnects rejoin every chat that still has subscribers.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let first_for_chat =
            topic.chat_id().is_some() && self.shared.router.subscriber_count(&topic) == 0;
        let handle = self.shared.router.subscribe(topic.clone(), callback);

        if first_for_chat && self.connection_state() == ConnectionState::Open {
            if let Some(chat_id) = topic.chat_id() {
                self.shared.queue.enqueue(Frame::join_chat(chat_id));
                self.shared.outbound_ready.notify_one();
            }
        }
        handle
    }

    /// Register a state listener. Listeners run synchronously, in
    /// registration order, on every snapshot change.
    pub fn on_state_change<F>(&self, callback: F) -> u64
    where
        F: Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners().push((id, Arc::new(callback)));
        id
    }

    pub fn remove_state_listener(&self, id: u64) -> bool {
        let mut listeners = self.shared.listeners();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().state
    }

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.shared.state_tx.borrow().clone()
    }

    /// Watch channel carrying every snapshot.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.shared.state_tx.subscribe()
    }

    pub fn router(&self) -> &Router {
        &self.shared.router
    }

    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn queue_stats(&self) -> QueueStats {
        self.shared.queue.stats()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.shutdown_tx.send_replace(true);
            session.task.abort();
        }
    }
}

async fn stop_supervisor(session: Session, timeout: Duration) {
    session.shutdown_tx.send_replace(true);
    let mut task = session.task;
    if tokio::time::timeout(timeout, &mut task).await.is_err() {
        warn!("supervisor did not stop in time, aborting");
        task.abort();
        // Abort only lands at the next await point; a dispatch in progress
        // runs to completion first.
        let _ = task.await;
    }
}

/// Resolves once shutdown is requested or the manager is gone.
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl Shared {
    fn policy(&self) -> MutexGuard<'_, BackoffPolicy> {
        self.policy.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn listeners(&self) -> MutexGuard<'_, Vec<(u64, StateCallback)>> {
        self.listeners.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply an update to the snapshot and notify listeners if it changed.
    ///
    /// With `live`, the update is skipped once that session was told to shut
    /// down, so a stopping supervisor cannot overwrite `close()` transitions.
    fn publish<F>(&self, live: Option<&watch::Receiver<bool>>, update: F) -> bool
    where
        F: FnOnce(&mut ConnectionSnapshot),
    {
        let _delivery = self.delivery.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut published = None;
        self.state_tx.send_if_modified(|snapshot| {
            if live.is_some_and(|rx| *rx.borrow()) {
                return false;
            }
            let before = snapshot.clone();
            update(snapshot);
            if *snapshot == before {
                return false;
            }
            published = Some((before.state, snapshot.clone()));
            true
        });

        let Some((previous_state, snapshot)) = published else {
            return false;
        };
        if previous_state != snapshot.state {
            info!("connection state: {previous_state} -> {}", snapshot.state);
        }

        let listeners: Vec<StateCallback> =
            self.listeners().iter().map(|(_, cb)| Arc::clone(cb)).collect();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&snapshot))).is_err() {
                warn!("state listener panicked");
            }
        }
        true
    }
}

/// Supervisor: connect, serve, back off, repeat until shutdown or give-up.
async fn run_session(shared: Arc<Shared>, token: String, mut shutdown: watch::Receiver<bool>) {
    loop {
        let connected = tokio::select! {
            result = shared.connector.connect(&token) => result,
            _ = shutdown_requested(&mut shutdown) => return,
        };

        let end = match connected {
            Ok(pair) => serve_connection(&shared, pair, &mut shutdown).await,
            Err(e) => {
                warn!("connection attempt failed: {e}");
                ConnectionEnd::Failed(e.to_string())
            }
        };

        let (action, reason) = match end {
            ConnectionEnd::Shutdown => return,
            ConnectionEnd::Closed { code, reason } => {
                let result = shared.policy().on_close(code);
                match result {
                    Ok(Some(action)) => (action, format!("closed ({code:?}): {reason}")),
                    Ok(None) => {
                        info!("server ended the session (code {code:?})");
                        shared.publish(Some(&shutdown), |s| {
                            s.state = ConnectionState::Disconnected;
                            s.reconnect = ReconnectState::Idle;
                            s.retry_count = 0;
                            s.session_active = false;
                        });
                        return;
                    }
                    Err(e) => {
                        error!("reconnect policy rejected close: {e}");
                        return;
                    }
                }
            }
            ConnectionEnd::Failed(reason) => {
                let result = shared.policy().on_failure();
                match result {
                    Ok(action) => (action, reason),
                    Err(e) => {
                        error!("reconnect policy rejected failure: {e}");
                        return;
                    }
                }
            }
        };

        match action {
            FailureAction::Retry { attempt, delay } => {
                shared.publish(Some(&shutdown), |s| {
                    s.state = ConnectionState::Disconnected;
                    s.reconnect = ReconnectState::Backoff { attempt };
                    s.retry_count = attempt;
                    s.last_error = Some(reason);
                });

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = shutdown_requested(&mut shutdown) => {
                        debug!("reconnection cancelled by close");
                        return;
                    }
                }

                if let Err(e) = shared.policy().on_backoff_elapsed() {
                    error!("reconnect policy rejected backoff: {e}");
                    return;
                }
                shared.publish(Some(&shutdown), |s| {
                    s.state = ConnectionState::Connecting;
                    s.reconnect = ReconnectState::Connecting;
                });
            }
            FailureAction::GiveUp { attempts } => {
                let failure = SnError::MaxRetriesExceeded { attempts };
                error!("{failure} (last error: {reason})");
                shared.publish(Some(&shutdown), |s| {
                    s.state = ConnectionState::Disconnected;
                    s.reconnect = ReconnectState::Failed;
                    s.retry_count = attempts;
                    s.last_error = Some(failure.to_string());
                });
                return;
            }
        }
    }
}

/// Serve one established connection until it ends.
async fn serve_connection(
    shared: &Shared,
    pair: TransportPair,
    shutdown: &mut watch::Receiver<bool>,
) -> ConnectionEnd {
    let TransportPair {
        mut sink,
        mut stream,
    } = pair;

    if let Err(e) = shared.policy().on_connected() {
        error!("reconnect policy rejected open: {e}");
        return ConnectionEnd::Shutdown;
    }
    let published = shared.publish(Some(&*shutdown), |s| {
        s.state = ConnectionState::Open;
        s.reconnect = ReconnectState::Connected;
        s.retry_count = 0;
        s.last_open = Some(Utc::now());
        s.last_error = None;
    });
    if !published && *shutdown.borrow() {
        let _ = sink.close().await;
        return ConnectionEnd::Shutdown;
    }

    let prepared = tokio::select! {
        result = rejoin_and_flush(shared, sink.as_mut()) => Some(result),
        _ = shutdown_requested(shutdown) => None,
    };
    match prepared {
        None => {
            debug!("shutdown during rejoin, dropping transport");
            return ConnectionEnd::Shutdown;
        }
        Some(Err(e)) => return ConnectionEnd::Failed(e.to_string()),
        Some(Ok(())) => {}
    }

    loop {
        tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => {
                if let Err(e) = sink.close().await {
                    debug!("close handshake failed: {e}");
                }
                return ConnectionEnd::Shutdown;
            }
            event = stream.next_event() => match event {
                Some(TransportEvent::Text(text)) => {
                    shared.router.dispatch_raw(&text);
                }
                Some(TransportEvent::Closed { code, reason }) => {
                    return ConnectionEnd::Closed { code, reason };
                }
                Some(TransportEvent::Error(e)) => return ConnectionEnd::Failed(e),
                None => {
                    return ConnectionEnd::Closed {
                        code: None,
                        reason: "stream ended".into(),
                    };
                }
            },
            _ = shared.outbound_ready.notified() => {
                if let Err(e) = shared.queue.flush(sink.as_mut()).await {
                    return ConnectionEnd::Failed(e.to_string());
                }
            }
        }
    }
}

/// Rejoin every subscribed chat, then write out the queue.
async fn rejoin_and_flush<S>(shared: &Shared, sink: &mut S) -> SnResult<()>
where
    S: FrameSink + ?Sized,
{
    // Rooms are joined per connection on the server side.
    for chat_id in shared.router.active_chat_topics() {
        let text = Frame::join_chat(chat_id.as_str()).to_wire()?;
        sink.send_text(text).await?;
        debug!("rejoined chat {chat_id}");
    }
    shared.queue.flush(sink).await?;
    Ok(())
}
