//! Inbound frame routing.
//!
//! The router owns all subscriptions and the per-topic seen-id windows.
//! Dispatch is synchronous: callbacks run on the caller's thread in
//! registration order, outside of any router lock, so a callback may
//! subscribe or drop handles without deadlocking.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use tracing::{debug, warn};

use sn_core::constants;

use crate::frame::{Frame, Topic};

/// Callback invoked for every frame delivered to a subscription.
pub type FrameCallback = Arc<dyn Fn(&Frame) + Send + Sync>;

/// Sink receiving frames the router could not route.
pub type DiagnosticSink = Arc<dyn Fn(&Diagnostic) + Send + Sync>;

/// Why a frame ended up in the diagnostic sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// The frame parsed but its type is not known to this client.
    UnknownType,
    /// The line was not a valid frame.
    Malformed,
    /// Known type without a usable topic (e.g. a message without chat id).
    Unroutable,
}

/// A frame (or raw line) the router could not deliver.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub detail: String,
    pub raw: Option<String>,
    pub frame: Option<Frame>,
}

/// Result of dispatching a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Delivered to this many subscribers (possibly zero).
    Delivered(usize),
    /// Dropped because its dedupe key was already seen for the topic.
    Duplicate,
    /// Handed to the diagnostic sink.
    Diagnostic,
}

/// Bounded FIFO set of recently observed dedupe keys.
#[derive(Debug)]
pub struct SeenWindow {
    capacity: usize,
    keys: HashSet<String>,
    order: VecDeque<String>,
}

impl SeenWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            keys: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert a key. Returns `false` (and changes nothing) if already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.keys.insert(key.to_string());
        self.order.push_back(key.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.keys.remove(&oldest);
            }
        }
        true
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

struct Subscriber {
    id: u64,
    callback: FrameCallback,
}

#[derive(Default)]
struct RouterState {
    subscriptions: HashMap<Topic, Vec<Subscriber>>,
    windows: HashMap<Topic, SeenWindow>,
    next_id: u64,
}

struct RouterInner {
    state: Mutex<RouterState>,
    diagnostic_sink: RwLock<Option<DiagnosticSink>>,
    window_capacity: usize,
}

impl RouterInner {
    fn lock(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, topic: &Topic, id: u64) -> bool {
        let mut state = self.lock();
        let Some(subs) = state.subscriptions.get_mut(topic) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.id != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            state.subscriptions.remove(topic);
            state.windows.remove(topic);
        }
        if removed {
            debug!("unsubscribed #{id} from {topic}");
        }
        removed
    }
}

/// Classifies, deduplicates and fans out inbound frames.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(constants::SEEN_WINDOW_CAPACITY)
    }
}

impl Router {
    /// Create a router whose seen-id windows hold `window_capacity` keys per topic.
    pub fn new(window_capacity: usize) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                state: Mutex::new(RouterState::default()),
                diagnostic_sink: RwLock::new(None),
                window_capacity,
            }),
        }
    }

    /// Register interest in a topic.
    ///
    /// The subscription lives as long as the returned handle.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> SubscriptionHandle
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        state.next_id += 1;
        let id = state.next_id;
        state
            .subscriptions
            .entry(topic.clone())
            .or_default()
            .push(Subscriber {
                id,
                callback: Arc::new(callback),
            });
        debug!("subscribed #{id} to {topic}");

        SubscriptionHandle {
            id,
            topic,
            router: Arc::downgrade(&self.inner),
        }
    }

    /// Replace the sink receiving unknown and malformed frames.
    pub fn set_diagnostic_sink<F>(&self, sink: F)
    where
        F: Fn(&Diagnostic) + Send + Sync + 'static,
    {
        let mut guard = self
            .inner
            .diagnostic_sink
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Some(Arc::new(sink));
    }

    /// Deliver a frame to every subscriber of its topic, once per dedupe key.
    pub fn dispatch(&self, frame: &Frame) -> DispatchOutcome {
        if frame.frame_type().is_unknown() {
            self.emit_diagnostic(Diagnostic {
                kind: DiagnosticKind::UnknownType,
                detail: format!("unknown frame type '{}'", frame.frame_type()),
                raw: None,
                frame: Some(frame.clone()),
            });
            return DispatchOutcome::Diagnostic;
        }

        let Some(topic) = frame.topic() else {
            self.emit_diagnostic(Diagnostic {
                kind: DiagnosticKind::Unroutable,
                detail: format!("no topic for '{}' frame", frame.frame_type()),
                raw: None,
                frame: Some(frame.clone()),
            });
            return DispatchOutcome::Diagnostic;
        };

        let callbacks: Vec<(u64, FrameCallback)> = {
            let mut state = self.inner.lock();
            let subscribed = state.subscriptions.contains_key(&topic);
            if let Some(key) = frame.dedupe_key() {
                let capacity = self.inner.window_capacity;
                // Nobody listening and nothing pre-seeded: no window to keep.
                let window = match state.windows.entry(topic.clone()) {
                    Entry::Occupied(entry) => Some(entry.into_mut()),
                    Entry::Vacant(entry) if subscribed => Some(entry.insert(SeenWindow::new(capacity))),
                    Entry::Vacant(_) => None,
                };
                if window.is_some_and(|w| !w.insert(key)) {
                    debug!("duplicate {} {key} on {topic} dropped", frame.frame_type());
                    return DispatchOutcome::Duplicate;
                }
            }
            state
                .subscriptions
                .get(&topic)
                .map(|subs| {
                    subs.iter()
                        .map(|s| (s.id, Arc::clone(&s.callback)))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (id, callback) in &callbacks {
            let result = catch_unwind(AssertUnwindSafe(|| callback(frame)));
            if result.is_err() {
                warn!("subscriber #{id} on {topic} panicked while handling {}", frame.frame_type());
            }
        }

        debug!(
            "dispatched {} on {topic} to {} subscriber(s)",
            frame.frame_type(),
            callbacks.len()
        );
        DispatchOutcome::Delivered(callbacks.len())
    }

    /// Parse and dispatch a transport text message.
    ///
    /// Malformed lines go to the diagnostic sink; the remaining lines are
    /// still dispatched.
    pub fn dispatch_raw(&self, text: &str) -> Vec<DispatchOutcome> {
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| match Frame::parse_line(line) {
                Ok(frame) => self.dispatch(&frame),
                Err(e) => {
                    self.emit_diagnostic(Diagnostic {
                        kind: DiagnosticKind::Malformed,
                        detail: e.to_string(),
                        raw: Some(line.to_string()),
                        frame: None,
                    });
                    DispatchOutcome::Diagnostic
                }
            })
            .collect()
    }

    /// Record a key as already delivered, e.g. for an optimistic local echo.
    ///
    /// Returns `false` if the key was already present.
    pub fn mark_seen(&self, topic: &Topic, key: &str) -> bool {
        let capacity = self.inner.window_capacity;
        let mut state = self.inner.lock();
        state
            .windows
            .entry(topic.clone())
            .or_insert_with(|| SeenWindow::new(capacity))
            .insert(key)
    }

    pub fn is_seen(&self, topic: &Topic, key: &str) -> bool {
        let state = self.inner.lock();
        state
            .windows
            .get(topic)
            .map(|w| w.contains(key))
            .unwrap_or(false)
    }

    /// Number of live subscriptions for a topic.
    pub fn subscriber_count(&self, topic: &Topic) -> usize {
        let state = self.inner.lock();
        state.subscriptions.get(topic).map(Vec::len).unwrap_or(0)
    }

    /// Total number of live subscriptions across all topics.
    pub fn total_subscriptions(&self) -> usize {
        let state = self.inner.lock();
        state.subscriptions.values().map(Vec::len).sum()
    }

    /// Chat ids that currently have at least one subscriber, sorted.
    pub fn active_chat_topics(&self) -> Vec<String> {
        let state = self.inner.lock();
        let mut chats: Vec<String> = state
            .subscriptions
            .keys()
            .filter_map(|t| t.chat_id().map(str::to_string))
            .collect();
        chats.sort();
        chats
    }

    /// Number of topics currently holding a seen-id window.
    pub fn window_count(&self) -> usize {
        self.inner.lock().windows.len()
    }

    /// Drop every subscription and seen-id window.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        let count: usize = state.subscriptions.values().map(Vec::len).sum();
        state.subscriptions.clear();
        state.windows.clear();
        if count > 0 {
            debug!("router cleared {count} subscription(s)");
        }
    }

    fn emit_diagnostic(&self, diagnostic: Diagnostic) {
        let sink = self
            .inner
            .diagnostic_sink
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match sink {
            Some(sink) => {
                if catch_unwind(AssertUnwindSafe(|| sink(&diagnostic))).is_err() {
                    warn!("diagnostic sink panicked");
                }
            }
            None => warn!(
                "undeliverable frame ({:?}): {}{}",
                diagnostic.kind,
                diagnostic.detail,
                diagnostic
                    .raw
                    .as_deref()
                    .map(|r| format!(" raw={r}"))
                    .unwrap_or_default()
            ),
        }
    }
}

/// Keeps a subscription alive; dropping it unsubscribes.
pub struct SubscriptionHandle {
    id: u64,
    topic: Topic,
    router: Weak<RouterInner>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove the subscription now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish()
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.topic, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn message(chat: &str, id: &str) -> Frame {
        Frame::new_message(chat, serde_json::json!({ "id": id, "content": "x" }))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn(&Frame) + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        (count, move |_: &Frame| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_seen_window_evicts_oldest() {
        let mut window = SeenWindow::new(2);
        assert!(window.insert("a"));
        assert!(!window.insert("a"));
        assert!(window.insert("b"));
        assert!(window.insert("c"));
        assert_eq!(window.len(), 2);
        assert!(!window.contains("a"));
        assert!(window.contains("b"));
        assert!(window.contains("c"));
    }

    #[test]
    fn test_duplicates_delivered_once() {
        let router = Router::new(10);
        let (count, cb) = counter();
        let _sub = router.subscribe(Topic::chat("c1"), cb);

        assert_eq!(router.dispatch(&message("c1", "m1")), DispatchOutcome::Delivered(1));
        assert_eq!(router.dispatch(&message("c1", "m1")), DispatchOutcome::Duplicate);
        assert_eq!(router.dispatch(&message("c1", "m2")), DispatchOutcome::Delivered(1));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_same_key_in_different_topics() {
        let router = Router::new(10);
        let (count, cb) = counter();
        let _a = router.subscribe(Topic::chat("c1"), cb);
        let (count_b, cb_b) = counter();
        let _b = router.subscribe(Topic::chat("c2"), cb_b);

        router.dispatch(&message("c1", "m1"));
        router.dispatch(&message("c2", "m1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(count_b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_redelivery_after_window_eviction() {
        let router = Router::new(2);
        let (count, cb) = counter();
        let _sub = router.subscribe(Topic::chat("c1"), cb);

        router.dispatch(&message("c1", "m1"));
        router.dispatch(&message("c1", "m2"));
        router.dispatch(&message("c1", "m3"));
        // m1 fell out of the window.
        router.dispatch(&message("c1", "m1"));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_fan_out_in_registration_order() {
        let router = Router::new(10);
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            handles.push(router.subscribe(Topic::chat("c1"), move |_| {
                order.lock().unwrap().push(i);
            }));
        }

        router.dispatch(&message("c1", "m1"));
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let router = Router::new(10);
        let _bad = router.subscribe(Topic::chat("c1"), |_| panic!("boom"));
        let (count, cb) = counter();
        let _good = router.subscribe(Topic::chat("c1"), cb);

        assert_eq!(router.dispatch(&message("c1", "m1")), DispatchOutcome::Delivered(2));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_handle_unsubscribes() {
        let router = Router::new(10);
        let (count, cb) = counter();
        let sub = router.subscribe(Topic::chat("c1"), cb);
        assert_eq!(router.subscriber_count(&Topic::chat("c1")), 1);

        sub.unsubscribe();
        assert_eq!(router.subscriber_count(&Topic::chat("c1")), 0);
        router.dispatch(&message("c1", "m1"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_notifications_go_to_global() {
        let router = Router::new(10);
        let (count, cb) = counter();
        let _sub = router.subscribe(Topic::Global, cb);
        let (chat_count, chat_cb) = counter();
        let _chat = router.subscribe(Topic::chat("c1"), chat_cb);

        router.dispatch(&Frame::notification(
            serde_json::json!({ "notification": { "id": "n1" } }),
        ));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(chat_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unknown_and_malformed_go_to_diagnostics() {
        let router = Router::new(10);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        router.set_diagnostic_sink(move |d| s.lock().unwrap().push(d.kind));

        let outcomes = router.dispatch_raw(
            "{\"type\":\"presence\",\"data\":{}}\nnot json\n{\"type\":\"new_message\",\"data\":{\"id\":\"m1\"}}",
        );
        assert_eq!(outcomes, vec![DispatchOutcome::Diagnostic; 3]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                DiagnosticKind::UnknownType,
                DiagnosticKind::Malformed,
                DiagnosticKind::Unroutable
            ]
        );
    }

    #[test]
    fn test_mark_seen_suppresses_push() {
        let router = Router::new(10);
        let (count, cb) = counter();
        let _sub = router.subscribe(Topic::chat("c1"), cb);

        assert!(router.mark_seen(&Topic::chat("c1"), "m1"));
        assert!(router.is_seen(&Topic::chat("c1"), "m1"));
        assert_eq!(router.dispatch(&message("c1", "m1")), DispatchOutcome::Duplicate);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_windows_follow_subscriptions() {
        let router = Router::new(10);
        for chat in ["x", "y", "z"] {
            assert_eq!(router.dispatch(&message(chat, "m1")), DispatchOutcome::Delivered(0));
        }
        assert_eq!(router.window_count(), 0);

        let (count, cb) = counter();
        let sub = router.subscribe(Topic::chat("c1"), cb);
        router.dispatch(&message("c1", "m1"));
        assert_eq!(router.dispatch(&message("c1", "m1")), DispatchOutcome::Duplicate);
        assert_eq!(router.window_count(), 1);

        drop(sub);
        assert_eq!(router.window_count(), 0);
        assert!(!router.is_seen(&Topic::chat("c1"), "m1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_window_kept_while_other_subscribers_remain() {
        let router = Router::new(10);
        let _first = router.subscribe(Topic::chat("c1"), |_| {});
        let second = router.subscribe(Topic::chat("c1"), |_| {});
        router.dispatch(&message("c1", "m1"));

        drop(second);
        assert!(router.is_seen(&Topic::chat("c1"), "m1"));
        assert_eq!(router.dispatch(&message("c1", "m1")), DispatchOutcome::Duplicate);
    }

    #[test]
    fn test_subscribe_from_callback_does_not_deadlock() {
        let router = Router::new(10);
        let inner_router = router.clone();
        let extra = Arc::new(Mutex::new(Vec::new()));
        let extra_clone = Arc::clone(&extra);
        let _sub = router.subscribe(Topic::chat("c1"), move |_| {
            let handle = inner_router.subscribe(Topic::chat("c2"), |_| {});
            extra_clone.lock().unwrap().push(handle);
        });

        router.dispatch(&message("c1", "m1"));
        assert_eq!(router.subscriber_count(&Topic::chat("c2")), 1);
    }

    #[test]
    fn test_clear_and_active_topics() {
        let router = Router::new(10);
        let _a = router.subscribe(Topic::chat("b"), |_| {});
        let _b = router.subscribe(Topic::chat("a"), |_| {});
        let _g = router.subscribe(Topic::Global, |_| {});
        assert_eq!(router.active_chat_topics(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(router.total_subscriptions(), 3);

        router.mark_seen(&Topic::chat("a"), "m1");
        router.clear();
        assert_eq!(router.total_subscriptions(), 0);
        assert!(!router.is_seen(&Topic::chat("a"), "m1"));
        // Dropping stale handles after clear is harmless.
        drop(_a);
    }
}
