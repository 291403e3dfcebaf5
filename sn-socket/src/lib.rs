//! Social network socket - real-time delivery core.
//!
//! This crate provides the streaming side of the client:
//! - One long-lived WebSocket connection per session, owned by a supervisor task
//! - Topic routing with per-topic duplicate suppression
//! - Automatic reconnection with capped exponential backoff
//! - An outbound queue that holds frames until the connection is open

pub mod backoff;
pub mod frame;
pub mod manager;
pub mod queue;
pub mod router;
pub mod transport;

// Re-export key types
pub use backoff::{BackoffPolicy, FailureAction, ReconnectConfig, ReconnectState};
pub use frame::{
    ChatMessagePayload, Frame, FrameType, MessageSender, NotificationPayload, NotificationRecord,
    Topic,
};
pub use manager::{ConnectionManager, ConnectionSnapshot, ConnectionState, SendReceipt};
pub use queue::{EnqueueOutcome, OutboundQueue, QueueStats, QueuedFrame};
pub use router::{Diagnostic, DiagnosticKind, DispatchOutcome, Router, SubscriptionHandle};
pub use transport::{Connector, FrameSink, FrameStream, TransportEvent, TransportPair, WsConnector};
