//! Social network API - HTTP client for the chat and notification endpoints.
//!
//! Only the calls the real-time core interacts with are covered: listing
//! chats, paging and sending messages, and reading notifications. Requests
//! authenticate with the session cookie and retry transient failures with
//! exponential backoff.

pub mod client;
pub mod endpoints;
pub mod models;

// Re-export key types
pub use client::{ApiClient, RetryConfig};
pub use endpoints::messages::MessageQuery;
pub use models::{ChatMessage, ChatSummary, LastMessage, MessagePage, Notification};
