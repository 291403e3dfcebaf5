//! Endpoint groups, each adding methods to [`ApiClient`](crate::client::ApiClient).

pub mod chats;
pub mod messages;
pub mod notifications;
