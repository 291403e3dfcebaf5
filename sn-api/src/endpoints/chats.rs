//! Chat endpoints.

use sn_core::error::SnResult;

use crate::client::ApiClient;
use crate::models::{ChatList, ChatSummary};

impl ApiClient {
    /// List direct and group chats of the current user.
    pub async fn list_chats(&self) -> SnResult<Vec<ChatSummary>> {
        let list: ChatList = self.get_json("/chats", &[]).await?;
        Ok(list.chats.unwrap_or_default())
    }
}
