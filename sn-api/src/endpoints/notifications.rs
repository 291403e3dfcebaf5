//! Notification endpoints.

use sn_core::error::SnResult;
use tracing::debug;

use crate::client::ApiClient;
use crate::models::Notification;

impl ApiClient {
    /// Unread notifications of the current user.
    pub async fn notifications(&self) -> SnResult<Vec<Notification>> {
        let list: Option<Vec<Notification>> = self.get_json("/notifications", &[]).await?;
        Ok(list.unwrap_or_default())
    }

    pub async fn mark_notification_read(&self, id: &str) -> SnResult<()> {
        self.put(&format!("/notifications/{id}")).await?;
        debug!("notification {id} marked as read");
        Ok(())
    }

    /// Mark several notifications read, stopping at the first failure.
    pub async fn mark_notifications_read(&self, ids: &[String]) -> SnResult<usize> {
        for id in ids {
            self.mark_notification_read(id).await?;
        }
        Ok(ids.len())
    }
}
