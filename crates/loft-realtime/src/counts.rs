//! Pull side of the layer: the server endpoints behind the counters.

use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use loft_types::api::{UnreadByConversation, UnreadCountResponse};
use loft_types::models::Conversation;

use crate::error::{RealtimeError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Authoritative server state the session reconciles against.
pub trait CountSource: Send + Sync {
    fn unread_messages(&self) -> BoxFuture<'_, Result<u32>>;

    fn unread_notifications(&self) -> BoxFuture<'_, Result<u32>>;

    fn unread_by_conversation(&self) -> BoxFuture<'_, Result<UnreadByConversation>>;

    fn conversations(&self) -> BoxFuture<'_, Result<Vec<Conversation>>>;

    /// Persist `last_read_at = now` for the current user.
    fn mark_conversation_read(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<()>>;
}

/// Await a count, treating any failure as zero.
pub async fn count_or_zero<F>(label: &'static str, fut: F) -> u32
where
    F: Future<Output = Result<u32>>,
{
    match fut.await {
        Ok(count) => count,
        Err(e) => {
            debug!(count = label, "unread count unavailable, using 0: {}", e);
            0
        }
    }
}

/// [`CountSource`] over the Loft HTTP API with a bearer token.
pub struct HttpCountSource {
    http: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpCountSource {
    pub fn new(base_url: &str, access_token: &str) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(RealtimeError::Status { status: status.as_u16() });
        }
        Ok(response.json::<T>().await?)
    }

    async fn count(&self, path: &str) -> Result<u32> {
        let body: UnreadCountResponse = self.get_json(path).await?;
        Ok(body.count)
    }
}

impl CountSource for HttpCountSource {
    fn unread_messages(&self) -> BoxFuture<'_, Result<u32>> {
        Box::pin(self.count("/api/conversations/unread-count"))
    }

    fn unread_notifications(&self) -> BoxFuture<'_, Result<u32>> {
        Box::pin(self.count("/api/notifications/unread-count"))
    }

    fn unread_by_conversation(&self) -> BoxFuture<'_, Result<UnreadByConversation>> {
        Box::pin(self.get_json("/api/conversations/unread-by-conversation"))
    }

    fn conversations(&self) -> BoxFuture<'_, Result<Vec<Conversation>>> {
        Box::pin(self.get_json("/api/conversations"))
    }

    fn mark_conversation_read(&self, conversation_id: Uuid) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let response = self
                .http
                .post(self.url(&format!("/api/conversations/{conversation_id}/mark-read")))
                .bearer_auth(&self.access_token)
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                return Err(RealtimeError::Status { status: status.as_u16() });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn failures_count_as_zero() {
        let failing = async { Err(RealtimeError::Status { status: 503 }) };
        assert_eq!(count_or_zero("messages", failing).await, 0);
        assert_eq!(count_or_zero("messages", async { Ok(4) }).await, 4);
    }
}
