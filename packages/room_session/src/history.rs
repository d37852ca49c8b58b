//! History Loader
//!
//! One-shot paginated fetch of prior messages for a room over the REST
//! collaborator.

use async_trait::async_trait;

use crate::error::ApiError;
use crate::message::ChatMessage;
use crate::protocol::HistoryPage;

/// Fetches the history page for a room, most-recent-first.
#[async_trait]
pub trait HistoryLoader: Send + Sync + 'static {
    async fn load_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, ApiError>;
}

/// `HistoryLoader` backed by the suite's REST API.
pub struct RestHistoryLoader {
    client: reqwest::Client,
    base_url: String,
    token: String,
    page_size: usize,
}

impl RestHistoryLoader {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, page_size: usize) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
            page_size,
        }
    }

    fn history_url(&self, room_id: &str) -> String {
        format!(
            "{}/api/rooms/{}/messages?limit={}",
            self.base_url.trim_end_matches('/'),
            room_id,
            self.page_size
        )
    }
}

#[async_trait]
impl HistoryLoader for RestHistoryLoader {
    async fn load_history(&self, room_id: &str) -> Result<Vec<ChatMessage>, ApiError> {
        let resp = self
            .client
            .get(self.history_url(room_id))
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status().as_u16(),
            });
        }

        let page: HistoryPage = resp.json().await.map_err(ApiError::from_reqwest)?;
        Ok(page.messages)
    }
}
