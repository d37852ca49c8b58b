//! Room Directory
//!
//! Read-only listing of the rooms visible to the current user. Consumed by
//! the client to populate the room list; never touched by the session
//! controller.

use serde::{Deserialize, Serialize};

use crate::error::ApiError;

/// Kind of conversation channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Private,
    Department,
    Company,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: String,
    pub name: String,
    pub kind: RoomKind,
    #[serde(default)]
    pub unread_count: u32,
}

/// Thin client for the directory endpoint.
pub struct DirectoryClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl DirectoryClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }

    fn rooms_url(&self) -> String {
        format!("{}/api/rooms", self.base_url.trim_end_matches('/'))
    }

    pub async fn list_rooms(&self) -> Result<Vec<RoomSummary>, ApiError> {
        let resp = self
            .client
            .get(self.rooms_url())
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(ApiError::from_reqwest)?;

        if !resp.status().is_success() {
            return Err(ApiError::Status {
                status: resp.status().as_u16(),
            });
        }

        resp.json().await.map_err(ApiError::from_reqwest)
    }
}
