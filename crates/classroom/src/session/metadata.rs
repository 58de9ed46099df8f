//! Course metadata resolution.
//!
//! The join announcement carries a course id so the relay can record
//! attendance against the right course. Resolution is best effort: the
//! session controller logs a failed lookup and joins without course context.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};

/// Maps a room to the course it belongs to, if any.
#[async_trait]
pub trait RoomDirectory: Send + Sync {
    async fn course_for_room(&self, room_id: &str) -> Result<Option<String>>;
}

#[derive(Debug, Deserialize)]
struct RoomInfo {
    #[serde(default)]
    course_id: Option<String>,
}

/// Directory backed by the training service's REST API:
/// `GET {base}/rooms/{room_id}` returning `{"course_id": "..."}`.
pub struct HttpRoomDirectory {
    base_url: String,
    client: reqwest::Client,
}

impl HttpRoomDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Directory(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn room_url(&self, room_id: &str) -> String {
        format!("{}/rooms/{}", self.base_url, room_id)
    }
}

#[async_trait]
impl RoomDirectory for HttpRoomDirectory {
    async fn course_for_room(&self, room_id: &str) -> Result<Option<String>> {
        let url = self.room_url(room_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Directory(format!("lookup of {} failed: {}", url, e)))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(room_id, "room not in directory");
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Error::Directory(format!(
                "lookup of {} returned {}",
                url,
                response.status()
            )));
        }

        let info: RoomInfo = response
            .json()
            .await
            .map_err(|e| Error::Directory(format!("invalid directory payload: {}", e)))?;
        Ok(info.course_id)
    }
}

/// Fixed mappings for tests and demos.
#[derive(Debug, Default)]
pub struct StaticRoomDirectory {
    courses: HashMap<String, String>,
}

impl StaticRoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_course(mut self, room_id: &str, course_id: &str) -> Self {
        self.courses.insert(room_id.to_string(), course_id.to_string());
        self
    }
}

#[async_trait]
impl RoomDirectory for StaticRoomDirectory {
    async fn course_for_room(&self, room_id: &str) -> Result<Option<String>> {
        Ok(self.courses.get(room_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_directory_lookup() {
        let directory = StaticRoomDirectory::new().with_course("rust-101", "c-7");
        assert_eq!(
            directory.course_for_room("rust-101").await.unwrap(),
            Some("c-7".to_string())
        );
        assert_eq!(directory.course_for_room("unknown").await.unwrap(), None);
    }

    #[test]
    fn http_directory_builds_room_urls() {
        let directory =
            HttpRoomDirectory::new("https://api.example.com/v1/", Duration::from_secs(2)).unwrap();
        assert_eq!(
            directory.room_url("rust-101"),
            "https://api.example.com/v1/rooms/rust-101"
        );
    }
}
