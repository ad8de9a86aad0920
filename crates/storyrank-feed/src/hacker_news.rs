//! Hacker News Firebase API client.
//!
//! Lists come from `{base}/{topstories|newstories|beststories}.json`, items
//! from `{base}/item/{id}.json`. The API answers unknown IDs with a literal
//! `null` body rather than a 404.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use storyrank_core::config::{FeedConfig, FeedList};
use storyrank_core::error::StoryrankError;
use storyrank_core::types::{Item, ItemId, ItemKind};

use crate::normalize::html_to_text;
use crate::source::{FeedError, FeedSource};

/// HTTP client for the Hacker News item feed.
#[derive(Debug, Clone)]
pub struct HackerNewsClient {
    client: reqwest::Client,
    base_url: String,
    list: FeedList,
}

impl HackerNewsClient {
    pub fn new(config: &FeedConfig) -> Result<Self, StoryrankError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .user_agent(concat!("storyrank/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| StoryrankError::Config(format!("Failed to build feed HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            list: config.list,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FeedError> {
        self.client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Unavailable(format!("GET {}: {}", url, e)))
    }
}

#[async_trait]
impl FeedSource for HackerNewsClient {
    async fn list_candidate_ids(&self) -> Result<Vec<ItemId>, FeedError> {
        let url = format!("{}/{}", self.base_url, self.list.resource());
        let resp = self.get(&url).await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FeedError::Unavailable(format!("GET {} returned {}", url, status)));
        }

        let ids: Vec<i64> = resp
            .json()
            .await
            .map_err(|e| FeedError::Decode(format!("candidate list: {}", e)))?;
        debug!(count = ids.len(), list = ?self.list, "Fetched candidate IDs");

        Ok(ids.into_iter().map(ItemId).collect())
    }

    async fn fetch_item(&self, id: ItemId) -> Result<Item, FeedError> {
        let url = format!("{}/item/{}.json", self.base_url, id);
        let resp = self.get(&url).await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FeedError::NotFound(id));
        }
        if !status.is_success() {
            return Err(FeedError::Unavailable(format!("GET {} returned {}", url, status)));
        }

        let raw: Option<RawItem> = resp
            .json()
            .await
            .map_err(|e| FeedError::Decode(format!("item {}: {}", id, e)))?;
        let raw = raw.ok_or(FeedError::NotFound(id))?;

        if raw.deleted || raw.dead {
            return Err(FeedError::Gone(id));
        }
        Ok(raw.into_item())
    }
}

/// Item as served by the API. Every field except `id` may be absent.
#[derive(Debug, Deserialize)]
struct RawItem {
    id: i64,
    #[serde(rename = "type")]
    kind: Option<ItemKind>,
    title: Option<String>,
    url: Option<String>,
    text: Option<String>,
    score: Option<i64>,
    by: Option<String>,
    time: Option<i64>,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    dead: bool,
}

impl RawItem {
    fn into_item(self) -> Item {
        Item {
            id: ItemId(self.id),
            kind: self.kind.unwrap_or(ItemKind::Unknown),
            title: self.title.unwrap_or_default(),
            url: self.url.filter(|u| !u.trim().is_empty()),
            text: self
                .text
                .map(|t| html_to_text(&t))
                .filter(|t| !t.is_empty()),
            score: self.score,
            author: self.by,
            posted_at: self.time,
        }
    }
}
