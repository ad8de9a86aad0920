//! Feed capability and an in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use storyrank_core::error::StoryrankError;
use storyrank_core::types::{Item, ItemId};

/// Failures reported by a feed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeedError {
    /// Transport failure or server-side error.
    #[error("feed unavailable: {0}")]
    Unavailable(String),

    #[error("item {0} not found")]
    NotFound(ItemId),

    /// The item exists but was deleted or killed by moderation.
    #[error("item {0} is deleted or dead")]
    Gone(ItemId),

    #[error("malformed feed payload: {0}")]
    Decode(String),
}

impl From<FeedError> for StoryrankError {
    fn from(err: FeedError) -> Self {
        match err {
            FeedError::Unavailable(msg) => StoryrankError::UpstreamUnavailable(msg),
            other => StoryrankError::Feed(other.to_string()),
        }
    }
}

/// Source of candidate items.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// IDs worth looking at this cycle, in feed order.
    async fn list_candidate_ids(&self) -> Result<Vec<ItemId>, FeedError>;

    /// Full item for one ID.
    async fn fetch_item(&self, id: ItemId) -> Result<Item, FeedError>;
}

/// In-memory feed with scriptable failures.
///
/// Items are listed in insertion order. IDs registered with
/// [`StaticFeed::with_failing_fetch`] are listed but fail to fetch.
#[derive(Debug, Default)]
pub struct StaticFeed {
    order: Vec<ItemId>,
    items: HashMap<ItemId, Item>,
    failing: HashSet<ItemId>,
    discovery_failures: AtomicUsize,
    fetched: Mutex<Vec<ItemId>>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.order.push(item.id);
        self.items.insert(item.id, item);
        self
    }

    pub fn with_failing_fetch(mut self, id: impl Into<ItemId>) -> Self {
        let id = id.into();
        self.order.push(id);
        self.failing.insert(id);
        self
    }

    /// Make the next `count` calls to `list_candidate_ids` fail.
    pub fn with_discovery_failures(self, count: usize) -> Self {
        self.discovery_failures.store(count, Ordering::SeqCst);
        self
    }

    /// IDs passed to `fetch_item`, in call order.
    pub fn fetched(&self) -> Vec<ItemId> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl FeedSource for StaticFeed {
    async fn list_candidate_ids(&self) -> Result<Vec<ItemId>, FeedError> {
        let remaining = self.discovery_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.discovery_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(FeedError::Unavailable("scripted discovery failure".into()));
        }
        Ok(self.order.clone())
    }

    async fn fetch_item(&self, id: ItemId) -> Result<Item, FeedError> {
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(id);
        }
        if self.failing.contains(&id) {
            return Err(FeedError::Unavailable(format!("scripted fetch failure for {}", id)));
        }
        self.items.get(&id).cloned().ok_or(FeedError::NotFound(id))
    }
}
