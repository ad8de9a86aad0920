//! Storyrank ingestion pipeline.
//!
//! Each cycle discovers candidate IDs, then fetches, filters, embeds and
//! stores every candidate in feed order. One item's failure never aborts
//! the cycle. Embedding failures drive a two-tier backoff: quota exhaustion
//! pauses for the long cooldown, transient failures for the short one.
//!
//! Shutdown is observed between items, during every sleep, and while
//! waiting on the feed or the embedding provider. A store write that has
//! started is never abandoned.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use storyrank_core::config::{FeedConfig, IngestConfig};
use storyrank_core::shutdown::ShutdownSignal;
use storyrank_core::types::{ItemId, ItemKind, StoredRecord};
use storyrank_feed::{FeedError, FeedSource};

use crate::embedding::{DynEmbeddingProvider, EmbedError};
use crate::store::VectorStore;

/// Timing and filtering knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub cycle_interval: Duration,
    pub discovery_cooldown: Duration,
    pub quota_cooldown: Duration,
    pub transient_cooldown: Duration,
    pub pace: Duration,
    pub accepted_kinds: Vec<ItemKind>,
    /// Upper bound on candidates per cycle. 0 means no bound.
    pub max_items: usize,
}

impl IngestSettings {
    pub fn from_config(ingest: &IngestConfig, feed: &FeedConfig) -> Self {
        Self {
            cycle_interval: ingest.cycle_interval(),
            discovery_cooldown: ingest.discovery_cooldown(),
            quota_cooldown: ingest.quota_cooldown(),
            transient_cooldown: ingest.transient_cooldown(),
            pace: ingest.pace(),
            accepted_kinds: ingest.accepted_kinds.clone(),
            max_items: feed.max_items_per_cycle,
        }
    }
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self::from_config(&IngestConfig::default(), &FeedConfig::default())
    }
}

/// What happened to one candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Stored,
    FetchFailed(FeedError),
    /// Not a primary content kind.
    Filtered(ItemKind),
    /// Nothing to embed: title and body both empty.
    Empty,
    EmbedFailed(EmbedError),
    StoreFailed(String),
    Interrupted,
}

impl ItemOutcome {
    /// Whether the provider was called for this item.
    fn reached_provider(&self) -> bool {
        matches!(
            self,
            ItemOutcome::Stored | ItemOutcome::EmbedFailed(_) | ItemOutcome::StoreFailed(_)
        )
    }
}

/// Per-cycle counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub discovered: usize,
    pub stored: usize,
    pub fetch_failed: usize,
    pub filtered: usize,
    pub skipped_empty: usize,
    pub embed_failed: usize,
    pub store_failed: usize,
    pub quota_pauses: usize,
    pub transient_pauses: usize,
    pub discovery_failed: bool,
    pub interrupted: bool,
}

impl CycleReport {
    fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Stored => self.stored += 1,
            ItemOutcome::FetchFailed(_) => self.fetch_failed += 1,
            ItemOutcome::Filtered(_) => self.filtered += 1,
            ItemOutcome::Empty => self.skipped_empty += 1,
            ItemOutcome::EmbedFailed(EmbedError::QuotaExceeded(_)) => {
                self.embed_failed += 1;
                self.quota_pauses += 1;
            }
            ItemOutcome::EmbedFailed(EmbedError::Transient(_)) => {
                self.embed_failed += 1;
                self.transient_pauses += 1;
            }
            ItemOutcome::EmbedFailed(EmbedError::Other(_)) => self.embed_failed += 1,
            ItemOutcome::StoreFailed(_) => self.store_failed += 1,
            ItemOutcome::Interrupted => self.interrupted = true,
        }
    }
}

/// Background worker that keeps the store filled from the feed.
pub struct IngestionPipeline {
    feed: Arc<dyn FeedSource>,
    embedder: Arc<dyn DynEmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    settings: IngestSettings,
    shutdown: ShutdownSignal,
}

impl IngestionPipeline {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        embedder: Arc<dyn DynEmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        settings: IngestSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            feed,
            embedder,
            store,
            settings,
            shutdown,
        }
    }

    /// Run cycles until shutdown is requested.
    pub async fn run(&self) {
        info!(
            model = self.embedder.model_name(),
            interval_secs = self.settings.cycle_interval.as_secs(),
            "Ingestion pipeline started"
        );
        loop {
            let report = self.run_cycle().await;
            if report.interrupted {
                break;
            }
            let wait = if report.discovery_failed {
                self.settings.discovery_cooldown
            } else {
                self.settings.cycle_interval
            };
            debug!(wait_secs = wait.as_secs(), "Waiting for next cycle");
            if !self.shutdown.sleep(wait).await {
                break;
            }
        }
        info!("Ingestion pipeline stopped");
    }

    /// One discovery pass over the feed.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();
        if self.shutdown.is_triggered() {
            report.interrupted = true;
            return report;
        }

        let listed = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => {
                report.interrupted = true;
                return report;
            }
            listed = self.feed.list_candidate_ids() => listed,
        };
        let mut ids = match listed {
            Ok(ids) => ids,
            Err(e) => {
                warn!(
                    error = %e,
                    retry_in_secs = self.settings.discovery_cooldown.as_secs(),
                    "Failed to list candidate items"
                );
                report.discovery_failed = true;
                return report;
            }
        };
        if self.settings.max_items > 0 {
            ids.truncate(self.settings.max_items);
        }
        report.discovered = ids.len();
        info!(candidates = ids.len(), "Starting ingestion cycle");

        let total = ids.len();
        for (idx, id) in ids.into_iter().enumerate() {
            if self.shutdown.is_triggered() {
                report.interrupted = true;
                break;
            }

            let outcome = self.process_item(id).await;
            report.record(&outcome);

            let cooldown = match &outcome {
                ItemOutcome::Interrupted => break,
                ItemOutcome::EmbedFailed(EmbedError::QuotaExceeded(msg)) => {
                    warn!(
                        item_id = %id,
                        error = %msg,
                        cooldown_secs = self.settings.quota_cooldown.as_secs(),
                        "Embedding quota exhausted, pausing ingestion"
                    );
                    Some(self.settings.quota_cooldown)
                }
                ItemOutcome::EmbedFailed(EmbedError::Transient(msg)) => {
                    warn!(
                        item_id = %id,
                        error = %msg,
                        cooldown_secs = self.settings.transient_cooldown.as_secs(),
                        "Transient embedding failure, pausing ingestion"
                    );
                    Some(self.settings.transient_cooldown)
                }
                _ => None,
            };
            if let Some(cooldown) = cooldown {
                if !self.shutdown.sleep(cooldown).await {
                    report.interrupted = true;
                    break;
                }
            }

            let more = idx + 1 < total;
            if more && outcome.reached_provider() && !self.shutdown.sleep(self.settings.pace).await {
                report.interrupted = true;
                break;
            }
        }

        info!(
            discovered = report.discovered,
            stored = report.stored,
            fetch_failed = report.fetch_failed,
            filtered = report.filtered,
            skipped_empty = report.skipped_empty,
            embed_failed = report.embed_failed,
            store_failed = report.store_failed,
            quota_pauses = report.quota_pauses,
            transient_pauses = report.transient_pauses,
            interrupted = report.interrupted,
            "Ingestion cycle finished"
        );
        report
    }

    async fn process_item(&self, id: ItemId) -> ItemOutcome {
        let fetched = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return ItemOutcome::Interrupted,
            fetched = self.feed.fetch_item(id) => fetched,
        };
        let item = match fetched {
            Ok(item) => item,
            Err(e) => {
                warn!(item_id = %id, error = %e, "Failed to fetch item, skipping");
                return ItemOutcome::FetchFailed(e);
            }
        };

        if !self.settings.accepted_kinds.contains(&item.kind) {
            debug!(item_id = %id, kind = %item.kind, "Skipping non-primary item");
            return ItemOutcome::Filtered(item.kind);
        }

        let text = item.embedding_text();
        if text.is_empty() {
            debug!(item_id = %id, "Skipping item with no text");
            return ItemOutcome::Empty;
        }

        let embedded = tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => return ItemOutcome::Interrupted,
            embedded = self.embedder.embed_boxed(&text) => embedded,
        };
        let embedding = match embedded {
            Ok(embedding) => embedding,
            Err(e) => {
                if let EmbedError::Other(msg) = &e {
                    warn!(item_id = %id, error = %msg, "Embedding failed, skipping item");
                }
                return ItemOutcome::EmbedFailed(e);
            }
        };

        let title = item.title.clone();
        match self.store.upsert(StoredRecord::new(item, embedding)).await {
            Ok(()) => {
                info!(item_id = %id, title = %title, "Stored item");
                ItemOutcome::Stored
            }
            Err(e) => {
                warn!(item_id = %id, error = %e, "Failed to store item, skipping");
                ItemOutcome::StoreFailed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use storyrank_core::types::{Embedding, Item};
    use storyrank_feed::StaticFeed;
    use tokio::time::Instant;

    use crate::embedding::EmbeddingProvider;
    use crate::store::MemoryVectorStore;

    /// Embedder that replays scripted failures, then succeeds.
    #[derive(Default)]
    struct ScriptedEmbedder {
        failures: Mutex<VecDeque<Option<EmbedError>>>,
        calls: Mutex<Vec<(String, Instant)>>,
    }

    impl ScriptedEmbedder {
        /// `None` entries succeed; `Some(err)` entries fail with `err`.
        fn with_script(script: Vec<Option<EmbedError>>) -> Self {
            Self {
                failures: Mutex::new(script.into()),
                calls: Mutex::default(),
            }
        }

        fn calls(&self) -> Vec<(String, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl EmbeddingProvider for ScriptedEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
            self.calls
                .lock()
                .unwrap()
                .push((text.to_string(), Instant::now()));
            if let Some(Some(err)) = self.failures.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(vec![1.0, text.len() as f32])
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            cycle_interval: Duration::from_secs(600),
            discovery_cooldown: Duration::from_secs(30),
            quota_cooldown: Duration::from_secs(300),
            transient_cooldown: Duration::from_secs(60),
            pace: Duration::from_millis(100),
            accepted_kinds: vec![ItemKind::Story],
            max_items: 0,
        }
    }

    struct Harness {
        pipeline: Arc<IngestionPipeline>,
        embedder: Arc<ScriptedEmbedder>,
        store: Arc<MemoryVectorStore>,
        shutdown: ShutdownSignal,
    }

    fn harness(feed: StaticFeed, embedder: ScriptedEmbedder, settings: IngestSettings) -> Harness {
        let embedder = Arc::new(embedder);
        let store = Arc::new(MemoryVectorStore::new());
        let shutdown = ShutdownSignal::new();
        let pipeline = Arc::new(IngestionPipeline::new(
            Arc::new(feed),
            embedder.clone(),
            store.clone(),
            settings,
            shutdown.clone(),
        ));
        Harness {
            pipeline,
            embedder,
            store,
            shutdown,
        }
    }

    fn story(id: i64, title: &str) -> Item {
        Item::new(id, title)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_stores_items() {
        let mut with_body = story(2, "Ask HN: what are you reading?");
        with_body.text = Some("Books, papers, anything.".to_string());
        let feed = StaticFeed::new().with_item(story(1, "Rust in production")).with_item(with_body);
        let h = harness(feed, ScriptedEmbedder::default(), settings());

        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.discovered, 2);
        assert_eq!(report.stored, 2);
        assert!(!report.interrupted);
        assert_eq!(h.store.count().await.unwrap(), 2);

        let texts: Vec<String> = h.embedder.calls().into_iter().map(|(t, _)| t).collect();
        assert_eq!(
            texts,
            vec![
                "Rust in production".to_string(),
                "Ask HN: what are you reading? Books, papers, anything.".to_string()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_failure_skips_only_that_item() {
        let feed = StaticFeed::new()
            .with_failing_fetch(10)
            .with_item(story(11, "Still ingested"));
        let h = harness(feed, ScriptedEmbedder::default(), settings());

        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.fetch_failed, 1);
        assert_eq!(report.stored, 1);
        assert!(h.store.get(ItemId(10)).is_none());
        assert_eq!(h.store.get(ItemId(11)).unwrap().item.title, "Still ingested");
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhaustion_pauses_for_long_cooldown() {
        let feed = StaticFeed::new()
            .with_item(story(1, "first"))
            .with_item(story(2, "second"));
        let embedder = ScriptedEmbedder::with_script(vec![Some(EmbedError::QuotaExceeded(
            "429".into(),
        ))]);
        let h = harness(feed, embedder, settings());

        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.quota_pauses, 1);
        assert_eq!(report.transient_pauses, 0);
        assert_eq!(report.stored, 1);

        let calls = h.embedder.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].1 - calls[0].1 >= Duration::from_secs(300));
        assert!(h.store.get(ItemId(1)).is_none());
        assert!(h.store.get(ItemId(2)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_pauses_for_short_cooldown() {
        let feed = StaticFeed::new()
            .with_item(story(1, "first"))
            .with_item(story(2, "second"));
        let embedder =
            ScriptedEmbedder::with_script(vec![Some(EmbedError::Transient("reset".into()))]);
        let h = harness(feed, embedder, settings());

        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.transient_pauses, 1);
        assert_eq!(report.quota_pauses, 0);

        let calls = h.embedder.calls();
        let gap = calls[1].1 - calls[0].1;
        assert!(gap >= Duration::from_secs(60));
        assert!(gap < Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_failure_skips_without_cooldown() {
        let feed = StaticFeed::new()
            .with_item(story(1, "first"))
            .with_item(story(2, "second"));
        let embedder = ScriptedEmbedder::with_script(vec![Some(EmbedError::Other("bad".into()))]);
        let h = harness(feed, embedder, settings());

        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.embed_failed, 1);
        assert_eq!(report.stored, 1);

        let calls = h.embedder.calls();
        let gap = calls[1].1 - calls[0].1;
        assert!(gap >= Duration::from_millis(100));
        assert!(gap < Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pace_between_embeddings() {
        let feed = StaticFeed::new()
            .with_item(story(1, "a"))
            .with_item(story(2, "b"))
            .with_item(story(3, "c"));
        let h = harness(feed, ScriptedEmbedder::default(), settings());

        let start = Instant::now();
        h.pipeline.run_cycle().await;
        let calls = h.embedder.calls();
        for pair in calls.windows(2) {
            assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(100));
        }
        // No trailing pause after the last item.
        assert!(Instant::now() - start < Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_primary_and_empty_items_skipped() {
        let mut comment = story(2, "");
        comment.kind = ItemKind::Comment;
        comment.text = Some("great post".to_string());
        let feed = StaticFeed::new()
            .with_item(story(1, "keep me"))
            .with_item(comment)
            .with_item(story(3, "   "));
        let h = harness(feed, ScriptedEmbedder::default(), settings());

        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.stored, 1);
        assert_eq!(report.filtered, 1);
        assert_eq!(report.skipped_empty, 1);
        assert_eq!(h.embedder.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepted_kinds_widen_filter() {
        let mut job = story(1, "We're hiring");
        job.kind = ItemKind::Job;
        let h = harness(
            StaticFeed::new().with_item(job),
            ScriptedEmbedder::default(),
            IngestSettings {
                accepted_kinds: vec![ItemKind::Story, ItemKind::Job],
                ..settings()
            },
        );
        assert_eq!(h.pipeline.run_cycle().await.stored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_store_failure_continues_cycle() {
        let feed = StaticFeed::new()
            .with_item(story(1, "first"))
            .with_item(story(2, "second"));
        let h = harness(feed, ScriptedEmbedder::default(), settings());
        h.store.close().await.unwrap();

        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.store_failed, 2);
        assert_eq!(h.embedder.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_items_bounds_cycle() {
        let feed = StaticFeed::new()
            .with_item(story(1, "a"))
            .with_item(story(2, "b"))
            .with_item(story(3, "c"));
        let h = harness(
            feed,
            ScriptedEmbedder::default(),
            IngestSettings {
                max_items: 2,
                ..settings()
            },
        );
        let report = h.pipeline.run_cycle().await;
        assert_eq!(report.discovered, 2);
        assert!(h.store.get(ItemId(3)).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_failure_ends_cycle() {
        let feed = StaticFeed::new()
            .with_item(story(1, "eventually"))
            .with_discovery_failures(1);
        let h = harness(feed, ScriptedEmbedder::default(), settings());

        let report = h.pipeline.run_cycle().await;
        assert!(report.discovery_failed);
        assert_eq!(report.discovered, 0);
        assert!(h.embedder.calls().is_empty());

        let report = h.pipeline.run_cycle().await;
        assert!(!report.discovery_failed);
        assert_eq!(report.stored, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_cooldown_precedes_retry() {
        let feed = StaticFeed::new()
            .with_item(story(1, "eventually"))
            .with_discovery_failures(1);
        let h = harness(feed, ScriptedEmbedder::default(), settings());

        let pipeline = h.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.run().await });

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(h.store.count().await.unwrap(), 0);

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(h.store.count().await.unwrap(), 1);

        h.shutdown.trigger();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_quota_cooldown() {
        let feed = StaticFeed::new()
            .with_item(story(1, "first"))
            .with_item(story(2, "second"));
        let embedder = ScriptedEmbedder::with_script(vec![Some(EmbedError::QuotaExceeded(
            "429".into(),
        ))]);
        let h = harness(feed, embedder, settings());

        let pipeline = h.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.run_cycle().await });

        tokio::time::sleep(Duration::from_secs(10)).await;
        h.shutdown.trigger();

        let report = task.await.unwrap();
        assert!(report.interrupted);
        assert_eq!(h.embedder.calls().len(), 1);
        assert_eq!(h.store.count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown_between_cycles() {
        let feed = StaticFeed::new().with_item(story(1, "only"));
        let h = harness(feed, ScriptedEmbedder::default(), settings());

        let pipeline = h.pipeline.clone();
        let task = tokio::spawn(async move { pipeline.run().await });

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(h.store.count().await.unwrap(), 1);

        h.shutdown.trigger();
        task.await.unwrap();
        assert_eq!(h.embedder.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_cycle_after_shutdown_does_nothing() {
        let feed = StaticFeed::new().with_item(story(1, "never"));
        let h = harness(feed, ScriptedEmbedder::default(), settings());
        h.shutdown.trigger();

        let report = h.pipeline.run_cycle().await;
        assert!(report.interrupted);
        assert_eq!(report.discovered, 0);
        assert!(h.embedder.calls().is_empty());
    }
}
