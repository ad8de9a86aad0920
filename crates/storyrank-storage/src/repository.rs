//! SQLite-backed item repository.
//!
//! Rows hold the item fields plus its embedding serialized as a JSON array.
//! Writes are single `INSERT OR REPLACE` statements, so a concurrent reader
//! sees either the old row or the new one.

use std::sync::Arc;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::warn;

use storyrank_core::error::StoryrankError;
use storyrank_core::types::{Embedding, Item, ItemId, ItemKind, StoredRecord};

use crate::db::Database;

const ITEM_COLUMNS: &str = "id, kind, title, url, text, score, author, posted_at";

/// Repository for ingested items and their embeddings.
#[derive(Debug, Clone)]
pub struct ItemRepository {
    db: Arc<Database>,
}

impl ItemRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    /// Insert or replace the record keyed by its item ID.
    ///
    /// Non-finite components are refused: JSON has no encoding for them.
    pub fn upsert(&self, record: &StoredRecord) -> Result<(), StoryrankError> {
        if let Some(pos) = record.embedding.iter().position(|v| !v.is_finite()) {
            return Err(StoryrankError::Storage(format!(
                "Embedding for item {} has a non-finite component at index {}",
                record.item.id, pos
            )));
        }
        let embedding = serde_json::to_string(&record.embedding).map_err(|e| {
            StoryrankError::Storage(format!(
                "Failed to serialize embedding for item {}: {}",
                record.item.id, e
            ))
        })?;
        let item = &record.item;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO items
                    (id, kind, title, url, text, score, author, posted_at,
                     embedding, dimensions, ingested_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    item.id.0,
                    item.kind.as_str(),
                    item.title,
                    item.url,
                    item.text,
                    item.score,
                    item.author,
                    item.posted_at,
                    embedding,
                    record.embedding.len() as i64,
                    Utc::now().timestamp(),
                ],
            )
            .map_err(|e| StoryrankError::Storage(format!("Failed to save item {}: {}", item.id, e)))?;
            Ok(())
        })
    }

    /// Find a stored record by item ID.
    pub fn find_by_id(&self, id: ItemId) -> Result<Option<StoredRecord>, StoryrankError> {
        self.db.with_read_conn(|conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {}, embedding FROM items WHERE id = ?1", ITEM_COLUMNS),
                    [id.0],
                    |row| Ok((row_to_item(row)?, row.get::<_, String>(8)?)),
                )
                .optional()
                .map_err(|e| StoryrankError::Storage(e.to_string()))?;

            match row {
                Some((item, raw)) => {
                    let embedding = decode_embedding(item.id, &raw)?;
                    Ok(Some(StoredRecord { item, embedding }))
                }
                None => Ok(None),
            }
        })
    }

    /// Count stored items.
    pub fn count(&self) -> Result<u64, StoryrankError> {
        self.db.with_read_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM items", [], |row| row.get(0))
                .map_err(|e| StoryrankError::Storage(e.to_string()))?;
            Ok(count as u64)
        })
    }

    /// Dimensionality of the oldest stored embedding, if any.
    pub fn corpus_dimensions(&self) -> Result<Option<usize>, StoryrankError> {
        self.db.with_conn(|conn| {
            let dims: Option<i64> = conn
                .query_row(
                    "SELECT dimensions FROM items ORDER BY ingested_at ASC, id ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| StoryrankError::Storage(e.to_string()))?;
            Ok(dims.map(|d| d as usize))
        })
    }

    /// Run `f` against a consistent view of the table.
    ///
    /// The closure runs in one read transaction, so a write committed during
    /// a scan is not visible to the follow-up fetch.
    pub fn read<F, T>(&self, f: F) -> Result<T, StoryrankError>
    where
        F: FnOnce(&Snapshot<'_>) -> Result<T, StoryrankError>,
    {
        self.db.with_read_conn(|conn| f(&Snapshot { conn }))
    }
}

/// Read-only view handed out by [`ItemRepository::read`].
pub struct Snapshot<'c> {
    conn: &'c Connection,
}

impl Snapshot<'_> {
    /// Stream every `(id, embedding)` pair in ascending ID order.
    ///
    /// Rows are decoded one at a time; the table is never materialized.
    /// Rows whose embedding cannot be decoded are logged and skipped.
    /// Returns the number of rows passed to `f`.
    pub fn for_each_embedding<F>(&self, mut f: F) -> Result<usize, StoryrankError>
    where
        F: FnMut(ItemId, Embedding),
    {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, embedding FROM items ORDER BY id ASC")
            .map_err(|e| StoryrankError::Storage(e.to_string()))?;
        let mut rows = stmt
            .query([])
            .map_err(|e| StoryrankError::Storage(e.to_string()))?;

        let mut visited = 0;
        while let Some(row) = rows
            .next()
            .map_err(|e| StoryrankError::Storage(e.to_string()))?
        {
            let id = ItemId(row.get(0).map_err(|e| StoryrankError::Storage(e.to_string()))?);
            let raw: String = row
                .get(1)
                .map_err(|e| StoryrankError::Storage(e.to_string()))?;
            match decode_embedding(id, &raw) {
                Ok(embedding) => {
                    f(id, embedding);
                    visited += 1;
                }
                Err(e) => warn!(item_id = %id, error = %e, "Skipping undecodable embedding"),
            }
        }
        Ok(visited)
    }

    /// Fetch items (without embeddings) in the order of `ids`.
    pub fn fetch_items(&self, ids: &[ItemId]) -> Result<Vec<Item>, StoryrankError> {
        let mut stmt = self
            .conn
            .prepare_cached(&format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS))
            .map_err(|e| StoryrankError::Storage(e.to_string()))?;

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            let item = stmt
                .query_row([id.0], row_to_item)
                .optional()
                .map_err(|e| StoryrankError::Storage(e.to_string()))?;
            if let Some(item) = item {
                items.push(item);
            }
        }
        Ok(items)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<Item> {
    let kind: String = row.get(1)?;
    Ok(Item {
        id: ItemId(row.get(0)?),
        kind: kind.parse().unwrap_or(ItemKind::Unknown),
        title: row.get(2)?,
        url: row.get(3)?,
        text: row.get(4)?,
        score: row.get(5)?,
        author: row.get(6)?,
        posted_at: row.get(7)?,
    })
}

fn decode_embedding(id: ItemId, raw: &str) -> Result<Embedding, StoryrankError> {
    serde_json::from_str(raw).map_err(|e| {
        StoryrankError::Storage(format!("Corrupt embedding for item {}: {}", id, e))
    })
}
