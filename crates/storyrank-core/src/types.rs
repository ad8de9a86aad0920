use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// =============================================================================
// Identity
// =============================================================================

/// Stable identity of a feed item, as assigned by the feed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub i64);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ItemId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Kind of feed item. Only some kinds carry primary content worth indexing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    #[default]
    Story,
    Comment,
    Job,
    Poll,
    #[serde(rename = "pollopt")]
    PollOpt,
    /// Anything the feed adds later.
    #[serde(other)]
    Unknown,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Story => "story",
            ItemKind::Comment => "comment",
            ItemKind::Job => "job",
            ItemKind::Poll => "poll",
            ItemKind::PollOpt => "pollopt",
            ItemKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "story" => ItemKind::Story,
            "comment" => ItemKind::Comment,
            "job" => ItemKind::Job,
            "poll" => ItemKind::Poll,
            "pollopt" => ItemKind::PollOpt,
            _ => ItemKind::Unknown,
        })
    }
}

// =============================================================================
// Items and records
// =============================================================================

/// A document pulled from the feed.
///
/// `score` is carried through to query results but plays no part in
/// ranking. `text` is plain text; markup is stripped by the feed client.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    #[serde(default)]
    pub kind: ItemKind,
    pub title: String,
    pub url: Option<String>,
    pub text: Option<String>,
    pub score: Option<i64>,
    pub author: Option<String>,
    /// Unix seconds at which the item was posted.
    pub posted_at: Option<i64>,
}

impl Item {
    /// Create an item with only an ID and title set.
    pub fn new(id: impl Into<ItemId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ItemKind::Story,
            title: title.into(),
            url: None,
            text: None,
            score: None,
            author: None,
            posted_at: None,
        }
    }

    /// Text submitted for embedding: the title, followed by the body when
    /// one is present, separated by a single space.
    pub fn embedding_text(&self) -> String {
        let title = self.title.trim();
        match self.text.as_deref().map(str::trim) {
            Some(body) if !body.is_empty() && !title.is_empty() => format!("{} {}", title, body),
            Some(body) if !body.is_empty() => body.to_string(),
            _ => title.to_string(),
        }
    }
}

/// Fixed-length embedding produced by the configured provider.
pub type Embedding = Vec<f32>;

/// The unit of persistence: an item together with its embedding.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredRecord {
    pub item: Item,
    pub embedding: Embedding,
}

impl StoredRecord {
    pub fn new(item: Item, embedding: Embedding) -> Self {
        Self { item, embedding }
    }

    pub fn id(&self) -> ItemId {
        self.item.id
    }
}

/// A stored item paired with its similarity to a query vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ScoredItem {
    pub item: Item,
    pub similarity: f64,
}

/// Query result handed to callers. Never carries the embedding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedItem {
    pub id: ItemId,
    pub title: String,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub text: Option<String>,
    pub similarity: f64,
}

impl From<ScoredItem> for RankedItem {
    fn from(scored: ScoredItem) -> Self {
        let ScoredItem { item, similarity } = scored;
        Self {
            id: item.id,
            title: item.title,
            url: item.url,
            score: item.score,
            text: item.text,
            similarity,
        }
    }
}
