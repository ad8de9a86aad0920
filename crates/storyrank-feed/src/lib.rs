//! Storyrank feed crate - the remote item feed seen by the ingestion loop.
//!
//! Defines the `FeedSource` capability, a Hacker News client implementing
//! it over HTTP, an in-memory feed for tests and offline runs, and the
//! HTML-to-text normalization applied to item bodies.

pub mod hacker_news;
pub mod normalize;
pub mod source;

pub use hacker_news::HackerNewsClient;
pub use normalize::html_to_text;
pub use source::{FeedError, FeedSource, StaticFeed};
