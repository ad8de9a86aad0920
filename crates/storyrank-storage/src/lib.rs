//! Storyrank storage crate - SQLite persistence for ingested items.
//!
//! Provides a WAL-mode SQLite database with migrations, a destructive
//! reset used on startup, and the item repository the vector store
//! builds on.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{ItemRepository, Snapshot};
