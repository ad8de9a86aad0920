//! Storyrank core crate - shared error type, configuration, domain types,
//! and the cooperative shutdown signal used by every long-running loop.

pub mod config;
pub mod error;
pub mod shutdown;
pub mod types;

pub use config::StoryrankConfig;
pub use error::{Result, StoryrankError};
pub use shutdown::ShutdownSignal;
pub use types::*;
