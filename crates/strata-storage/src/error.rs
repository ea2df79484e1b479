//! Storage Error Types
//!
//! This module defines all error types that can occur during datastore
//! operations.
//!
//! ## Error Categories
//!
//! ### Topic Errors
//! - `TopicNotFound`: Operation on a topic whose storage was never
//!   provisioned
//! - `TopicAlreadyExists`: Topic name collides with a different provisioned
//!   resource (creating the same topic twice is *not* an error)
//!
//! ### I/O and Database Errors
//! - `Io`: File system operation failed (transient; the producer may retry)
//! - `Database`: SQLite operation failed
//!
//! ### Data Integrity Errors
//! - `Corrupt`: A stored frame or index record failed validation. Permanent;
//!   fatal to the stream that observed it.
//!
//! All datastore operations return `Result<T>` which is aliased to
//! `Result<T, Error>`, so `?` propagation works throughout the crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt log segment: {0}")]
    Corrupt(#[from] strata_core::Error),
}
