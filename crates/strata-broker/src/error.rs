//! Broker Error Types
//!
//! Thin wrapper over the storage errors plus the one failure mode the
//! broker adds itself: enqueueing on a topic whose runner has stopped.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Storage(#[from] strata_storage::Error),

    #[error("topic {0} is no longer accepting entries")]
    TopicClosed(String),
}
