//! Strata Storage Layer
//!
//! This crate implements the durable half of the Strata broker: the
//! `Datastore` trait and its three backends, plus the background maintenance
//! tasks that keep the on-disk backends healthy.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐
//! │ Topic runner │  (strata-broker, single writer per topic)
//! └──────┬───────┘
//!        │ insert_message / last_offset
//!        ▼
//! ┌─────────────────────────────────────────────┐
//! │ Datastore trait                             │ ◄── You are here
//! ├───────────────┬───────────────┬─────────────┤
//! │ MemoryDatastore│ SqliteDatastore│ FileDatastore│
//! │ Vec per topic │ table per topic│ data.bin +  │
//! │               │ (sqlx/SQLite) │ index.bin   │
//! │               │               │ via mmap    │
//! └───────────────┴───────────────┴─────────────┘
//!        ▲
//!        │ stream_messages(from_offset, callback)
//! ┌──────┴───────┐
//! │ Subscribers  │  (strata-broker, many readers)
//! └──────────────┘
//! ```
//!
//! ## The Datastore Contract
//!
//! Every backend promises the same small capability set:
//!
//! - Appends arrive pre-assigned: `insert_message` may assume the message's
//!   offset equals `last_offset(topic) + 1`. The topic runner in
//!   `strata-broker` is the only caller and it serializes appends per topic.
//! - `stream_messages` walks stored messages in ascending offset order from
//!   a starting offset and stops cleanly at end-of-log. It never blocks
//!   waiting for new data; blocking is the subscriber's job.
//! - `flush` is the durability barrier. For the file backend the data file
//!   is synced before the index file so a recovered index can never point
//!   past valid data. Memory and SQLite backends treat it as a no-op
//!   (SQLite commits transactionally on every insert).
//! - `garbage_collect` enforces retention. It may remove a prefix of the
//!   log but must never punch holes in the middle.
//!
//! ## Choosing a Backend
//!
//! | Backend | Durability | Use case |
//! |---------|-----------|----------|
//! | `MemoryDatastore` | none | tests, ephemeral brokers |
//! | `SqliteDatastore` | every insert | small logs, simple ops |
//! | `FileDatastore` | after `flush()` | high-throughput append workloads |

pub mod config;
pub mod error;
pub mod file;
pub mod maintenance;
pub mod mapped_file;
pub mod memory;
pub mod sqlite;

pub use config::RetentionConfig;
pub use error::{Error, Result};
pub use file::FileDatastore;
pub use maintenance::{Flusher, GarbageCollector};
pub use mapped_file::MappedFile;
pub use memory::MemoryDatastore;
pub use sqlite::SqliteDatastore;

use async_trait::async_trait;
use strata_core::Message;

/// Callback handed to [`Datastore::stream_messages`]; returning an error
/// halts the stream and propagates the error to the caller.
pub type MessageSink<'a> = &'a mut (dyn FnMut(Message) -> Result<()> + Send);

/// Durable storage for `(topic, offset) -> payload`.
///
/// Implementations must be `Send + Sync`; they are shared across topic
/// runner tasks and subscriber tasks behind an `Arc<dyn Datastore>`. Each
/// backend is responsible for its own internal locking; the broker only
/// guarantees that `insert_message` for a given topic is never called
/// concurrently.
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Bring persistent state online: create catalog tables, open data and
    /// index files for known topics, and so on.
    async fn initialize(&self) -> Result<()>;

    /// Provision durable state for a topic. Idempotent: creating a topic
    /// that already exists succeeds. Fails with
    /// [`Error::TopicAlreadyExists`] only when the name collides with a
    /// different provisioned resource.
    async fn create_topic(&self, topic: &str) -> Result<()>;

    /// All known topics, in no particular order.
    async fn list_topics(&self) -> Result<Vec<String>>;

    /// Highest offset durably stored for the topic, or `-1` if empty.
    async fn last_offset(&self, topic: &str) -> Result<i64>;

    /// Append a message whose offset has already been assigned by the topic
    /// runner.
    async fn insert_message(&self, topic: &str, message: &Message) -> Result<()>;

    /// Invoke `callback` for every stored message with
    /// `offset >= from_offset`, ascending, stopping at end-of-log.
    async fn stream_messages(
        &self,
        topic: &str,
        from_offset: i64,
        callback: MessageSink<'_>,
    ) -> Result<()>;

    /// Number of messages currently stored for the topic.
    async fn num_messages(&self, topic: &str) -> Result<i64>;

    /// Durability barrier: after a successful return every prior
    /// `insert_message` survives a crash.
    async fn flush(&self) -> Result<()>;

    /// Enforce the backend's retention policy for one topic. Removal is
    /// prefix-only.
    async fn garbage_collect(&self, topic: &str) -> Result<()>;

    /// Release all resources held by the backend.
    async fn close(&self) -> Result<()>;
}
