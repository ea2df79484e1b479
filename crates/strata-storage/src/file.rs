//! File-Backed Datastore with Mmap Index
//!
//! The durable, high-throughput backend. Each topic owns a pair of
//! [`MappedFile`]s:
//!
//! - `<data-dir>/<topic>/0/data.bin` - framed payloads
//! - `<data-dir>/<topic>/0/index.bin` - fixed 16-byte `(offset, location)`
//!   records, one per message
//!
//! plus a small SQLite catalog at `<data-dir>/store.db` used only to
//! enumerate topics across restarts.
//!
//! ## Write Path
//!
//! ```text
//! insert_message(topic, message)
//!     ↓
//! data.bin   ← frame (offset, length, payload), capture start location
//!     ↓
//! index.bin  ← record (offset, location of that frame)
//! ```
//!
//! Both appends update their file's header, so `last_offset` after a
//! restart is simply the last index record below the recovered
//! `write_location`.
//!
//! ## Read Path
//!
//! `stream_messages` walks index records from the starting offset, follows
//! each recorded location into the data file, and verifies the embedded
//! offset before delivering. A mismatch means the index and data files
//! disagree, which is permanent corruption: the stream stops and the error
//! propagates.
//!
//! ## Durability
//!
//! Appends are durable only after `flush()`, which syncs the data file
//! before the index file for every topic. That ordering is what lets the
//! reopen path trust the index header: an index record only becomes
//! durable after the frame it points at.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use strata_core::Message;
use tracing::debug;

use crate::error::Result;
use crate::mapped_file::MappedFile;
use crate::{Datastore, Error, MessageSink};

struct TopicFiles {
    data: MappedFile,
    index: MappedFile,
}

/// Datastore storing each topic as a mapped data/index file pair.
pub struct FileDatastore {
    data_dir: PathBuf,
    catalog: SqlitePool,
    topics: RwLock<HashMap<String, Arc<TopicFiles>>>,
}

impl FileDatastore {
    /// Open (or create) a file datastore rooted at `data_dir`. Call
    /// [`initialize`](Datastore::initialize) before use to load the catalog
    /// and reopen the files of known topics.
    pub async fn open(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let db_path = data_dir.join("store.db");
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path.display()))?
                .create_if_missing(true);
        let catalog = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        Ok(Self {
            data_dir,
            catalog,
            topics: RwLock::new(HashMap::new()),
        })
    }

    fn topic_dir(&self, topic: &str) -> PathBuf {
        // Single-partition topics: everything lives in partition directory 0.
        self.data_dir.join(topic).join("0")
    }

    fn open_topic_files(&self, topic: &str) -> Result<Arc<TopicFiles>> {
        let dir = self.topic_dir(topic);
        std::fs::create_dir_all(&dir)?;
        let data = MappedFile::open(dir.join("data.bin"))?;
        let index = MappedFile::open(dir.join("index.bin"))?;
        Ok(Arc::new(TopicFiles { data, index }))
    }

    fn files(&self, topic: &str) -> Result<Arc<TopicFiles>> {
        self.topics
            .read()
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))
    }
}

#[async_trait]
impl Datastore for FileDatastore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS topics (
                 name TEXT NOT NULL PRIMARY KEY,
                 data_dir TEXT,
                 partitions INTEGER
             )",
        )
        .execute(&self.catalog)
        .await?;

        for topic in self.list_topics().await? {
            let files = self.open_topic_files(&topic)?;
            let last_offset = files.index.read_last_offset()?;
            debug!(topic = %topic, last_offset, "reopened topic files");
            self.topics.write().insert(topic, files);
        }
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        if self.topics.read().contains_key(topic) {
            return Ok(());
        }

        sqlx::query("INSERT OR IGNORE INTO topics (name, data_dir, partitions) VALUES (?, ?, 0)")
            .bind(topic)
            .bind(topic)
            .execute(&self.catalog)
            .await?;

        let files = self.open_topic_files(topic)?;
        self.topics
            .write()
            .entry(topic.to_string())
            .or_insert(files);
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM topics")
            .fetch_all(&self.catalog)
            .await?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn last_offset(&self, topic: &str) -> Result<i64> {
        self.files(topic)?.index.read_last_offset()
    }

    async fn insert_message(&self, topic: &str, message: &Message) -> Result<()> {
        let files = self.files(topic)?;
        let location = files.data.append_message(message)?;
        files.index.append_index(message.offset, location)
    }

    async fn stream_messages(
        &self,
        topic: &str,
        from_offset: i64,
        callback: MessageSink<'_>,
    ) -> Result<()> {
        let files = self.files(topic)?;
        let mut next = from_offset.max(0);
        while let Some(location) = files.index.read_file_offset(next)? {
            let message = files.data.read_message_at(location)?;
            if message.offset != next {
                return Err(strata_core::Error::OffsetMismatch {
                    expected: next,
                    found: message.offset,
                }
                .into());
            }
            callback(message)?;
            next += 1;
        }
        Ok(())
    }

    async fn num_messages(&self, topic: &str) -> Result<i64> {
        Ok(self.files(topic)?.index.num_records())
    }

    async fn flush(&self) -> Result<()> {
        let topics: Vec<(String, Arc<TopicFiles>)> = {
            let map = self.topics.read();
            map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (topic, files) in topics {
            // Data before index: a durable index record must never point
            // at a frame that did not make it to disk.
            files.data.sync()?;
            files.index.sync()?;
            debug!(topic = %topic, "flushed topic files");
        }
        Ok(())
    }

    async fn garbage_collect(&self, _topic: &str) -> Result<()> {
        // Retention is not enforced for the file backend; see DESIGN.md.
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.topics.write().clear();
        self.catalog.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_initialized(dir: &TempDir) -> FileDatastore {
        let ds = FileDatastore::open(dir.path()).await.unwrap();
        ds.initialize().await.unwrap();
        ds
    }

    async fn collect(ds: &FileDatastore, topic: &str, from: i64) -> Vec<Message> {
        let mut out = Vec::new();
        ds.stream_messages(topic, from, &mut |m| {
            out.push(m);
            Ok(())
        })
        .await
        .unwrap();
        out
    }

    #[tokio::test]
    async fn test_create_topic_provisions_files() {
        let dir = TempDir::new().unwrap();
        let ds = open_initialized(&dir).await;
        ds.create_topic("events").await.unwrap();

        assert!(dir.path().join("events/0/data.bin").exists());
        assert!(dir.path().join("events/0/index.bin").exists());
        assert_eq!(ds.list_topics().await.unwrap(), vec!["events"]);
        ds.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_create_topic_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let ds = open_initialized(&dir).await;
        ds.create_topic("t").await.unwrap();
        ds.insert_message("t", &Message::new(0, "keep")).await.unwrap();
        ds.create_topic("t").await.unwrap();
        assert_eq!(ds.num_messages("t").await.unwrap(), 1);
        ds.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_and_stream() {
        let dir = TempDir::new().unwrap();
        let ds = open_initialized(&dir).await;
        ds.create_topic("t").await.unwrap();

        assert_eq!(ds.last_offset("t").await.unwrap(), -1);
        for i in 0..4 {
            ds.insert_message("t", &Message::new(i, format!("payload-{i}")))
                .await
                .unwrap();
        }
        assert_eq!(ds.last_offset("t").await.unwrap(), 3);
        assert_eq!(ds.num_messages("t").await.unwrap(), 4);

        let got = collect(&ds, "t", 2).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], Message::new(2, "payload-2"));
        assert_eq!(got[1], Message::new(3, "payload-3"));
        ds.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_unknown_topic_errors() {
        let dir = TempDir::new().unwrap();
        let ds = open_initialized(&dir).await;
        assert!(matches!(
            ds.last_offset("nope").await.unwrap_err(),
            Error::TopicNotFound(_)
        ));
        ds.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_stream_stops_at_end_of_log() {
        let dir = TempDir::new().unwrap();
        let ds = open_initialized(&dir).await;
        ds.create_topic("t").await.unwrap();
        ds.insert_message("t", &Message::new(0, "only")).await.unwrap();

        let got = collect(&ds, "t", 1).await;
        assert!(got.is_empty());
        ds.close().await.unwrap();
    }
}
