//! SQLite-Backed Datastore
//!
//! A single relational store holding one catalog table and one message
//! table per topic:
//!
//! ```text
//! topics(name TEXT PRIMARY KEY, table_name TEXT NOT NULL)
//! topic_<name>("offset" INTEGER PRIMARY KEY,
//!              insertion_time INTEGER NOT NULL,
//!              payload BLOB NOT NULL)
//! ```
//!
//! ## Why SQLite Here?
//!
//! For small logs the embedded database gives us everything the file
//! backend has to build by hand: transactional inserts (every append is
//! durable on commit, so `flush` is a no-op), ordered scans, and trivial
//! age-based retention with a single `DELETE`.
//!
//! ## Table Naming
//!
//! Topic names are arbitrary strings; table identifiers are not. Names are
//! sanitized by mapping every non-alphanumeric byte to `_`. Two distinct
//! topics that sanitize to the same table collide, and that collision is
//! the one situation where `create_topic` reports
//! [`Error::TopicAlreadyExists`].
//!
//! ## Retention
//!
//! When `max_log_age_secs > 0`, `garbage_collect` deletes rows whose
//! `insertion_time` is older than the limit. Because insertion times are
//! monotone along the log, an age cut always removes a prefix.
//! Size-bounded retention is accepted in configuration but deferred (see
//! DESIGN.md).

use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use strata_core::Message;
use tracing::debug;

use crate::config::RetentionConfig;
use crate::error::Result;
use crate::{Datastore, Error, MessageSink};

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn table_name(topic: &str) -> String {
    let mut name = String::with_capacity(topic.len() + 6);
    name.push_str("topic_");
    for c in topic.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c);
        } else {
            name.push('_');
        }
    }
    name
}

/// Datastore storing each topic as its own SQLite table.
pub struct SqliteDatastore {
    pool: SqlitePool,
    retention: RetentionConfig,
}

impl SqliteDatastore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>, retention: RetentionConfig) -> Result<Self> {
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite://{}", path.as_ref().display()))?
                .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        Ok(Self { pool, retention })
    }

    /// In-memory database for tests. A single connection keeps every query
    /// on the same ephemeral database.
    pub async fn open_in_memory(retention: RetentionConfig) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Ok(Self { pool, retention })
    }

    async fn table_for(&self, topic: &str) -> Result<String> {
        let row = sqlx::query("SELECT table_name FROM topics WHERE name = ?")
            .bind(topic)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(row.get("table_name")),
            None => Err(Error::TopicNotFound(topic.to_string())),
        }
    }
}

#[async_trait]
impl Datastore for SqliteDatastore {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS topics (
                 name TEXT NOT NULL PRIMARY KEY,
                 table_name TEXT NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        let table = table_name(topic);
        let mut tx = self.pool.begin().await?;

        if let Some(row) = sqlx::query("SELECT name FROM topics WHERE table_name = ?")
            .bind(&table)
            .fetch_optional(&mut *tx)
            .await?
        {
            let existing: String = row.get("name");
            if existing == topic {
                return Ok(());
            }
            return Err(Error::TopicAlreadyExists(topic.to_string()));
        }

        sqlx::query("INSERT INTO topics (name, table_name) VALUES (?, ?)")
            .bind(topic)
            .bind(&table)
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                 \"offset\" INTEGER NOT NULL PRIMARY KEY,
                 insertion_time INTEGER NOT NULL,
                 payload BLOB NOT NULL
             )"
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM topics")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("name")).collect())
    }

    async fn last_offset(&self, topic: &str) -> Result<i64> {
        let table = self.table_for(topic).await?;
        let row = sqlx::query(&format!(
            "SELECT MAX(\"offset\") AS last_offset FROM {table}"
        ))
        .fetch_one(&self.pool)
        .await?;
        let last: Option<i64> = row.get("last_offset");
        Ok(last.unwrap_or(-1))
    }

    async fn insert_message(&self, topic: &str, message: &Message) -> Result<()> {
        let table = self.table_for(topic).await?;
        let mut tx = self.pool.begin().await?;
        sqlx::query(&format!(
            "INSERT INTO {table} (\"offset\", insertion_time, payload) VALUES (?, ?, ?)"
        ))
        .bind(message.offset)
        .bind(now_ms())
        .bind(message.payload.as_ref())
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn stream_messages(
        &self,
        topic: &str,
        from_offset: i64,
        callback: MessageSink<'_>,
    ) -> Result<()> {
        let table = self.table_for(topic).await?;
        let sql = format!(
            "SELECT \"offset\", payload FROM {table} WHERE \"offset\" >= ? ORDER BY \"offset\" ASC"
        );
        let mut rows = sqlx::query(&sql).bind(from_offset.max(0)).fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let offset: i64 = row.get(0);
            let payload: Vec<u8> = row.get(1);
            callback(Message::new(offset, payload))?;
        }
        Ok(())
    }

    async fn num_messages(&self, topic: &str) -> Result<i64> {
        let table = self.table_for(topic).await?;
        let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    async fn flush(&self) -> Result<()> {
        // Every insert commits its own transaction.
        Ok(())
    }

    async fn garbage_collect(&self, topic: &str) -> Result<()> {
        if !self.retention.age_limited() {
            return Ok(());
        }
        let table = self.table_for(topic).await?;
        let cutoff = now_ms() - self.retention.max_log_age_secs * 1000;
        let deleted = sqlx::query(&format!("DELETE FROM {table} WHERE insertion_time < ?"))
            .bind(cutoff)
            .execute(&self.pool)
            .await?
            .rows_affected();
        if deleted > 0 {
            debug!(topic = %topic, deleted, "expired aged log entries");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_initialized() -> SqliteDatastore {
        let ds = SqliteDatastore::open_in_memory(RetentionConfig::unbounded())
            .await
            .unwrap();
        ds.initialize().await.unwrap();
        ds
    }

    async fn collect(ds: &SqliteDatastore, topic: &str, from: i64) -> Vec<Message> {
        let mut out = Vec::new();
        ds.stream_messages(topic, from, &mut |m| {
            out.push(m);
            Ok(())
        })
        .await
        .unwrap();
        out
    }

    // ---------------------------------------------------------------
    // Table naming
    // ---------------------------------------------------------------

    #[test]
    fn test_table_name_sanitizes() {
        assert_eq!(table_name("orders"), "topic_orders");
        assert_eq!(table_name("my.topic-1"), "topic_my_topic_1");
        assert_eq!(table_name("a/b"), "topic_a_b");
    }

    // ---------------------------------------------------------------
    // Topic lifecycle
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_create_topic_is_idempotent() {
        let ds = open_initialized().await;
        ds.create_topic("t").await.unwrap();
        ds.create_topic("t").await.unwrap();
        assert_eq!(ds.list_topics().await.unwrap(), vec!["t"]);
    }

    #[tokio::test]
    async fn test_sanitization_collision_is_already_exists() {
        let ds = open_initialized().await;
        ds.create_topic("a.b").await.unwrap();
        let err = ds.create_topic("a_b").await.unwrap_err();
        assert!(matches!(err, Error::TopicAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_unknown_topic_errors() {
        let ds = open_initialized().await;
        assert!(matches!(
            ds.last_offset("nope").await.unwrap_err(),
            Error::TopicNotFound(_)
        ));
    }

    // ---------------------------------------------------------------
    // Append and read back
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_last_offset_empty_is_minus_one() {
        let ds = open_initialized().await;
        ds.create_topic("t").await.unwrap();
        assert_eq!(ds.last_offset("t").await.unwrap(), -1);
    }

    #[tokio::test]
    async fn test_insert_and_stream() {
        let ds = open_initialized().await;
        ds.create_topic("t").await.unwrap();
        for i in 0..3 {
            ds.insert_message("t", &Message::new(i, format!("p{i}")))
                .await
                .unwrap();
        }
        assert_eq!(ds.last_offset("t").await.unwrap(), 2);
        assert_eq!(ds.num_messages("t").await.unwrap(), 3);

        let got = collect(&ds, "t", 1).await;
        assert_eq!(got.len(), 2);
        assert_eq!(got[0], Message::new(1, "p1"));
        assert_eq!(got[1], Message::new(2, "p2"));
    }

    #[tokio::test]
    async fn test_stream_negative_offset_starts_at_zero() {
        let ds = open_initialized().await;
        ds.create_topic("t").await.unwrap();
        ds.insert_message("t", &Message::new(0, "p")).await.unwrap();
        let got = collect(&ds, "t", -1).await;
        assert_eq!(got.len(), 1);
    }

    #[tokio::test]
    async fn test_binary_payload_roundtrip() {
        let ds = open_initialized().await;
        ds.create_topic("t").await.unwrap();
        let payload = bytes::Bytes::from(vec![0u8, 1, 2, 255, 254]);
        ds.insert_message("t", &Message::new(0, payload.clone()))
            .await
            .unwrap();
        let got = collect(&ds, "t", 0).await;
        assert_eq!(got[0].payload, payload);
    }

    #[tokio::test]
    async fn test_callback_error_halts_stream() {
        let ds = open_initialized().await;
        ds.create_topic("t").await.unwrap();
        for i in 0..5 {
            ds.insert_message("t", &Message::new(i, "p")).await.unwrap();
        }
        let mut seen = 0;
        let res = ds
            .stream_messages("t", 0, &mut |_| {
                seen += 1;
                if seen == 2 {
                    return Err(Error::TopicNotFound("sentinel".into()));
                }
                Ok(())
            })
            .await;
        assert!(res.is_err());
        assert_eq!(seen, 2);
    }

    // ---------------------------------------------------------------
    // Retention
    // ---------------------------------------------------------------

    #[tokio::test]
    async fn test_gc_without_age_limit_keeps_everything() {
        let ds = open_initialized().await;
        ds.create_topic("t").await.unwrap();
        ds.insert_message("t", &Message::new(0, "p")).await.unwrap();
        ds.garbage_collect("t").await.unwrap();
        assert_eq!(ds.num_messages("t").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_gc_expires_aged_entries() {
        let ds = SqliteDatastore::open_in_memory(RetentionConfig {
            max_log_bytes: -1,
            max_log_age_secs: 1,
        })
        .await
        .unwrap();
        ds.initialize().await.unwrap();
        ds.create_topic("t").await.unwrap();
        for i in 0..3 {
            ds.insert_message("t", &Message::new(i, "p")).await.unwrap();
        }

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        ds.garbage_collect("t").await.unwrap();
        assert_eq!(ds.num_messages("t").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_gc_keeps_fresh_entries() {
        let ds = SqliteDatastore::open_in_memory(RetentionConfig {
            max_log_bytes: -1,
            max_log_age_secs: 3600,
        })
        .await
        .unwrap();
        ds.initialize().await.unwrap();
        ds.create_topic("t").await.unwrap();
        ds.insert_message("t", &Message::new(0, "p")).await.unwrap();
        ds.garbage_collect("t").await.unwrap();
        assert_eq!(ds.num_messages("t").await.unwrap(), 1);
    }
}
