//! In-Memory Datastore
//!
//! Topics map to plain `Vec<Message>` sequences guarded by a per-topic
//! mutex. Nothing survives a restart; `flush` and `garbage_collect` are
//! no-ops. This backend exists for tests and for ephemeral brokers where
//! durability does not matter.
//!
//! ## Locking
//!
//! Two levels: a map-wide mutex guards topic creation and enumeration, and
//! each topic carries its own mutex guarding the message vector. Streaming
//! takes a snapshot of the vector under the topic lock and iterates outside
//! it, so a slow consumer callback never stalls the append path. Payloads
//! are `Bytes`, which makes the snapshot a cheap reference-counted clone.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use strata_core::Message;

use crate::error::Result;
use crate::{Datastore, Error, MessageSink};

type TopicLog = Arc<Mutex<Vec<Message>>>;

/// Volatile datastore backed by per-topic vectors.
#[derive(Default)]
pub struct MemoryDatastore {
    topics: Mutex<HashMap<String, TopicLog>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    fn topic(&self, topic: &str) -> Result<TopicLog> {
        self.topics
            .lock()
            .get(topic)
            .cloned()
            .ok_or_else(|| Error::TopicNotFound(topic.to_string()))
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn create_topic(&self, topic: &str) -> Result<()> {
        self.topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Vec::new())));
        Ok(())
    }

    async fn list_topics(&self) -> Result<Vec<String>> {
        Ok(self.topics.lock().keys().cloned().collect())
    }

    async fn last_offset(&self, topic: &str) -> Result<i64> {
        let log = self.topic(topic)?;
        let guard = log.lock();
        Ok(guard.last().map(|m| m.offset).unwrap_or(-1))
    }

    async fn insert_message(&self, topic: &str, message: &Message) -> Result<()> {
        let log = self.topic(topic)?;
        log.lock().push(message.clone());
        Ok(())
    }

    async fn stream_messages(
        &self,
        topic: &str,
        from_offset: i64,
        callback: MessageSink<'_>,
    ) -> Result<()> {
        let log = self.topic(topic)?;
        // Snapshot under the lock, deliver outside it.
        let snapshot: Vec<Message> = log.lock().clone();
        let start = from_offset.max(0).min(snapshot.len() as i64) as usize;
        for message in &snapshot[start..] {
            callback(message.clone())?;
        }
        Ok(())
    }

    async fn num_messages(&self, topic: &str) -> Result<i64> {
        let log = self.topic(topic)?;
        let len = log.lock().len();
        Ok(len as i64)
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }

    async fn garbage_collect(&self, _topic: &str) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
