//! Commit Log Registry
//!
//! The commit log owns the topic map. At startup it asks the datastore for
//! every known topic, recovers each topic's last offset, and starts a
//! runner per topic; afterwards `get_or_new_topic` creates topics on first
//! reference (producers and consumers alike - a subscriber may attach
//! before any producer exists).
//!
//! Creation follows the get-or-create shape: fast path returns the
//! existing runner, slow path provisions datastore state and inserts the
//! new runner before the registry lock is released, so two racing attaches
//! always agree on one `Topic` instance.

use std::collections::HashMap;
use std::sync::Arc;

use strata_storage::Datastore;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::topic::Topic;

/// Registry of topics over one datastore.
pub struct CommitLog {
    datastore: Arc<dyn Datastore>,
    topics: Mutex<HashMap<String, Arc<Topic>>>,
}

impl CommitLog {
    /// Recover every topic known to the datastore and start its runner.
    pub async fn new(datastore: Arc<dyn Datastore>) -> Result<Self> {
        let mut topics = HashMap::new();
        for name in datastore.list_topics().await? {
            let last_offset = datastore.last_offset(&name).await?;
            info!(topic = %name, last_offset, "recovered topic");
            let topic = Topic::spawn(name.clone(), last_offset, Arc::clone(&datastore));
            topics.insert(name, topic);
        }
        Ok(Self {
            datastore,
            topics: Mutex::new(topics),
        })
    }

    /// Return the topic runner for `name`, creating the topic on first
    /// reference.
    pub async fn get_or_new_topic(&self, name: &str) -> Result<Arc<Topic>> {
        let mut topics = self.topics.lock().await;
        if let Some(topic) = topics.get(name) {
            return Ok(Arc::clone(topic));
        }

        self.datastore.create_topic(name).await?;
        info!(topic = %name, "created topic");
        let topic = Topic::spawn(name.to_string(), -1, Arc::clone(&self.datastore));
        topics.insert(name.to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    /// The datastore this log writes through.
    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_storage::MemoryDatastore;

    #[tokio::test]
    async fn test_get_or_new_topic_returns_same_runner() {
        let ds: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let log = CommitLog::new(ds).await.unwrap();

        let a = log.get_or_new_topic("t").await.unwrap();
        let b = log.get_or_new_topic("t").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_new_topic_starts_empty() {
        let ds: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let log = CommitLog::new(ds).await.unwrap();

        let topic = log.get_or_new_topic("fresh").await.unwrap();
        assert_eq!(topic.last_committed(), -1);
    }

    #[tokio::test]
    async fn test_creation_is_visible_to_datastore() {
        let ds: Arc<dyn Datastore> = Arc::new(MemoryDatastore::new());
        let log = CommitLog::new(ds).await.unwrap();

        log.get_or_new_topic("t").await.unwrap();
        assert_eq!(log.datastore().list_topics().await.unwrap(), vec!["t"]);
    }
}
