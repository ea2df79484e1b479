//! Background Maintenance Tasks
//!
//! Two periodic loops keep the on-disk backends healthy:
//!
//! - **Flusher**: calls `Datastore::flush` on an interval. Only worth
//!   running for backends that batch durability (the file backend); the
//!   others treat flush as a no-op.
//! - **GarbageCollector**: enumerates topics on an interval and asks the
//!   backend to enforce retention on each. Errors are logged and swallowed;
//!   collection must never stall the append path, which it cannot because
//!   it only races with appends inside the backend's own locking.
//!
//! Both tasks run forever; the server spawns them on the runtime and lets
//! them die with the process.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::Datastore;

/// Periodically drives `Datastore::flush`.
pub struct Flusher {
    datastore: Arc<dyn Datastore>,
    interval: Duration,
}

impl Flusher {
    pub fn new(datastore: Arc<dyn Datastore>, interval: Duration) -> Self {
        Self {
            datastore,
            interval,
        }
    }

    /// Run the flush loop. Never returns; spawn it.
    pub async fn run(self) {
        info!(interval_secs = self.interval.as_secs(), "flusher started");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            debug!("flushing datastore");
            if let Err(error) = self.datastore.flush().await {
                warn!(%error, "datastore flush failed");
            }
        }
    }
}

/// Periodically enforces retention on every topic.
pub struct GarbageCollector {
    datastore: Arc<dyn Datastore>,
    interval: Duration,
}

impl GarbageCollector {
    pub fn new(datastore: Arc<dyn Datastore>, interval: Duration) -> Self {
        Self {
            datastore,
            interval,
        }
    }

    /// Run the collection loop. Never returns; spawn it.
    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            "garbage collector started"
        );
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let topics = match self.datastore.list_topics().await {
                Ok(topics) => topics,
                Err(error) => {
                    warn!(%error, "listing topics for collection failed");
                    continue;
                }
            };
            for topic in topics {
                if let Err(error) = self.datastore.garbage_collect(&topic).await {
                    warn!(topic = %topic, %error, "garbage collection failed");
                }
            }
        }
    }
}
