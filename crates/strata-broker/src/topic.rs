//! Topic Runner
//!
//! One topic = one single-consumer loop. Producers enqueue `Entry` values
//! (message + ack callback) on a bounded channel; the runner drains the
//! channel, assigns the next offset, writes through the datastore, and
//! publishes the commit. Because the runner is the only task that ever
//! calls `insert_message` for its topic, the backends never see concurrent
//! appends to the same log.
//!
//! ## Commit Sequence
//!
//! 1. Receive the next entry (blocking on the channel).
//! 2. Assign `offset = last assigned + 1`.
//! 3. `insert_message`. On failure: ack `false`, roll the assignment back
//!    so successful offsets stay gap-free, keep running.
//! 4. On success: store `last_committed = offset`, ack `true`, and signal
//!    every registered subscriber.
//!
//! Subscriber signalling works on a snapshot of the subscriber map taken
//! under its lock; a subscriber registered mid-commit simply observes the
//! new `last_committed` on its next predicate check.
//!
//! ## Backpressure
//!
//! The inbound channel is bounded (100 entries). `add_entry` awaits channel
//! capacity, which is what slows producers down when the datastore cannot
//! keep up.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use strata_core::Message;
use strata_storage::Datastore;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::subscriber::{Subscriber, SubscriberState};

/// Capacity of the inbound append channel.
const INCOMING_CAPACITY: usize = 100;

/// Invoked exactly once per entry with the commit outcome.
pub type AckCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// A pending append: the message plus the callback that reports whether the
/// commit succeeded.
pub struct Entry {
    pub message: Message,
    pub ack: AckCallback,
}

impl Entry {
    pub fn new(message: Message, ack: AckCallback) -> Self {
        Self { message, ack }
    }
}

/// A single-partition, append-only topic with one writer task and any
/// number of subscribers.
pub struct Topic {
    name: String,
    datastore: Arc<dyn Datastore>,
    id_counter: AtomicI64,
    last_committed: AtomicI64,
    incoming: mpsc::Sender<Entry>,
    subscribers: Mutex<HashMap<String, Arc<SubscriberState>>>,
    /// Handed to subscribers as their non-owning back-reference.
    self_handle: Weak<Topic>,
}

impl Topic {
    /// Create the topic and start its runner task. `last_offset` is the
    /// highest offset already in the datastore (`-1` for a fresh topic);
    /// both counters start there so the first assignment is
    /// `last_offset + 1`.
    pub fn spawn(name: String, last_offset: i64, datastore: Arc<dyn Datastore>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(INCOMING_CAPACITY);
        let topic = Arc::new_cyclic(|weak| Self {
            name,
            datastore,
            id_counter: AtomicI64::new(last_offset),
            last_committed: AtomicI64::new(last_offset),
            incoming: tx,
            subscribers: Mutex::new(HashMap::new()),
            self_handle: weak.clone(),
        });
        tokio::spawn(Topic::run(Arc::clone(&topic), rx));
        topic
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The high-water mark: the largest committed offset, `-1` when the
    /// topic has never committed.
    pub fn last_committed(&self) -> i64 {
        self.last_committed.load(Ordering::SeqCst)
    }

    pub(crate) fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    /// Enqueue an append. Returns once the entry is accepted into the
    /// inbound channel; the commit outcome arrives through the entry's ack
    /// callback. If the runner has stopped, the callback fires with
    /// `false` and an error is returned.
    pub async fn add_entry(&self, message: Message, ack: AckCallback) -> Result<()> {
        if let Err(send_error) = self.incoming.send(Entry::new(message, ack)).await {
            let Entry { ack, .. } = send_error.0;
            ack(false);
            return Err(Error::TopicClosed(self.name.clone()));
        }
        Ok(())
    }

    /// Register a subscriber. `offset` is the first offset to deliver;
    /// `-1` means "tail": only messages committed after this call. Any
    /// other value is clamped into `[0, last_committed + 1]`.
    pub fn new_subscriber(&self, id: String, offset: i64, since: i64) -> Subscriber {
        let next = self.last_committed() + 1;
        let cursor = if offset == -1 {
            next
        } else {
            offset.clamp(0, next)
        };
        let state = Arc::new(SubscriberState::new(id, cursor, since));
        self.subscribers
            .lock()
            .insert(state.id().to_string(), Arc::clone(&state));
        Subscriber::new(self.self_handle.clone(), state)
    }

    pub(crate) fn remove_subscriber(&self, id: &str) {
        self.subscribers.lock().remove(id);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn notify_subscribers(&self) {
        // Snapshot under the lock, signal outside it. Waking a subscriber
        // that closed in between is a no-op.
        let states: Vec<Arc<SubscriberState>> =
            self.subscribers.lock().values().cloned().collect();
        for state in states {
            state.wake();
        }
    }

    async fn run(self: Arc<Self>, mut incoming: mpsc::Receiver<Entry>) {
        while let Some(entry) = incoming.recv().await {
            let Entry { mut message, ack } = entry;
            let offset = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
            message.offset = offset;

            if let Err(error) = self.datastore.insert_message(&self.name, &message).await {
                warn!(topic = %self.name, offset, %error, "append failed");
                // The runner is the only writer, so the assignment can be
                // taken back and the next entry reuses this offset.
                self.id_counter.store(offset - 1, Ordering::SeqCst);
                ack(false);
                continue;
            }

            self.last_committed.store(offset, Ordering::SeqCst);
            ack(true);
            self.notify_subscribers();
        }
        debug!(topic = %self.name, "topic runner stopped");
    }
}
