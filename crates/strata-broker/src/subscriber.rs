//! Subscriber
//!
//! A subscriber is a cursor over one topic plus a wait primitive. The
//! contract mirrors a condition variable: `stream` blocks while the cursor
//! is past the high-water mark, and every commit on the topic wakes every
//! registered subscriber at least once.
//!
//! ## Delivery Loop
//!
//! The adapter drives a subscriber like this:
//!
//! ```ignore
//! loop {
//!     sub.stream(&mut |message| {
//!         deliver(&message)?;         // hand to the wire
//!         Ok(())
//!     }).await?;
//!     // commit after each successful delivery:
//!     sub.commit(delivered_offset);
//! }
//! ```
//!
//! A subscriber that commits every delivered offset observes every
//! committed message from its initial cursor onward exactly once, in
//! ascending order.
//!
//! ## Lost-Wakeup Safety
//!
//! `stream` creates the `notified()` future *before* re-checking the
//! predicate, and the topic signals with `notify_one`, which stores a
//! permit when nobody is waiting. Between the two, a commit that lands in
//! the check-then-wait window still wakes the subscriber.
//!
//! ## Closing
//!
//! `close` removes the subscriber from the topic's map, marks it closed,
//! and wakes any in-flight wait; a `stream` call on a closed subscriber
//! returns immediately with no messages (end-of-stream).

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use strata_storage::MessageSink;
use tokio::sync::Notify;

use crate::error::Result;
use crate::topic::Topic;

pub(crate) struct SubscriberState {
    id: String,
    /// Next offset to deliver.
    cursor: AtomicI64,
    /// Reserved time-based start; carried but not consulted on the read
    /// path.
    #[allow(dead_code)]
    since: i64,
    notify: Notify,
    closed: AtomicBool,
}

impl SubscriberState {
    pub(crate) fn new(id: String, cursor: i64, since: i64) -> Self {
        Self {
            id,
            cursor: AtomicI64::new(cursor),
            since,
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }

    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }
}

/// A registered consumer cursor on one topic.
///
/// Holds only a weak back-reference to its topic: the topic owns the
/// subscriber map, and the map referencing the subscriber state must not
/// keep the topic alive in turn.
pub struct Subscriber {
    topic: Weak<Topic>,
    state: Arc<SubscriberState>,
}

impl Subscriber {
    pub(crate) fn new(topic: Weak<Topic>, state: Arc<SubscriberState>) -> Self {
        Self { topic, state }
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    /// Next offset this subscriber will be handed.
    pub fn cursor(&self) -> i64 {
        self.state.cursor.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Wait until the topic has committed something at or past the cursor,
    /// then walk the datastore from the cursor, handing each message to
    /// `callback`. Returns immediately with no messages if the subscriber
    /// is closed or its topic is gone.
    pub async fn stream(&self, callback: MessageSink<'_>) -> Result<()> {
        let Some(topic) = self.topic.upgrade() else {
            return Ok(());
        };
        loop {
            if self.is_closed() {
                return Ok(());
            }
            let notified = self.state.notify.notified();
            if self.state.cursor.load(Ordering::SeqCst) <= topic.last_committed() {
                break;
            }
            notified.await;
        }

        let from = self.state.cursor.load(Ordering::SeqCst);
        topic
            .datastore()
            .stream_messages(topic.name(), from, callback)
            .await?;
        Ok(())
    }

    /// Record that everything up to and including `offset` was delivered;
    /// the cursor moves to `offset + 1`.
    pub fn commit(&self, offset: i64) {
        self.state.cursor.store(offset + 1, Ordering::SeqCst);
    }

    /// Deregister from the topic and wake any in-flight `stream` so it can
    /// observe the closure. Idempotent.
    pub fn close(&self) {
        if !self.state.closed.swap(true, Ordering::SeqCst) {
            if let Some(topic) = self.topic.upgrade() {
                topic.remove_subscriber(self.state.id());
            }
            self.state.wake();
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.close();
    }
}
