//! Strata Broker Core
//!
//! This crate implements the in-process heart of the broker: the commit
//! log registry, the per-topic runner that serializes appends, and the
//! subscribers that block for new data and walk the datastore when it
//! arrives.
//!
//! ## Architecture Overview
//!
//! ```text
//!            add_entry(message, ack)
//! producers ────────────────────────┐
//!                                   ▼
//!                     ┌──────────────────────────┐
//!                     │ Topic runner (one task)  │
//!                     │ - assigns the offset     │
//!                     │ - insert_message         │
//!                     │ - advances last_committed│
//!                     │ - ack + notify           │
//!                     └────────────┬─────────────┘
//!                                  │ notify_one per subscriber
//!                 ┌────────────────┼────────────────┐
//!                 ▼                ▼                ▼
//!           ┌──────────┐    ┌──────────┐     ┌──────────┐
//!           │Subscriber│    │Subscriber│ ... │Subscriber│
//!           │ cursor   │    │ cursor   │     │ cursor   │
//!           └────┬─────┘    └────┬─────┘     └────┬─────┘
//!                │ stream_messages(cursor, cb)    │
//!                ▼                                ▼
//!             Datastore  (strata-storage, shared, many readers)
//! ```
//!
//! ## The Commit Contract
//!
//! - Offsets are assigned by the runner, never the producer, and are dense
//!   per topic: `k, k+1, k+2, ...` across every successful append.
//! - `last_committed` only advances after the datastore accepted the
//!   append; a failed insert acks `false` and leaves the high-water mark
//!   (and the next assignment) untouched.
//! - After every successful commit each registered subscriber is woken at
//!   least once. The per-subscriber notifier stores a permit, so a wakeup
//!   that fires between a subscriber's predicate check and its wait is
//!   never lost.

pub mod commit_log;
pub mod error;
pub mod subscriber;
pub mod topic;

pub use commit_log::CommitLog;
pub use error::{Error, Result};
pub use subscriber::Subscriber;
pub use topic::{AckCallback, Entry, Topic};
