//! Strata Broker Server Library
//!
//! The gRPC adapter between the wire and the commit-log core. The binary
//! in `main.rs` handles flags, logging, datastore construction, and
//! maintenance tasks; everything protocol-facing lives in [`service`].

pub mod service;

pub use service::BrokerService;
