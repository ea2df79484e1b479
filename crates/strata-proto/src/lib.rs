//! Strata Protocol Buffer Definitions
//!
//! Generated gRPC service and message types for the broker API.
//!
//! ## Usage
//!
//! ### Client side
//!
//! ```ignore
//! use strata_proto::strata::broker_client::BrokerClient;
//! use strata_proto::strata::ProduceRequest;
//!
//! let mut client = BrokerClient::connect("http://localhost:5672").await?;
//! client
//!     .produce(ProduceRequest {
//!         topic: "events".to_string(),
//!         payload: b"hello".to_vec(),
//!     })
//!     .await?;
//! ```
//!
//! ### Server side
//!
//! ```ignore
//! use strata_proto::strata::broker_server::{Broker, BrokerServer};
//! ```

pub mod strata {
    tonic::include_proto!("strata");
}
