//! Synload Core Library
//!
//! Request generation and latency measurement for the synload synthetic-service
//! client:
//!
//! - `protocol`: fixed-size request/response packets
//! - `request`: tagged in-flight request records
//! - `generator`: issues requests over an `AsyncSocket` and correlates responses
//! - `tracker`: rolling percentile over a trailing time window
//! - `config`, `seed`, `timing`: profile loading, seed derivation and clocks
//!
//! The event loop driving the sockets lives outside this crate.

pub mod config;
pub mod error;
pub mod generator;
pub mod protocol;
pub mod request;
pub mod seed;
pub mod timing;
pub mod tracker;

pub use config::{ClientProfile, GeneratorConfig, ServiceDistributionKind, TrackerConfig};
pub use error::{Error, Result};
pub use generator::RequestGenerator;
pub use protocol::{RequestPacket, ResponsePacket, MAX_DELAYS};
pub use request::{RequestState, ServiceSample, Tag};
pub use tracker::{LatencyWindowTracker, Measurement};

// Re-export the socket layer the generator runs on
pub use synload_transport::{AsyncSocket, Readiness};
