//! Common building blocks for synload
//!
//! This crate provides utilities shared by the synload crates:
//! - `ring`: fixed-capacity ring buffers for bytes and typed elements
//! - `distributions`: service-time distributions for synthetic requests

pub mod distributions;
pub mod ring;

pub use distributions::{
    Distribution, ExponentialDistribution, FixedDistribution, LognormalDistribution,
    LOGNORMAL_SIGMA,
};

pub use ring::{BoundedQueue, Fill, RingByteBuffer, RingError};
