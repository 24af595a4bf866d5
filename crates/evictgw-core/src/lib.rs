//! Eviction domain model and backend client abstraction.
//!
//! The gateway never computes quotas itself. It talks to an [`EvictionClient`],
//! which is either the in-memory [`LocalEvictionClient`] or a remote upstream.

pub mod client;
pub mod error;
pub mod local;
pub mod model;

pub use client::{EventStream, EvictionClient};
pub use error::{EvictionError, EvictionErrorCode, Result};
pub use local::{JobQuota, LocalEvictionClient, LocalEvictionConfig};
pub use model::{
    Day, EvictionEvent, EvictionQuota, HourlyTimeWindow, Reference, SystemDisruptionBudget, Tier,
    TimeWindow, TokenBucketDescriptor,
};
