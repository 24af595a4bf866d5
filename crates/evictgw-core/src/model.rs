//! Eviction domain model.
//!
//! These types are what backends produce and consume. Wire messages are
//! converted to and from them at the transport edge.

use std::fmt;

/// Workload tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Flex,
    Critical,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Flex => f.write_str("flex"),
            Tier::Critical => f.write_str("critical"),
        }
    }
}

/// The scope a quota or budget applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    System,
    Tier(Tier),
    CapacityGroup(String),
    Job(String),
    Task(String),
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::System => f.write_str("system"),
            Reference::Tier(tier) => write!(f, "tier/{}", tier),
            Reference::CapacityGroup(name) => write!(f, "capacityGroup/{}", name),
            Reference::Job(id) => write!(f, "job/{}", id),
            Reference::Task(id) => write!(f, "task/{}", id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucketDescriptor {
    pub capacity: i64,
    pub refill_rate_per_second: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Day {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourlyTimeWindow {
    pub start_hour: u32,
    pub end_hour: u32,
}

/// A recurring window during which evictions are permitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeWindow {
    pub days: Vec<Day>,
    pub hourly_time_windows: Vec<HourlyTimeWindow>,
    pub time_zone: String,
}

/// System-level disruption budget. An empty `time_windows` list means
/// evictions are permitted at any time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemDisruptionBudget {
    pub reference: Reference,
    pub token_bucket: TokenBucketDescriptor,
    pub time_windows: Vec<TimeWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionQuota {
    pub reference: Reference,
    pub quota: i64,
    pub message: String,
}

/// Event published by a backend's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvictionEvent {
    /// Marks the end of the initial snapshot.
    SnapshotEnd,
    SystemDisruptionBudgetUpdate(SystemDisruptionBudget),
    EvictionQuotaUpdate(EvictionQuota),
    TaskTermination {
        task_id: String,
        approved: bool,
        reason: String,
    },
}
