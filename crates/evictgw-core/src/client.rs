//! Backend client trait for eviction operations.

use futures::stream::BoxStream;

use crate::error::Result;
use crate::model::{EvictionEvent, EvictionQuota, Reference, SystemDisruptionBudget};

/// Event stream returned by [`EvictionClient::observe_events`].
///
/// Dropping the stream unsubscribes from the backend.
pub type EventStream = BoxStream<'static, Result<EvictionEvent>>;

/// Backend interface for eviction operations.
///
/// This trait abstracts over:
/// - Local: in-process quota bookkeeping ([`crate::LocalEvictionClient`])
/// - Remote: an upstream eviction service reached over gRPC
#[async_trait::async_trait]
pub trait EvictionClient: Send + Sync + 'static {
    /// Get the disruption budget for a reference.
    async fn get_disruption_budget(&self, reference: Reference) -> Result<SystemDisruptionBudget>;

    /// Get the current eviction quota for a reference.
    async fn get_eviction_quota(&self, reference: Reference) -> Result<EvictionQuota>;

    /// Ask the backend to terminate a task. Completes without a value when allowed.
    async fn terminate_task(&self, task_id: String, reason: String) -> Result<()>;

    /// Subscribe to eviction events, optionally preceded by a snapshot of current state.
    fn observe_events(&self, include_snapshot: bool) -> EventStream;
}
