//! In-memory eviction backend.
//!
//! Keeps quotas for the system, capacity groups and jobs, and a registry of
//! tasks. Every state change is broadcast as an [`EvictionEvent`]. This is a
//! bookkeeping stand-in for a real quota engine: quotas only move when a task
//! is terminated or an operator sets them.

use std::collections::{BTreeMap, HashMap};

use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use crate::client::{EventStream, EvictionClient};
use crate::error::{EvictionError, EvictionErrorCode, Result};
use crate::model::{
    EvictionEvent, EvictionQuota, Reference, SystemDisruptionBudget, TimeWindow,
    TokenBucketDescriptor,
};

/// Seed quota for one job and the tasks that belong to it.
#[derive(Debug, Clone)]
pub struct JobQuota {
    pub job_id: String,
    pub capacity_group: Option<String>,
    pub quota: i64,
    pub tasks: Vec<String>,
}

/// Initial state of a [`LocalEvictionClient`].
#[derive(Debug, Clone)]
pub struct LocalEvictionConfig {
    /// System-wide eviction quota.
    /// Default: 100
    pub system_quota: i64,

    /// Token bucket advertised in the system disruption budget.
    pub token_bucket: TokenBucketDescriptor,

    /// Eviction windows advertised in the system disruption budget.
    /// Default: empty (always open)
    pub time_windows: Vec<TimeWindow>,

    /// Capacity group name → quota.
    pub capacity_groups: Vec<(String, i64)>,

    pub jobs: Vec<JobQuota>,

    /// Capacity of the event broadcast channel.
    /// Default: 256
    pub event_buffer: usize,
}

impl Default for LocalEvictionConfig {
    fn default() -> Self {
        Self {
            system_quota: 100,
            token_bucket: TokenBucketDescriptor {
                capacity: 100,
                refill_rate_per_second: 1,
            },
            time_windows: Vec::new(),
            capacity_groups: Vec::new(),
            jobs: Vec::new(),
            event_buffer: 256,
        }
    }
}

#[derive(Debug)]
struct JobState {
    quota: i64,
    capacity_group: Option<String>,
}

#[derive(Debug)]
struct TaskState {
    job_id: String,
    stopped: bool,
}

#[derive(Debug)]
struct State {
    system_quota: i64,
    budget: SystemDisruptionBudget,
    capacity_groups: BTreeMap<String, i64>,
    jobs: BTreeMap<String, JobState>,
    tasks: HashMap<String, TaskState>,
}

/// In-memory [`EvictionClient`].
pub struct LocalEvictionClient {
    state: Mutex<State>,
    events: broadcast::Sender<EvictionEvent>,
}

impl LocalEvictionClient {
    /// Create a backend seeded from `config`.
    pub fn new(config: LocalEvictionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        let mut jobs = BTreeMap::new();
        let mut tasks = HashMap::new();
        for job in config.jobs {
            for task_id in job.tasks {
                tasks.insert(
                    task_id,
                    TaskState {
                        job_id: job.job_id.clone(),
                        stopped: false,
                    },
                );
            }
            jobs.insert(
                job.job_id,
                JobState {
                    quota: job.quota,
                    capacity_group: job.capacity_group,
                },
            );
        }

        let state = State {
            system_quota: config.system_quota,
            budget: SystemDisruptionBudget {
                reference: Reference::System,
                token_bucket: config.token_bucket,
                time_windows: config.time_windows,
            },
            capacity_groups: config.capacity_groups.into_iter().collect(),
            jobs,
            tasks,
        };

        Self {
            state: Mutex::new(state),
            events,
        }
    }

    /// Register a task under an existing job.
    pub fn register_task(&self, job_id: &str, task_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        if !state.jobs.contains_key(job_id) {
            return Err(EvictionError::eviction(
                EvictionErrorCode::JobNotFound,
                format!("Job not found: {}", job_id),
            ));
        }
        state.tasks.insert(
            task_id.to_string(),
            TaskState {
                job_id: job_id.to_string(),
                stopped: false,
            },
        );
        Ok(())
    }

    /// Overwrite the quota for a reference and publish the update.
    ///
    /// System and tier references share the system quota. Capacity groups are
    /// created on first use; jobs must already exist.
    pub fn set_quota(&self, reference: Reference, quota: i64) -> Result<()> {
        let mut state = self.state.lock();
        match &reference {
            Reference::System | Reference::Tier(_) => state.system_quota = quota,
            Reference::CapacityGroup(name) => {
                state.capacity_groups.insert(name.clone(), quota);
            }
            Reference::Job(job_id) => match state.jobs.get_mut(job_id) {
                Some(job) => job.quota = quota,
                None => {
                    return Err(EvictionError::eviction(
                        EvictionErrorCode::JobNotFound,
                        format!("Job not found: {}", job_id),
                    ))
                }
            },
            Reference::Task(_) => {
                return Err(EvictionError::invalid_argument(
                    "quota cannot be set on a task reference",
                ))
            }
        }

        tracing::debug!("Quota for {} set to {}", reference, quota);
        self.publish(EvictionEvent::EvictionQuotaUpdate(quota_event(reference, quota)));
        Ok(())
    }

    /// Number of live event subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn publish(&self, event: EvictionEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }

    fn quota_of(state: &State, reference: &Reference) -> Result<EvictionQuota> {
        let quota = match reference {
            Reference::System | Reference::Tier(_) => state.system_quota,
            Reference::CapacityGroup(name) => {
                *state.capacity_groups.get(name).ok_or_else(|| {
                    EvictionError::eviction(
                        EvictionErrorCode::CapacityGroupNotFound,
                        format!("Capacity group not found: {}", name),
                    )
                })?
            }
            Reference::Job(job_id) => {
                state
                    .jobs
                    .get(job_id)
                    .ok_or_else(|| {
                        EvictionError::eviction(
                            EvictionErrorCode::JobNotFound,
                            format!("Job not found: {}", job_id),
                        )
                    })?
                    .quota
            }
            Reference::Task(task_id) => {
                let task = state
                    .tasks
                    .get(task_id)
                    .ok_or_else(|| EvictionError::task_not_found(task_id))?;
                state
                    .jobs
                    .get(&task.job_id)
                    .map(|job| job.quota)
                    .ok_or_else(|| {
                        EvictionError::internal(format!(
                            "task {} belongs to unknown job {}",
                            task_id, task.job_id
                        ))
                    })?
            }
        };
        Ok(quota_event(reference.clone(), quota))
    }

    /// Check every quota level and consume one unit from each on success.
    fn consume(state: &mut State, task_id: &str) -> Result<Vec<EvictionQuota>> {
        let task = state
            .tasks
            .get(task_id)
            .ok_or_else(|| EvictionError::task_not_found(task_id))?;
        if task.stopped {
            return Err(EvictionError::task_already_stopped(task_id));
        }
        let job_id = task.job_id.clone();
        let job = state.jobs.get(&job_id).ok_or_else(|| {
            EvictionError::internal(format!("task {} belongs to unknown job {}", task_id, job_id))
        })?;
        if job.quota <= 0 {
            return Err(EvictionError::no_quota(Reference::Job(job_id)));
        }
        let group = job.capacity_group.clone();
        if let Some(name) = &group {
            let available = state.capacity_groups.get(name).copied().unwrap_or(0);
            if available <= 0 {
                return Err(EvictionError::no_quota(Reference::CapacityGroup(name.clone())));
            }
        }
        if state.system_quota <= 0 {
            return Err(EvictionError::no_quota(Reference::System));
        }

        let mut updates = Vec::with_capacity(3);
        state.system_quota -= 1;
        updates.push(quota_event(Reference::System, state.system_quota));
        if let Some(name) = group {
            if let Some(quota) = state.capacity_groups.get_mut(&name) {
                *quota -= 1;
                updates.push(quota_event(Reference::CapacityGroup(name), *quota));
            }
        }
        if let Some(job) = state.jobs.get_mut(&job_id) {
            job.quota -= 1;
            updates.push(quota_event(Reference::Job(job_id), job.quota));
        }
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.stopped = true;
        }
        Ok(updates)
    }

    fn snapshot(state: &State) -> Vec<EvictionEvent> {
        let mut events = Vec::with_capacity(3 + state.capacity_groups.len() + state.jobs.len());
        events.push(EvictionEvent::SystemDisruptionBudgetUpdate(state.budget.clone()));
        events.push(EvictionEvent::EvictionQuotaUpdate(quota_event(
            Reference::System,
            state.system_quota,
        )));
        for (name, quota) in &state.capacity_groups {
            events.push(EvictionEvent::EvictionQuotaUpdate(quota_event(
                Reference::CapacityGroup(name.clone()),
                *quota,
            )));
        }
        for (job_id, job) in &state.jobs {
            events.push(EvictionEvent::EvictionQuotaUpdate(quota_event(
                Reference::Job(job_id.clone()),
                job.quota,
            )));
        }
        events.push(EvictionEvent::SnapshotEnd);
        events
    }
}

fn quota_event(reference: Reference, quota: i64) -> EvictionQuota {
    let message = if quota > 0 {
        String::new()
    } else {
        format!("Eviction quota exhausted for {}", reference)
    };
    EvictionQuota {
        reference,
        quota,
        message,
    }
}

#[async_trait::async_trait]
impl EvictionClient for LocalEvictionClient {
    async fn get_disruption_budget(&self, reference: Reference) -> Result<SystemDisruptionBudget> {
        match reference {
            Reference::System | Reference::Tier(_) => {
                let state = self.state.lock();
                Ok(SystemDisruptionBudget {
                    reference,
                    ..state.budget.clone()
                })
            }
            other => Err(EvictionError::invalid_argument(format!(
                "disruption budgets are only defined for system and tier references, got {}",
                other
            ))),
        }
    }

    async fn get_eviction_quota(&self, reference: Reference) -> Result<EvictionQuota> {
        let state = self.state.lock();
        Self::quota_of(&state, &reference)
    }

    async fn terminate_task(&self, task_id: String, reason: String) -> Result<()> {
        if task_id.is_empty() {
            return Err(EvictionError::invalid_argument("task id must not be empty"));
        }

        let mut state = self.state.lock();
        match Self::consume(&mut state, &task_id) {
            Ok(updates) => {
                tracing::debug!("Termination of task {} allowed ({})", task_id, reason);
                for update in updates {
                    self.publish(EvictionEvent::EvictionQuotaUpdate(update));
                }
                self.publish(EvictionEvent::TaskTermination {
                    task_id,
                    approved: true,
                    reason,
                });
                Ok(())
            }
            Err(e) => {
                tracing::debug!("Termination of task {} rejected: {}", task_id, e);
                self.publish(EvictionEvent::TaskTermination {
                    task_id,
                    approved: false,
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn observe_events(&self, include_snapshot: bool) -> EventStream {
        // Subscribe under the state lock so the snapshot and the live feed
        // neither overlap nor leave a gap.
        let state = self.state.lock();
        let rx = self.events.subscribe();
        let snapshot = if include_snapshot {
            Self::snapshot(&state)
        } else {
            Vec::new()
        };
        drop(state);

        let live = BroadcastStream::new(rx).map(|item| {
            item.map_err(|BroadcastStreamRecvError::Lagged(skipped)| EvictionError::Lagged {
                skipped,
            })
        });

        stream::iter(snapshot.into_iter().map(Ok)).chain(live).boxed()
    }
}
