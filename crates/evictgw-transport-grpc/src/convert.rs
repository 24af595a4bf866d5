//! Translation between wire messages and domain values.
//!
//! `*_to_proto` functions are total. `*_from_proto` functions reject messages
//! with missing required fields or unknown enum values as
//! [`EvictionError::InvalidArgument`].

use evictgw_core::{
    Day, EvictionError, EvictionEvent, EvictionQuota, HourlyTimeWindow, Reference,
    SystemDisruptionBudget, Tier, TimeWindow, TokenBucketDescriptor,
};

use crate::proto::{self, eviction_service_event::Event, reference::Reference as WireReference};

type Result<T> = std::result::Result<T, EvictionError>;

pub fn tier_to_proto(tier: Tier) -> proto::Tier {
    match tier {
        Tier::Flex => proto::Tier::Flex,
        Tier::Critical => proto::Tier::Critical,
    }
}

pub fn tier_from_proto(value: i32) -> Result<Tier> {
    match proto::Tier::try_from(value) {
        Ok(proto::Tier::Flex) => Ok(Tier::Flex),
        Ok(proto::Tier::Critical) => Ok(Tier::Critical),
        _ => Err(EvictionError::invalid_argument(format!(
            "unknown tier: {}",
            value
        ))),
    }
}

fn day_to_proto(day: Day) -> proto::Day {
    match day {
        Day::Monday => proto::Day::Monday,
        Day::Tuesday => proto::Day::Tuesday,
        Day::Wednesday => proto::Day::Wednesday,
        Day::Thursday => proto::Day::Thursday,
        Day::Friday => proto::Day::Friday,
        Day::Saturday => proto::Day::Saturday,
        Day::Sunday => proto::Day::Sunday,
    }
}

fn day_from_proto(value: i32) -> Result<Day> {
    let day = match proto::Day::try_from(value) {
        Ok(proto::Day::Monday) => Day::Monday,
        Ok(proto::Day::Tuesday) => Day::Tuesday,
        Ok(proto::Day::Wednesday) => Day::Wednesday,
        Ok(proto::Day::Thursday) => Day::Thursday,
        Ok(proto::Day::Friday) => Day::Friday,
        Ok(proto::Day::Saturday) => Day::Saturday,
        Ok(proto::Day::Sunday) => Day::Sunday,
        _ => {
            return Err(EvictionError::invalid_argument(format!(
                "unknown day: {}",
                value
            )))
        }
    };
    Ok(day)
}

pub fn reference_to_proto(reference: &Reference) -> proto::Reference {
    let wire = match reference {
        Reference::System => WireReference::System(proto::SystemReference {}),
        Reference::Tier(tier) => WireReference::Tier(tier_to_proto(*tier) as i32),
        Reference::CapacityGroup(name) => WireReference::CapacityGroup(name.clone()),
        Reference::Job(id) => WireReference::JobId(id.clone()),
        Reference::Task(id) => WireReference::TaskId(id.clone()),
    };
    proto::Reference {
        reference: Some(wire),
    }
}

/// Decode a reference. Named references must carry a non-empty name.
pub fn reference_from_proto(reference: &proto::Reference) -> Result<Reference> {
    fn named(kind: &str, name: &str) -> Result<String> {
        if name.is_empty() {
            return Err(EvictionError::invalid_argument(format!(
                "{} reference requires a name",
                kind
            )));
        }
        Ok(name.to_string())
    }

    match &reference.reference {
        Some(WireReference::System(_)) => Ok(Reference::System),
        Some(WireReference::Tier(tier)) => Ok(Reference::Tier(tier_from_proto(*tier)?)),
        Some(WireReference::CapacityGroup(name)) => {
            Ok(Reference::CapacityGroup(named("capacity group", name)?))
        }
        Some(WireReference::JobId(id)) => Ok(Reference::Job(named("job", id)?)),
        Some(WireReference::TaskId(id)) => Ok(Reference::Task(named("task", id)?)),
        None => Err(EvictionError::invalid_argument("reference is not set")),
    }
}

fn time_window_to_proto(window: &TimeWindow) -> proto::TimeWindow {
    proto::TimeWindow {
        days: window.days.iter().map(|d| day_to_proto(*d) as i32).collect(),
        hourly_time_windows: window
            .hourly_time_windows
            .iter()
            .map(|w| proto::HourlyTimeWindow {
                start_hour: w.start_hour,
                end_hour: w.end_hour,
            })
            .collect(),
        time_zone: window.time_zone.clone(),
    }
}

fn time_window_from_proto(window: &proto::TimeWindow) -> Result<TimeWindow> {
    let days = window
        .days
        .iter()
        .map(|d| day_from_proto(*d))
        .collect::<Result<Vec<_>>>()?;

    let mut hourly_time_windows = Vec::with_capacity(window.hourly_time_windows.len());
    for w in &window.hourly_time_windows {
        if w.start_hour > 24 || w.end_hour > 24 {
            return Err(EvictionError::invalid_argument(format!(
                "hourly window out of range: {}-{}",
                w.start_hour, w.end_hour
            )));
        }
        hourly_time_windows.push(HourlyTimeWindow {
            start_hour: w.start_hour,
            end_hour: w.end_hour,
        });
    }

    Ok(TimeWindow {
        days,
        hourly_time_windows,
        time_zone: window.time_zone.clone(),
    })
}

pub fn budget_to_proto(budget: &SystemDisruptionBudget) -> proto::SystemDisruptionBudget {
    proto::SystemDisruptionBudget {
        reference: Some(reference_to_proto(&budget.reference)),
        token_bucket_descriptor: Some(proto::TokenBucketDescriptor {
            capacity: budget.token_bucket.capacity,
            refill_rate_per_second: budget.token_bucket.refill_rate_per_second,
        }),
        time_windows: budget.time_windows.iter().map(time_window_to_proto).collect(),
    }
}

pub fn budget_from_proto(budget: &proto::SystemDisruptionBudget) -> Result<SystemDisruptionBudget> {
    let reference = budget
        .reference
        .as_ref()
        .ok_or_else(|| EvictionError::invalid_argument("budget reference is not set"))?;
    let bucket = budget
        .token_bucket_descriptor
        .as_ref()
        .ok_or_else(|| EvictionError::invalid_argument("budget token bucket is not set"))?;

    Ok(SystemDisruptionBudget {
        reference: reference_from_proto(reference)?,
        token_bucket: TokenBucketDescriptor {
            capacity: bucket.capacity,
            refill_rate_per_second: bucket.refill_rate_per_second,
        },
        time_windows: budget
            .time_windows
            .iter()
            .map(time_window_from_proto)
            .collect::<Result<Vec<_>>>()?,
    })
}

pub fn quota_to_proto(quota: &EvictionQuota) -> proto::EvictionQuota {
    proto::EvictionQuota {
        target: Some(reference_to_proto(&quota.reference)),
        quota: quota.quota,
        message: quota.message.clone(),
    }
}

pub fn quota_from_proto(quota: &proto::EvictionQuota) -> Result<EvictionQuota> {
    let target = quota
        .target
        .as_ref()
        .ok_or_else(|| EvictionError::invalid_argument("quota target is not set"))?;
    Ok(EvictionQuota {
        reference: reference_from_proto(target)?,
        quota: quota.quota,
        message: quota.message.clone(),
    })
}

pub fn event_to_proto(event: &EvictionEvent) -> proto::EvictionServiceEvent {
    let wire = match event {
        EvictionEvent::SnapshotEnd => Event::SnapshotEnd(proto::SnapshotEnd {}),
        EvictionEvent::SystemDisruptionBudgetUpdate(budget) => {
            Event::SystemDisruptionBudgetUpdateEvent(proto::SystemDisruptionBudgetUpdateEvent {
                current: Some(budget_to_proto(budget)),
            })
        }
        EvictionEvent::EvictionQuotaUpdate(quota) => {
            Event::EvictionQuotaEvent(proto::EvictionQuotaEvent {
                quota: Some(quota_to_proto(quota)),
            })
        }
        EvictionEvent::TaskTermination {
            task_id,
            approved,
            reason,
        } => Event::TaskTerminationEvent(proto::TaskTerminationEvent {
            task_id: task_id.clone(),
            approved: *approved,
            reason: reason.clone(),
        }),
    };
    proto::EvictionServiceEvent { event: Some(wire) }
}

pub fn event_from_proto(event: &proto::EvictionServiceEvent) -> Result<EvictionEvent> {
    match &event.event {
        Some(Event::SnapshotEnd(_)) => Ok(EvictionEvent::SnapshotEnd),
        Some(Event::SystemDisruptionBudgetUpdateEvent(update)) => {
            let current = update
                .current
                .as_ref()
                .ok_or_else(|| EvictionError::invalid_argument("budget update is empty"))?;
            Ok(EvictionEvent::SystemDisruptionBudgetUpdate(
                budget_from_proto(current)?,
            ))
        }
        Some(Event::EvictionQuotaEvent(update)) => {
            let quota = update
                .quota
                .as_ref()
                .ok_or_else(|| EvictionError::invalid_argument("quota update is empty"))?;
            Ok(EvictionEvent::EvictionQuotaUpdate(quota_from_proto(quota)?))
        }
        Some(Event::TaskTerminationEvent(termination)) => Ok(EvictionEvent::TaskTermination {
            task_id: termination.task_id.clone(),
            approved: termination.approved,
            reason: termination.reason.clone(),
        }),
        None => Err(EvictionError::invalid_argument("event is not set")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_budget() -> SystemDisruptionBudget {
        SystemDisruptionBudget {
            reference: Reference::Tier(Tier::Critical),
            token_bucket: TokenBucketDescriptor {
                capacity: 50,
                refill_rate_per_second: 2,
            },
            time_windows: vec![TimeWindow {
                days: vec![Day::Monday, Day::Friday],
                hourly_time_windows: vec![HourlyTimeWindow {
                    start_hour: 9,
                    end_hour: 17,
                }],
                time_zone: "UTC".to_string(),
            }],
        }
    }

    #[test]
    fn test_reference_conversion() {
        let references = [
            Reference::System,
            Reference::Tier(Tier::Flex),
            Reference::CapacityGroup("batch".to_string()),
            Reference::Job("job-1".to_string()),
            Reference::Task("task-1".to_string()),
        ];
        for reference in references {
            let wire = reference_to_proto(&reference);
            assert_eq!(reference_from_proto(&wire).unwrap(), reference);
        }
    }

    #[test]
    fn test_invalid_references_rejected() {
        let unset = proto::Reference { reference: None };
        assert!(matches!(
            reference_from_proto(&unset),
            Err(EvictionError::InvalidArgument { .. })
        ));

        let unspecified_tier = proto::Reference {
            reference: Some(WireReference::Tier(proto::Tier::Unspecified as i32)),
        };
        assert!(reference_from_proto(&unspecified_tier).is_err());

        let unknown_tier = proto::Reference {
            reference: Some(WireReference::Tier(42)),
        };
        assert!(reference_from_proto(&unknown_tier).is_err());

        let empty_job = proto::Reference {
            reference: Some(WireReference::JobId(String::new())),
        };
        assert!(reference_from_proto(&empty_job).is_err());
    }

    #[test]
    fn test_budget_conversion() {
        let budget = sample_budget();
        let wire = budget_to_proto(&budget);
        assert_eq!(wire.time_windows[0].days, vec![1, 5]);
        assert_eq!(budget_from_proto(&wire).unwrap(), budget);
    }

    #[test]
    fn test_budget_missing_bucket_rejected() {
        let mut wire = budget_to_proto(&sample_budget());
        wire.token_bucket_descriptor = None;
        assert!(budget_from_proto(&wire).is_err());
    }

    #[test]
    fn test_bad_hour_rejected() {
        let mut wire = budget_to_proto(&sample_budget());
        wire.time_windows[0].hourly_time_windows[0].end_hour = 25;
        assert!(budget_from_proto(&wire).is_err());
    }

    #[test]
    fn test_event_conversion() {
        let events = [
            EvictionEvent::SnapshotEnd,
            EvictionEvent::SystemDisruptionBudgetUpdate(sample_budget()),
            EvictionEvent::EvictionQuotaUpdate(EvictionQuota {
                reference: Reference::Job("job-1".to_string()),
                quota: 3,
                message: String::new(),
            }),
            EvictionEvent::TaskTermination {
                task_id: "task-1".to_string(),
                approved: false,
                reason: "No eviction quota available for job/job-1".to_string(),
            },
        ];
        for event in events {
            let wire = event_to_proto(&event);
            assert_eq!(event_from_proto(&wire).unwrap(), event);
        }

        let empty = proto::EvictionServiceEvent { event: None };
        assert!(event_from_proto(&empty).is_err());
    }
}
