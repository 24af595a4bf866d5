//! Eviction error types.

use std::fmt;

use thiserror::Error;

/// Classification of a recoverable eviction failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EvictionErrorCode {
    BadConfiguration,
    CapacityGroupNotFound,
    JobNotFound,
    NoQuota,
    TaskNotFound,
    TaskNotScheduledYet,
    TaskAlreadyStopped,
    Unknown,
}

impl EvictionErrorCode {
    /// Stable wire form, e.g. `NO_QUOTA`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionErrorCode::BadConfiguration => "BAD_CONFIGURATION",
            EvictionErrorCode::CapacityGroupNotFound => "CAPACITY_GROUP_NOT_FOUND",
            EvictionErrorCode::JobNotFound => "JOB_NOT_FOUND",
            EvictionErrorCode::NoQuota => "NO_QUOTA",
            EvictionErrorCode::TaskNotFound => "TASK_NOT_FOUND",
            EvictionErrorCode::TaskNotScheduledYet => "TASK_NOT_SCHEDULED_YET",
            EvictionErrorCode::TaskAlreadyStopped => "TASK_ALREADY_STOPPED",
            EvictionErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Parse the wire form. Unrecognized codes map to `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s {
            "BAD_CONFIGURATION" => EvictionErrorCode::BadConfiguration,
            "CAPACITY_GROUP_NOT_FOUND" => EvictionErrorCode::CapacityGroupNotFound,
            "JOB_NOT_FOUND" => EvictionErrorCode::JobNotFound,
            "NO_QUOTA" => EvictionErrorCode::NoQuota,
            "TASK_NOT_FOUND" => EvictionErrorCode::TaskNotFound,
            "TASK_NOT_SCHEDULED_YET" => EvictionErrorCode::TaskNotScheduledYet,
            "TASK_ALREADY_STOPPED" => EvictionErrorCode::TaskAlreadyStopped,
            _ => EvictionErrorCode::Unknown,
        }
    }
}

impl fmt::Display for EvictionErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by eviction backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvictionError {
    /// Expected, policy-level rejection.
    #[error("{message}")]
    Eviction {
        code: EvictionErrorCode,
        message: String,
    },

    /// Request could not be interpreted.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Backend could not be reached.
    #[error("Backend unavailable: {reason}")]
    Unavailable { reason: String },

    /// Backend did not answer in time.
    #[error("Backend call timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    /// Event subscriber fell behind and events were dropped.
    #[error("Event stream lagged, {skipped} events dropped")]
    Lagged { skipped: u64 },

    /// Internal error (bug or unexpected backend state).
    #[error("Internal error: {reason}")]
    Internal { reason: String },
}

impl EvictionError {
    pub fn eviction(code: EvictionErrorCode, message: impl Into<String>) -> Self {
        EvictionError::Eviction {
            code,
            message: message.into(),
        }
    }

    pub fn no_quota(reference: impl fmt::Display) -> Self {
        Self::eviction(
            EvictionErrorCode::NoQuota,
            format!("No eviction quota available for {}", reference),
        )
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::eviction(
            EvictionErrorCode::TaskNotFound,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn task_already_stopped(task_id: &str) -> Self {
        Self::eviction(
            EvictionErrorCode::TaskAlreadyStopped,
            format!("Task already stopped: {}", task_id),
        )
    }

    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        EvictionError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        EvictionError::Internal {
            reason: reason.into(),
        }
    }

    /// True for recoverable, policy-level eviction errors.
    pub fn is_eviction(&self) -> bool {
        matches!(self, EvictionError::Eviction { .. })
    }

    /// The eviction code, if this is a policy-level error.
    pub fn code(&self) -> Option<EvictionErrorCode> {
        match self {
            EvictionError::Eviction { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Eviction result type.
pub type Result<T> = std::result::Result<T, EvictionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in [
            EvictionErrorCode::BadConfiguration,
            EvictionErrorCode::CapacityGroupNotFound,
            EvictionErrorCode::JobNotFound,
            EvictionErrorCode::NoQuota,
            EvictionErrorCode::TaskNotFound,
            EvictionErrorCode::TaskNotScheduledYet,
            EvictionErrorCode::TaskAlreadyStopped,
            EvictionErrorCode::Unknown,
        ] {
            assert_eq!(EvictionErrorCode::parse(code.as_str()), code);
        }
        assert_eq!(EvictionErrorCode::parse("bogus"), EvictionErrorCode::Unknown);
    }

    #[test]
    fn test_eviction_display_is_message() {
        let err = EvictionError::task_not_found("t-1");
        assert_eq!(err.to_string(), "Task not found: t-1");
        assert!(err.is_eviction());
        assert_eq!(err.code(), Some(EvictionErrorCode::TaskNotFound));
    }

    #[test]
    fn test_infrastructure_errors_have_no_code() {
        let err = EvictionError::Timeout { elapsed_ms: 10 };
        assert!(!err.is_eviction());
        assert_eq!(err.code(), None);
    }
}
