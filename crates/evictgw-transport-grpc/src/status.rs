//! Mapping between [`EvictionError`] and gRPC [`Status`].

use evictgw_core::{EvictionError, EvictionErrorCode};
use tonic::metadata::MetadataValue;
use tonic::{Code, Status};

/// Metadata key carrying the eviction error code on failed calls.
pub const ERROR_CODE_METADATA: &str = "x-eviction-error-code";

/// Default upper bound for client-visible status messages, in bytes.
pub const DEFAULT_MAX_STATUS_MESSAGE_LEN: usize = 512;

/// Truncate `message` to at most `max_len` bytes on a char boundary.
pub fn bounded_message(message: &str, max_len: usize) -> String {
    if message.len() <= max_len {
        return message.to_string();
    }
    let mut end = max_len;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

fn code_for(error: &EvictionError) -> Code {
    match error {
        EvictionError::Eviction { code, .. } => match code {
            EvictionErrorCode::BadConfiguration => Code::InvalidArgument,
            EvictionErrorCode::CapacityGroupNotFound
            | EvictionErrorCode::JobNotFound
            | EvictionErrorCode::TaskNotFound => Code::NotFound,
            EvictionErrorCode::NoQuota => Code::ResourceExhausted,
            EvictionErrorCode::TaskNotScheduledYet | EvictionErrorCode::TaskAlreadyStopped => {
                Code::FailedPrecondition
            }
            EvictionErrorCode::Unknown => Code::Unknown,
        },
        EvictionError::InvalidArgument { .. } => Code::InvalidArgument,
        EvictionError::Unavailable { .. } => Code::Unavailable,
        EvictionError::Timeout { .. } => Code::DeadlineExceeded,
        EvictionError::Lagged { .. } => Code::Aborted,
        EvictionError::Internal { .. } => Code::Internal,
    }
}

/// Map a backend error to the status sent to the client.
///
/// Eviction errors carry their code in [`ERROR_CODE_METADATA`].
pub fn eviction_status(error: &EvictionError, max_message_len: usize) -> Status {
    let mut status = Status::new(
        code_for(error),
        bounded_message(&error.to_string(), max_message_len),
    );
    if let Some(code) = error.code() {
        status
            .metadata_mut()
            .insert(ERROR_CODE_METADATA, MetadataValue::from_static(code.as_str()));
    }
    status
}

/// Reconstruct a backend error from a status returned by an upstream service.
pub fn eviction_error_from_status(status: &Status) -> EvictionError {
    let message = status.message().to_string();

    if let Some(code) = status
        .metadata()
        .get(ERROR_CODE_METADATA)
        .and_then(|value| value.to_str().ok())
    {
        return EvictionError::Eviction {
            code: EvictionErrorCode::parse(code),
            message,
        };
    }

    match status.code() {
        Code::InvalidArgument => EvictionError::InvalidArgument { reason: message },
        Code::Unavailable | Code::DeadlineExceeded | Code::Cancelled => {
            EvictionError::Unavailable { reason: message }
        }
        Code::NotFound | Code::ResourceExhausted | Code::FailedPrecondition => {
            EvictionError::Eviction {
                code: EvictionErrorCode::Unknown,
                message,
            }
        }
        other => EvictionError::Internal {
            reason: format!("upstream returned {:?}: {}", other, message),
        },
    }
}
