//! Error policies: how a bridge turns a backend failure into a terminal signal.
//!
//! The bridge itself is domain-agnostic. Each entry point passes an
//! [`ErrorPolicy`] that decides whether a failure fails the RPC (and with which
//! status) or is recovered into a successful response.

use std::fmt;
use std::sync::Arc;

use tonic::Status;

use crate::status::{bounded_message, DEFAULT_MAX_STATUS_MESSAGE_LEN};

/// What to do with a backend failure.
#[derive(Debug)]
pub enum ErrorDisposition<R> {
    /// Emit this response, then complete normally.
    Respond(R),
    /// Fail the RPC with this status.
    Fail(Status),
}

type StatusFn<E> = Arc<dyn Fn(&E) -> Status + Send + Sync>;
type RecoverFn<E, R> = Arc<dyn Fn(&E) -> Option<R> + Send + Sync>;

/// Declarative mapping from backend errors to terminal signals.
pub struct ErrorPolicy<E, R> {
    status: StatusFn<E>,
    recover: Option<RecoverFn<E, R>>,
}

impl<E, R> ErrorPolicy<E, R> {
    /// Fail every error with the status produced by `status`.
    pub fn fail_with<F>(status: F) -> Self
    where
        F: Fn(&E) -> Status + Send + Sync + 'static,
    {
        Self {
            status: Arc::new(status),
            recover: None,
        }
    }

    /// Recover errors for which `recover` returns a response. Everything else
    /// still fails.
    pub fn recover_with<F>(mut self, recover: F) -> Self
    where
        F: Fn(&E) -> Option<R> + Send + Sync + 'static,
    {
        self.recover = Some(Arc::new(recover));
        self
    }

    pub fn classify(&self, error: &E) -> ErrorDisposition<R> {
        if let Some(recover) = &self.recover {
            if let Some(response) = recover(error) {
                return ErrorDisposition::Respond(response);
            }
        }
        ErrorDisposition::Fail((self.status)(error))
    }
}

impl<E: fmt::Display, R> Default for ErrorPolicy<E, R> {
    /// Every error becomes `Internal` with a bounded message.
    fn default() -> Self {
        Self::fail_with(|error: &E| {
            Status::internal(bounded_message(
                &error.to_string(),
                DEFAULT_MAX_STATUS_MESSAGE_LEN,
            ))
        })
    }
}

impl<E, R> Clone for ErrorPolicy<E, R> {
    fn clone(&self) -> Self {
        Self {
            status: self.status.clone(),
            recover: self.recover.clone(),
        }
    }
}

impl<E, R> fmt::Debug for ErrorPolicy<E, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorPolicy")
            .field("recovers", &self.recover.is_some())
            .finish()
    }
}
