//! Backend call abstraction.
//!
//! A [`BackendCall`] is one outbound backend operation, normalized to a stream
//! of `Result<T, E>` so the bridge can treat every cardinality the same way.
//! Dropping the call drops the underlying future or stream, which is how the
//! backend is unsubscribed.

use std::fmt;
use std::future::Future;

use futures::future;
use futures::stream::{self, BoxStream, Stream, StreamExt};

/// Cardinality of a backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallMode {
    /// Zero or one value, then completion.
    Single,
    /// Any number of values, then completion.
    Stream,
    /// No value; only completion or failure.
    Completion,
}

/// One in-flight backend operation. Not reusable.
pub struct BackendCall<T, E> {
    mode: CallMode,
    values: BoxStream<'static, Result<T, E>>,
}

impl<T, E> BackendCall<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// Wrap a future that resolves to one value.
    pub fn single<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, E>> + Send + 'static,
    {
        Self {
            mode: CallMode::Single,
            values: stream::once(future).boxed(),
        }
    }

    /// Wrap a stream of values.
    pub fn stream<S>(values: S) -> Self
    where
        S: Stream<Item = Result<T, E>> + Send + 'static,
    {
        Self {
            mode: CallMode::Stream,
            values: values.boxed(),
        }
    }

    /// A call that fails immediately.
    pub fn failed(error: E) -> Self {
        Self {
            mode: CallMode::Single,
            values: stream::once(future::ready(Err(error))).boxed(),
        }
    }

    pub fn mode(&self) -> CallMode {
        self.mode
    }

    pub(crate) fn into_values(self) -> BoxStream<'static, Result<T, E>> {
        self.values
    }
}

impl<E> BackendCall<(), E>
where
    E: Send + 'static,
{
    /// Wrap a value-less future. Successful completion is surfaced to the
    /// bridge as a single `()` so the entry point can acknowledge it.
    pub fn completion<F>(future: F) -> Self
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        Self {
            mode: CallMode::Completion,
            values: stream::once(future).boxed(),
        }
    }
}

impl<T, E> fmt::Debug for BackendCall<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCall")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_yields_one_value() {
        let call: BackendCall<u32, String> = BackendCall::single(async { Ok(7) });
        assert_eq!(call.mode(), CallMode::Single);

        let values: Vec<_> = call.into_values().collect().await;
        assert_eq!(values, vec![Ok(7)]);
    }

    #[tokio::test]
    async fn test_completion_yields_unit() {
        let call: BackendCall<(), String> = BackendCall::completion(async { Ok(()) });
        assert_eq!(call.mode(), CallMode::Completion);

        let values: Vec<_> = call.into_values().collect().await;
        assert_eq!(values, vec![Ok(())]);
    }

    #[tokio::test]
    async fn test_stream_preserves_order() {
        let call: BackendCall<u32, String> =
            BackendCall::stream(stream::iter(vec![Ok(1), Ok(2), Err("boom".to_string())]));
        assert_eq!(call.mode(), CallMode::Stream);

        let values: Vec<_> = call.into_values().collect().await;
        assert_eq!(values, vec![Ok(1), Ok(2), Err("boom".to_string())]);
    }

    #[tokio::test]
    async fn test_failed() {
        let call: BackendCall<u32, &'static str> = BackendCall::failed("nope");
        let values: Vec<_> = call.into_values().collect().await;
        assert_eq!(values, vec![Err("nope")]);
    }
}
