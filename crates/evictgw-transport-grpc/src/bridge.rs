//! Bridge between a backend call and a response sink.
//!
//! A bridge owns one [`BackendCall`] and one [`ResponseSink`] for the lifetime
//! of a single RPC. It forwards values in backend order, drives the sink to
//! exactly one terminal state and releases the backend subscription on every
//! exit path:
//!
//! - backend completes: sink completes
//! - backend fails: the [`ErrorPolicy`] either fails the sink or emits a
//!   recovered response and completes
//! - client cancels or disconnects: backend dropped, nothing written
//! - subscription released by the server: sink fails with `Unavailable`
//!
//! All forwarding happens on one task, so writes to the sink are never
//! interleaved.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tonic::Status;

use crate::call::{BackendCall, CallMode};
use crate::policy::{ErrorDisposition, ErrorPolicy};
use crate::sink::ResponseSink;
use crate::subscription::Subscription;

/// How a bridged call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    /// Backend completed; sink completed.
    Completed,
    /// Backend failed and the error was recovered into a response.
    Recovered,
    /// Backend failed; sink failed.
    Failed,
    /// Client went away; nothing was written to the sink.
    Cancelled,
    /// Subscription was released from outside the bridge.
    Released,
}

enum Ended<E> {
    Completed,
    Failed(E),
    Cancelled,
    Released,
}

/// How long a released call waits for the client to accept `Unavailable`.
pub const RELEASE_GRACE: Duration = Duration::from_millis(250);

type Translator<T, R> = Box<dyn FnMut(T) -> R + Send>;

/// One bridged RPC.
pub struct Bridge<T, R, E> {
    operation: &'static str,
    call: BackendCall<T, E>,
    sink: Arc<ResponseSink<R>>,
    translate: Translator<T, R>,
    policy: ErrorPolicy<E, R>,
}

impl<T, R, E> Bridge<T, R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    /// Create a bridge.
    ///
    /// # Arguments
    /// - `operation`: RPC name, used for logging
    /// - `call`: backend call to subscribe to
    /// - `sink`: response sink for the RPC
    /// - `translate`: maps each backend value to a response
    /// - `policy`: decides what backend failures become
    pub fn new<F>(
        operation: &'static str,
        call: BackendCall<T, E>,
        sink: Arc<ResponseSink<R>>,
        translate: F,
        policy: ErrorPolicy<E, R>,
    ) -> Self
    where
        F: FnMut(T) -> R + Send + 'static,
    {
        Self {
            operation,
            call,
            sink,
            translate: Box::new(translate),
            policy,
        }
    }

    /// Run the bridge on its own task. The returned handle reports whether the
    /// backend subscription has been released and can release it early.
    pub fn spawn(self) -> Subscription {
        let subscription = Subscription::new();
        tokio::spawn(self.run(subscription.clone()));
        subscription
    }

    /// Drive the call to completion.
    pub async fn run(self, subscription: Subscription) -> BridgeOutcome {
        let Bridge {
            operation,
            call,
            sink,
            mut translate,
            policy,
        } = self;

        tracing::debug!("{}: subscribed to backend ({:?})", operation, call.mode());
        // Single and completion calls end with their first value.
        let single = call.mode() != CallMode::Stream;
        let mut values = call.into_values();
        let mut forwarded: u64 = 0;

        let ended = {
            // The one cancellation handler for this call.
            let client_gone = sink.cancelled();
            let released = subscription.released();
            tokio::pin!(client_gone, released);

            loop {
                tokio::select! {
                    biased;

                    _ = &mut client_gone => break Ended::Cancelled,
                    _ = &mut released => break Ended::Released,
                    next = values.next() => match next {
                        Some(Ok(value)) => {
                            // A full buffer must not hide a release.
                            tokio::select! {
                                biased;

                                _ = &mut released => break Ended::Released,
                                sent = sink.emit(translate(value)) => {
                                    if !sent {
                                        break Ended::Cancelled;
                                    }
                                }
                            }
                            forwarded += 1;
                            if single {
                                break Ended::Completed;
                            }
                        }
                        Some(Err(error)) => break Ended::Failed(error),
                        None => break Ended::Completed,
                    },
                }
            }
        };

        // Unsubscribe before signalling the client.
        drop(values);

        let outcome = match ended {
            Ended::Completed => {
                sink.complete();
                tracing::debug!("{}: completed after {} responses", operation, forwarded);
                BridgeOutcome::Completed
            }
            Ended::Failed(error) => {
                let disposition = policy.classify(&error);
                match disposition {
                    ErrorDisposition::Respond(response) => {
                        tracing::debug!("{}: recovered backend error: {}", operation, error);
                        tokio::select! {
                            biased;

                            sent = sink.emit(response) => {
                                if sent {
                                    sink.complete();
                                }
                                BridgeOutcome::Recovered
                            }
                            _ = subscription.released() => {
                                sink.fail_within(
                                    Status::unavailable("subscription released by server"),
                                    RELEASE_GRACE,
                                )
                                .await;
                                BridgeOutcome::Released
                            }
                        }
                    }
                    ErrorDisposition::Fail(status) => {
                        tracing::warn!(
                            "{}: backend call failed ({:?}): {}",
                            operation,
                            status.code(),
                            error
                        );
                        // The first poll of `fail` makes the transition; dropping
                        // its pending send on release ends the stream.
                        tokio::select! {
                            biased;

                            _ = sink.fail(status) => {}
                            _ = subscription.released() => {}
                        }
                        BridgeOutcome::Failed
                    }
                }
            }
            Ended::Cancelled => {
                sink.cancel();
                tracing::debug!("{}: client cancelled after {} responses", operation, forwarded);
                BridgeOutcome::Cancelled
            }
            Ended::Released => {
                sink.fail_within(
                    Status::unavailable("subscription released by server"),
                    RELEASE_GRACE,
                )
                .await;
                tracing::debug!("{}: subscription released by server", operation);
                BridgeOutcome::Released
            }
        };

        subscription.release();
        outcome
    }
}

impl<T, R, E> fmt::Debug for Bridge<T, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("operation", &self.operation)
            .field("call", &self.call)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{self, ResponseStream, SinkState};
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;
    use futures::Stream;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;
    use tonic::Code;

    /// Stream wrapper that records when the backend side is dropped.
    struct Tracked<S> {
        inner: S,
        dropped: Arc<AtomicBool>,
    }

    impl<S: Stream + Unpin> Stream for Tracked<S> {
        type Item = S::Item;

        fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<S::Item>> {
            Pin::new(&mut self.inner).poll_next(cx)
        }
    }

    impl<S> Drop for Tracked<S> {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    type Push = mpsc::UnboundedSender<Result<u32, String>>;

    /// A push-driven backend call plus a flag set when it is released.
    fn pushed_call() -> (Push, BackendCall<u32, String>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dropped = Arc::new(AtomicBool::new(false));
        let call = BackendCall::stream(Tracked {
            inner: UnboundedReceiverStream::new(rx),
            dropped: dropped.clone(),
        });
        (tx, call, dropped)
    }

    fn bridge(
        call: BackendCall<u32, String>,
        policy: ErrorPolicy<String, String>,
    ) -> (
        Bridge<u32, String, String>,
        Arc<ResponseSink<String>>,
        ResponseStream<String>,
    ) {
        let (sink, responses) = sink::channel(8);
        let sink = Arc::new(sink);
        let bridge = Bridge::new("Test", call, sink.clone(), |v: u32| format!("v{}", v), policy);
        (bridge, sink, responses)
    }

    #[tokio::test]
    async fn test_forwards_in_order_then_completes() {
        let (tx, call, dropped) = pushed_call();
        let (bridge, sink, mut responses) = bridge(call, ErrorPolicy::default());
        let subscription = Subscription::new();
        let task = tokio::spawn(bridge.run(subscription.clone()));

        for v in 1..=5 {
            tx.send(Ok(v)).unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(message) = responses.next().await {
            seen.push(message.unwrap());
        }
        assert_eq!(seen, vec!["v1", "v2", "v3", "v4", "v5"]);

        assert_eq!(task.await.unwrap(), BridgeOutcome::Completed);
        assert_eq!(sink.state(), SinkState::Completed);
        assert!(subscription.is_released());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_backend_failure_fails_sink() {
        let (tx, call, dropped) = pushed_call();
        let (bridge, sink, mut responses) = bridge(call, ErrorPolicy::default());
        let subscription = Subscription::new();
        let task = tokio::spawn(bridge.run(subscription.clone()));

        tx.send(Ok(1)).unwrap();
        tx.send(Err("backend exploded".to_string())).unwrap();
        // Never delivered: the call is already terminal
        let _ = tx.send(Ok(2));

        assert_eq!(responses.next().await.unwrap().unwrap(), "v1");
        let status = responses.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Internal);
        assert_eq!(status.message(), "backend exploded");
        assert!(responses.next().await.is_none());

        assert_eq!(task.await.unwrap(), BridgeOutcome::Failed);
        assert_eq!(sink.state(), SinkState::Failed);
        assert!(subscription.is_released());
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_recovered_error_completes_normally() {
        let policy = ErrorPolicy::default().recover_with(|e: &String| {
            e.starts_with("soft").then(|| format!("negative: {}", e))
        });
        let call = BackendCall::failed("soft rejection".to_string());
        let (bridge, sink, mut responses) = bridge(call, policy);
        let subscription = Subscription::new();

        assert_eq!(bridge.run(subscription.clone()).await, BridgeOutcome::Recovered);
        assert_eq!(
            responses.next().await.unwrap().unwrap(),
            "negative: soft rejection"
        );
        assert!(responses.next().await.is_none());
        assert_eq!(sink.state(), SinkState::Completed);
        assert!(subscription.is_released());
    }

    #[tokio::test]
    async fn test_unrecovered_error_still_fails() {
        let policy = ErrorPolicy::fail_with(|_: &String| Status::unavailable("down"))
            .recover_with(|e: &String| e.starts_with("soft").then(|| "never".to_string()));
        let call = BackendCall::failed("hard failure".to_string());
        let (bridge, sink, mut responses) = bridge(call, policy);

        assert_eq!(bridge.run(Subscription::new()).await, BridgeOutcome::Failed);
        let status = responses.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert_eq!(sink.state(), SinkState::Failed);
    }

    #[tokio::test]
    async fn test_client_cancel_after_n_values() {
        let (tx, call, dropped) = pushed_call();
        let (bridge, sink, mut responses) = bridge(call, ErrorPolicy::default());
        let subscription = Subscription::new();
        let task = tokio::spawn(bridge.run(subscription.clone()));

        tx.send(Ok(1)).unwrap();
        tx.send(Ok(2)).unwrap();
        assert_eq!(responses.next().await.unwrap().unwrap(), "v1");
        assert_eq!(responses.next().await.unwrap().unwrap(), "v2");

        // Client disconnects
        drop(responses);

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("bridge should observe cancellation")
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::Cancelled);

        // No terminal write from the cancellation path
        assert_eq!(sink.state(), SinkState::Cancelled);
        assert!(subscription.is_released());
        assert!(dropped.load(Ordering::SeqCst));

        // Backend is gone; later pushes go nowhere
        assert!(tx.send(Ok(3)).is_err());

        // Terminal signals after cancellation are no-ops
        assert!(!sink.complete());
        assert!(!sink.fail(Status::internal("late")).await);
    }

    #[tokio::test]
    async fn test_release_from_server_fails_sink() {
        let (_tx, call, dropped) = pushed_call();
        let (bridge, sink, mut responses) = bridge(call, ErrorPolicy::default());
        let subscription = bridge.spawn();

        assert!(subscription.release());

        let status = tokio::time::timeout(Duration::from_secs(1), responses.next())
            .await
            .expect("release should end the stream")
            .unwrap()
            .unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert!(responses.next().await.is_none());
        assert_eq!(sink.state(), SinkState::Failed);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_release_while_client_is_slow() {
        let (tx, call, dropped) = pushed_call();
        let (sink, mut responses) = sink::channel(1);
        let sink = Arc::new(sink);
        let bridge = Bridge::new("Slow", call, sink.clone(), |v: u32| v, ErrorPolicy::default());
        let subscription = Subscription::new();
        let task = tokio::spawn(bridge.run(subscription.clone()));

        for v in 1..=3 {
            tx.send(Ok(v)).unwrap();
        }
        // Buffer holds 1; the bridge is now blocked sending 2
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(subscription.release());

        assert_eq!(responses.next().await.unwrap().unwrap(), 1);
        let status = responses.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), Code::Unavailable);
        assert!(responses.next().await.is_none());

        assert_eq!(task.await.unwrap(), BridgeOutcome::Released);
        assert_eq!(sink.state(), SinkState::Failed);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_release_with_stalled_client_finishes() {
        let (tx, call, dropped) = pushed_call();
        let (sink, _responses) = sink::channel(1);
        let sink = Arc::new(sink);
        let bridge = Bridge::new("Stalled", call, sink.clone(), |v: u32| v, ErrorPolicy::default());
        let subscription = Subscription::new();
        let task = tokio::spawn(bridge.run(subscription.clone()));

        // The client stays connected but never reads
        tx.send(Ok(1)).unwrap();
        tx.send(Ok(2)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(subscription.release());

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("release must not wait on a stalled client")
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::Released);
        assert_eq!(sink.state(), SinkState::Failed);
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_release_interrupts_stalled_failure() {
        let (tx, call, _dropped) = pushed_call();
        let (sink, _responses) = sink::channel(1);
        let sink = Arc::new(sink);
        let bridge = Bridge::new("Stalled", call, sink.clone(), |v: u32| v, ErrorPolicy::default());
        let subscription = Subscription::new();
        let task = tokio::spawn(bridge.run(subscription.clone()));

        // Buffer fills, then the backend fails with nobody reading
        tx.send(Ok(1)).unwrap();
        tx.send(Err("backend exploded".to_string())).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!task.is_finished());
        assert!(subscription.release());

        let outcome = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("release must end a pending failure")
            .unwrap();
        assert_eq!(outcome, BridgeOutcome::Failed);
        assert_eq!(sink.state(), SinkState::Failed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_unary_success_is_recorded_as_completed() {
        for i in 0..300u32 {
            let (sink, responses) = sink::channel(1);
            let sink = Arc::new(sink);
            let call: BackendCall<u32, String> = BackendCall::single(async move { Ok(i) });
            let bridge = Bridge::new("Unary", call, sink.clone(), |v: u32| v, ErrorPolicy::default());
            let task = tokio::spawn(bridge.run(Subscription::new()));

            // Reading the one response drops the stream at once
            assert_eq!(responses.into_unary().await.unwrap(), i);
            assert_eq!(task.await.unwrap(), BridgeOutcome::Completed);
            assert_eq!(sink.state(), SinkState::Completed);
        }
    }

    #[tokio::test]
    async fn test_completion_call_translates_unit() {
        let (sink, responses) = sink::channel(1);
        let sink = Arc::new(sink);
        let call: BackendCall<(), String> = BackendCall::completion(async { Ok(()) });
        let bridge = Bridge::new("Ack", call, sink.clone(), |()| "ack", ErrorPolicy::default());

        assert_eq!(bridge.run(Subscription::new()).await, BridgeOutcome::Completed);
        assert_eq!(responses.into_unary().await.unwrap(), "ack");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_completion_racing_cancellation_terminates_once() {
        for _ in 0..200 {
            let (tx, call, dropped) = pushed_call();
            let (bridge, sink, responses) = bridge(call, ErrorPolicy::default());
            let subscription = Subscription::new();
            let task = tokio::spawn(bridge.run(subscription.clone()));

            // Backend completion and client disconnect from different tasks
            let completer = tokio::spawn(async move { drop(tx) });
            let canceller = tokio::spawn(async move { drop(responses) });
            completer.await.unwrap();
            canceller.await.unwrap();

            let outcome = task.await.unwrap();
            assert!(
                matches!(outcome, BridgeOutcome::Completed | BridgeOutcome::Cancelled),
                "unexpected outcome {:?}",
                outcome
            );
            assert!(sink.state().is_terminal());
            assert!(!sink.complete());
            assert!(!sink.fail(Status::internal("late")).await);
            assert!(!sink.cancel());
            assert!(subscription.is_released());
            assert!(!subscription.release());
            assert!(dropped.load(Ordering::SeqCst));
        }
    }
}
