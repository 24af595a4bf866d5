//! Response sink: the transport-side half of a bridged RPC.
//!
//! [`channel`] returns a [`ResponseSink`] the bridge writes to and a
//! [`ResponseStream`] tonic reads from. The sink leaves the open state exactly
//! once; writes after that are dropped.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;

/// Lifecycle of a [`ResponseSink`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    /// Completed normally.
    Completed,
    /// Failed with a status.
    Failed,
    /// The transport went away before a terminal signal was written.
    Cancelled,
}

impl SinkState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SinkState::Open)
    }
}

type Message<R> = Result<R, Status>;

/// Create a sink and the response stream it feeds.
///
/// `capacity` bounds the number of responses buffered ahead of the client.
pub fn channel<R>(capacity: usize) -> (ResponseSink<R>, ResponseStream<R>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = ResponseSink {
        inner: Mutex::new(SinkInner {
            state: SinkState::Open,
            tx: Some(tx),
        }),
    };
    (sink, ResponseStream::new(rx))
}

struct SinkInner<R> {
    state: SinkState,
    tx: Option<mpsc::Sender<Message<R>>>,
}

/// Write side of a bridged RPC.
pub struct ResponseSink<R> {
    inner: Mutex<SinkInner<R>>,
}

impl<R: Send + 'static> ResponseSink<R> {
    pub fn state(&self) -> SinkState {
        self.inner.lock().state
    }

    /// Forward one response. Returns `false` if the sink is terminal or the
    /// client has gone away (in which case the sink becomes cancelled).
    pub async fn emit(&self, value: R) -> bool {
        let tx = {
            let inner = self.inner.lock();
            match (&inner.state, &inner.tx) {
                (SinkState::Open, Some(tx)) => tx.clone(),
                _ => return false,
            }
        };

        if tx.send(Ok(value)).await.is_err() {
            self.cancel();
            return false;
        }
        true
    }

    /// Signal normal completion. Returns `true` only if this call performed
    /// the terminal transition.
    pub fn complete(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = SinkState::Completed;
        // Dropping the sender ends the response stream.
        inner.tx = None;
        true
    }

    /// Signal failure. Returns `true` only if this call performed the
    /// terminal transition.
    pub async fn fail(&self, status: Status) -> bool {
        let Some(tx) = self.begin_failure() else {
            return false;
        };
        // The client may already be gone; the transition still stands.
        let _ = tx.send(Err(status)).await;
        true
    }

    /// Like [`fail`](Self::fail), but waits at most `grace` for buffer space.
    /// A client that stopped reading gets the end of the stream without the
    /// status.
    pub async fn fail_within(&self, status: Status, grace: Duration) -> bool {
        let Some(tx) = self.begin_failure() else {
            return false;
        };
        if tokio::time::timeout(grace, tx.send(Err(status))).await.is_err() {
            tracing::debug!("client not reading; dropping failure status after {:?}", grace);
        }
        true
    }

    /// Take the sender for a failure, or `None` if already terminal.
    fn begin_failure(&self) -> Option<mpsc::Sender<Message<R>>> {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return None;
        }
        inner.state = SinkState::Failed;
        inner.tx.take()
    }

    /// Mark the sink cancelled without writing anything to the transport.
    pub fn cancel(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.state = SinkState::Cancelled;
        inner.tx = None;
        true
    }

    /// True once the reading side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner
            .lock()
            .tx
            .as_ref()
            .map_or(true, |tx| tx.is_closed())
    }

    /// Resolves when the client cancels or disconnects.
    ///
    /// Resolves immediately if the sink is already terminal.
    pub fn cancelled(&self) -> impl Future<Output = ()> + Send + 'static {
        let tx = self.inner.lock().tx.clone();
        async move {
            if let Some(tx) = tx {
                tx.closed().await;
            }
        }
    }
}

/// Read side of a bridged RPC, handed to tonic as the response body.
///
/// Dropping it is how tonic reports a cancelled or disconnected client.
pub struct ResponseStream<R> {
    inner: ReceiverStream<Message<R>>,
}

impl<R> ResponseStream<R> {
    fn new(rx: mpsc::Receiver<Message<R>>) -> Self {
        Self {
            inner: ReceiverStream::new(rx),
        }
    }

    /// Collapse the stream into a unary response: the first message wins.
    pub async fn into_unary(mut self) -> Result<R, Status> {
        match self.next().await {
            Some(message) => message,
            None => Err(Status::internal("backend completed without a response")),
        }
    }
}

impl<R> Stream for ResponseStream<R> {
    type Item = Message<R>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_then_complete() {
        let (sink, mut responses) = channel::<u32>(4);

        assert!(sink.emit(1).await);
        assert!(sink.emit(2).await);
        assert!(sink.complete());
        assert_eq!(sink.state(), SinkState::Completed);

        assert_eq!(responses.next().await.unwrap().unwrap(), 1);
        assert_eq!(responses.next().await.unwrap().unwrap(), 2);
        assert!(responses.next().await.is_none());
    }

    #[tokio::test]
    async fn test_terminal_state_is_sticky() {
        let (sink, mut responses) = channel::<u32>(4);

        assert!(sink.fail(Status::internal("boom")).await);
        assert!(!sink.complete());
        assert!(!sink.fail(Status::internal("again")).await);
        assert!(!sink.emit(3).await);
        assert!(!sink.cancel());
        assert_eq!(sink.state(), SinkState::Failed);

        let status = responses.next().await.unwrap().unwrap_err();
        assert_eq!(status.message(), "boom");
        assert!(responses.next().await.is_none());
    }

    #[tokio::test]
    async fn test_complete_twice_is_noop() {
        let (sink, mut responses) = channel::<u32>(4);
        assert!(sink.complete());
        assert!(!sink.complete());
        assert!(responses.next().await.is_none());
    }

    #[tokio::test]
    async fn test_emit_after_client_drop_cancels() {
        let (sink, responses) = channel::<u32>(4);
        drop(responses);

        assert!(sink.is_closed());
        assert!(!sink.emit(1).await);
        assert_eq!(sink.state(), SinkState::Cancelled);
        assert!(!sink.complete());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_client_drop() {
        let (sink, responses) = channel::<u32>(4);
        let cancelled = sink.cancelled();

        let waiter = tokio::spawn(cancelled);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(responses);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("cancellation should be observed")
            .unwrap();
    }

    #[tokio::test]
    async fn test_into_unary() {
        let (sink, responses) = channel::<u32>(1);
        assert!(sink.emit(5).await);
        sink.complete();
        assert_eq!(responses.into_unary().await.unwrap(), 5);

        let (sink, responses) = channel::<u32>(1);
        sink.complete();
        let status = responses.into_unary().await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::Internal);

        let (sink, responses) = channel::<u32>(1);
        sink.fail(Status::not_found("missing")).await;
        let status = responses.into_unary().await.unwrap_err();
        assert_eq!(status.code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_fail_within_gives_up_on_stalled_client() {
        let (sink, mut responses) = channel::<u32>(1);
        assert!(sink.emit(1).await);

        // Buffer is full and nobody reads
        let failed = tokio::time::timeout(
            Duration::from_secs(1),
            sink.fail_within(Status::unavailable("released"), Duration::from_millis(20)),
        )
        .await
        .expect("failure must not wait for the client");
        assert!(failed);
        assert_eq!(sink.state(), SinkState::Failed);

        // Buffered value survives; the stream then ends
        assert_eq!(responses.next().await.unwrap().unwrap(), 1);
        assert!(responses.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fail_within_delivers_when_room() {
        let (sink, mut responses) = channel::<u32>(1);
        assert!(sink.fail_within(Status::unavailable("released"), Duration::from_millis(20)).await);
        assert!(!sink.fail_within(Status::internal("again"), Duration::from_millis(20)).await);

        let status = responses.next().await.unwrap().unwrap_err();
        assert_eq!(status.code(), tonic::Code::Unavailable);
        assert!(responses.next().await.is_none());
    }
}
