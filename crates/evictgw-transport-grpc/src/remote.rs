//! Eviction backend reached over gRPC.
//!
//! Provides [`RemoteEvictionClient`], which implements [`EvictionClient`] by
//! forwarding every operation to an upstream `EvictionService`. This is what
//! lets one gateway sit in front of another.

use std::future::Future;
use std::time::Duration;

use evictgw_core::{
    EventStream, EvictionClient, EvictionError, EvictionErrorCode, EvictionQuota, Reference,
    Result, SystemDisruptionBudget,
};
use futures::stream::{self, StreamExt, TryStreamExt};
use tonic::transport::{Channel, Endpoint};

use crate::convert;
use crate::proto::{self, eviction_service_client::EvictionServiceClient};
use crate::status::eviction_error_from_status;

/// gRPC-based eviction backend.
///
/// The channel connects lazily, so an unreachable upstream surfaces as
/// [`EvictionError::Unavailable`] on the first call rather than at
/// construction.
#[derive(Clone)]
pub struct RemoteEvictionClient {
    client: EvictionServiceClient<Channel>,
    request_timeout: Duration,
}

impl RemoteEvictionClient {
    /// Create a client for an upstream eviction service.
    ///
    /// # Arguments
    /// * `upstream` - Endpoint URI (e.g., "http://127.0.0.1:7104")
    /// * `request_timeout` - Deadline for unary calls and for opening the event stream
    pub fn connect_lazy(upstream: &str, request_timeout: Duration) -> Result<Self> {
        let endpoint = Endpoint::from_shared(upstream.to_string())
            .map_err(|e| {
                EvictionError::eviction(
                    EvictionErrorCode::BadConfiguration,
                    format!("Invalid upstream endpoint {}: {}", upstream, e),
                )
            })?
            .connect_timeout(request_timeout);

        tracing::info!("Forwarding eviction calls to {}", upstream);
        Ok(Self {
            client: EvictionServiceClient::new(endpoint.connect_lazy()),
            request_timeout,
        })
    }
}

/// Await `call` under `timeout`, mapping failures to [`EvictionError`].
async fn bounded<T, F>(timeout: Duration, call: F) -> Result<T>
where
    F: Future<Output = std::result::Result<tonic::Response<T>, tonic::Status>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(response)) => Ok(response.into_inner()),
        Ok(Err(status)) => Err(eviction_error_from_status(&status)),
        Err(_) => Err(EvictionError::Timeout {
            elapsed_ms: timeout.as_millis() as u64,
        }),
    }
}

/// A response the upstream sent that does not decode is an upstream fault,
/// not a bad request from our caller.
fn decoded<T>(value: Result<T>) -> Result<T> {
    value.map_err(|e| EvictionError::internal(format!("malformed upstream response: {}", e)))
}

/// Interpret a termination response from an upstream gateway. A non-empty
/// reason code means the upstream remapped an eviction error.
fn termination_result(response: proto::TaskTerminateResponse) -> Result<()> {
    if response.reason_code.is_empty() {
        return Ok(());
    }
    Err(EvictionError::eviction(
        EvictionErrorCode::parse(&response.reason_code),
        response.reason_message,
    ))
}

#[async_trait::async_trait]
impl EvictionClient for RemoteEvictionClient {
    async fn get_disruption_budget(&self, reference: Reference) -> Result<SystemDisruptionBudget> {
        let mut client = self.client.clone();
        let request = convert::reference_to_proto(&reference);
        let budget = bounded(self.request_timeout, client.get_disruption_budget(request)).await?;
        decoded(convert::budget_from_proto(&budget))
    }

    async fn get_eviction_quota(&self, reference: Reference) -> Result<EvictionQuota> {
        let mut client = self.client.clone();
        let request = convert::reference_to_proto(&reference);
        let quota = bounded(self.request_timeout, client.get_eviction_quota(request)).await?;
        decoded(convert::quota_from_proto(&quota))
    }

    async fn terminate_task(&self, task_id: String, reason: String) -> Result<()> {
        let mut client = self.client.clone();
        let request = proto::TaskTerminateRequest { task_id, reason };
        let response = bounded(self.request_timeout, client.terminate_task(request)).await?;
        termination_result(response)
    }

    fn observe_events(&self, include_snapshot: bool) -> EventStream {
        let mut client = self.client.clone();
        let timeout = self.request_timeout;

        // Only opening the stream is bounded; events may be arbitrarily far apart.
        let open = async move {
            let events = bounded(
                timeout,
                client.observe_events(proto::ObserverEventRequest { include_snapshot }),
            )
            .await?;
            Ok::<_, EvictionError>(events.map(|event| match event {
                Ok(event) => decoded(convert::event_from_proto(&event)),
                Err(status) => Err(eviction_error_from_status(&status)),
            }))
        };

        stream::once(open).try_flatten().boxed()
    }
}
