//! Eviction service implementation.
//!
//! Each RPC validates its request, builds a [`BackendCall`] against the
//! configured [`EvictionClient`], picks a translator and an [`ErrorPolicy`],
//! and hands everything to a [`Bridge`]. Nothing here writes to a response
//! sink directly.

use std::sync::Arc;

use evictgw_core::{EvictionClient, EvictionError, EvictionErrorCode};
use tonic::{Request, Response, Status};

use crate::bridge::Bridge;
use crate::call::BackendCall;
use crate::convert;
use crate::policy::ErrorPolicy;
use crate::proto::{self, eviction_service_server::EvictionService};
use crate::sink::{self, ResponseStream};
use crate::status::{eviction_status, DEFAULT_MAX_STATUS_MESSAGE_LEN};
use crate::subscription::SubscriptionSet;

/// Reason code reported when a termination is rejected with an eviction error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReasonCodeScheme {
    /// Every rejection reports the literal code `failure`.
    #[default]
    Failure,
    /// Report the eviction error code, e.g. `NO_QUOTA`.
    ErrorCode,
}

impl ReasonCodeScheme {
    pub const FAILURE: &'static str = "failure";

    pub fn reason_code(&self, code: EvictionErrorCode) -> String {
        match self {
            ReasonCodeScheme::Failure => Self::FAILURE.to_string(),
            ReasonCodeScheme::ErrorCode => code.as_str().to_string(),
        }
    }
}

/// Per-call bridge settings.
#[derive(Debug, Clone, Copy)]
pub struct BridgeConfig {
    /// Responses buffered ahead of a slow client.
    /// Default: 32
    pub response_buffer: usize,

    /// Upper bound for client-visible status messages, in bytes.
    /// Default: 512
    pub max_status_message_len: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            response_buffer: 32,
            max_status_message_len: DEFAULT_MAX_STATUS_MESSAGE_LEN,
        }
    }
}

/// Eviction service implementation.
///
/// Every bridged call is tracked in a [`SubscriptionSet`] so the server can
/// release in-flight calls on shutdown.
pub struct EvictionGatewayService {
    client: Arc<dyn EvictionClient>,
    config: BridgeConfig,
    reason_codes: ReasonCodeScheme,
    subscriptions: Arc<SubscriptionSet>,
}

impl EvictionGatewayService {
    /// Create a new eviction service backed by `client`.
    pub fn new(client: Arc<dyn EvictionClient>) -> Self {
        Self {
            client,
            config: BridgeConfig::default(),
            reason_codes: ReasonCodeScheme::default(),
            subscriptions: Arc::new(SubscriptionSet::new()),
        }
    }

    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_reason_codes(mut self, reason_codes: ReasonCodeScheme) -> Self {
        self.reason_codes = reason_codes;
        self
    }

    /// Track calls in a set shared with the owner of this service.
    pub fn with_subscriptions(mut self, subscriptions: Arc<SubscriptionSet>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn subscriptions(&self) -> Arc<SubscriptionSet> {
        self.subscriptions.clone()
    }

    /// Every failure fails the RPC with its classified status.
    fn default_policy<R>(&self) -> ErrorPolicy<EvictionError, R> {
        let max_len = self.config.max_status_message_len;
        ErrorPolicy::fail_with(move |error: &EvictionError| eviction_status(error, max_len))
    }

    /// Eviction errors become an allowed response carrying the reason.
    /// Infrastructure errors still fail the RPC.
    fn terminate_policy(&self) -> ErrorPolicy<EvictionError, proto::TaskTerminateResponse> {
        let scheme = self.reason_codes;
        self.default_policy().recover_with(move |error: &EvictionError| match error {
            EvictionError::Eviction { code, message } => Some(proto::TaskTerminateResponse {
                allowed: true,
                reason_code: scheme.reason_code(*code),
                reason_message: message.clone(),
            }),
            _ => None,
        })
    }

    /// Bridge `call` into a fresh response stream.
    fn start<T, R, F>(
        &self,
        operation: &'static str,
        call: BackendCall<T, EvictionError>,
        translate: F,
        policy: ErrorPolicy<EvictionError, R>,
    ) -> ResponseStream<R>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnMut(T) -> R + Send + 'static,
    {
        let (sink, responses) = sink::channel(self.config.response_buffer);
        let subscription = Bridge::new(operation, call, Arc::new(sink), translate, policy).spawn();
        self.subscriptions.track(&subscription);
        responses
    }
}

#[tonic::async_trait]
impl EvictionService for EvictionGatewayService {
    async fn get_disruption_budget(
        &self,
        request: Request<proto::Reference>,
    ) -> Result<Response<proto::SystemDisruptionBudget>, Status> {
        let req = request.into_inner();
        tracing::debug!("GetDisruptionBudget request: {:?}", req.reference);

        let call = match convert::reference_from_proto(&req) {
            Ok(reference) => {
                let client = self.client.clone();
                BackendCall::single(async move { client.get_disruption_budget(reference).await })
            }
            Err(e) => BackendCall::failed(e),
        };

        self.start(
            "GetDisruptionBudget",
            call,
            |budget| convert::budget_to_proto(&budget),
            self.default_policy(),
        )
        .into_unary()
        .await
        .map(Response::new)
    }

    async fn get_eviction_quota(
        &self,
        request: Request<proto::Reference>,
    ) -> Result<Response<proto::EvictionQuota>, Status> {
        let req = request.into_inner();
        tracing::debug!("GetEvictionQuota request: {:?}", req.reference);

        let call = match convert::reference_from_proto(&req) {
            Ok(reference) => {
                let client = self.client.clone();
                BackendCall::single(async move { client.get_eviction_quota(reference).await })
            }
            Err(e) => BackendCall::failed(e),
        };

        self.start(
            "GetEvictionQuota",
            call,
            |quota| convert::quota_to_proto(&quota),
            self.default_policy(),
        )
        .into_unary()
        .await
        .map(Response::new)
    }

    async fn terminate_task(
        &self,
        request: Request<proto::TaskTerminateRequest>,
    ) -> Result<Response<proto::TaskTerminateResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            "TerminateTask request: task_id={}, reason={:?}",
            req.task_id,
            req.reason
        );

        let call = if req.task_id.is_empty() {
            BackendCall::failed(EvictionError::invalid_argument("task_id is required"))
        } else {
            let client = self.client.clone();
            BackendCall::completion(async move {
                client.terminate_task(req.task_id, req.reason).await
            })
        };

        self.start(
            "TerminateTask",
            call,
            |()| proto::TaskTerminateResponse {
                allowed: true,
                reason_code: String::new(),
                reason_message: String::new(),
            },
            self.terminate_policy(),
        )
        .into_unary()
        .await
        .map(Response::new)
    }

    type ObserveEventsStream = ResponseStream<proto::EvictionServiceEvent>;

    async fn observe_events(
        &self,
        request: Request<proto::ObserverEventRequest>,
    ) -> Result<Response<Self::ObserveEventsStream>, Status> {
        let req = request.into_inner();
        tracing::debug!(
            "ObserveEvents request: include_snapshot={}",
            req.include_snapshot
        );

        let call = BackendCall::stream(self.client.observe_events(req.include_snapshot));
        Ok(Response::new(self.start(
            "ObserveEvents",
            call,
            |event| convert::event_to_proto(&event),
            self.default_policy(),
        )))
    }
}
