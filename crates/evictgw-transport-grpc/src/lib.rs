//! gRPC transport for the eviction gateway.
//!
//! Implements the `EvictionService` defined in `proto/eviction.proto`:
//! - GetDisruptionBudget, GetEvictionQuota (unary)
//! - TerminateTask (unary, eviction errors remapped into the response)
//! - ObserveEvents (server streaming)
//!
//! Every RPC goes through the same [`Bridge`], which turns a [`BackendCall`]
//! into an ordered, exactly-once-terminated response stream.

pub mod proto {
    //! Generated protobuf types and service traits.
    tonic::include_proto!("evictgw.v1");
}

pub mod bridge;
pub mod call;
pub mod convert;
pub mod eviction;
pub mod policy;
pub mod remote;
pub mod server;
pub mod sink;
pub mod status;
pub mod subscription;

pub use bridge::{Bridge, BridgeOutcome};
pub use call::{BackendCall, CallMode};
pub use eviction::{BridgeConfig, EvictionGatewayService, ReasonCodeScheme};
pub use policy::{ErrorDisposition, ErrorPolicy};
pub use remote::RemoteEvictionClient;
pub use server::{GrpcServer, GrpcServerError};
pub use sink::{ResponseSink, ResponseStream, SinkState};
pub use subscription::{Subscription, SubscriptionSet};
