//! Gateway composition.
//!
//! Builds the eviction backend from configuration and owns the gRPC server
//! lifecycle.

use crate::config::{BackendMode, ServerConfig};
use evictgw_core::{EvictionClient, LocalEvictionClient};
use evictgw_transport_grpc::{GrpcServer, RemoteEvictionClient, SubscriptionSet};
use std::net::SocketAddr;
use std::sync::Arc;

/// Eviction gateway - main composition root.
pub struct Gateway {
    /// Gateway configuration
    config: ServerConfig,

    /// Backend every RPC delegates to
    client: Arc<dyn EvictionClient>,

    /// Set when running in local mode, for administration and tests
    local: Option<Arc<LocalEvictionClient>>,

    /// gRPC server (created on start)
    grpc_server: Option<GrpcServer>,
}

impl Gateway {
    /// Create a gateway from configuration.
    ///
    /// Remote backends connect lazily, so this does not require the upstream
    /// to be reachable yet.
    pub async fn new(config: ServerConfig) -> Result<Self, GatewayError> {
        tracing::info!("Initializing gateway: {}", config.gateway_id);

        config
            .validate()
            .map_err(|e| GatewayError::Initialization(e.to_string()))?;

        let (client, local) = match config.backend.mode {
            BackendMode::Local => {
                let local = Arc::new(LocalEvictionClient::new(
                    config.backend.local.to_local_config(),
                ));
                tracing::info!(
                    "Using local eviction backend ({} jobs, {} capacity groups)",
                    config.backend.local.jobs.len(),
                    config.backend.local.capacity_groups.len()
                );
                let client: Arc<dyn EvictionClient> = local.clone();
                (client, Some(local))
            }
            BackendMode::Remote => {
                let upstream = config.backend.upstream.as_deref().ok_or_else(|| {
                    GatewayError::Initialization("remote mode requires an upstream".to_string())
                })?;
                let remote = RemoteEvictionClient::connect_lazy(upstream, config.request_timeout())
                    .map_err(|e| GatewayError::Initialization(e.to_string()))?;
                let client: Arc<dyn EvictionClient> = Arc::new(remote);
                (client, None)
            }
        };

        Ok(Self {
            config,
            client,
            local,
            grpc_server: None,
        })
    }

    /// Start serving.
    pub async fn start(&mut self) -> Result<(), GatewayError> {
        tracing::info!("Starting gateway");

        let addr = self
            .config
            .socket_addr()
            .map_err(|e| GatewayError::Startup(e.to_string()))?;

        let mut grpc_server = GrpcServer::new(addr, self.client.clone())
            .with_bridge_config(self.config.bridge_config())
            .with_reason_codes(self.config.reason_codes());

        grpc_server
            .start()
            .await
            .map_err(|e| GatewayError::Startup(format!("Failed to start gRPC server: {}", e)))?;

        self.grpc_server = Some(grpc_server);
        Ok(())
    }

    /// Shutdown gracefully. In-flight calls fail with `Unavailable`.
    pub async fn shutdown(mut self) -> Result<(), GatewayError> {
        tracing::info!("Shutting down gateway");

        if let Some(grpc_server) = self.grpc_server.take() {
            grpc_server.shutdown().await.map_err(|e| {
                GatewayError::Shutdown(format!("Failed to shutdown gRPC server: {}", e))
            })?;
        }

        tracing::info!("Gateway shutdown complete");
        Ok(())
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Address the gRPC server is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.grpc_server.as_ref().and_then(|s| s.local_addr())
    }

    /// The in-memory backend, in local mode.
    pub fn local_backend(&self) -> Option<&Arc<LocalEvictionClient>> {
        self.local.as_ref()
    }

    /// Calls currently bridged by the server, once started.
    pub fn subscriptions(&self) -> Option<Arc<SubscriptionSet>> {
        self.grpc_server.as_ref().map(|s| s.subscriptions())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Initialization error: {0}")]
    Initialization(String),

    #[error("Startup error: {0}")]
    Startup(String),

    #[error("Shutdown error: {0}")]
    Shutdown(String),
}
