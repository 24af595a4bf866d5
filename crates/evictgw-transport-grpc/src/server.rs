//! gRPC server that hosts the eviction service.

use crate::eviction::{BridgeConfig, EvictionGatewayService, ReasonCodeScheme};
use crate::proto::eviction_service_server::EvictionServiceServer;
use crate::subscription::SubscriptionSet;
use evictgw_core::EvictionClient;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;

/// gRPC server wrapper.
///
/// Hosts the eviction service and manages the server lifecycle. Every bridged
/// call is tracked so that shutdown can end long-lived event streams instead
/// of waiting on them.
pub struct GrpcServer {
    addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    client: Arc<dyn EvictionClient>,
    bridge: BridgeConfig,
    reason_codes: ReasonCodeScheme,
    subscriptions: Arc<SubscriptionSet>,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    server_handle: Option<JoinHandle<Result<(), tonic::transport::Error>>>,
}

impl GrpcServer {
    /// Create a new gRPC server.
    ///
    /// # Arguments
    /// - `addr`: Socket address to bind to (port 0 picks a free port)
    /// - `client`: Eviction backend the service delegates to
    pub fn new(addr: SocketAddr, client: Arc<dyn EvictionClient>) -> Self {
        Self {
            addr,
            local_addr: None,
            client,
            bridge: BridgeConfig::default(),
            reason_codes: ReasonCodeScheme::default(),
            subscriptions: Arc::new(SubscriptionSet::new()),
            shutdown_tx: None,
            server_handle: None,
        }
    }

    /// Set per-call bridge settings.
    pub fn with_bridge_config(mut self, bridge: BridgeConfig) -> Self {
        self.bridge = bridge;
        self
    }

    /// Set the reason code scheme for rejected terminations.
    pub fn with_reason_codes(mut self, reason_codes: ReasonCodeScheme) -> Self {
        self.reason_codes = reason_codes;
        self
    }

    /// Start the gRPC server.
    ///
    /// Binds the listener, then spawns a background task to run the server.
    /// Returns once the listener is bound.
    pub async fn start(&mut self) -> Result<(), GrpcServerError> {
        tracing::info!("Starting gRPC server on {}", self.addr);

        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|e| GrpcServerError::BindError(format!("{}: {}", self.addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| GrpcServerError::BindError(e.to_string()))?;
        self.local_addr = Some(local_addr);

        let service = EvictionGatewayService::new(self.client.clone())
            .with_config(self.bridge)
            .with_reason_codes(self.reason_codes)
            .with_subscriptions(self.subscriptions.clone());

        // Create shutdown channel
        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let server = Server::builder()
            .add_service(EvictionServiceServer::new(service))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                shutdown_rx.await.ok();
            });

        // Spawn server task
        let handle = tokio::spawn(async move {
            tracing::info!("gRPC server task started");
            let result = server.await;
            tracing::info!("gRPC server task stopped");
            result
        });

        self.server_handle = Some(handle);

        tracing::info!("gRPC server listening on {}", local_addr);
        Ok(())
    }

    /// Shutdown the gRPC server gracefully.
    ///
    /// In-flight calls are released (their clients see `Unavailable`) so the
    /// graceful drain does not wait on open event streams.
    pub async fn shutdown(mut self) -> Result<(), GrpcServerError> {
        tracing::info!("Shutting down gRPC server");

        // Send shutdown signal
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Wait for server task to finish
        if let Some(mut handle) = self.server_handle.take() {
            let result = loop {
                let released = self.subscriptions.release_all();
                if released > 0 {
                    tracing::info!("Released {} in-flight calls", released);
                }
                // Calls accepted while draining are released on the next pass.
                tokio::select! {
                    result = &mut handle => break result,
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            };
            result
                .map_err(|e| GrpcServerError::ShutdownError(e.to_string()))?
                .map_err(|e| GrpcServerError::ServerError(e.to_string()))?;
        }

        tracing::info!("gRPC server shutdown complete");
        Ok(())
    }

    /// Get the configured address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Get the bound address. `None` until [`GrpcServer::start`] succeeds.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Calls currently bridged by this server.
    pub fn subscriptions(&self) -> Arc<SubscriptionSet> {
        self.subscriptions.clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GrpcServerError {
    #[error("Bind error: {0}")]
    BindError(String),

    #[error("Server error: {0}")]
    ServerError(String),

    #[error("Shutdown error: {0}")]
    ShutdownError(String),
}
