use evictgw_server::config::ServerConfig;
use evictgw_server::gateway::Gateway;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse CLI args for config file path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "evictgw.yaml".to_string());

    // Load configuration (try file first, fall back to env)
    let from_file = std::path::Path::new(&config_path).exists();
    let config = if from_file {
        ServerConfig::load_from_file(&config_path)?
    } else {
        ServerConfig::load_from_env()?
    };

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(config.max_log_level()?)
        .init();

    if from_file {
        tracing::info!("Loaded configuration from: {}", config_path);
    } else {
        tracing::warn!("Config file {} not found, loaded from environment variables", config_path);
    }

    tracing::info!("Starting eviction gateway: {}", config.gateway_id);
    tracing::info!("RPC address: {}", config.rpc_addr);
    tracing::info!("Backend mode: {:?}", config.backend.mode);

    let mut gateway = Gateway::new(config).await?;
    gateway.start().await?;

    tracing::info!("Eviction gateway is ready");

    // Wait for shutdown signal (SIGINT/SIGTERM)
    tokio::signal::ctrl_c().await?;

    tracing::info!("Received shutdown signal, gracefully shutting down...");

    gateway.shutdown().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
