//! Server configuration.
//!
//! Loads and validates configuration from YAML files or environment variables.

use evictgw_core::{JobQuota, LocalEvictionConfig, TokenBucketDescriptor};
use evictgw_transport_grpc::{BridgeConfig, ReasonCodeScheme};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Server configuration.
///
/// Example YAML:
/// ```yaml
/// gateway_id: "gw1"
/// rpc_addr: "0.0.0.0:7104"
/// log_level: "info"
/// termination:
///   reason_code_scheme: error_code
/// backend:
///   mode: local
///   local:
///     system_quota: 100
///     capacity_groups:
///       - name: "batch"
///         quota: 10
///     jobs:
///       - job_id: "job-1"
///         capacity_group: "batch"
///         quota: 2
///         tasks: ["task-1", "task-2"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Unique gateway identifier
    pub gateway_id: String,

    /// gRPC listen address
    #[serde(default = "default_rpc_addr")]
    pub rpc_addr: String,

    /// Maximum log level: trace, debug, info, warn or error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Per-call bridge settings
    #[serde(default)]
    pub bridge: BridgeSettings,

    /// TerminateTask settings
    #[serde(default)]
    pub termination: TerminationConfig,

    /// Eviction backend
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSettings {
    /// Responses buffered ahead of a slow client
    #[serde(default = "default_response_buffer")]
    pub response_buffer: usize,

    /// Upper bound for client-visible status messages, in bytes
    #[serde(default = "default_max_status_message_len")]
    pub max_status_message_len: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            response_buffer: default_response_buffer(),
            max_status_message_len: default_max_status_message_len(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCodes {
    /// Literal `failure` for every rejection
    #[default]
    Failure,
    /// The eviction error code, e.g. `NO_QUOTA`
    ErrorCode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TerminationConfig {
    #[serde(default)]
    pub reason_code_scheme: ReasonCodes,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// In-process quota bookkeeping
    #[default]
    Local,
    /// Forward every call to an upstream eviction service
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub mode: BackendMode,

    /// Upstream URI, required in remote mode (e.g. "http://10.0.1.10:7104")
    #[serde(default)]
    pub upstream: Option<String>,

    /// Deadline for upstream unary calls, in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Seed data for local mode
    #[serde(default)]
    pub local: LocalBackendConfig,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::default(),
            upstream: None,
            request_timeout_ms: default_request_timeout_ms(),
            local: LocalBackendConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalBackendConfig {
    #[serde(default = "default_system_quota")]
    pub system_quota: i64,

    #[serde(default = "default_token_bucket_capacity")]
    pub token_bucket_capacity: i64,

    #[serde(default = "default_refill_rate_per_second")]
    pub refill_rate_per_second: i64,

    /// Capacity of the event broadcast channel
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,

    #[serde(default)]
    pub capacity_groups: Vec<CapacityGroupConfig>,

    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

impl Default for LocalBackendConfig {
    fn default() -> Self {
        Self {
            system_quota: default_system_quota(),
            token_bucket_capacity: default_token_bucket_capacity(),
            refill_rate_per_second: default_refill_rate_per_second(),
            event_buffer: default_event_buffer(),
            capacity_groups: Vec::new(),
            jobs: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityGroupConfig {
    pub name: String,
    pub quota: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    pub job_id: String,

    #[serde(default)]
    pub capacity_group: Option<String>,

    pub quota: i64,

    #[serde(default)]
    pub tasks: Vec<String>,
}

fn default_rpc_addr() -> String {
    "0.0.0.0:7104".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_response_buffer() -> usize {
    32
}

fn default_max_status_message_len() -> usize {
    512
}

fn default_request_timeout_ms() -> u64 {
    5000
}

fn default_system_quota() -> i64 {
    100
}

fn default_token_bucket_capacity() -> i64 {
    100
}

fn default_refill_rate_per_second() -> i64 {
    1
}

fn default_event_buffer() -> usize {
    256
}

impl ServerConfig {
    /// Minimal local-mode configuration.
    pub fn new(gateway_id: impl Into<String>) -> Self {
        Self {
            gateway_id: gateway_id.into(),
            rpc_addr: default_rpc_addr(),
            log_level: default_log_level(),
            bridge: BridgeSettings::default(),
            termination: TerminationConfig::default(),
            backend: BackendConfig::default(),
        }
    }

    /// Load configuration from a YAML file.
    pub fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: ServerConfig = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse YAML: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables.
    ///
    /// Supported variables:
    /// - EVICTGW_GATEWAY_ID
    /// - EVICTGW_RPC_ADDR
    /// - EVICTGW_LOG_LEVEL
    /// - EVICTGW_UPSTREAM (selects remote mode)
    /// - EVICTGW_REQUEST_TIMEOUT_MS
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let gateway_id = var("EVICTGW_GATEWAY_ID")
            .ok_or_else(|| ConfigError::MissingField("EVICTGW_GATEWAY_ID".to_string()))?;

        let mut config = ServerConfig::new(gateway_id);
        if let Some(rpc_addr) = var("EVICTGW_RPC_ADDR") {
            config.rpc_addr = rpc_addr;
        }
        if let Some(log_level) = var("EVICTGW_LOG_LEVEL") {
            config.log_level = log_level;
        }
        if let Some(upstream) = var("EVICTGW_UPSTREAM") {
            config.backend.mode = BackendMode::Remote;
            config.backend.upstream = Some(upstream);
        }
        if let Some(timeout) = var("EVICTGW_REQUEST_TIMEOUT_MS") {
            config.backend.request_timeout_ms = timeout.parse().map_err(|e| {
                ConfigError::InvalidField(format!("Invalid EVICTGW_REQUEST_TIMEOUT_MS: {}", e))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway_id.is_empty() {
            return Err(ConfigError::InvalidField(
                "gateway_id cannot be empty".to_string(),
            ));
        }

        self.socket_addr()?;
        self.max_log_level()?;

        if self.bridge.response_buffer == 0 {
            return Err(ConfigError::InvalidField(
                "bridge.response_buffer must be > 0".to_string(),
            ));
        }
        if self.bridge.max_status_message_len == 0 {
            return Err(ConfigError::InvalidField(
                "bridge.max_status_message_len must be > 0".to_string(),
            ));
        }

        if self.backend.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidField(
                "backend.request_timeout_ms must be > 0".to_string(),
            ));
        }

        match self.backend.mode {
            BackendMode::Remote => {
                let upstream = self.backend.upstream.as_deref().ok_or_else(|| {
                    ConfigError::MissingField("backend.upstream".to_string())
                })?;
                if !(upstream.starts_with("http://") || upstream.starts_with("https://")) {
                    return Err(ConfigError::InvalidField(format!(
                        "backend.upstream must be an http:// or https:// URI: {}",
                        upstream
                    )));
                }
            }
            BackendMode::Local => self.backend.local.validate()?,
        }

        Ok(())
    }

    /// Parsed listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.rpc_addr
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidField(format!("Invalid rpc_addr: {}", e)))
    }

    /// Parsed log level.
    pub fn max_log_level(&self) -> Result<tracing::Level, ConfigError> {
        self.log_level
            .parse::<tracing::Level>()
            .map_err(|_| ConfigError::InvalidField(format!("Invalid log_level: {}", self.log_level)))
    }

    pub fn bridge_config(&self) -> BridgeConfig {
        BridgeConfig {
            response_buffer: self.bridge.response_buffer,
            max_status_message_len: self.bridge.max_status_message_len,
        }
    }

    pub fn reason_codes(&self) -> ReasonCodeScheme {
        match self.termination.reason_code_scheme {
            ReasonCodes::Failure => ReasonCodeScheme::Failure,
            ReasonCodes::ErrorCode => ReasonCodeScheme::ErrorCode,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.backend.request_timeout_ms)
    }
}

impl LocalBackendConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.event_buffer == 0 {
            return Err(ConfigError::InvalidField(
                "backend.local.event_buffer must be > 0".to_string(),
            ));
        }

        let mut groups = HashSet::new();
        for group in &self.capacity_groups {
            if group.name.is_empty() || !groups.insert(group.name.as_str()) {
                return Err(ConfigError::InvalidField(format!(
                    "Empty or duplicate capacity group: {:?}",
                    group.name
                )));
            }
        }

        let mut jobs = HashSet::new();
        let mut tasks = HashSet::new();
        for job in &self.jobs {
            if job.job_id.is_empty() || !jobs.insert(job.job_id.as_str()) {
                return Err(ConfigError::InvalidField(format!(
                    "Empty or duplicate job id: {:?}",
                    job.job_id
                )));
            }
            if let Some(group) = &job.capacity_group {
                if !groups.contains(group.as_str()) {
                    return Err(ConfigError::InvalidField(format!(
                        "Job {} references unknown capacity group {}",
                        job.job_id, group
                    )));
                }
            }
            for task in &job.tasks {
                if !tasks.insert(task.as_str()) {
                    return Err(ConfigError::InvalidField(format!(
                        "Task {} is assigned to more than one job",
                        task
                    )));
                }
            }
        }

        Ok(())
    }

    /// Seed state for the in-memory backend.
    pub fn to_local_config(&self) -> LocalEvictionConfig {
        LocalEvictionConfig {
            system_quota: self.system_quota,
            token_bucket: TokenBucketDescriptor {
                capacity: self.token_bucket_capacity,
                refill_rate_per_second: self.refill_rate_per_second,
            },
            time_windows: Vec::new(),
            capacity_groups: self
                .capacity_groups
                .iter()
                .map(|g| (g.name.clone(), g.quota))
                .collect(),
            jobs: self
                .jobs
                .iter()
                .map(|j| JobQuota {
                    job_id: j.job_id.clone(),
                    capacity_group: j.capacity_group.clone(),
                    quota: j.quota,
                    tasks: j.tasks.clone(),
                })
                .collect(),
            event_buffer: self.event_buffer,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),
}
