//! Service configuration loading
//!
//! Resolution priority, highest first:
//! 1. Environment variables (`COMPLIANCE_*`)
//! 2. TOML config file (`COMPLIANCE_CONFIG`, else `<config_dir>/compliance/config.toml`)
//! 3. Compiled defaults
//!
//! A missing TOML file is not an error; a malformed one is.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit TOML config file
pub const CONFIG_PATH_ENV: &str = "COMPLIANCE_CONFIG";

/// Orchestration service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServiceConfig {
    /// Socket address the HTTP/WebSocket server binds to
    pub bind_address: String,
    /// SQLite database file
    pub database_path: PathBuf,
    /// Root folder document paths are resolved against
    pub storage_root: PathBuf,
    /// Base URL of the AI service's HTTP API
    pub ai_base_url: String,
    /// Base URL of the AI service's streaming endpoints, derived from `ai_base_url` when unset
    pub ai_ws_url: Option<String>,
    /// HS256 secret used to verify notification socket and API tokens
    pub jwt_secret: String,
    /// Seconds between reconciliation sweeps
    pub poll_interval_secs: u64,
    /// Seconds without a status write before a job counts as stale
    pub stale_after_secs: u64,
    /// Timeout for AI HTTP calls
    pub http_timeout_secs: u64,
    /// Upper bound on monitor teardown at shutdown
    pub shutdown_timeout_secs: u64,
    /// Per-item numeric field averaged into a comparison's mean score
    pub comparison_score_field: String,
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5730".to_string(),
            database_path: default_data_dir().join("compliance.db"),
            storage_root: default_data_dir().join("documents"),
            ai_base_url: "http://127.0.0.1:8000".to_string(),
            ai_ws_url: None,
            jwt_secret: String::new(),
            poll_interval_secs: 30,
            stale_after_secs: 300,
            http_timeout_secs: 60,
            shutdown_timeout_secs: 5,
            comparison_score_field: "score".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from the default TOML location plus environment overrides
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .map(PathBuf::from)
            .or_else(default_config_file);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_toml_file(&path)?,
            Some(path) => {
                warn!("Config file not found: {} (using defaults)", path.display());
                Self::default()
            }
            None => Self::default(),
        };

        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Parse a TOML config file; absent keys take their defaults
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        let config: ServiceConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Apply `COMPLIANCE_*` environment variables on top of the current values
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_string("COMPLIANCE_BIND_ADDRESS") {
            self.bind_address = v;
        }
        if let Some(v) = env_string("COMPLIANCE_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = env_string("COMPLIANCE_STORAGE_ROOT") {
            self.storage_root = PathBuf::from(v);
        }
        if let Some(v) = env_string("COMPLIANCE_AI_BASE_URL") {
            self.ai_base_url = v;
        }
        if let Some(v) = env_string("COMPLIANCE_AI_WS_URL") {
            self.ai_ws_url = Some(v);
        }
        if let Some(v) = env_string("COMPLIANCE_JWT_SECRET") {
            self.jwt_secret = v;
        }
        if let Some(v) = env_u64("COMPLIANCE_POLL_INTERVAL_SECS")? {
            self.poll_interval_secs = v;
        }
        if let Some(v) = env_u64("COMPLIANCE_STALE_AFTER_SECS")? {
            self.stale_after_secs = v;
        }
        if let Some(v) = env_u64("COMPLIANCE_HTTP_TIMEOUT_SECS")? {
            self.http_timeout_secs = v;
        }
        if let Some(v) = env_u64("COMPLIANCE_SHUTDOWN_TIMEOUT_SECS")? {
            self.shutdown_timeout_secs = v;
        }
        if let Some(v) = env_string("COMPLIANCE_SCORE_FIELD") {
            self.comparison_score_field = v;
        }
        if let Some(v) = env_string("COMPLIANCE_LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    /// Check values the service cannot start without
    pub fn validate(&self) -> Result<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(Error::Config(
                "jwt_secret is not configured. Set COMPLIANCE_JWT_SECRET or jwt_secret in the TOML config"
                    .to_string(),
            ));
        }
        if self.poll_interval_secs == 0 {
            return Err(Error::Config("poll_interval_secs must be positive".to_string()));
        }
        if !self.ai_base_url.starts_with("http://") && !self.ai_base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "ai_base_url must be an http(s) URL: {}",
                self.ai_base_url
            )));
        }
        Ok(())
    }

    /// Streaming base URL; `http` becomes `ws` and `https` becomes `wss`
    pub fn resolved_ws_url(&self) -> String {
        if let Some(url) = &self.ai_ws_url {
            return url.trim_end_matches('/').to_string();
        }
        let base = self.ai_base_url.trim_end_matches('/');
        if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            base.to_string()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_u64(name: &str) -> Result<Option<u64>> {
    match env_string(name) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| Error::Config(format!("{} must be an integer: {}", name, e))),
        None => Ok(None),
    }
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("compliance").join("config.toml"))
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("compliance"))
        .unwrap_or_else(|| PathBuf::from("./compliance_data"))
}
