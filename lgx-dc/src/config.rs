//! Service configuration for lgx-dc
//!
//! Resolution, highest priority first: command line, environment
//! (`LGX_ROOT_FOLDER`, `LGX_ERP_BASE_URL`, `LGX_ERP_API_TOKEN`), TOML file,
//! compiled defaults. Every TOML field is optional.

use lgx_common::api::Role;
use lgx_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

use crate::services::erp_sync::{RetryPolicy, WorkerConfig};
use crate::services::offline_queue::QueuePolicy;
use crate::services::photo_processor::PhotoLimits;

pub const SERVICE_NAME: &str = "lgx-dc";
pub const ROOT_FOLDER_ENV: &str = "LGX_ROOT_FOLDER";
pub const ERP_BASE_URL_ENV: &str = "LGX_ERP_BASE_URL";
pub const ERP_API_TOKEN_ENV: &str = "LGX_ERP_API_TOKEN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub root_folder: Option<PathBuf>,
    pub bind_address: String,
    /// Enables the offline queue when set (driver devices)
    pub device_id: Option<String>,
    pub event_capacity: usize,
    pub erp: ErpConfig,
    pub sync: SyncConfig,
    pub offline: OfflineConfig,
    pub photos: PhotoConfig,
    /// Sessions seeded at startup
    pub sessions: Vec<SessionSeed>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            bind_address: "127.0.0.1:5810".to_string(),
            device_id: None,
            event_capacity: 256,
            erp: ErpConfig::default(),
            sync: SyncConfig::default(),
            offline: OfflineConfig::default(),
            photos: PhotoConfig::default(),
            sessions: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ErpConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ErpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8069/api".to_string(),
            api_token: None,
            request_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub attempt_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub max_concurrent: usize,
    pub queue_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            attempt_timeout_secs: 10,
            sweep_interval_secs: 60,
            max_concurrent: 4,
            queue_capacity: 1024,
        }
    }
}

impl SyncConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms.max(self.base_delay_ms)),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs.max(1)),
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
            max_concurrent: self.max_concurrent.max(1),
            queue_capacity: self.queue_capacity.max(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    pub ttl_hours: u64,
    pub max_attempts: u32,
    pub drain_interval_secs: u64,
    /// Polled to decide online/offline; without it the device starts online
    pub probe_url: Option<String>,
    pub probe_interval_secs: u64,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            ttl_hours: 24,
            max_attempts: 5,
            drain_interval_secs: 300,
            probe_url: None,
            probe_interval_secs: 15,
        }
    }
}

impl OfflineConfig {
    pub fn queue_policy(&self) -> QueuePolicy {
        QueuePolicy {
            ttl: Duration::from_secs(self.ttl_hours * 60 * 60),
            max_attempts: self.max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PhotoConfig {
    pub max_bytes: usize,
    pub thumbnail_max_dim: u32,
    pub require_gps_for_proof: bool,
}

impl Default for PhotoConfig {
    fn default() -> Self {
        let limits = PhotoLimits::default();
        Self {
            max_bytes: limits.max_bytes,
            thumbnail_max_dim: limits.thumbnail_max_dim,
            require_gps_for_proof: limits.require_gps_for_proof,
        }
    }
}

impl PhotoConfig {
    pub fn limits(&self) -> PhotoLimits {
        PhotoLimits {
            max_bytes: self.max_bytes,
            thumbnail_max_dim: self.thumbnail_max_dim.max(16),
            require_gps_for_proof: self.require_gps_for_proof,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionSeed {
    pub token: String,
    pub user_id: String,
    pub role: Role,
}

impl ServiceConfig {
    /// Load from `path` (or the default location) and apply env overrides
    pub fn load(path: Option<&std::path::Path>) -> Result<Self> {
        let default_path = lgx_common::config::default_config_path(SERVICE_NAME);
        let path = path.map(PathBuf::from).or(default_path);

        if let Some(path) = &path {
            info!("Loading configuration from {}", path.display());
        }
        let mut config: ServiceConfig = lgx_common::config::load_toml(path.as_deref())?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Secrets may come from the environment instead of the TOML file
    pub fn apply_env_overrides(&mut self) {
        if let Some(url) = non_empty_env(ERP_BASE_URL_ENV) {
            info!("ERP base URL taken from {}", ERP_BASE_URL_ENV);
            self.erp.base_url = url;
        }
        if let Some(token) = non_empty_env(ERP_API_TOKEN_ENV) {
            if self.erp.api_token.is_some() {
                warn!("ERP API token set in both TOML and {}; using environment", ERP_API_TOKEN_ENV);
            }
            self.erp.api_token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.erp.base_url.trim().is_empty() {
            return Err(Error::Config("erp.base_url must not be empty".to_string()));
        }
        if self.photos.max_bytes == 0 {
            return Err(Error::Config("photos.max_bytes must be positive".to_string()));
        }
        if self.sessions.iter().any(|s| s.token.trim().is_empty()) {
            return Err(Error::Config("sessions[].token must not be empty".to_string()));
        }
        Ok(())
    }

    /// Root folder per CLI > env > TOML > OS default
    pub fn resolve_root_folder(&self, cli_root: Option<&std::path::Path>) -> PathBuf {
        lgx_common::config::resolve_root_folder(cli_root, ROOT_FOLDER_ENV, self.root_folder.as_deref())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        let policy = config.sync.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(30));
        assert_eq!(policy.attempt_timeout, Duration::from_secs(10));
        assert_eq!(config.offline.queue_policy().ttl, Duration::from_secs(86_400));
        assert_eq!(config.offline.queue_policy().max_attempts, 5);
        assert_eq!(config.photos.limits().max_bytes, 5 * 1024 * 1024);
        assert!(config.device_id.is_none());
    }

    #[test]
    fn test_partial_toml() {
        let config: ServiceConfig = toml::from_str(
            r#"
            device_id = "van-12"

            [sync]
            max_attempts = 5

            [[sessions]]
            token = "secret"
            user_id = "driver-7"
            role = "driver"
            "#,
        )
        .unwrap();

        assert_eq!(config.device_id.as_deref(), Some("van-12"));
        assert_eq!(config.sync.max_attempts, 5);
        assert_eq!(config.sync.max_concurrent, 4);
        assert_eq!(config.sessions.len(), 1);
        assert_eq!(config.sessions[0].role, Role::Driver);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = ServiceConfig::default();
        config.photos.max_bytes = 0;
        assert!(config.validate().is_err());
    }
}
