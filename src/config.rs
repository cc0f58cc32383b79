use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{OutlookError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub graph: GraphConfig,
    #[serde(default)]
    pub purge: PurgeSettings,
    #[serde(default)]
    pub list: ListConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_authority")]
    pub authority: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            authority: default_authority(),
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeSettings {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_concurrent_deletes")]
    pub max_concurrent_deletes: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default = "default_before_date")]
    pub before_date: String,
}

impl Default for PurgeSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_concurrent_deletes: default_max_concurrent_deletes(),
            page_size: default_page_size(),
            before_date: default_before_date(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    #[serde(default = "default_top")]
    pub top: u32,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self { top: default_top() }
    }
}

fn default_base_url() -> String {
    "https://graph.microsoft.com/v1.0".to_string()
}

fn default_authority() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_batch_size() -> usize {
    50
}

fn default_max_concurrent_deletes() -> usize {
    10
}

fn default_page_size() -> usize {
    100
}

fn default_before_date() -> String {
    "2024-01-01".to_string()
}

fn default_top() -> u32 {
    100
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| OutlookError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| OutlookError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    OutlookError::ConfigError(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| OutlookError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| OutlookError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("graph.base_url", &self.graph.base_url),
            ("graph.authority", &self.graph.authority),
        ] {
            if !value.starts_with("http://") && !value.starts_with("https://") {
                return Err(OutlookError::ConfigError(format!(
                    "{} must be an http(s) URL, got '{}'",
                    name, value
                )));
            }
        }

        if self.graph.request_timeout_secs == 0 {
            return Err(OutlookError::ConfigError(
                "graph.request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.graph.max_retries > 10 {
            return Err(OutlookError::ConfigError(
                "graph.max_retries cannot exceed 10".to_string(),
            ));
        }

        if self.purge.batch_size == 0 {
            return Err(OutlookError::ConfigError(
                "purge.batch_size must be at least 1".to_string(),
            ));
        }

        if self.purge.max_concurrent_deletes == 0 {
            return Err(OutlookError::ConfigError(
                "purge.max_concurrent_deletes must be at least 1".to_string(),
            ));
        }
        if self.purge.max_concurrent_deletes > 50 {
            return Err(OutlookError::ConfigError(
                "purge.max_concurrent_deletes cannot exceed 50".to_string(),
            ));
        }

        if self.purge.page_size == 0 || self.purge.page_size > 1000 {
            return Err(OutlookError::ConfigError(
                "purge.page_size must be between 1 and 1000".to_string(),
            ));
        }

        if self.list.top == 0 || self.list.top > 1000 {
            return Err(OutlookError::ConfigError(
                "list.top must be between 1 and 1000".to_string(),
            ));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
