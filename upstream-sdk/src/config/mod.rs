//! Configuration management for the upstream clients
//!
//! Values come from a `ConfigProvider`; the default provider reads
//! environment variables, so `OPENAI_API_KEY` or `DATASET_REMOTE_URL`
//! set in the process environment (or a `.env` file loaded by the host)
//! feed straight into `CompletionConfig` and `DatasetConfig`.

use std::collections::HashMap;
use std::env;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::resilience::RetryConfig;

/// Public bucket the dataset is published to
pub const DEFAULT_DATASET_URL: &str =
    "https://storage.googleapis.com/virtualed-466321_cloudbuild/Master_Excel.csv";

/// Copy bundled with the deployment
pub const DEFAULT_DATASET_PATH: &str = "data/Master_Excel.csv";

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub const DEFAULT_COMPLETION_MODEL: &str = "gpt-4o-mini";

/// Base trait for configuration providers
pub trait ConfigProvider: Send + Sync {
    /// Get a string configuration value
    fn get_string(&self, key: &str) -> Result<String>;
}

/// Extension methods for configuration providers
pub trait ConfigProviderExt: ConfigProvider {
    /// Get an integer configuration value
    fn get_int(&self, key: &str) -> Result<i64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<i64>()
            .map_err(|e| ServiceError::configuration(format!("Invalid integer for key {}: {}", key, e)))
    }

    /// Get a float configuration value
    fn get_float(&self, key: &str) -> Result<f64> {
        let value = self.get_string(key)?;
        value
            .trim()
            .parse::<f64>()
            .map_err(|e| ServiceError::configuration(format!("Invalid float for key {}: {}", key, e)))
    }

    fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|_| default.to_string())
    }

    fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    /// Non-negative integer with a default; negatives fall back to the default
    fn get_u64_or(&self, key: &str, default: u64) -> u64 {
        u64::try_from(self.get_int_or(key, default as i64)).unwrap_or(default)
    }
}

impl<T: ConfigProvider + ?Sized> ConfigProviderExt for T {}

/// Environment variable based configuration provider
#[derive(Debug, Clone, Default)]
pub struct EnvConfigProvider {
    /// Optional prefix for environment variables
    prefix: Option<String>,
}

impl EnvConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a prefix for environment variables
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Format a configuration key as an environment variable
    fn format_key(&self, key: &str) -> String {
        let mut env_key = String::new();

        if let Some(ref prefix) = self.prefix {
            env_key.push_str(prefix);
            env_key.push('_');
        }

        env_key.push_str(&key.to_uppercase().replace(|c: char| !c.is_ascii_alphanumeric(), "_"));
        env_key
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        let env_key = self.format_key(key);

        match env::var(&env_key) {
            Ok(value) if !value.trim().is_empty() => Ok(value),
            Ok(_) => Err(ServiceError::configuration(format!("Environment variable is empty: {}", env_key))),
            Err(env::VarError::NotPresent) => {
                Err(ServiceError::configuration(format!("Environment variable not set: {}", env_key)))
            }
            Err(env::VarError::NotUnicode(_)) => Err(ServiceError::configuration(format!(
                "Environment variable is not valid unicode: {}",
                env_key
            ))),
        }
    }
}

/// In-memory config provider for testing or static configuration
#[derive(Debug, Clone, Default)]
pub struct MemoryConfigProvider {
    values: HashMap<String, String>,
}

impl MemoryConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: ToString,
    {
        self.values.insert(key.into(), value.to_string());
    }
}

impl ConfigProvider for MemoryConfigProvider {
    fn get_string(&self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .cloned()
            .ok_or_else(|| ServiceError::configuration(format!("Configuration key not found: {}", key)))
    }
}

/// Global default configuration provider
pub static DEFAULT_PROVIDER: Lazy<Arc<EnvConfigProvider>> = Lazy::new(|| Arc::new(EnvConfigProvider::new()));

/// Trait for component-specific configuration
pub trait ServiceConfig: Debug + Send + Sync {
    /// Validate this configuration
    fn validate(&self) -> Result<()>;

    /// Service name
    fn service_name(&self) -> &str;
}

/// Where the dataset lives and how long to wait for it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    pub remote_url: String,
    pub local_path: String,
    pub timeout_seconds: u64,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            remote_url: DEFAULT_DATASET_URL.to_string(),
            local_path: DEFAULT_DATASET_PATH.to_string(),
            timeout_seconds: 10,
        }
    }
}

impl DatasetConfig {
    /// Load configuration from a config provider
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let config = Self {
            remote_url: provider.get_string_or("dataset_remote_url", DEFAULT_DATASET_URL),
            local_path: provider.get_string_or("dataset_local_path", DEFAULT_DATASET_PATH),
            timeout_seconds: provider.get_u64_or("dataset_timeout_seconds", 10),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

impl ServiceConfig for DatasetConfig {
    fn validate(&self) -> Result<()> {
        if !(self.remote_url.starts_with("http://") || self.remote_url.starts_with("https://")) {
            return Err(ServiceError::configuration(format!(
                "Dataset remote URL must be http(s): {}",
                self.remote_url
            )));
        }

        if self.local_path.is_empty() {
            return Err(ServiceError::configuration("Dataset local path is required"));
        }

        if self.timeout_seconds == 0 {
            return Err(ServiceError::configuration("Dataset timeout must be at least one second"));
        }

        Ok(())
    }

    fn service_name(&self) -> &str {
        "dataset"
    }
}

/// Completion API access and retry limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
    /// Per-attempt deadline
    pub timeout_seconds: u64,
    pub max_attempts: u32,
    pub max_history: usize,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            max_output_tokens: 512,
            temperature: None,
            timeout_seconds: 30,
            max_attempts: 3,
            max_history: 20,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8_000,
        }
    }
}

impl CompletionConfig {
    /// Load configuration from a config provider
    pub fn from_provider<P: ConfigProvider + ?Sized>(provider: &P) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            api_key: provider.get_string("openai_api_key")?,
            base_url: provider.get_string_or("openai_base_url", DEFAULT_OPENAI_BASE_URL),
            model: provider.get_string_or("openai_model", DEFAULT_COMPLETION_MODEL),
            max_output_tokens: u32_setting(provider, "completion_max_output_tokens", defaults.max_output_tokens)?,
            temperature: provider.get_float("completion_temperature").ok().map(|t| t as f32),
            timeout_seconds: provider.get_u64_or("completion_timeout_seconds", defaults.timeout_seconds),
            max_attempts: u32_setting(provider, "completion_max_attempts", defaults.max_attempts)?,
            max_history: provider.get_u64_or("completion_max_history", defaults.max_history as u64) as usize,
            initial_retry_delay_ms: provider
                .get_u64_or("completion_initial_retry_delay_ms", defaults.initial_retry_delay_ms),
            max_retry_delay_ms: provider.get_u64_or("completion_max_retry_delay_ms", defaults.max_retry_delay_ms),
        };

        config.validate()?;
        Ok(config)
    }

    /// Retry policy described by this configuration
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_interval: Duration::from_millis(self.initial_retry_delay_ms),
            max_interval: Duration::from_millis(self.max_retry_delay_ms),
            multiplier: 2.0,
            attempt_timeout: Some(Duration::from_secs(self.timeout_seconds)),
        }
    }
}

fn u32_setting<P: ConfigProvider + ?Sized>(provider: &P, key: &str, default: u32) -> Result<u32> {
    let value = provider.get_u64_or(key, u64::from(default));
    u32::try_from(value)
        .map_err(|_| ServiceError::configuration(format!("Value for key {} is too large: {}", key, value)))
}

impl ServiceConfig for CompletionConfig {
    fn validate(&self) -> Result<()> {
        if self.api_key.is_empty() {
            return Err(ServiceError::configuration("OpenAI API key is required"));
        }

        if self.base_url.is_empty() {
            return Err(ServiceError::configuration("OpenAI base URL is required"));
        }

        if self.model.is_empty() {
            return Err(ServiceError::configuration("Completion model is required"));
        }

        if self.timeout_seconds == 0 {
            return Err(ServiceError::configuration("Completion timeout must be at least one second"));
        }

        if self.max_attempts == 0 {
            return Err(ServiceError::configuration("Completion max attempts must be at least 1"));
        }

        if self.max_history == 0 {
            return Err(ServiceError::configuration("Completion history window must be at least 1"));
        }

        Ok(())
    }

    fn service_name(&self) -> &str {
        "openai"
    }
}
