use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub engine: EngineConfig,
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// First half of every `"<chain>:<height>"` block height.
    pub chain_id: String,
    /// Delay between a request completing and the engine closing it.
    pub auto_close_grace_ms: u64,
    /// Lifetime of consent requests opened for identity changes.
    pub identity_request_timeout_secs: u64,
}

impl EngineConfig {
    pub fn auto_close_grace(&self) -> Duration {
        Duration::from_millis(self.auto_close_grace_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chain_id: "ndid-chain".to_string(),
            auto_close_grace_ms: 1_000,
            identity_request_timeout_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt HTTP timeout for callback POSTs.
    pub request_timeout_ms: u64,
    /// Record callbacks in memory instead of POSTing them.
    pub mock_callbacks: bool,
}

impl DispatcherConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 200,
            max_backoff_ms: 30_000,
            request_timeout_ms: 5_000,
            mock_callbacks: false,
        }
    }
}

impl IdentityConfig {
    pub fn load() -> Result<Self, AppError> {
        let mut common = core_config::Config::load()?;
        let is_prod = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string()) == "prod";

        if let Ok(level) = env::var("LOG_LEVEL") {
            common.log_level = level;
        }
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            common.otlp_endpoint = Some(endpoint).filter(|e| !e.is_empty());
        }

        Ok(IdentityConfig {
            common,
            engine: EngineConfig {
                chain_id: get_env("CHAIN_ID", Some("ndid-chain"), is_prod)?,
                auto_close_grace_ms: parse_env("AUTO_CLOSE_GRACE_MS", "1000", is_prod)?,
                identity_request_timeout_secs: parse_env(
                    "IDENTITY_REQUEST_TIMEOUT_SECS",
                    "86400",
                    is_prod,
                )?,
            },
            dispatcher: DispatcherConfig {
                initial_backoff_ms: parse_env("CALLBACK_INITIAL_BACKOFF_MS", "200", is_prod)?,
                max_backoff_ms: parse_env("CALLBACK_MAX_BACKOFF_MS", "30000", is_prod)?,
                request_timeout_ms: parse_env("CALLBACK_TIMEOUT_MS", "5000", is_prod)?,
                mock_callbacks: env::var("MOCK_CALLBACKS")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
        })
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            common: core_config::Config::default(),
            engine: EngineConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env(key: &str, default: &str, is_prod: bool) -> Result<u64, AppError> {
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("{} is not a number: {}", key, e)))
}
