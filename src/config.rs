use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use crate::auth::TOKEN_URL_BASE;
use crate::client::retry::Backoff;
use crate::client::BASE_URL;
use crate::export::DEFAULT_SOURCES;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub export: ExportConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_request_timeout() -> u64 {
    15
}

#[derive(Deserialize, Clone)]
pub struct ApiConfig {
    #[serde(default)]
    pub bot_id: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_token_url_base")]
    pub token_url_base: String,
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bot_id: String::new(),
            api_key: String::new(),
            base_url: default_base_url(),
            token_url_base: default_token_url_base(),
            http_timeout_secs: default_http_timeout(),
        }
    }
}

// api_key stays out of logs
impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("bot_id", &self.bot_id)
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("token_url_base", &self.token_url_base)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish()
    }
}

fn default_base_url() -> String {
    BASE_URL.to_string()
}

fn default_token_url_base() -> String {
    TOKEN_URL_BASE.to_string()
}

fn default_http_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_base_ms),
            Duration::from_millis(self.backoff_max_ms),
        )
    }
}

fn default_backoff_base() -> u64 {
    500
}

fn default_backoff_max() -> u64 {
    30_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_sources")]
    pub default_sources: Vec<String>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            concurrency: default_concurrency(),
            default_sources: default_sources(),
        }
    }
}

fn default_limit() -> u32 {
    10
}

fn default_concurrency() -> usize {
    1
}

fn default_sources() -> Vec<String> {
    DEFAULT_SOURCES.iter().map(|s| s.to_string()).collect()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.api.bot_id.trim().is_empty() {
            return Err("api.bot_id must be set. \
                 Set it in config.toml, via KINDLY_EXPORT__API__BOT_ID or --bot-id."
                .to_string());
        }
        if self.api.api_key.trim().is_empty() {
            return Err("api.api_key must be set. \
                 Set it in config.toml, via KINDLY_EXPORT__API__API_KEY or --api-key."
                .to_string());
        }
        if self.export.concurrency == 0 {
            return Err("export.concurrency must be at least 1".to_string());
        }
        if self.retry.backoff_base_ms > self.retry.backoff_max_ms {
            return Err("retry.backoff_base_ms must not exceed retry.backoff_max_ms".to_string());
        }
        Ok(())
    }

    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder();

        let path = config_path.unwrap_or("config.toml");
        builder = builder.add_source(File::with_name(path).required(false));

        // KINDLY_EXPORT__API__BOT_ID=123, KINDLY_EXPORT__SERVER__PORT=9000, ...
        builder = builder.add_source(
            Environment::with_prefix("KINDLY_EXPORT")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
