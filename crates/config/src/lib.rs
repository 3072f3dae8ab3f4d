//! Configuration loading, validation, and management for parley.
//!
//! Loads configuration from `$PARLEY_CONFIG` or `~/.parley/config.toml` with
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.parley/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Upstream API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of the OpenAI-compatible upstream
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Model used when neither the request nor the strategy names one
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-user usage limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Context assembly
    #[serde(default)]
    pub context: ContextConfig,

    /// Upstream retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Upstream timeouts
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Per-operation parameter overrides, keyed by operation name
    #[serde(default)]
    pub strategies: HashMap<String, StrategyConfig>,

    /// Optional operations
    #[serde(default)]
    pub features: FeaturesConfig,

    /// Search backends
    #[serde(default)]
    pub search: SearchConfig,

    /// Persistence
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_true() -> bool {
    true
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .field("limits", &self.limits)
            .field("context", &self.context)
            .field("retry", &self.retry)
            .field("upstream", &self.upstream)
            .field("strategies", &self.strategies)
            .field("features", &self.features)
            .field("search", &self.search)
            .field("store", &self.store)
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl std::fmt::Debug for SearchConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchConfig")
            .field("web_backend", &self.web_backend)
            .field("searxng_url", &self.searxng_url)
            .field("youtube_api_key", &redact(&self.youtube_api_key))
            .field("max_results", &self.max_results)
            .finish()
    }
}

/// Sliding-window usage limits, applied per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests_per_window: u32,

    #[serde(default = "default_max_tokens_per_window")]
    pub max_tokens_per_window: u64,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Tokens charged at admission before the real count is known
    #[serde(default = "default_estimated_tokens")]
    pub estimated_tokens_per_request: u64,
}

fn default_max_requests() -> u32 {
    60
}
fn default_max_tokens_per_window() -> u64 {
    100_000
}
fn default_window_secs() -> u64 {
    60
}
fn default_estimated_tokens() -> u64 {
    1000
}

impl LimitsConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_requests_per_window: default_max_requests(),
            max_tokens_per_window: default_max_tokens_per_window(),
            window_secs: default_window_secs(),
            estimated_tokens_per_request: default_estimated_tokens(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_max_history")]
    pub max_conversation_history: usize,
}

fn default_max_history() -> usize {
    50
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_conversation_history: default_max_history(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    2000
}
fn default_max_delay_ms() -> u64 {
    10_000
}
fn default_jitter_ms() -> u64 {
    250
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Timeout of a single attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Hard bound across all attempts and backoff sleeps
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_deadline_secs() -> u64 {
    120
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            deadline_secs: default_deadline_secs(),
        }
    }
}

/// Overrides for one operation. Unset fields fall through to the strategy's defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_true")]
    pub web_search: bool,

    #[serde(default = "default_true")]
    pub image_analysis: bool,
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            web_search: true,
            image_analysis: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchBackend {
    /// No retrieval; the search operation answers uncited
    #[default]
    None,
    Searxng,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub web_backend: WebSearchBackend,

    /// Base URL of a SearXNG instance with the JSON format enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub searxng_url: Option<String>,

    /// YouTube Data API v3 key for the video_search operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_api_key: Option<String>,

    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_max_results() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            web_backend: WebSearchBackend::None,
            searxng_url: None,
            youtube_api_key: None,
            max_results: default_max_results(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Sqlite,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    /// SQLite database file; a leading `~/` expands to the home directory
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "~/.parley/parley.db".into()
}

impl StoreConfig {
    /// The database path with `~/` expanded.
    pub fn resolved_path(&self) -> PathBuf {
        match self.path.strip_prefix("~/") {
            Some(rest) => dirs_home().join(rest),
            None => PathBuf::from(&self.path),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            path: default_store_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    8600
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_max_body_bytes() -> usize {
    // Room for an inline base64 image.
    8 * 1024 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from `$PARLEY_CONFIG` or the default path
    /// (`~/.parley/config.toml`).
    ///
    /// Environment overrides:
    /// - `PARLEY_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `PARLEY_MODEL`
    /// - `PARLEY_API_URL`
    /// - `PARLEY_DATABASE`
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&Self::config_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config = Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })?;
        Ok(config)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(key) = var("PARLEY_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(model) = var("PARLEY_MODEL") {
            self.default_model = model;
        }
        if let Some(url) = var("PARLEY_API_URL") {
            self.api_url = url;
        }
        if let Some(path) = var("PARLEY_DATABASE") {
            self.store.path = path;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".parley")
    }

    /// The file [`AppConfig::load`] reads: `$PARLEY_CONFIG`, else
    /// `config.toml` under [`AppConfig::config_dir`].
    pub fn config_path() -> PathBuf {
        std::env::var("PARLEY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_dir().join("config.toml"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if self.default_model.trim().is_empty() {
            return invalid("default_model must not be empty".into());
        }
        if self.limits.max_requests_per_window == 0 {
            return invalid("limits.max_requests_per_window must be > 0".into());
        }
        if self.limits.max_tokens_per_window == 0 {
            return invalid("limits.max_tokens_per_window must be > 0".into());
        }
        if self.limits.window_secs == 0 {
            return invalid("limits.window_secs must be > 0".into());
        }
        if self.context.max_conversation_history == 0 {
            return invalid("context.max_conversation_history must be > 0".into());
        }
        if self.retry.max_attempts == 0 {
            return invalid("retry.max_attempts must be > 0".into());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms".into());
        }
        if self.upstream.timeout_secs == 0 {
            return invalid("upstream.timeout_secs must be > 0".into());
        }
        if self.upstream.timeout_secs > self.upstream.deadline_secs {
            return invalid("upstream.timeout_secs must not exceed upstream.deadline_secs".into());
        }
        if self.search.max_results == 0 {
            return invalid("search.max_results must be > 0".into());
        }
        if self.search.web_backend == WebSearchBackend::Searxng && self.search.searxng_url.is_none() {
            return invalid("search.searxng_url is required when web_backend = \"searxng\"".into());
        }
        for (name, strategy) in &self.strategies {
            if let Some(t) = strategy.temperature
                && !(0.0..=2.0).contains(&t)
            {
                return invalid(format!("strategies.{name}.temperature must be between 0.0 and 2.0"));
            }
            if strategy.max_tokens == Some(0) {
                return invalid(format!("strategies.{name}.max_tokens must be > 0"));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.as_deref().is_some_and(|k| !k.is_empty())
    }

    /// Generate a default config TOML string (for `config --default`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_url: default_api_url(),
            default_model: default_model(),
            limits: LimitsConfig::default(),
            context: ContextConfig::default(),
            retry: RetryConfig::default(),
            upstream: UpstreamConfig::default(),
            strategies: HashMap::new(),
            features: FeaturesConfig::default(),
            search: SearchConfig::default(),
            store: StoreConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_model, "gpt-4o-mini");
        assert_eq!(config.limits.max_requests_per_window, 60);
        assert_eq!(config.context.max_conversation_history, 50);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.upstream.timeout_secs, 30);
        assert_eq!(config.gateway.port, 8600);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_model, config.default_model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            default_model = "gpt-4o"

            [limits]
            max_requests_per_window = 5

            [strategies.code_assistant]
            temperature = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.limits.max_requests_per_window, 5);
        assert_eq!(config.limits.window_secs, 60);
        assert_eq!(config.strategies["code_assistant"].temperature, Some(0.1));
        assert!(config.strategies["code_assistant"].max_tokens.is_none());
    }

    #[test]
    fn invalid_strategy_temperature_rejected() {
        let mut config = AppConfig::default();
        config.strategies.insert(
            "chat".into(),
            StrategyConfig {
                temperature: Some(5.0),
                ..Default::default()
            },
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn base_delay_above_max_rejected() {
        let mut config = AppConfig::default();
        config.retry.base_delay_ms = 20_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("base_delay_ms"));
    }

    #[test]
    fn timeout_above_deadline_rejected() {
        let mut config = AppConfig::default();
        config.upstream.timeout_secs = 300;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn searxng_requires_url() {
        let mut config = AppConfig::default();
        config.search.web_backend = WebSearchBackend::Searxng;
        assert!(config.validate().is_err());
        config.search.searxng_url = Some("http://localhost:8888".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_model, "gpt-4o-mini");
    }

    #[test]
    fn load_from_reports_parse_errors_with_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "limits = [not valid").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => assert_eq!(path, file.path()),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn env_overrides_take_priority() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| match key {
            "OPENAI_API_KEY" => Some("sk-openai".into()),
            "PARLEY_API_KEY" => Some("sk-parley".into()),
            "PARLEY_MODEL" => Some("gpt-4o".into()),
            "PARLEY_DATABASE" => Some("/var/lib/parley.db".into()),
            _ => None,
        });
        assert_eq!(config.api_key.as_deref(), Some("sk-parley"));
        assert_eq!(config.default_model, "gpt-4o");
        assert_eq!(config.store.resolved_path(), PathBuf::from("/var/lib/parley.db"));
        assert_eq!(config.api_url, "https://api.openai.com/v1");
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig::default();
        config.api_key = Some("sk-secret".into());
        config.search.youtube_api_key = Some("yt-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("yt-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn store_path_expands_home() {
        let store = StoreConfig::default();
        let resolved = store.resolved_path();
        assert!(resolved.ends_with(".parley/parley.db"));
        assert!(!resolved.to_string_lossy().starts_with('~'));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-mini"));
        assert!(toml_str.contains("8600"));
        assert!(toml_str.contains("[retry]"));
    }
}
