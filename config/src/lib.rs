//! Configuration loading and validation.
//!
//! Raw TOML deserialization structs (with `Option` fields and loose numbers)
//! stay private in this crate. [`AiConfig::from_toml_str`] resolves them into
//! validated types at the parse boundary -- existence of a value is the proof
//! of its validity.
//!
//! ```toml
//! provider = "openai"
//! api_key = "sk-..."
//! model = "gpt-4o-mini"
//! temperature = 1.0
//! max_context_tokens = 4096
//!
//! [breaker]
//! max_failures = 5
//! reset_interval_secs = 30
//!
//! [retry]
//! max_attempts = 3
//! initial_interval_ms = 100
//! ```
//!
//! The `CONFAB_API_KEY` environment variable overrides `api_key` so secrets
//! can stay out of config files.

use std::path::Path;
use std::time::Duration;

use confab_resilience::{BreakerConfig, RetryPolicy};
use serde::Deserialize;

const API_KEY_ENV: &str = "CONFAB_API_KEY";

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

const DEFAULT_TEMPERATURE: f64 = 1.0;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_MAX_CONTEXT_TOKENS: u32 = 4096;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(String),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("api_key must not be empty (set it in the config file or {API_KEY_ENV})")]
    MissingApiKey,
    #[error("temperature {0} is outside [0.0, 2.0]")]
    TemperatureOutOfRange(f64),
    #[error("max_context_tokens must be greater than zero")]
    ZeroContextWindow,
    #[error("breaker.max_failures must be greater than zero")]
    ZeroMaxFailures,
    #[error("retry.max_attempts must be greater than zero")]
    ZeroMaxAttempts,
    #[error("retry.multiplier must be at least 1.0, got {0}")]
    MultiplierTooSmall(f64),
    #[error("retry.random_factor {0} is outside [0.0, 1.0]")]
    RandomFactorOutOfRange(f64),
}

/// Which provider wire protocol to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    OpenAi,
    Gemini,
}

impl ProviderKind {
    #[must_use]
    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_BASE_URL,
            Self::Gemini => DEFAULT_GEMINI_BASE_URL,
        }
    }

    #[must_use]
    pub fn default_model(self) -> &'static str {
        match self {
            Self::OpenAi => DEFAULT_OPENAI_MODEL,
            Self::Gemini => DEFAULT_GEMINI_MODEL,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawBreakerConfig {
    max_failures: Option<u32>,
    reset_interval_secs: Option<u64>,
    half_open_limit: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct RawRetryConfig {
    max_attempts: Option<u32>,
    initial_interval_ms: Option<u64>,
    max_interval_ms: Option<u64>,
    multiplier: Option<f64>,
    random_factor: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    provider: ProviderKind,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    temperature: Option<f64>,
    request_timeout_secs: Option<u64>,
    max_context_tokens: Option<u32>,
    #[serde(default)]
    gemini_search_grounding: bool,
    #[serde(default)]
    breaker: RawBreakerConfig,
    #[serde(default)]
    retry: RawRetryConfig,
}

/// Fully validated configuration for the AI interaction layer.
#[derive(Debug, Clone)]
pub struct AiConfig {
    provider: ProviderKind,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f64,
    request_timeout: Duration,
    max_context_tokens: u32,
    gemini_search_grounding: bool,
    breaker: BreakerConfig,
    retry: RetryPolicy,
}

impl AiConfig {
    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::resolve(raw, std::env::var(API_KEY_ENV).ok())
    }

    fn resolve(raw: RawConfig, env_api_key: Option<String>) -> Result<Self, ConfigError> {
        let api_key = env_api_key
            .filter(|k| !k.trim().is_empty())
            .or(raw.api_key)
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let temperature = raw.temperature.unwrap_or(DEFAULT_TEMPERATURE);
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::TemperatureOutOfRange(temperature));
        }

        let max_context_tokens = raw.max_context_tokens.unwrap_or(DEFAULT_MAX_CONTEXT_TOKENS);
        if max_context_tokens == 0 {
            return Err(ConfigError::ZeroContextWindow);
        }

        let request_timeout = Duration::from_secs(
            raw.request_timeout_secs
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );

        let defaults = BreakerConfig::default();
        let breaker = BreakerConfig {
            max_failures: raw.breaker.max_failures.unwrap_or(defaults.max_failures),
            reset_interval: raw
                .breaker
                .reset_interval_secs
                .map_or(defaults.reset_interval, Duration::from_secs),
            half_open_limit: raw
                .breaker
                .half_open_limit
                .unwrap_or(defaults.half_open_limit),
            call_timeout: request_timeout,
        };
        if breaker.max_failures == 0 {
            return Err(ConfigError::ZeroMaxFailures);
        }

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: raw.retry.max_attempts.unwrap_or(defaults.max_attempts),
            initial_interval: raw
                .retry
                .initial_interval_ms
                .map_or(defaults.initial_interval, Duration::from_millis),
            max_interval: raw
                .retry
                .max_interval_ms
                .map_or(defaults.max_interval, Duration::from_millis),
            multiplier: raw.retry.multiplier.unwrap_or(defaults.multiplier),
            random_factor: raw.retry.random_factor.unwrap_or(defaults.random_factor),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::ZeroMaxAttempts);
        }
        if retry.multiplier < 1.0 {
            return Err(ConfigError::MultiplierTooSmall(retry.multiplier));
        }
        if !(0.0..=1.0).contains(&retry.random_factor) {
            return Err(ConfigError::RandomFactorOutOfRange(retry.random_factor));
        }

        let base_url = raw
            .base_url
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| raw.provider.default_base_url().to_string());
        let base_url = base_url.trim_end_matches('/').to_string();

        let model = raw
            .model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| raw.provider.default_model().to_string());

        Ok(Self {
            provider: raw.provider,
            api_key,
            base_url,
            model,
            temperature,
            request_timeout,
            max_context_tokens,
            gemini_search_grounding: raw.gemini_search_grounding,
            breaker,
            retry,
        })
    }

    #[must_use]
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    #[must_use]
    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    #[must_use]
    pub fn max_context_tokens(&self) -> u32 {
        self.max_context_tokens
    }

    #[must_use]
    pub fn gemini_search_grounding(&self) -> bool {
        self.gemini_search_grounding
    }

    #[must_use]
    pub fn breaker(&self) -> BreakerConfig {
        self.breaker
    }

    #[must_use]
    pub fn retry(&self) -> RetryPolicy {
        self.retry
    }

    /// Test-oriented constructor: point a provider at an arbitrary base URL
    /// with everything else defaulted.
    pub fn for_base_url(
        provider: ProviderKind,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        Self::resolve(
            RawConfig {
                provider,
                api_key: Some(api_key.into()),
                base_url: Some(base_url.into()),
                model: None,
                temperature: None,
                request_timeout_secs: None,
                max_context_tokens: None,
                gemini_search_grounding: false,
                breaker: RawBreakerConfig::default(),
                retry: RawRetryConfig::default(),
            },
            None,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::{AiConfig, ConfigError, ProviderKind};
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn minimal_config_gets_provider_defaults() {
        let config = AiConfig::from_toml_str(
            r#"
            provider = "openai"
            api_key = "sk-test"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider(), ProviderKind::OpenAi);
        assert_eq!(config.base_url(), "https://api.openai.com/v1");
        assert_eq!(config.model(), "gpt-4o-mini");
        assert_eq!(config.max_context_tokens(), 4096);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry().max_attempts, 3);
        assert_eq!(config.breaker().max_failures, 5);
    }

    #[test]
    fn gemini_defaults_differ_from_openai() {
        let config = AiConfig::from_toml_str(
            r#"
            provider = "gemini"
            api_key = "test"
            "#,
        )
        .unwrap();

        assert_eq!(config.provider(), ProviderKind::Gemini);
        assert!(config.base_url().contains("generativelanguage"));
        assert_eq!(config.model(), "gemini-2.0-flash");
    }

    #[test]
    fn explicit_values_override_defaults() {
        let config = AiConfig::from_toml_str(
            r#"
            provider = "openai"
            api_key = "sk-test"
            base_url = "http://localhost:9000/v1/"
            model = "gpt-test"
            temperature = 0.5
            request_timeout_secs = 5
            max_context_tokens = 1000

            [breaker]
            max_failures = 2
            reset_interval_secs = 1
            half_open_limit = 3

            [retry]
            max_attempts = 5
            initial_interval_ms = 50
            max_interval_ms = 2000
            multiplier = 3.0
            random_factor = 0.1
            "#,
        )
        .unwrap();

        // Trailing slash is normalized away
        assert_eq!(config.base_url(), "http://localhost:9000/v1");
        assert_eq!(config.model(), "gpt-test");
        assert!((config.temperature() - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.breaker().half_open_limit, 3);
        // The breaker's per-call deadline comes from the request timeout.
        assert_eq!(config.breaker().call_timeout, Duration::from_secs(5));
        assert_eq!(config.retry().initial_interval, Duration::from_millis(50));
        assert!((config.retry().multiplier - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn missing_api_key_is_rejected() {
        let err = AiConfig::from_toml_str(r#"provider = "openai""#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingApiKey));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let err = AiConfig::from_toml_str(
            r#"
            provider = "openai"
            api_key = "sk-test"
            temperature = 3.5
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TemperatureOutOfRange(_)));
    }

    #[test]
    fn zero_retry_attempts_is_rejected() {
        let err = AiConfig::from_toml_str(
            r#"
            provider = "openai"
            api_key = "sk-test"

            [retry]
            max_attempts = 0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroMaxAttempts));
    }

    #[test]
    fn unknown_provider_fails_parse() {
        let err = AiConfig::from_toml_str(
            r#"
            provider = "anthropic"
            api_key = "sk-test"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "provider = \"gemini\"").unwrap();
        writeln!(file, "api_key = \"test\"").unwrap();
        file.flush().unwrap();

        let config = AiConfig::from_toml_path(file.path()).unwrap();
        assert_eq!(config.provider(), ProviderKind::Gemini);
    }
}
