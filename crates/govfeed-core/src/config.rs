//! Immutable per-collector configuration.
//!
//! Values are assembled once through [`CollectorConfigBuilder`] and validated
//! at `build()`. Presets exist for each supported source and environment tier;
//! nothing here reads the process environment.

use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::retry::RetryConfig;

pub const SEC_EDGAR_BASE_URL: &str = "https://data.sec.gov";
pub const FRED_BASE_URL: &str = "https://api.stlouisfed.org/fred";
pub const TREASURY_BASE_URL: &str = "https://api.fiscaldata.treasury.gov/services/api/fiscal_service";

const DEFAULT_USER_AGENT: &str = "govfeed/0.1 (data collection; contact@example.org)";

/// Deployment tier. Drives timeout and retry defaults in the presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Development => "dev",
            Self::Staging => "staging",
            Self::Production => "prod",
        }
    }

    pub const fn default_timeout(self) -> Duration {
        match self {
            Self::Development => Duration::from_secs(10),
            Self::Staging => Duration::from_secs(20),
            Self::Production => Duration::from_secs(30),
        }
    }

    pub const fn default_max_retries(self) -> u32 {
        match self {
            Self::Development => 1,
            Self::Staging => 3,
            Self::Production => 5,
        }
    }
}

impl Display for Environment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ValidationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Ok(Self::Development),
            "staging" => Ok(Self::Staging),
            "prod" | "production" => Ok(Self::Production),
            other => Err(ValidationError::InvalidEnvironment {
                value: other.to_owned(),
            }),
        }
    }
}

/// What a collector does when its own rate window is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitPolicy {
    /// Sleep until the window resets, then re-check.
    #[default]
    Wait,
    /// Fail fast and report the remaining symbols as skipped.
    Abort,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollectorConfig {
    base_url: String,
    api_key: Option<String>,
    rate_limit_per_minute: u32,
    burst_per_second: Option<u32>,
    timeout: Duration,
    environment: Environment,
    on_rate_limit: RateLimitPolicy,
    retry: RetryConfig,
    max_pages: u32,
    page_size: u32,
    user_agent: String,
    session_ttl: Duration,
}

impl CollectorConfig {
    pub fn builder(base_url: impl Into<String>) -> CollectorConfigBuilder {
        CollectorConfigBuilder::new(base_url)
    }

    /// SEC EDGAR: 600 requests/minute with a 10/second burst ceiling.
    pub fn sec_edgar(environment: Environment) -> CollectorConfigBuilder {
        CollectorConfigBuilder::new(SEC_EDGAR_BASE_URL)
            .with_environment(environment)
            .with_rate_limit_per_minute(600)
            .with_burst_per_second(10)
            .with_page_size(1_000)
    }

    /// FRED: 120 requests/minute, API key required.
    pub fn fred(environment: Environment, api_key: impl Into<String>) -> CollectorConfigBuilder {
        CollectorConfigBuilder::new(FRED_BASE_URL)
            .with_environment(environment)
            .with_api_key(api_key)
            .with_rate_limit_per_minute(120)
            .with_page_size(1_000)
    }

    /// Treasury Fiscal Data: 60 requests/minute.
    pub fn treasury(environment: Environment) -> CollectorConfigBuilder {
        CollectorConfigBuilder::new(TREASURY_BASE_URL)
            .with_environment(environment)
            .with_rate_limit_per_minute(60)
            .with_page_size(1_000)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    pub const fn rate_limit_per_minute(&self) -> u32 {
        self.rate_limit_per_minute
    }

    pub const fn burst_per_second(&self) -> Option<u32> {
        self.burst_per_second
    }

    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    pub const fn environment(&self) -> Environment {
        self.environment
    }

    pub const fn on_rate_limit(&self) -> RateLimitPolicy {
        self.on_rate_limit
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    pub const fn max_pages(&self) -> u32 {
        self.max_pages
    }

    pub const fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub const fn session_ttl(&self) -> Duration {
        self.session_ttl
    }
}

#[derive(Debug, Clone)]
pub struct CollectorConfigBuilder {
    base_url: String,
    api_key: Option<String>,
    rate_limit_per_minute: u32,
    burst_per_second: Option<u32>,
    timeout: Option<Duration>,
    environment: Environment,
    on_rate_limit: RateLimitPolicy,
    retry: Option<RetryConfig>,
    max_pages: u32,
    page_size: u32,
    user_agent: String,
    session_ttl: Duration,
}

impl CollectorConfigBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            rate_limit_per_minute: 60,
            burst_per_second: None,
            timeout: None,
            environment: Environment::Development,
            on_rate_limit: RateLimitPolicy::Wait,
            retry: None,
            max_pages: 50,
            page_size: 1_000,
            user_agent: String::from(DEFAULT_USER_AGENT),
            session_ttl: Duration::from_secs(3_600),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_rate_limit_per_minute(mut self, limit: u32) -> Self {
        self.rate_limit_per_minute = limit;
        self
    }

    pub fn with_burst_per_second(mut self, burst: u32) -> Self {
        self.burst_per_second = Some(burst);
        self
    }

    pub fn without_burst(mut self) -> Self {
        self.burst_per_second = None;
        self
    }

    /// Overrides the environment-derived timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn with_on_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.on_rate_limit = policy;
        self
    }

    /// Overrides the environment-derived retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn build(self) -> Result<CollectorConfig, ValidationError> {
        let base_url = self.base_url.trim().trim_end_matches('/').to_owned();
        if base_url.is_empty() {
            return Err(ValidationError::EmptyBaseUrl);
        }
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(ValidationError::InvalidBaseUrl { value: base_url });
        }
        if self.rate_limit_per_minute == 0 {
            return Err(ValidationError::NonPositive {
                field: "rate_limit_per_minute",
            });
        }
        if self.burst_per_second == Some(0) {
            return Err(ValidationError::NonPositive {
                field: "burst_per_second",
            });
        }
        let timeout = self
            .timeout
            .unwrap_or_else(|| self.environment.default_timeout());
        if timeout.is_zero() {
            return Err(ValidationError::NonPositive { field: "timeout" });
        }
        if self.max_pages == 0 {
            return Err(ValidationError::NonPositive { field: "max_pages" });
        }
        if self.page_size == 0 {
            return Err(ValidationError::NonPositive { field: "page_size" });
        }

        let retry = self
            .retry
            .unwrap_or_else(|| RetryConfig::exponential(self.environment.default_max_retries()));
        let api_key = self
            .api_key
            .map(|key| key.trim().to_owned())
            .filter(|key| !key.is_empty());

        Ok(CollectorConfig {
            base_url,
            api_key,
            rate_limit_per_minute: self.rate_limit_per_minute,
            burst_per_second: self.burst_per_second,
            timeout,
            environment: self.environment,
            on_rate_limit: self.on_rate_limit,
            retry,
            max_pages: self.max_pages,
            page_size: self.page_size,
            user_agent: self.user_agent,
            session_ttl: self.session_ttl,
        })
    }
}
