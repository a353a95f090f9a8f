//! Per-source settings
//!
//! The core never parses settings files. It reads keys from a
//! [`SettingsProvider`] and resolves them into an explicit [`SourceSettings`]
//! value that is handed to each client, so concurrent builds for different
//! geographies never share mutable configuration.

use crate::error::{LookupError, Result};
use std::collections::HashMap;
use std::time::Duration;

/// Hard ceiling on in-flight page requests per client
pub const MAX_PAGE_CONCURRENCY: usize = 8;

pub const DEFAULT_PAGE_SIZE: usize = 1000;
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_CONCURRENCY: usize = 2;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MIN_INTERVAL_MS: u64 = 200; // 5 req/sec to be safe
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;
pub const DEFAULT_BACKOFF_MAX_MS: u64 = 30_000;

/// Read-only key/value settings collaborator
pub trait SettingsProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// In-memory settings, mostly for tests and embedding
#[derive(Debug, Clone, Default)]
pub struct MapSettings {
    values: HashMap<String, String>,
}

impl MapSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }
}

impl SettingsProvider for MapSettings {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Environment-backed settings: `esri.page_size` is read from
/// `GEOLOOKUP_ESRI_PAGE_SIZE`. Loading a `.env` file is the host's job.
#[derive(Debug, Clone)]
pub struct EnvSettings {
    prefix: String,
}

impl EnvSettings {
    pub fn new() -> Self {
        Self::with_prefix("GEOLOOKUP")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    fn var_name(&self, key: &str) -> String {
        let suffix: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{}_{}", self.prefix, suffix)
    }
}

impl Default for EnvSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsProvider for EnvSettings {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(self.var_name(key))
            .ok()
            .filter(|v| !v.trim().is_empty())
    }
}

// =============================================================================
// Resolved settings
// =============================================================================

/// How requests authenticate against a source
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Credential {
    #[default]
    None,
    Bearer(String),
    /// Key embedded as a query parameter (e.g. NOMIS `uid=`)
    QueryKey { param: String, value: String },
}

// Keep secrets out of logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Bearer(_) => write!(f, "Bearer(***)"),
            Self::QueryKey { param, .. } => write!(f, "QueryKey({}=***)", param),
        }
    }
}

/// Exponential backoff parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per page, including the first
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            max_delay: Duration::from_millis(DEFAULT_BACKOFF_MAX_MS),
        }
    }
}

/// Everything a client needs to talk to one source
#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub source: String,
    pub base_url: String,
    pub credential: Credential,
    pub page_size: usize,
    pub retry: RetryPolicy,
    pub concurrency: usize,
    pub request_timeout: Duration,
    /// Minimum spacing between request starts
    pub min_interval: Duration,
}

impl SourceSettings {
    pub fn new(source: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            base_url: base_url.into(),
            credential: Credential::None,
            page_size: DEFAULT_PAGE_SIZE,
            retry: RetryPolicy::default(),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            min_interval: Duration::from_millis(DEFAULT_MIN_INTERVAL_MS),
        }
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.credential = credential;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_retries(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry.base_delay = base;
        self.retry.max_delay = max;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Resolve settings for `source` from a provider.
    ///
    /// `base_url` is required; every tunable falls back to its default.
    pub fn resolve(provider: &dyn SettingsProvider, source: &str) -> Result<Self> {
        let key = |name: &str| format!("{}.{}", source, name);

        let base_url = provider
            .get(&key("base_url"))
            .ok_or_else(|| LookupError::config(format!("{} not set", key("base_url"))))?;

        let credential = if let Some(token) = provider.get(&key("bearer_token")) {
            Credential::Bearer(token)
        } else if let Some(value) = provider.get(&key("api_key")) {
            let param = provider
                .get(&key("api_key_param"))
                .unwrap_or_else(|| "key".to_string());
            Credential::QueryKey { param, value }
        } else {
            Credential::None
        };

        let mut settings = Self::new(source, base_url).with_credential(credential);
        settings.page_size = parse_or(provider, &key("page_size"), DEFAULT_PAGE_SIZE)?;
        settings.retry.max_attempts =
            parse_or(provider, &key("max_retries"), DEFAULT_MAX_RETRIES)?;
        settings.concurrency = parse_or(provider, &key("concurrency"), DEFAULT_CONCURRENCY)?;
        settings.request_timeout = Duration::from_secs(parse_or(
            provider,
            &key("timeout_secs"),
            DEFAULT_TIMEOUT_SECS,
        )?);
        settings.min_interval = Duration::from_millis(parse_or(
            provider,
            &key("min_interval_ms"),
            DEFAULT_MIN_INTERVAL_MS,
        )?);
        settings.retry.base_delay = Duration::from_millis(parse_or(
            provider,
            &key("backoff_base_ms"),
            DEFAULT_BACKOFF_BASE_MS,
        )?);
        settings.retry.max_delay = Duration::from_millis(parse_or(
            provider,
            &key("backoff_max_ms"),
            DEFAULT_BACKOFF_MAX_MS,
        )?);

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values that would break the retry or rate-limit contract
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(LookupError::config(format!(
                "{}: base_url is empty",
                self.source
            )));
        }
        if self.page_size == 0 {
            return Err(LookupError::config(format!(
                "{}: page_size must be positive",
                self.source
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(LookupError::config(format!(
                "{}: max_retries must be at least 1",
                self.source
            )));
        }
        if self.request_timeout.is_zero() {
            return Err(LookupError::config(format!(
                "{}: timeout_secs must be positive",
                self.source
            )));
        }
        if self.concurrency == 0 || self.concurrency > MAX_PAGE_CONCURRENCY {
            return Err(LookupError::config(format!(
                "{}: concurrency must be between 1 and {} (got {})",
                self.source, MAX_PAGE_CONCURRENCY, self.concurrency
            )));
        }
        Ok(())
    }
}

fn parse_or<T>(provider: &dyn SettingsProvider, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match provider.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| LookupError::config(format!("{}: invalid value '{}': {}", key, raw, e))),
        None => Ok(default),
    }
}
