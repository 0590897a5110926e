//! # Client Configuration Module
//!
//! Provides configuration management for the feedback console core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a
//! [`ClientConfig`] holding the backend location, credentials, injected
//! bridges and the tuning knobs of the job tracker (poll interval, auto-retry
//! policy, page size, request timeouts). It enforces fail-fast validation so
//! a misconfigured client never starts polling.
//!
//! ## Required Settings
//!
//! - `api_base_url` - Backend API root, e.g. `http://localhost:8000/api/v1`
//!
//! ## Optional Dependencies (with platform defaults)
//!
//! - `HttpClient` - HTTP operations (desktop default: reqwest, injected by the
//!   `desktop-shims` feature of `core-service`)
//! - `Clock` - Time source (default: system clock)
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::ClientConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = ClientConfig::builder()
//!     .api_base_url("http://localhost:8000/api/v1")
//!     .auth_token("eyJhbGciOi...")
//!     .http_client(Arc::new(MyHttpClient))
//!     .poll_interval(Duration::from_secs(5))
//!     .auto_retry_max_attempts(3)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::ClientConfig;
//!
//! // Fails: the API base URL is required
//! let config = ClientConfig::builder()
//!     .build()
//!     .expect("Should fail - missing API base URL");
//! ```

use crate::error::{Error, Result};
use bridge_traits::{Clock, HttpClient, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Default interval between status polls while jobs are in flight.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of automatic retries per failed job.
pub const DEFAULT_AUTO_RETRY_MAX_ATTEMPTS: u32 = 3;

/// Default list page size.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Largest page size the backend accepts.
pub const MAX_PAGE_SIZE: u32 = 100;

/// Client configuration for the feedback console core.
///
/// Use [`ClientConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct ClientConfig {
    /// Backend API root without trailing slash
    pub api_base_url: String,

    /// Bearer token sent with every request
    pub auth_token: Option<String>,

    /// HTTP client for API requests (optional with desktop default)
    pub http_client: Option<Arc<dyn HttpClient>>,

    /// Time source used for optimistic records
    pub clock: Arc<dyn Clock>,

    /// Status polling settings
    pub polling: PollingConfig,

    /// Automatic retry settings
    pub auto_retry: AutoRetryConfig,

    /// List query defaults
    pub list: ListConfig,

    /// Per-request timeouts
    pub timeouts: RequestTimeouts,

    /// Event bus buffer size
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "http_client",
                &self.http_client.as_ref().map(|_| "HttpClient { ... }"),
            )
            .field("polling", &self.polling)
            .field("auto_retry", &self.auto_retry)
            .field("list", &self.list)
            .field("timeouts", &self.timeouts)
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

/// Status polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Delay before each poll tick
    pub interval: Duration,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Automatic retry settings for failed jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoRetryConfig {
    /// Whether failed jobs are retried when polling settles
    pub enabled: bool,

    /// Maximum automatic retries per job before it is left failed
    pub max_attempts: u32,
}

impl Default for AutoRetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: DEFAULT_AUTO_RETRY_MAX_ATTEMPTS,
        }
    }
}

/// List query defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListConfig {
    pub page_size: u32,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Request timeouts per operation class.
///
/// Uploads carry audio payloads and get considerably more time than list or
/// mutation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeouts {
    pub default: Duration,
    pub upload: Duration,
    pub batch_upload: Duration,
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(30),
            upload: Duration::from_secs(300),
            batch_upload: Duration::from_secs(600),
        }
    }
}

impl ClientConfig {
    /// Creates a new builder for constructing a `ClientConfig`.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - The API base URL is an absolute http(s) URL
    /// - The poll interval is between 100ms and 10 minutes
    /// - The page size is within backend limits
    /// - Timeouts are non-zero
    pub fn validate(&self) -> Result<()> {
        let url = self.api_base_url.as_str();
        if url.is_empty() {
            return Err(Error::Config("API base URL cannot be empty".to_string()));
        }

        let has_scheme = url.starts_with("http://") || url.starts_with("https://");
        let has_host = url
            .split_once("://")
            .map(|(_, rest)| !rest.is_empty())
            .unwrap_or(false);
        if !has_scheme || !has_host {
            return Err(Error::Config(format!(
                "API base URL must start with http:// or https:// and name a host, got '{}'",
                url
            )));
        }

        if self.polling.interval < Duration::from_millis(100) {
            return Err(Error::Config(
                "Poll interval must be at least 100ms".to_string(),
            ));
        }

        if self.polling.interval > Duration::from_secs(600) {
            return Err(Error::Config(
                "Poll interval exceeds maximum of 10 minutes".to_string(),
            ));
        }

        if self.list.page_size == 0 || self.list.page_size > MAX_PAGE_SIZE {
            return Err(Error::Config(format!(
                "Page size must be between 1 and {}, got {}",
                MAX_PAGE_SIZE, self.list.page_size
            )));
        }

        let timeouts = [
            ("default", self.timeouts.default),
            ("upload", self.timeouts.upload),
            ("batch upload", self.timeouts.batch_upload),
        ];
        if let Some((name, _)) = timeouts.iter().find(|(_, t)| t.is_zero()) {
            return Err(Error::Config(format!(
                "The {} request timeout must be greater than zero",
                name
            )));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Returns the injected HTTP client or an actionable capability error.
    pub fn require_http_client(&self) -> Result<Arc<dyn HttpClient>> {
        self.http_client.clone().ok_or_else(|| Error::CapabilityMissing {
            capability: "HttpClient".to_string(),
            message: "An HttpClient implementation is required to reach the backend. \
                      Desktop: enable the 'desktop-shims' feature to use the default reqwest client. \
                      Tests: inject a fake via ClientConfigBuilder::http_client."
                .to_string(),
        })
    }
}

/// Builder for constructing [`ClientConfig`] instances.
///
/// Call [`build()`](ClientConfigBuilder::build) to validate and create the
/// final config.
#[derive(Default)]
pub struct ClientConfigBuilder {
    api_base_url: Option<String>,
    auth_token: Option<String>,
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    polling: PollingConfig,
    auto_retry: AutoRetryConfig,
    list: ListConfig,
    timeouts: RequestTimeouts,
    event_buffer_size: Option<usize>,
}

impl ClientConfigBuilder {
    /// Sets the backend API root (required).
    ///
    /// Surrounding whitespace and trailing slashes are trimmed.
    ///
    /// ```
    /// use core_runtime::config::ClientConfig;
    ///
    /// let config = ClientConfig::builder()
    ///     .api_base_url("http://localhost:8000/api/v1/")
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.api_base_url, "http://localhost:8000/api/v1");
    /// ```
    pub fn api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = Some(url.into());
        self
    }

    /// Sets the bearer token attached to every request.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Sets the HTTP client implementation.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Sets the time source. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the delay between status polls.
    ///
    /// Default: 5 seconds
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.polling.interval = interval;
        self
    }

    /// Enables or disables automatic retry of failed jobs.
    ///
    /// Default: true
    pub fn auto_retry_enabled(mut self, enabled: bool) -> Self {
        self.auto_retry.enabled = enabled;
        self
    }

    /// Sets how many times a single job is retried automatically.
    ///
    /// Zero disables automatic retries without disabling manual ones.
    ///
    /// Default: 3
    pub fn auto_retry_max_attempts(mut self, attempts: u32) -> Self {
        self.auto_retry.max_attempts = attempts;
        self
    }

    /// Sets the default list page size.
    ///
    /// Default: 20
    pub fn page_size(mut self, size: u32) -> Self {
        self.list.page_size = size;
        self
    }

    /// Sets all request timeouts at once.
    pub fn timeouts(mut self, timeouts: RequestTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Sets the event bus buffer size.
    ///
    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `ClientConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns `Ok(ClientConfig)` on success, or an error if:
    /// - The API base URL is missing or malformed
    /// - Any tuning value is out of range
    pub fn build(self) -> Result<ClientConfig> {
        let api_base_url = self
            .api_base_url
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .ok_or_else(|| {
                Error::Config(
                    "API base URL is required. Use .api_base_url() to set it.".to_string(),
                )
            })?;

        let auth_token = self
            .auth_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty());

        let config = ClientConfig {
            api_base_url,
            auth_token,
            http_client: self.http_client,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            polling: self.polling,
            auto_retry: self.auto_retry,
            list: self.list,
            timeouts: self.timeouts,
            event_buffer_size: self
                .event_buffer_size
                .unwrap_or(crate::events::DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, HttpResponse};

    struct NoopHttpClient;

    #[async_trait]
    impl HttpClient for NoopHttpClient {
        async fn execute(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<HttpResponse, BridgeError> {
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    fn builder() -> ClientConfigBuilder {
        ClientConfig::builder().api_base_url("http://localhost:8000/api/v1")
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().build().unwrap();

        assert_eq!(config.polling.interval, Duration::from_secs(5));
        assert!(config.auto_retry.enabled);
        assert_eq!(config.auto_retry.max_attempts, 3);
        assert_eq!(config.list.page_size, 20);
        assert_eq!(config.timeouts.default, Duration::from_secs(30));
        assert_eq!(config.timeouts.upload, Duration::from_secs(300));
        assert_eq!(config.timeouts.batch_upload, Duration::from_secs(600));
        assert_eq!(config.event_buffer_size, 100);
        assert!(config.http_client.is_none());
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_builder_requires_api_base_url() {
        let result = ClientConfig::builder().build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("API base URL is required"));
    }

    #[test]
    fn test_builder_trims_trailing_slash() {
        let config = ClientConfig::builder()
            .api_base_url("  https://feedback.example.com/api/v1//  ")
            .build()
            .unwrap();
        assert_eq!(config.api_base_url, "https://feedback.example.com/api/v1");
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        for url in ["ftp://example.com", "localhost:8000", "http://", ""] {
            let result = ClientConfig::builder().api_base_url(url).build();
            assert!(result.is_err(), "{url} should be rejected");
        }
    }

    #[test]
    fn test_validate_rejects_page_size_out_of_range() {
        assert!(builder().page_size(0).build().is_err());
        assert!(builder().page_size(101).build().is_err());
        assert!(builder().page_size(100).build().is_ok());
    }

    #[test]
    fn test_validate_rejects_poll_interval_out_of_range() {
        assert!(builder()
            .poll_interval(Duration::from_millis(10))
            .build()
            .is_err());
        assert!(builder()
            .poll_interval(Duration::from_secs(3600))
            .build()
            .is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let result = builder()
            .timeouts(RequestTimeouts {
                upload: Duration::ZERO,
                ..RequestTimeouts::default()
            })
            .build();
        assert!(result.unwrap_err().to_string().contains("upload"));
    }

    #[test]
    fn test_blank_token_is_dropped() {
        let config = builder().auth_token("   ").build().unwrap();
        assert!(config.auth_token.is_none());
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = builder().auth_token("super-secret").build().unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_require_http_client() {
        let config = builder().build().unwrap();
        let err = config.require_http_client().err().unwrap();
        assert!(matches!(err, Error::CapabilityMissing { .. }));
        assert!(err.to_string().contains("HttpClient"));

        let config = builder().http_client(Arc::new(NoopHttpClient)).build().unwrap();
        assert!(config.require_http_client().is_ok());
    }

    #[test]
    fn test_auto_retry_settings() {
        let config = builder()
            .auto_retry_enabled(false)
            .auto_retry_max_attempts(0)
            .build()
            .unwrap();
        assert_eq!(
            config.auto_retry,
            AutoRetryConfig {
                enabled: false,
                max_attempts: 0
            }
        );
    }

    #[test]
    fn test_config_is_cloneable() {
        let config = builder().auth_token("t").build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.api_base_url, config.api_base_url);
        assert_eq!(cloned.auth_token, config.auth_token);
    }
}
