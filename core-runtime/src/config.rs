//! # Session Configuration
//!
//! Builder-based configuration for the playback session controller.
//!
//! ## Overview
//!
//! [`SessionConfigBuilder`] collects the host bridges and tuning knobs and
//! validates them up front, so a misconfigured host fails at startup with an
//! actionable message instead of on the first play.
//!
//! ## Required Dependencies
//!
//! - `AudioEngine` - the host's native playback engine
//! - `CredentialProvider` - signed-in user and bearer token for backend calls
//! - backend base URL
//!
//! ## Optional Dependencies (with defaults)
//!
//! - `HttpClient` - desktop default: `bridge_desktop::ReqwestHttpClient`
//!   (requires the `desktop-shims` feature)
//! - `Clock` - defaults to [`SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::SessionConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let config = SessionConfig::builder()
//!     .engine(Arc::new(MyEngine::new()))
//!     .credentials(Arc::new(MyCredentialStore::new()))
//!     .backend_url("https://api.example.com")
//!     .poll_interval(Duration::from_millis(500))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{AudioEngine, Clock, CredentialProvider, HttpClient, SystemClock};
use std::sync::Arc;
use std::time::Duration;

/// Default interval between engine snapshot polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Shortest accepted poll interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Longest accepted poll interval.
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(60);
/// Default bound on a single engine command.
pub const DEFAULT_ENGINE_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Default bound on a single backend request.
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Configuration for one playback session controller.
#[derive(Clone)]
pub struct SessionConfig {
    /// Host audio engine (required)
    pub engine: Arc<dyn AudioEngine>,

    /// Source of backend credentials (required)
    pub credentials: Arc<dyn CredentialProvider>,

    /// HTTP transport for backend calls
    pub http_client: Arc<dyn HttpClient>,

    /// Time source for play-event timestamps
    pub clock: Arc<dyn Clock>,

    /// Backend base URL without trailing slash, e.g. `https://api.example.com`
    pub backend_url: String,

    /// Interval between engine snapshot polls
    pub poll_interval: Duration,

    /// Upper bound for a single engine command
    pub engine_command_timeout: Duration,

    /// Upper bound for a single backend request
    pub backend_timeout: Duration,

    /// Buffer size of the event bus
    pub event_buffer_size: usize,

    /// Seed for the shuffle RNG; `None` seeds from OS entropy
    pub shuffle_seed: Option<u64>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("engine", &"AudioEngine { ... }")
            .field("credentials", &"CredentialProvider { ... }")
            .field("http_client", &"HttpClient { ... }")
            .field("backend_url", &self.backend_url)
            .field("poll_interval", &self.poll_interval)
            .field("engine_command_timeout", &self.engine_command_timeout)
            .field("backend_timeout", &self.backend_timeout)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("shuffle_seed", &self.shuffle_seed)
            .finish()
    }
}

impl SessionConfig {
    /// Creates a new builder for constructing a `SessionConfig`.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Backend URL is an http(s) URL
    /// - Poll interval is between 100 ms and 60 s
    /// - Timeouts are non-zero
    /// - Event buffer size is non-zero
    pub fn validate(&self) -> Result<()> {
        if !(self.backend_url.starts_with("http://") || self.backend_url.starts_with("https://"))
        {
            return Err(Error::Config(format!(
                "Backend URL must start with http:// or https://, got '{}'",
                self.backend_url
            )));
        }

        if self.poll_interval < MIN_POLL_INTERVAL || self.poll_interval > MAX_POLL_INTERVAL {
            return Err(Error::Config(format!(
                "Poll interval must be between {:?} and {:?}, got {:?}",
                MIN_POLL_INTERVAL, MAX_POLL_INTERVAL, self.poll_interval
            )));
        }

        if self.engine_command_timeout.is_zero() {
            return Err(Error::Config(
                "Engine command timeout must be greater than zero".to_string(),
            ));
        }

        if self.backend_timeout.is_zero() {
            return Err(Error::Config(
                "Backend timeout must be greater than zero".to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

fn engine_missing_error() -> Error {
    Error::missing(
        "AudioEngine",
        "An AudioEngine implementation is required to drive playback. \
         Mobile: wrap the platform media session (AVPlayer/ExoPlayer). \
         Desktop: wrap the host's audio backend.",
    )
}

fn credentials_missing_error() -> Error {
    Error::missing(
        "CredentialProvider",
        "A CredentialProvider is required for play registration and likes. \
         Inject the host's session store, or StaticCredentials for tools and tests.",
    )
}

#[cfg(feature = "desktop-shims")]
fn provide_default_http_client(timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    use bridge_desktop::ReqwestHttpClient;

    let client = ReqwestHttpClient::with_timeout(timeout)
        .map_err(|e| Error::Internal(format!("Default HTTP client unavailable: {}", e)))?;
    Ok(Arc::new(client))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_http_client(_timeout: Duration) -> Result<Arc<dyn HttpClient>> {
    Err(Error::missing(
        "HttpClient",
        "No HTTP client implementation provided. \
         Desktop: enable the 'desktop-shims' feature to use ReqwestHttpClient. \
         Mobile: inject the platform-native HTTP adapter.",
    ))
}

/// Builder for [`SessionConfig`].
#[derive(Default)]
pub struct SessionConfigBuilder {
    engine: Option<Arc<dyn AudioEngine>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    http_client: Option<Arc<dyn HttpClient>>,
    clock: Option<Arc<dyn Clock>>,
    backend_url: Option<String>,
    poll_interval: Option<Duration>,
    engine_command_timeout: Option<Duration>,
    backend_timeout: Option<Duration>,
    event_buffer_size: Option<usize>,
    shuffle_seed: Option<u64>,
}

impl SessionConfigBuilder {
    /// Sets the host audio engine (required).
    pub fn engine(mut self, engine: Arc<dyn AudioEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Sets the credential provider (required).
    pub fn credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Sets the HTTP client. Optional with the `desktop-shims` feature.
    pub fn http_client(mut self, client: Arc<dyn HttpClient>) -> Self {
        self.http_client = Some(client);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Sets the backend base URL (required). A trailing slash is stripped.
    pub fn backend_url(mut self, url: impl Into<String>) -> Self {
        self.backend_url = Some(url.into());
        self
    }

    /// Sets the snapshot poll interval. Defaults to one second.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    pub fn engine_command_timeout(mut self, timeout: Duration) -> Self {
        self.engine_command_timeout = Some(timeout);
        self
    }

    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = Some(timeout);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Makes shuffle order reproducible. Intended for tests.
    pub fn shuffle_seed(mut self, seed: u64) -> Self {
        self.shuffle_seed = Some(seed);
        self
    }

    /// Builds the final `SessionConfig` instance.
    ///
    /// # Returns
    ///
    /// Returns an error if:
    /// - The engine, credential provider or backend URL is missing
    /// - No HTTP client is given and no desktop default is available
    /// - Any value fails [`SessionConfig::validate`]
    pub fn build(self) -> Result<SessionConfig> {
        let engine = self.engine.ok_or_else(engine_missing_error)?;
        let credentials = self.credentials.ok_or_else(credentials_missing_error)?;

        let backend_url = self
            .backend_url
            .map(|url| url.trim_end_matches('/').to_string())
            .ok_or_else(|| {
                Error::Config("Backend URL is required. Use .backend_url() to set it.".to_string())
            })?;

        let backend_timeout = self.backend_timeout.unwrap_or(DEFAULT_BACKEND_TIMEOUT);

        let http_client = match self.http_client {
            Some(client) => client,
            None => provide_default_http_client(backend_timeout)?,
        };

        let config = SessionConfig {
            engine,
            credentials,
            http_client,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            backend_url,
            poll_interval: self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL),
            engine_command_timeout: self
                .engine_command_timeout
                .unwrap_or(DEFAULT_ENGINE_COMMAND_TIMEOUT),
            backend_timeout,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            shuffle_seed: self.shuffle_seed,
        };

        config.validate()?;

        Ok(config)
    }
}
