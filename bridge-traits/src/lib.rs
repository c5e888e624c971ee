//! # Host Bridge Traits
//!
//! Contracts between the playback session core and the host application.
//!
//! ## Overview
//!
//! The core does not render audio, store credentials or pick an HTTP stack.
//! Each of those capabilities is a trait the host implements (or takes from
//! `bridge-desktop` on desktop builds) and injects through
//! `core_runtime::config::SessionConfig`.
//!
//! ## Traits
//!
//! ### Playback
//! - [`AudioEngine`](engine::AudioEngine) - Native engine commands and snapshots
//!
//! ### Networking
//! - [`HttpClient`](http::HttpClient) - Async HTTP with optional retry
//! - [`CredentialProvider`](auth::CredentialProvider) - Signed-in user and bearer token
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Fail-Fast Strategy
//!
//! Missing capabilities are reported when the session config is built, not
//! when the first command runs:
//!
//! ```ignore
//! let config = SessionConfig::builder()
//!     .backend_url("https://api.example.com")
//!     .build()?; // Err(CapabilityMissing { capability: "AudioEngine", .. })
//! ```
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync`; the core shares them across
//! tasks behind `Arc<dyn Trait>`.

pub mod auth;
pub mod engine;
pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

// Re-export commonly used types
pub use auth::{CredentialProvider, SessionCredentials, StaticCredentials};
pub use engine::{AudioEngine, EngineEvent, EngineTrack, PlaybackSnapshot};
pub use http::{HttpClient, HttpMethod, HttpRequest, HttpResponse, RetryPolicy};
pub use time::{Clock, ConsoleLogger, FixedClock, LogEntry, LogLevel, LoggerSink, SystemClock};
