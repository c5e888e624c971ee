//! # Desktop Bridge Implementations
//!
//! Default bridge implementations for desktop hosts (macOS, Windows, Linux)
//! and for command-line tools built on the core.
//!
//! - `HttpClient` using `reqwest`
//!
//! The audio engine and credential provider always come from the host; there
//! is no meaningful desktop default for either.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestHttpClient;
//! use std::sync::Arc;
//!
//! let http = Arc::new(ReqwestHttpClient::new()?);
//! let config = SessionConfig::builder()
//!     .http_client(http)
//!     // ...
//!     .build()?;
//! ```

mod http;

pub use http::ReqwestHttpClient;
