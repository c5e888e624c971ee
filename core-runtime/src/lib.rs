//! # Core Runtime Module
//!
//! Foundational runtime infrastructure for the playback session core:
//! - Logging and tracing infrastructure
//! - Session configuration with fail-fast validation
//! - Event bus for session, queue and backend-sync notifications
//!
//! ## Overview
//!
//! `core-playback` depends on this crate for everything that is not playback
//! logic. Hosts use it directly to initialize logging and to build a
//! [`SessionConfig`](config::SessionConfig).

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
