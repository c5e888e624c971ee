//! Umbrella crate for the music client core.
//!
//! Host applications depend on `music-client-core` and get the playback
//! session controller together with the runtime and bridge contracts it is
//! configured with. The `desktop-shims` feature (on by default) wires the
//! reqwest-backed HTTP client from `bridge-desktop` as the default transport.

pub use bridge_traits as bridge;
pub use core_playback as playback;
pub use core_runtime as runtime;

pub use core_playback::{PlaybackError, SessionController, SessionView};
pub use core_runtime::config::SessionConfig;
