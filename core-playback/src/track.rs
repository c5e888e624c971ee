//! Track identity and metadata.

use bridge_traits::EngineTrack;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Opaque backend track identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl PartialEq<str> for TrackId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// A playable track.
///
/// Immutable once built. The queue stores tracks behind `Arc` and session
/// state shares the same allocation, so cloning a state never copies
/// metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    /// Primary artist label as shown in the player.
    pub artist: String,
    #[serde(default)]
    pub artwork_url: Option<String>,
    /// Stream URL handed to the engine.
    pub media_url: String,
    /// Catalogue duration, when known before loading.
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl Track {
    pub fn new(
        id: impl Into<TrackId>,
        title: impl Into<String>,
        artist: impl Into<String>,
        media_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            artist: artist.into(),
            artwork_url: None,
            media_url: media_url.into(),
            duration_ms: None,
        }
    }

    pub fn with_artwork(mut self, url: impl Into<String>) -> Self {
        self.artwork_url = Some(url.into());
        self
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration_ms = Some(duration.as_millis() as u64);
        self
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }

    /// Descriptor for the engine queue.
    pub fn to_engine_track(&self) -> EngineTrack {
        EngineTrack {
            id: self.id.as_str().to_string(),
            url: self.media_url.clone(),
            title: self.title.clone(),
            artist: self.artist.clone(),
            artwork: self.artwork_url.clone(),
            duration: self.duration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_backend_payload() {
        let json = r#"{
            "id": "42",
            "title": "Aquarela",
            "artist": "Toquinho",
            "mediaUrl": "https://cdn.example.com/42.mp3",
            "durationMs": 245000
        }"#;

        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, TrackId::new("42"));
        assert!(track.artwork_url.is_none());
        assert_eq!(track.duration(), Some(Duration::from_secs(245)));
    }

    #[test]
    fn engine_track_carries_metadata() {
        let track = Track::new("t-1", "Song", "Artist", "https://cdn/t-1.mp3")
            .with_artwork("https://img/t-1.jpg");
        let engine = track.to_engine_track();

        assert_eq!(engine.id, "t-1");
        assert_eq!(engine.url, "https://cdn/t-1.mp3");
        assert_eq!(engine.artwork.as_deref(), Some("https://img/t-1.jpg"));
        assert!(engine.duration.is_none());
    }

    #[test]
    fn track_id_compares_with_str() {
        let id = TrackId::from("abc");
        assert!(id == *"abc");
        assert_eq!(id.to_string(), "abc");
    }
}
