//! Finished recordings and their bundle metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::layout::{Layout, LayoutKind, OverlayPosition, Quality};

/// A finished recording. Immutable once created: edits produce a new
/// session via [`RecordingSession::derive_edit`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSession {
    /// Unique, time-ordered identifier (UUID v7).
    pub id: String,

    /// When the session was created.
    pub created_at: DateTime<Utc>,

    /// Whole seconds recorded while not paused.
    pub duration_secs: u64,

    /// Layout used for compositing.
    pub layout: Layout,

    /// Output resolution and frame rate.
    pub quality: Quality,

    /// Encoded output. Travels beside the JSON document, never inside it.
    #[serde(skip)]
    pub video_buffer: Vec<u8>,

    /// Extra details captured at creation time.
    pub metadata: SessionMetadata,
}

/// Details captured alongside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Camera bubble position when the session was created.
    pub overlay_position: OverlayPosition,

    /// Session this one was exported from, if it is an edit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<String>,
}

impl RecordingSession {
    /// Create a session with a fresh id stamped now.
    pub fn new(
        layout: Layout,
        quality: Quality,
        duration_secs: u64,
        video_buffer: Vec<u8>,
        overlay_position: OverlayPosition,
    ) -> Self {
        Self {
            id: new_session_id(),
            created_at: Utc::now(),
            duration_secs,
            layout,
            quality,
            video_buffer,
            metadata: SessionMetadata {
                overlay_position,
                derived_from: None,
            },
        }
    }

    /// A new session holding an edited rendering of this one.
    ///
    /// Layout and overlay position carry over; the source is untouched.
    pub fn derive_edit(&self, duration_secs: u64, video_buffer: Vec<u8>, quality: Quality) -> Self {
        let mut derived = Self::new(
            self.layout,
            quality,
            duration_secs,
            video_buffer,
            self.metadata.overlay_position,
        );
        derived.metadata.derived_from = Some(self.id.clone());
        derived
    }

    /// Whether any encoded output was produced.
    pub fn has_video(&self) -> bool {
        !self.video_buffer.is_empty()
    }
}

/// Generate a time-ordered session id.
pub fn new_session_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// The metadata document placed next to the raw buffer in a bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleMetadata {
    pub id: String,
    /// RFC 3339 creation timestamp.
    pub created: String,
    /// Whole seconds.
    pub duration: u64,
    pub layout: LayoutKind,
    pub quality: Quality,
}

impl BundleMetadata {
    pub fn from_session(session: &RecordingSession) -> Self {
        Self {
            id: session.id.clone(),
            created: session.created_at.to_rfc3339(),
            duration: session.duration_secs,
            layout: session.layout.kind(),
            quality: session.quality,
        }
    }

    /// Pretty-printed JSON document.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::Resolution;

    fn sample_session() -> RecordingSession {
        RecordingSession::new(
            Layout::overlay_circle(),
            Quality::new(Resolution::HD_720, 30),
            12,
            vec![1, 2, 3],
            OverlayPosition::new(20.0, 30.0),
        )
    }

    #[test]
    fn ids_are_unique_and_time_ordered() {
        let a = sample_session();
        let b = sample_session();
        assert_ne!(a.id, b.id);
        assert!(a.id < b.id);
    }

    #[test]
    fn derive_edit_creates_new_session_and_keeps_source() {
        let source = sample_session();
        let edited = source.derive_edit(6, vec![9; 10], source.quality);

        assert_ne!(edited.id, source.id);
        assert_eq!(edited.metadata.derived_from.as_deref(), Some(source.id.as_str()));
        assert_eq!(edited.metadata.overlay_position, source.metadata.overlay_position);
        assert_eq!(edited.duration_secs, 6);
        assert_eq!(source.video_buffer, vec![1, 2, 3]);
    }

    #[test]
    fn session_json_omits_buffer() {
        let session = sample_session();
        let json = serde_json::to_value(&session).unwrap();
        assert!(json.get("video_buffer").is_none());

        let parsed: RecordingSession = serde_json::from_value(json).unwrap();
        assert!(!parsed.has_video());
        assert_eq!(parsed.id, session.id);
    }

    #[test]
    fn bundle_metadata_has_fixed_shape() {
        let session = sample_session();
        let meta = BundleMetadata::from_session(&session);
        let value: serde_json::Value = serde_json::from_str(&meta.to_json().unwrap()).unwrap();

        let mut keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["created", "duration", "id", "layout", "quality"]);
        assert_eq!(value["layout"], "OVERLAY_CIRCLE");
        assert_eq!(value["duration"], 12);
        assert_eq!(value["quality"]["fps"], 30);
        assert_eq!(value["quality"]["resolution"]["width"], 1280);
    }
}
