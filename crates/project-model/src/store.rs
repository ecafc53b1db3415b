//! Collaborator contracts for persisting and packaging sessions.
//!
//! Durable storage and archive formats belong to the host. The core only
//! needs the shapes below, plus an in-memory store for tests and hosts
//! that keep sessions for the lifetime of the process.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::session::{BundleMetadata, RecordingSession};

/// Errors reported by a record store or bundler.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("A session with id {id} is already stored")]
    Duplicate { id: String },

    #[error("Metadata serialization failed: {source}")]
    Serialize {
        #[from]
        source: serde_json::Error,
    },

    #[error("Store backend failed: {message}")]
    Backend { message: String },
}

/// Keyed storage for finished sessions, one record per session.
pub trait RecordStore: Send {
    /// Store a new session. Ids are unique within a store.
    fn put(&mut self, session: RecordingSession) -> Result<(), StoreError>;

    /// All sessions, oldest first.
    fn get_all(&self) -> Result<Vec<RecordingSession>, StoreError>;

    fn get(&self, id: &str) -> Result<Option<RecordingSession>, StoreError>;

    /// Remove one session. Returns whether anything was removed.
    fn delete(&mut self, id: &str) -> Result<bool, StoreError>;

    fn clear(&mut self) -> Result<(), StoreError>;
}

/// Packages a session into a downloadable archive.
pub trait Bundler {
    /// Build an archive from the metadata document and the raw buffer.
    fn bundle(&mut self, metadata_json: &str, buffer: &[u8]) -> Result<Vec<u8>, StoreError>;

    /// Convenience wrapper that serializes the session's metadata first.
    fn bundle_session(&mut self, session: &RecordingSession) -> Result<Vec<u8>, StoreError> {
        let metadata = BundleMetadata::from_session(session).to_json()?;
        self.bundle(&metadata, &session.video_buffer)
    }
}

/// Process-local [`RecordStore`].
#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    // Keyed by (created_at, id) so iteration is chronological.
    records: BTreeMap<(DateTime<Utc>, String), RecordingSession>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn key_of(&self, id: &str) -> Option<(DateTime<Utc>, String)> {
        self.records.keys().find(|(_, key_id)| key_id == id).cloned()
    }
}

impl RecordStore for MemoryRecordStore {
    fn put(&mut self, session: RecordingSession) -> Result<(), StoreError> {
        if self.key_of(&session.id).is_some() {
            return Err(StoreError::Duplicate { id: session.id });
        }
        self.records
            .insert((session.created_at, session.id.clone()), session);
        Ok(())
    }

    fn get_all(&self) -> Result<Vec<RecordingSession>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn get(&self, id: &str) -> Result<Option<RecordingSession>, StoreError> {
        Ok(self.key_of(id).and_then(|key| self.records.get(&key).cloned()))
    }

    fn delete(&mut self, id: &str) -> Result<bool, StoreError> {
        Ok(match self.key_of(id) {
            Some(key) => self.records.remove(&key).is_some(),
            None => false,
        })
    }

    fn clear(&mut self) -> Result<(), StoreError> {
        self.records.clear();
        Ok(())
    }
}
