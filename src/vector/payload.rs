//! Durable payload records keyed by external identifier.
//!
//! Each record keeps the text that was embedded, so a rebuild can recompute
//! a vector the old index can no longer reconstruct. The inactive set holds
//! identifiers that stay physically indexed but must not be returned by
//! search.

use crate::error::{StoreError, StoreResult};
use crate::io::atomic::{JsonWriteError, write_json_atomic};
use crate::vector::types::Payload;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// A stored document: embedded text plus its opaque payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub text: String,
    pub payload: Payload,
}

/// File-backed `external_id -> document` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PayloadStore {
    documents: BTreeMap<String, StoredDocument>,
    #[serde(default)]
    inactive: BTreeSet<String>,
}

impl PayloadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, external_id: &str) -> Option<&StoredDocument> {
        self.documents.get(external_id)
    }

    pub fn contains(&self, external_id: &str) -> bool {
        self.documents.contains_key(external_id)
    }

    /// Inserts or replaces a document. Replacing reactivates it.
    pub fn upsert(&mut self, external_id: &str, document: StoredDocument) {
        self.inactive.remove(external_id);
        self.documents.insert(external_id.to_string(), document);
    }

    pub fn remove(&mut self, external_id: &str) -> Option<StoredDocument> {
        self.inactive.remove(external_id);
        self.documents.remove(external_id)
    }

    /// Marks a stored document inactive. Returns `false` if it is absent or
    /// already inactive.
    pub fn deactivate(&mut self, external_id: &str) -> bool {
        self.documents.contains_key(external_id) && self.inactive.insert(external_id.to_string())
    }

    pub fn is_inactive(&self, external_id: &str) -> bool {
        self.inactive.contains(external_id)
    }

    /// Present and not inactive.
    pub fn is_active(&self, external_id: &str) -> bool {
        self.contains(external_id) && !self.is_inactive(external_id)
    }

    pub fn inactive_count(&self) -> usize {
        self.inactive.len()
    }

    pub fn inactive_ids(&self) -> impl Iterator<Item = &str> {
        self.inactive.iter().map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.documents.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StoredDocument)> {
        self.documents.iter().map(|(id, doc)| (id.as_str(), doc))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn persist(&self, path: &Path) -> StoreResult<()> {
        write_json_atomic(path, self).map_err(|e| match e {
            JsonWriteError::Serialize(source) => StoreError::Serialization {
                path: path.to_path_buf(),
                source,
            },
            JsonWriteError::Io(source) => StoreError::Persistence {
                path: path.to_path_buf(),
                source,
            },
        })
    }

    /// Reads the table at `path`, or `None` when no file exists.
    pub fn load(path: &Path) -> StoreResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path).map_err(|source| StoreError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        let store: Self =
            serde_json::from_str(&json).map_err(|source| StoreError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;
        if let Some(orphan) = store.inactive.iter().find(|id| !store.documents.contains_key(*id)) {
            return Err(StoreError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("inactive id '{orphan}' has no document"),
            });
        }
        Ok(Some(store))
    }
}
