//! Bidirectional mapping between external identifiers and ANN handles.
//!
//! Handles come from a persisted high-water mark, so a handle freed by
//! [`IdentifierMap::remove`] is never handed to another identifier, and
//! re-creating a removed identifier yields a fresh handle.

use crate::error::{StoreError, StoreResult};
use crate::io::atomic::{JsonWriteError, write_json_atomic};
use crate::vector::types::Handle;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One-to-one table of `external_id <-> handle`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifierMap {
    str_to_int: BTreeMap<String, Handle>,
    int_to_str: BTreeMap<Handle, String>,
    /// Next handle to allocate; absent in files written without it.
    #[serde(default)]
    next_handle: i64,
}

impl IdentifierMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the handle for `external_id`, allocating one if unmapped.
    pub fn get_or_create(&mut self, external_id: &str) -> Handle {
        if let Some(handle) = self.str_to_int.get(external_id) {
            return *handle;
        }
        let handle = Handle::new(self.next_handle);
        self.next_handle += 1;
        self.str_to_int.insert(external_id.to_string(), handle);
        self.int_to_str.insert(handle, external_id.to_string());
        handle
    }

    /// Drops the mapping in both directions, returning the freed handle.
    pub fn remove(&mut self, external_id: &str) -> Option<Handle> {
        let handle = self.str_to_int.remove(external_id)?;
        self.int_to_str.remove(&handle);
        Some(handle)
    }

    #[must_use]
    pub fn resolve(&self, handle: Handle) -> Option<&str> {
        self.int_to_str.get(&handle).map(String::as_str)
    }

    #[must_use]
    pub fn handle_of(&self, external_id: &str) -> Option<Handle> {
        self.str_to_int.get(external_id).copied()
    }

    #[must_use]
    pub fn contains(&self, external_id: &str) -> bool {
        self.str_to_int.contains_key(external_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.str_to_int.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.str_to_int.is_empty()
    }

    /// Mappings ordered by external identifier.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Handle)> {
        self.str_to_int.iter().map(|(id, h)| (id.as_str(), *h))
    }

    /// Writes the full table to `path`.
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

    /// Replaces `self` with the table at `path`.
    ///
    /// Returns `false` and leaves `self` untouched when no file exists.
    pub fn load(&mut self, path: &Path) -> StoreResult<bool> {
        if !path.exists() {
            return Ok(false);
        }
        let json = std::fs::read_to_string(path).map_err(|source| StoreError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        let mut loaded: Self =
            serde_json::from_str(&json).map_err(|source| StoreError::Serialization {
                path: path.to_path_buf(),
                source,
            })?;
        loaded.validate(path)?;
        *self = loaded;
        Ok(true)
    }

    fn validate(&mut self, path: &Path) -> StoreResult<()> {
        let corrupted = |reason: String| StoreError::Corrupted {
            path: path.to_path_buf(),
            reason,
        };
        if self.str_to_int.len() != self.int_to_str.len() {
            return Err(corrupted(format!(
                "{} forward entries but {} reverse entries",
                self.str_to_int.len(),
                self.int_to_str.len()
            )));
        }
        for (id, handle) in &self.str_to_int {
            if self.int_to_str.get(handle) != Some(id) {
                return Err(corrupted(format!("'{id}' -> {handle} has no matching reverse entry")));
            }
        }
        let floor = self
            .int_to_str
            .keys()
            .next_back()
            .map_or(0, |h| h.get() + 1);
        self.next_handle = self.next_handle.max(floor);
        Ok(())
    }
}
