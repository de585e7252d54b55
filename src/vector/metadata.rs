//! Metadata tracking for vector store persistence.
//!
//! The metadata file is written last by `persist`, so its presence marks a
//! complete on-disk store. It names the generation directory holding the
//! index, identifier map and payloads; rewriting it is what switches a store
//! from one persisted state to the next.

use crate::error::{StoreError, StoreResult};
use crate::indexing::get_utc_timestamp;
use crate::io::atomic::{JsonWriteError, write_json_atomic};
use crate::vector::types::IndexKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const METADATA_FILE: &str = "metadata.json";

/// Metadata for a persisted vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    /// Name of the embedding model used
    pub model_name: String,

    /// Dimension of embeddings
    pub dimension: usize,

    pub index_kind: IndexKind,

    /// Number of documents in the payload store
    pub document_count: usize,

    /// Unix timestamp when created
    pub created_at: u64,

    /// Unix timestamp when last updated
    pub updated_at: u64,

    /// Data generation in use; `0` means files directly in the store
    /// directory, as written by version 1.
    #[serde(default)]
    pub generation: u64,

    /// Version of the metadata format
    pub version: u32,
}

impl StoreMetadata {
    /// Current metadata version
    const CURRENT_VERSION: u32 = 2;

    pub fn new(
        model_name: String,
        dimension: usize,
        index_kind: IndexKind,
        document_count: usize,
    ) -> Self {
        let now = get_utc_timestamp();
        Self {
            model_name,
            dimension,
            index_kind,
            document_count,
            created_at: now,
            updated_at: now,
            generation: 0,
            version: Self::CURRENT_VERSION,
        }
    }

    /// Update the metadata with new document count and timestamp
    pub fn update(&mut self, document_count: usize, index_kind: IndexKind) {
        self.document_count = document_count;
        self.index_kind = index_kind;
        self.updated_at = get_utc_timestamp();
    }

    /// Directory holding the data files of `generation` under `dir`.
    pub fn generation_dir(dir: &Path, generation: u64) -> PathBuf {
        if generation == 0 {
            dir.to_path_buf()
        } else {
            dir.join(format!("gen-{generation}"))
        }
    }

    pub fn data_dir(&self, dir: &Path) -> PathBuf {
        Self::generation_dir(dir, self.generation)
    }

    pub fn save(&self, dir: &Path) -> StoreResult<()> {
        let path = dir.join(METADATA_FILE);
        write_json_atomic(&path, self).map_err(|e| match e {
            JsonWriteError::Serialize(source) => StoreError::Serialization { path, source },
            JsonWriteError::Io(source) => StoreError::Persistence { path, source },
        })
    }

    pub fn load(dir: &Path) -> StoreResult<Self> {
        let path = dir.join(METADATA_FILE);
        let json = std::fs::read_to_string(&path).map_err(|source| StoreError::Persistence {
            path: path.clone(),
            source,
        })?;
        let metadata: Self = serde_json::from_str(&json).map_err(|source| {
            StoreError::Serialization {
                path: path.clone(),
                source,
            }
        })?;

        if metadata.version > Self::CURRENT_VERSION {
            return Err(StoreError::Corrupted {
                path,
                reason: format!(
                    "metadata version {} is newer than supported version {}",
                    metadata.version,
                    Self::CURRENT_VERSION
                ),
            });
        }
        Ok(metadata)
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(METADATA_FILE).exists()
    }
}
