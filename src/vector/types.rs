//! Type-safe wrappers and core types for the vector store.
//!
//! Handles, dimensions and index kinds are newtypes so that external
//! identifiers, ANN handles and raw integers never get mixed up.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Standard vector dimension for code embeddings (all-MiniLM-L6-v2 model).
pub const VECTOR_DIMENSION_384: usize = 384;

/// Opaque key/value payload stored next to each indexed document.
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Integer handle an ANN index stores a vector under.
///
/// Handles are allocated by the [`IdentifierMap`](super::IdentifierMap) and
/// never reused for a different external identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(i64);

impl Handle {
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn get(&self) -> i64 {
        self.0
    }

    /// Converts to little-endian bytes for storage.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[must_use]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(i64::from_le_bytes(bytes))
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type-safe wrapper for vector dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorDimension(usize);

impl VectorDimension {
    /// Creates a new `VectorDimension` with validation.
    ///
    /// Returns an error if the dimension is zero.
    pub fn new(dim: usize) -> Result<Self, VectorError> {
        if dim == 0 {
            return Err(VectorError::InvalidDimension {
                dimension: 0,
                reason: "Vector dimension cannot be zero",
            });
        }
        Ok(Self(dim))
    }

    /// Creates a standard 384-dimensional vector dimension.
    #[must_use]
    pub const fn dimension_384() -> Self {
        Self(VECTOR_DIMENSION_384)
    }

    #[must_use]
    pub const fn get(&self) -> usize {
        self.0
    }

    /// Validates that a vector has the expected dimension.
    pub fn validate_vector(&self, vector: &[f32]) -> Result<(), VectorError> {
        if vector.len() != self.0 {
            return Err(VectorError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        Ok(())
    }
}

/// ANN index implementations known to the on-disk format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Exact inner-product scan, supports removal by handle.
    Flat,
    /// Inverted file over k-means lists, refuses removal.
    IvfFlat,
}

impl IndexKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flat => "flat",
            Self::IvfFlat => "ivf_flat",
        }
    }

    pub(crate) fn to_tag(self) -> u32 {
        match self {
            Self::Flat => 1,
            Self::IvfFlat => 2,
        }
    }

    pub(crate) fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(Self::Flat),
            2 => Some(Self::IvfFlat),
            _ => None,
        }
    }
}

impl std::str::FromStr for IndexKind {
    type Err = VectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" => Ok(Self::Flat),
            "ivf" | "ivf_flat" | "ivfflat" => Ok(Self::IvfFlat),
            other => Err(VectorError::UnknownIndexKind(other.to_string())),
        }
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during vector index operations.
#[derive(Error, Debug)]
pub enum VectorError {
    #[error(
        "Vector dimension mismatch: expected {expected}, got {actual}\nSuggestion: Ensure all vectors use the same embedding model"
    )]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Invalid vector dimension: {dimension}\nReason: {reason}")]
    InvalidDimension {
        dimension: usize,
        reason: &'static str,
    },

    /// The index cannot remove entries by handle; callers fall back to a rebuild.
    #[error("Index kind '{kind}' does not support removal by handle")]
    RemovalUnsupported { kind: IndexKind },

    #[error("Handle {0} is already present in the index")]
    DuplicateHandle(Handle),

    #[error("Unknown index kind '{0}'\nSuggestion: Use 'flat' or 'ivf'")]
    UnknownIndexKind(String),

    #[error(
        "Clustering failed: {0}\nSuggestion: Ensure sufficient vectors are available for clustering (minimum: k clusters)"
    )]
    ClusteringFailed(String),

    #[error("Storage error: {0}\nSuggestion: Check disk space and file permissions")]
    Storage(#[from] std::io::Error),

    #[error(
        "Invalid index file format: {0}\nSuggestion: Delete the index directory and rebuild it"
    )]
    InvalidFormat(String),

    #[error(
        "Invalid storage version: expected {expected}, got {actual}\nSuggestion: Rebuild the index with this version"
    )]
    VersionMismatch { expected: u32, actual: u32 },
}

/// Errors raised by embedding collaborators.
///
/// Any of these fails the whole batch; callers must not mutate state after one.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error(
        "Failed to initialize embedding model: {0}\nSuggestion: Ensure you have internet connection for first-time model download"
    )]
    ModelInit(String),

    #[error("Embedding request failed: {0}")]
    Request(String),

    #[error("Embedding request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Embedding provider returned {actual} vector(s) for {expected} input(s)")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Embedding has dimension {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
}
