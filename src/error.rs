//! Error types for the refinery and the synchronized vector store.
//!
//! This module provides structured error types using thiserror so that
//! every failure carries the affected file or batch and an actionable
//! recovery hint.

use crate::vector::{EmbeddingError, VectorError};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while extracting, reconciling or persisting code units.
#[derive(Error, Debug)]
pub enum RefineError {
    /// File system errors
    #[error("Failed to read source file '{path}': {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Malformed source, recovered per file by the refinery
    #[error("Failed to extract code units from '{path}': {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("Failed to persist knowledge file '{path}': {source}")]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize knowledge file '{path}': {source}")]
    Serialization {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Knowledge file '{path}' appears to be corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Code unit '{unit_id}' not found in knowledge for '{path}'")]
    UnitNotFound { unit_id: String, path: PathBuf },

    #[error("Failed to initialize {language} extractor: {reason}")]
    ExtractorInit { language: String, reason: String },
}

impl RefineError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::FileRead { .. } => "FILE_READ_ERROR",
            Self::Extraction { .. } => "EXTRACTION_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::Corrupted { .. } => "KNOWLEDGE_CORRUPTED",
            Self::UnitNotFound { .. } => "UNIT_NOT_FOUND",
            Self::ExtractorInit { .. } => "EXTRACTOR_INIT_ERROR",
        }
        .to_string()
    }

    /// Per-file errors are recovered by the refinery; everything else aborts the batch.
    #[must_use]
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::FileRead { .. } | Self::Extraction { .. })
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::FileRead { .. } => vec![
                "Check that the file exists and is valid UTF-8",
                "Ensure the file is not locked by another process",
            ],
            Self::Extraction { .. } => vec![
                "Fix the syntax error and run 'refinery refine' again",
                "The remaining files of the batch were still refined",
            ],
            Self::Persistence { .. } => vec![
                "Check disk space and permissions in the knowledge directory",
                "The previous knowledge file was left untouched",
            ],
            Self::Corrupted { .. } | Self::Serialization { .. } => vec![
                "Delete the affected knowledge file and refine its source again",
            ],
            Self::UnitNotFound { .. } => vec![
                "Run 'refinery refine' on the source file first",
                "Check the unit identifier with 'refinery search'",
            ],
            Self::ExtractorInit { .. } => vec![
                "Ensure the tree-sitter grammar version matches Cargo.toml",
            ],
        }
    }
}

/// Errors raised by the synchronized vector store and the index registry.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Failed to persist vector store file '{path}': {source}")]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to serialize vector store file '{path}': {source}")]
    Serialization {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Vector store at '{path}' appears to be corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("Embedding batch of {batch_size} item(s) failed: {source}")]
    Embedding {
        batch_size: usize,
        source: EmbeddingError,
    },

    #[error(transparent)]
    Vector(#[from] VectorError),

    /// Identifier map, payload store and ANN index disagree
    #[error("Vector store consistency violated: {reason}")]
    Consistency { reason: String },

    #[error("No index named '{name}' is registered")]
    UnknownIndex { name: String },

    #[error(transparent)]
    Knowledge(#[from] RefineError),
}

impl StoreError {
    /// Get a stable status code for this error type.
    pub fn status_code(&self) -> String {
        match self {
            Self::Persistence { .. } => "PERSISTENCE_ERROR".to_string(),
            Self::Serialization { .. } => "SERIALIZATION_ERROR".to_string(),
            Self::Corrupted { .. } => "STORE_CORRUPTED".to_string(),
            Self::Embedding { .. } => "EMBEDDING_ERROR".to_string(),
            Self::Vector(_) => "VECTOR_ERROR".to_string(),
            Self::Consistency { .. } => "CONSISTENCY_ERROR".to_string(),
            Self::UnknownIndex { .. } => "UNKNOWN_INDEX".to_string(),
            Self::Knowledge(e) => e.status_code(),
        }
    }

    /// Get recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            Self::Embedding { .. } => vec![
                "No index state was modified, retry the operation",
                "Check that the embedding provider is reachable and the model is available",
            ],
            Self::Consistency { .. } => vec![
                "This indicates a bug, please report it with the index directory attached",
                "Delete the index directory and run 'refinery index' to rebuild from knowledge",
            ],
            Self::Corrupted { .. } | Self::Serialization { .. } => vec![
                "Delete the index directory and run 'refinery index' to rebuild from knowledge",
                "Check for disk errors or filesystem corruption",
            ],
            Self::Persistence { .. } => vec![
                "Check disk space and permissions in the index directory",
                "Files already on disk were replaced atomically or not at all",
            ],
            Self::UnknownIndex { .. } => vec!["Check the index name passed with --index"],
            Self::Knowledge(e) => e.recovery_suggestions(),
            Self::Vector(_) => vec![],
        }
    }
}

/// Result type alias for refinery operations
pub type RefineResult<T> = Result<T, RefineError>;

/// Result type alias for vector store operations
pub type StoreResult<T> = Result<T, StoreError>;
