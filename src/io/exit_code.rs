//! Exit codes for CLI operations following Unix conventions.
//!
//! # Exit Code Semantics
//!
//! - `0`: Success
//! - `1`: General error - unspecified failure
//! - `2`: Blocking error - the vector store is inconsistent, automation should halt
//! - `3-125`: Specific recoverable errors
//! - `126-255`: Reserved by shell

use crate::error::{RefineError, StoreError};

/// Standard exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Operation succeeded (code 0)
    Success = 0,

    /// Unspecified error occurred (code 1)
    GeneralError = 1,

    /// Identifier map, payloads and index disagree (code 2)
    BlockingError = 2,

    /// Unit or index not found (code 3)
    NotFound = 3,

    /// Some files failed to extract (code 4)
    ExtractionError = 4,

    /// File I/O error (code 5)
    IoError = 5,

    /// Configuration error (code 6)
    ConfigError = 6,

    /// Knowledge or index files corrupted (code 7)
    Corrupted = 7,

    /// Embedding provider failed (code 8)
    EmbeddingError = 8,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl ExitCode {
    pub fn from_refine_error(error: &RefineError) -> Self {
        match error {
            RefineError::UnitNotFound { .. } => ExitCode::NotFound,
            RefineError::Extraction { .. } => ExitCode::ExtractionError,
            RefineError::FileRead { .. } | RefineError::Persistence { .. } => ExitCode::IoError,
            RefineError::Corrupted { .. } | RefineError::Serialization { .. } => {
                ExitCode::Corrupted
            }
            RefineError::ExtractorInit { .. } => ExitCode::GeneralError,
        }
    }

    pub fn from_store_error(error: &StoreError) -> Self {
        match error {
            StoreError::Consistency { .. } => ExitCode::BlockingError,
            StoreError::UnknownIndex { .. } => ExitCode::NotFound,
            StoreError::Persistence { .. } => ExitCode::IoError,
            StoreError::Corrupted { .. } | StoreError::Serialization { .. } => ExitCode::Corrupted,
            StoreError::Embedding { .. } => ExitCode::EmbeddingError,
            StoreError::Knowledge(e) => Self::from_refine_error(e),
            StoreError::Vector(_) => ExitCode::GeneralError,
        }
    }

    /// Walks an `anyhow` chain for the first refinery or store error.
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        for cause in error.chain() {
            if let Some(e) = cause.downcast_ref::<StoreError>() {
                return Self::from_store_error(e);
            }
            if let Some(e) = cause.downcast_ref::<RefineError>() {
                return Self::from_refine_error(e);
            }
        }
        ExitCode::GeneralError
    }

    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(self, ExitCode::BlockingError)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ExitCode::Success)
    }

    pub fn description(&self) -> &str {
        match self {
            ExitCode::Success => "Success",
            ExitCode::GeneralError => "General error",
            ExitCode::BlockingError => "Blocking error - automation should halt",
            ExitCode::NotFound => "Not found",
            ExitCode::ExtractionError => "Extraction error",
            ExitCode::IoError => "I/O error",
            ExitCode::ConfigError => "Configuration error",
            ExitCode::Corrupted => "Data corrupted",
            ExitCode::EmbeddingError => "Embedding error",
        }
    }
}
