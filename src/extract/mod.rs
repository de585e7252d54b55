//! Symbol extraction collaborators
//!
//! An extractor turns one file's content into [`ExtractedUnit`]s with stable
//! identifiers. Hashing and lifecycle classification happen later, in the
//! refinery. The registry picks an extractor by file extension and falls back
//! to fixed-size chunking for anything without a symbol extractor.

pub mod chunk;
pub mod python;

pub use chunk::ChunkExtractor;
pub use python::{PythonExtractor, module_path};

use crate::config::RefineConfig;
use crate::error::RefineResult;
use crate::types::ExtractedUnit;
use std::path::Path;

/// Turns file content into code units.
///
/// `path` is the source path relative to the source root; identifiers are
/// derived from it.
pub trait SymbolExtractor: Send + Sync {
    fn language(&self) -> &str;

    /// Extensions (without the dot) this extractor handles.
    fn extensions(&self) -> &[&str];

    fn extract(&self, path: &Path, content: &str) -> RefineResult<Vec<ExtractedUnit>>;
}

/// Extension-keyed extractor lookup with a chunking fallback.
pub struct ExtractorRegistry {
    extractors: Vec<Box<dyn SymbolExtractor>>,
    fallback: ChunkExtractor,
}

impl ExtractorRegistry {
    pub fn new(fallback: ChunkExtractor) -> Self {
        Self {
            extractors: Vec::new(),
            fallback,
        }
    }

    /// Registry with the Python extractor registered.
    pub fn with_python(fallback: ChunkExtractor) -> RefineResult<Self> {
        let mut registry = Self::new(fallback);
        registry.register(Box::new(PythonExtractor::new()?));
        Ok(registry)
    }

    pub fn from_settings(config: &RefineConfig) -> RefineResult<Self> {
        Self::with_python(ChunkExtractor::new(
            config.chunk_window,
            config.chunk_overlap,
        ))
    }

    /// Later registrations win for a shared extension.
    pub fn register(&mut self, extractor: Box<dyn SymbolExtractor>) {
        self.extractors.insert(0, extractor);
    }

    pub fn for_path(&self, path: &Path) -> &dyn SymbolExtractor {
        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            return &self.fallback;
        };
        self.extractors
            .iter()
            .find(|e| e.extensions().iter().any(|x| x.eq_ignore_ascii_case(ext)))
            .map(|e| &**e)
            .unwrap_or(&self.fallback)
    }

    pub fn languages(&self) -> Vec<&str> {
        self.extractors
            .iter()
            .map(|e| e.language())
            .chain(std::iter::once(self.fallback.language()))
            .collect()
    }
}
