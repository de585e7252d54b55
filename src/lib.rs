//! Knowledge refinery and synchronized vector index for source-code search.
//!
//! Source files are split into code units (functions, classes, methods or
//! text chunks), reconciled against per-file knowledge JSON so annotations
//! survive edits, and mirrored into a vector store whose identifier map,
//! payloads and ANN index are kept in lock-step.

pub mod config;
pub mod display;
pub mod error;
pub mod extract;
pub mod indexing;
pub mod io;
pub mod knowledge;
pub mod logging;
pub mod registry;
pub mod search;
pub mod types;
pub mod vector;

// Explicit exports for better API clarity
pub use config::Settings;
pub use error::{RefineError, RefineResult, StoreError, StoreResult};
pub use extract::{ChunkExtractor, ExtractorRegistry, PythonExtractor, SymbolExtractor};
pub use indexing::{FileWalker, SourceTier};
pub use knowledge::{
    IntentGenerator, IntentManager, KnowledgeRefinery, KnowledgeStore, PlaceholderIntent,
    RefineReport, calculate_hash,
};
pub use registry::{IndexRegistry, KeywordRouter, QueryRouter, SharedStore};
pub use search::{SearchFacade, SearchFilter};
pub use types::{CodeUnit, ExtractedUnit, LifecycleState, UnitKind};
pub use vector::{
    AnnIndex, EmbeddingGenerator, IndexKind, IndexedUnit, SearchHit, SyncReport, SyncVectorStore,
};
