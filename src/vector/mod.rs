//! Synchronized vector storage for code units.
//!
//! An ANN index holds vectors at integer handles; the identifier map ties
//! those handles to stable unit ids; the payload store keeps what search
//! returns. [`SyncVectorStore`] mutates the three together so they never
//! disagree, rebuilding the index when it cannot remove by handle.
//!
//! # Architecture
//! Two index kinds are available: an exact flat index and an inverted-file
//! index trained with K-means. Index contents persist in a compact binary
//! file read back through a memory map; identifier map, payloads and
//! metadata are JSON. All files are replaced atomically.

mod clustering;
mod embedding;
mod id_map;
mod index;
mod metadata;
mod payload;
mod storage;
mod store;
mod sync;
mod types;

// Re-export core types for public API
pub use clustering::{KMeansResult, cosine_similarity, kmeans_clustering};
#[cfg(test)]
pub use embedding::MockEmbeddingGenerator;
pub use embedding::{
    EmbeddingGenerator, FastEmbedGenerator, HttpEmbeddingGenerator, check_batch, create_generator,
    models_dir, parse_embedding_model,
};
pub use id_map::IdentifierMap;
pub use index::{
    AnnIndex, DEFAULT_NPROBE, FlatIndex, IndexSnapshot, IvfFlatIndex, create_index, from_snapshot,
};
pub use metadata::{METADATA_FILE, StoreMetadata};
pub use payload::{PayloadStore, StoredDocument};
pub use storage::{read_index, write_index};
pub use store::{
    AppliedChanges, ChangeSet, ID_MAP_FILE, INDEX_FILE, IndexedUnit, PAYLOADS_FILE, PayloadFilter,
    SearchHit, SyncVectorStore,
};
pub use sync::SyncReport;
pub use types::{
    EmbeddingError, Handle, IndexKind, Payload, VECTOR_DIMENSION_384, VectorDimension, VectorError,
};
