#![allow(dead_code)]

use code_refinery::vector::{
    AnnIndex, EmbeddingError, EmbeddingGenerator, FlatIndex, Handle, IndexKind, IndexSnapshot,
    VectorDimension, VectorError,
};
use code_refinery::{
    ChunkExtractor, ExtractorRegistry, KnowledgeRefinery, KnowledgeStore, PlaceholderIntent,
    SyncVectorStore,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tempfile::TempDir;

pub const DIMENSION: usize = 128;

/// A source tree with knowledge and index directories beside it.
pub struct TestProject {
    pub dir: TempDir,
}

impl TestProject {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        fs::create_dir_all(dir.path().join("src")).expect("Failed to create src dir");
        Self { dir }
    }

    pub fn add_file(&self, path: &str, content: &str) -> PathBuf {
        let file_path = self.source_root().join(path);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&file_path, content).expect("Failed to write file");
        file_path
    }

    pub fn source_root(&self) -> PathBuf {
        self.dir.path().join("src")
    }

    pub fn knowledge(&self) -> KnowledgeStore {
        KnowledgeStore::new(self.source_root(), self.dir.path().join("knowledge"))
    }

    pub fn refinery(&self) -> KnowledgeRefinery {
        let extractors =
            ExtractorRegistry::with_python(ChunkExtractor::new(12, 4)).expect("python extractor");
        KnowledgeRefinery::new(
            self.knowledge(),
            extractors,
            Box::new(PlaceholderIntent::default()),
        )
    }

    pub fn index_dir(&self) -> PathBuf {
        self.dir.path().join("index").join("source_code")
    }

    pub fn store(&self, embedder: Arc<StubEmbedder>) -> SyncVectorStore {
        SyncVectorStore::open(self.index_dir(), IndexKind::Flat, 4, embedder)
            .expect("Failed to open store")
    }
}

/// Deterministic bag-of-words embedder that can be told to fail.
pub struct StubEmbedder {
    dimension: VectorDimension,
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl StubEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            dimension: VectorDimension::new(DIMENSION).expect("dimension"),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; DIMENSION];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let bucket = token
                .to_lowercase()
                .bytes()
                .fold(5381u64, |h, b| h.wrapping_mul(33) ^ u64::from(b));
            vector[(bucket % DIMENSION as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl EmbeddingGenerator for StubEmbedder {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::Request("provider unavailable".to_string()));
        }
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "stub"
    }
}

/// Flat index that refuses removal by handle, counting the rebuilds it
/// forces on the store.
pub struct AppendOnlyIndex {
    inner: FlatIndex,
    rebuilds: Arc<AtomicUsize>,
}

impl AppendOnlyIndex {
    pub fn new(rebuilds: Arc<AtomicUsize>) -> Self {
        Self {
            inner: FlatIndex::new(VectorDimension::new(DIMENSION).expect("dimension")),
            rebuilds,
        }
    }
}

impl AnnIndex for AppendOnlyIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn contains(&self, handle: Handle) -> bool {
        self.inner.contains(handle)
    }

    fn add(&mut self, entries: &[(Handle, Vec<f32>)]) -> Result<(), VectorError> {
        self.inner.add(entries)
    }

    fn remove(&mut self, handles: &[Handle]) -> Result<usize, VectorError> {
        if handles.is_empty() {
            return Ok(0);
        }
        Err(VectorError::RemovalUnsupported {
            kind: IndexKind::Flat,
        })
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Handle, f32)>, VectorError> {
        self.inner.search(query, k)
    }

    fn reconstruct(&self, handle: Handle) -> Option<Vec<f32>> {
        self.inner.reconstruct(handle)
    }

    fn handles(&self) -> Vec<Handle> {
        self.inner.handles()
    }

    fn empty_like(&self) -> Box<dyn AnnIndex> {
        self.rebuilds.fetch_add(1, Ordering::SeqCst);
        Box::new(AppendOnlyIndex::new(Arc::clone(&self.rebuilds)))
    }

    fn snapshot(&self) -> IndexSnapshot {
        self.inner.snapshot()
    }
}

/// Flat index that refuses removal and cannot reconstruct vectors, so every
/// rebuild has to re-embed from stored text.
pub struct ForgetfulIndex {
    inner: FlatIndex,
}

impl ForgetfulIndex {
    pub fn new() -> Self {
        Self {
            inner: FlatIndex::new(VectorDimension::new(DIMENSION).expect("dimension")),
        }
    }
}

impl AnnIndex for ForgetfulIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> VectorDimension {
        self.inner.dimension()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn contains(&self, handle: Handle) -> bool {
        self.inner.contains(handle)
    }

    fn add(&mut self, entries: &[(Handle, Vec<f32>)]) -> Result<(), VectorError> {
        self.inner.add(entries)
    }

    fn remove(&mut self, handles: &[Handle]) -> Result<usize, VectorError> {
        if handles.is_empty() {
            return Ok(0);
        }
        Err(VectorError::RemovalUnsupported {
            kind: IndexKind::Flat,
        })
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Handle, f32)>, VectorError> {
        self.inner.search(query, k)
    }

    fn reconstruct(&self, _handle: Handle) -> Option<Vec<f32>> {
        None
    }

    fn handles(&self) -> Vec<Handle> {
        self.inner.handles()
    }

    fn empty_like(&self) -> Box<dyn AnnIndex> {
        Box::new(ForgetfulIndex::new())
    }

    fn snapshot(&self) -> IndexSnapshot {
        self.inner.snapshot()
    }
}

pub fn read(path: &Path) -> String {
    fs::read_to_string(path).expect("Failed to read file")
}

pub mod sample_code {
    pub const PIPELINE: &str = r#"import json


class DataProcessor:
    """Loads and aggregates records."""

    def process(self, data):
        return sum(data)

    def load(self, path):
        with open(path) as handle:
            return json.load(handle)


def main():
    processor = DataProcessor()
    print(processor.process([1, 2, 3]))
"#;

    pub const PIPELINE_EDITED: &str = r#"import json


class DataProcessor:
    """Loads and aggregates records."""

    def process(self, data):
        return max(data)

    def load(self, path):
        with open(path) as handle:
            return json.load(handle)


def main():
    processor = DataProcessor()
    print(processor.process([1, 2, 3]))
"#;

    pub const BROKEN: &str = "def broken(:\n    return\n";

    pub const GUIDE: &str = "# Guide\n\nRun the pipeline with a list of numbers.\nThe processor sums them and prints the total.\nLoading reads records from a JSON file on disk.\n";
}
