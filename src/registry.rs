//! Named vector stores and query routing between them.
//!
//! A registry owns one [`SyncVectorStore`] per knowledge base name
//! (`source_code`, `tests`, `issues`, ...) under `<root>/<name>/`. Stores are
//! opened lazily and shared behind a lock; the registry is constructed
//! explicitly and handed to whatever needs it.

use crate::Settings;
use crate::error::{StoreError, StoreResult};
use crate::vector::{EmbeddingGenerator, IndexKind, SyncVectorStore};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub type SharedStore = Arc<RwLock<SyncVectorStore>>;

pub struct IndexRegistry {
    root: PathBuf,
    kind: IndexKind,
    nprobe: usize,
    embedder: Arc<dyn EmbeddingGenerator>,
    stores: BTreeMap<String, SharedStore>,
}

impl IndexRegistry {
    pub fn new(
        root: impl Into<PathBuf>,
        kind: IndexKind,
        nprobe: usize,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> Self {
        Self {
            root: root.into(),
            kind,
            nprobe,
            embedder,
            stores: BTreeMap::new(),
        }
    }

    /// Registry rooted at the configured index path.
    pub fn from_settings(
        settings: &Settings,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> Result<Self, String> {
        let kind = settings.index.index_kind()?;
        Ok(Self::new(
            settings.index_root_path(),
            kind,
            settings.index.nprobe,
            embedder,
        ))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingGenerator> {
        &self.embedder
    }

    /// Returns the store called `name`, loading or creating it on first use.
    /// The same instance is returned on later calls.
    pub fn get_or_open(&mut self, name: &str) -> StoreResult<SharedStore> {
        if let Some(store) = self.stores.get(name) {
            return Ok(Arc::clone(store));
        }
        if !is_valid_name(name) {
            return Err(StoreError::UnknownIndex {
                name: name.to_string(),
            });
        }
        let store = SyncVectorStore::open(
            self.root.join(name),
            self.kind,
            self.nprobe,
            Arc::clone(&self.embedder),
        )?;
        debug!("Opened index '{name}' with {} document(s)", store.len());
        let store = Arc::new(RwLock::new(store));
        self.stores.insert(name.to_string(), Arc::clone(&store));
        Ok(store)
    }

    /// An already opened store.
    pub fn get(&self, name: &str) -> StoreResult<SharedStore> {
        self.stores
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownIndex {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.stores.keys().map(String::as_str)
    }

    /// Index directories present on disk, whether opened or not.
    pub fn persisted_names(&self) -> Vec<String> {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().join(crate::vector::METADATA_FILE).exists())
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .collect();
        names.sort();
        names
    }

    pub fn persist_all(&self) -> StoreResult<()> {
        for store in self.stores.values() {
            store.write().persist()?;
        }
        Ok(())
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
}

/// Chooses which knowledge bases a free-text query should search.
pub trait QueryRouter: Send + Sync {
    fn route(&self, query: &str) -> Vec<String>;
}

/// Routes by keyword presence, falling back to the source code index.
#[derive(Debug, Clone)]
pub struct KeywordRouter {
    /// Output order of routed indexes.
    pub indices: Vec<String>,
    pub fallback: String,
    pub rules: Vec<(String, Vec<String>)>,
}

impl Default for KeywordRouter {
    fn default() -> Self {
        let rule = |index: &str, keywords: &[&str]| {
            (
                index.to_string(),
                keywords.iter().map(|k| k.to_string()).collect(),
            )
        };
        Self {
            indices: ["source_code", "tests", "issues", "knowledge"]
                .map(String::from)
                .to_vec(),
            fallback: "source_code".to_string(),
            rules: vec![
                rule("issues", &["issue", "bug", "ticket", "jira"]),
                rule("tests", &["test", "pytest", "unittest", "spec"]),
                rule("knowledge", &["doc", "readme", "guide", "how to"]),
            ],
        }
    }
}

impl QueryRouter for KeywordRouter {
    fn route(&self, query: &str) -> Vec<String> {
        let query = query.to_lowercase();
        let matched: Vec<&str> = self
            .rules
            .iter()
            .filter(|(_, keywords)| keywords.iter().any(|k| query.contains(k.as_str())))
            .map(|(index, _)| index.as_str())
            .collect();
        if matched.is_empty() {
            return vec![self.fallback.clone()];
        }
        self.indices
            .iter()
            .filter(|index| matched.contains(&index.as_str()))
            .cloned()
            .collect()
    }
}
