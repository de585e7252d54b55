//! Synchronized vector store.
//!
//! Keeps an [`AnnIndex`], the [`IdentifierMap`] and the [`PayloadStore`]
//! mutually consistent. Every mutating operation stages its identifier and
//! payload changes on copies, updates the index, and only then commits the
//! copies, so a failure at any step leaves all three structures as they were.
//!
//! Existing vectors are always evicted before re-insertion. When the index
//! refuses removal the store rebuilds a fresh index from the live payload set
//! (reconstructing vectors from the old index, re-embedding stored text only
//! when that fails) and swaps it in whole.

use crate::error::{StoreError, StoreResult};
use crate::vector::embedding::{EmbeddingGenerator, check_batch};
use crate::vector::id_map::IdentifierMap;
use crate::vector::index::{AnnIndex, create_index, from_snapshot};
use crate::vector::metadata::{METADATA_FILE, StoreMetadata};
use crate::vector::payload::{PayloadStore, StoredDocument};
use crate::vector::storage::{read_index, write_index};
use crate::vector::types::{Handle, IndexKind, Payload, VectorError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const INDEX_FILE: &str = "index.vec";
pub const ID_MAP_FILE: &str = "id_map.json";
pub const PAYLOADS_FILE: &str = "payloads.json";

/// One item to index: its external key, the text to embed, and the payload
/// returned with search hits.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedUnit {
    pub external_id: String,
    pub text: String,
    pub payload: Payload,
}

/// A search result.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub external_id: String,
    pub payload: Payload,
    pub score: f32,
}

/// Changes applied together by [`SyncVectorStore::apply`].
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub upserts: Vec<IndexedUnit>,
    pub deletes: Vec<String>,
    pub deactivations: Vec<String>,
}

/// Counts of what [`SyncVectorStore::apply`] changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedChanges {
    pub written: usize,
    pub replaced: usize,
    pub deleted: usize,
    pub deactivated: usize,
}

impl AppliedChanges {
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.deleted == 0 && self.deactivated == 0
    }
}

/// Predicate over payloads applied before truncation to `top_k`.
pub type PayloadFilter<'a> = &'a dyn Fn(&Payload) -> bool;

pub struct SyncVectorStore {
    dir: PathBuf,
    index: Box<dyn AnnIndex>,
    id_map: IdentifierMap,
    payloads: PayloadStore,
    embedder: Arc<dyn EmbeddingGenerator>,
    metadata: StoreMetadata,
}

impl std::fmt::Debug for SyncVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncVectorStore")
            .field("dir", &self.dir)
            .field("kind", &self.index.kind())
            .field("vectors", &self.index.len())
            .field("documents", &self.payloads.len())
            .field("inactive", &self.payloads.inactive_count())
            .finish()
    }
}

impl SyncVectorStore {
    /// Empty store over `index`. Nothing is read from or written to `dir`
    /// until [`load`](Self::load) or [`persist`](Self::persist).
    pub fn new(
        dir: impl Into<PathBuf>,
        index: Box<dyn AnnIndex>,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> StoreResult<Self> {
        let dimension = embedder.dimension();
        if index.dimension() != dimension {
            return Err(VectorError::DimensionMismatch {
                expected: dimension.get(),
                actual: index.dimension().get(),
            }
            .into());
        }
        let metadata = StoreMetadata::new(
            embedder.model_name().to_string(),
            dimension.get(),
            index.kind(),
            0,
        );
        Ok(Self {
            dir: dir.into(),
            index,
            id_map: IdentifierMap::new(),
            payloads: PayloadStore::new(),
            embedder,
            metadata,
        })
    }

    pub fn with_kind(
        dir: impl Into<PathBuf>,
        kind: IndexKind,
        nprobe: usize,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> StoreResult<Self> {
        let index = create_index(kind, embedder.dimension(), nprobe);
        Self::new(dir, index, embedder)
    }

    /// Creates a store and loads prior state from `dir` if present.
    pub fn open(
        dir: impl Into<PathBuf>,
        kind: IndexKind,
        nprobe: usize,
        embedder: Arc<dyn EmbeddingGenerator>,
    ) -> StoreResult<Self> {
        let mut store = Self::with_kind(dir, kind, nprobe, embedder)?;
        if store.load()? {
            debug!("Loaded vector store from {}", store.dir.display());
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingGenerator> {
        &self.embedder
    }

    pub fn index_kind(&self) -> IndexKind {
        self.index.kind()
    }

    /// Documents in the payload store, inactive ones included.
    pub fn len(&self) -> usize {
        self.payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    /// Vectors physically present in the index.
    pub fn vector_count(&self) -> usize {
        self.index.len()
    }

    pub fn inactive_count(&self) -> usize {
        self.payloads.inactive_count()
    }

    /// Present in the store, active or not.
    pub fn is_indexed(&self, external_id: &str) -> bool {
        self.payloads.contains(external_id)
    }

    pub fn is_active(&self, external_id: &str) -> bool {
        self.payloads.is_active(external_id)
    }

    pub fn document(&self, external_id: &str) -> Option<&StoredDocument> {
        self.payloads.get(external_id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.payloads.ids()
    }

    pub fn handle_of(&self, external_id: &str) -> Option<Handle> {
        self.id_map.handle_of(external_id)
    }

    /// Embeds and stores `units`, replacing any that already exist.
    ///
    /// All texts are embedded in one call before anything is mutated. A unit
    /// that already exists keeps its handle; its old vector is evicted first.
    /// When the same id appears twice the later unit wins. Returns the number
    /// of distinct units written.
    pub fn add_or_update(&mut self, units: Vec<IndexedUnit>) -> StoreResult<usize> {
        let applied = self.apply(ChangeSet {
            upserts: units,
            ..ChangeSet::default()
        })?;
        Ok(applied.written)
    }

    /// Removes documents, their vectors and their identifier mappings.
    /// Unknown ids are ignored. Returns how many ids were present.
    pub fn delete<S: AsRef<str>>(&mut self, external_ids: &[S]) -> StoreResult<usize> {
        let applied = self.apply(ChangeSet {
            deletes: external_ids.iter().map(|id| id.as_ref().to_string()).collect(),
            ..ChangeSet::default()
        })?;
        Ok(applied.deleted)
    }

    /// Applies deletions, deactivations and upserts as one unit.
    ///
    /// Upserts are embedded first; deletions and deactivations are staged
    /// together with them and committed only once the index has accepted
    /// every change. On error nothing is changed.
    pub fn apply(&mut self, changes: ChangeSet) -> StoreResult<AppliedChanges> {
        let upserts = dedupe_last_wins(changes.upserts);
        let vectors = if upserts.is_empty() {
            Vec::new()
        } else {
            let texts: Vec<&str> = upserts.iter().map(|u| u.text.as_str()).collect();
            self.embed(&texts)?
        };

        let mut id_map = self.id_map.clone();
        let mut payloads = self.payloads.clone();
        let mut evict = Vec::new();
        let mut insert = Vec::with_capacity(upserts.len());
        let mut applied = AppliedChanges::default();

        for id in &changes.deletes {
            let handle = id_map.remove(id);
            let document = payloads.remove(id);
            if handle.is_some() || document.is_some() {
                applied.deleted += 1;
            }
            if let Some(handle) = handle.filter(|h| self.index.contains(*h)) {
                evict.push(handle);
            }
        }

        for id in &changes.deactivations {
            if payloads.deactivate(id) {
                applied.deactivated += 1;
            }
        }

        for (unit, vector) in upserts.into_iter().zip(vectors) {
            let handle = id_map.get_or_create(&unit.external_id);
            if self.index.contains(handle) {
                evict.push(handle);
                applied.replaced += 1;
            }
            payloads.upsert(
                &unit.external_id,
                StoredDocument {
                    text: unit.text,
                    payload: unit.payload,
                },
            );
            insert.push((handle, vector));
        }
        applied.written = insert.len();

        if applied.is_noop() {
            return Ok(applied);
        }
        self.commit(evict, insert, id_map, payloads)?;
        debug!(
            "Applied {} write(s) ({} replaced), {} deletion(s), {} deactivation(s)",
            applied.written, applied.replaced, applied.deleted, applied.deactivated
        );
        Ok(applied)
    }

    /// Hides documents from search without touching the index. Returns how
    /// many became inactive.
    pub fn deactivate<S: AsRef<str>>(&mut self, external_ids: &[S]) -> usize {
        external_ids
            .iter()
            .filter(|id| self.payloads.deactivate(id.as_ref()))
            .count()
    }

    /// Embeds a single query text.
    pub fn embed_query(&self, text: &str) -> StoreResult<Vec<f32>> {
        let mut vectors = self.embed(&[text])?;
        vectors.pop().ok_or_else(|| StoreError::Embedding {
            batch_size: 1,
            source: crate::vector::EmbeddingError::CountMismatch {
                expected: 1,
                actual: 0,
            },
        })
    }

    /// Up to `top_k` active documents nearest to `query`, best first.
    ///
    /// Handles with no mapping or no payload are skipped; inactive ids are
    /// skipped before payload lookup. The index is over-fetched so that
    /// skipped and filtered entries do not shrink the result below `top_k`
    /// while more candidates exist.
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<PayloadFilter<'_>>,
    ) -> StoreResult<Vec<SearchHit>> {
        if top_k == 0 || self.index.is_empty() {
            return Ok(Vec::new());
        }

        let mut fetch = top_k + self.payloads.inactive_count();
        if filter.is_some() {
            fetch = fetch.max(top_k * 4);
        }

        loop {
            let candidates = self.index.search(query, fetch)?;
            let exhausted = candidates.len() < fetch || fetch >= self.index.len();
            let mut hits = self.resolve(candidates, filter);
            if hits.len() >= top_k || exhausted {
                hits.truncate(top_k);
                return Ok(hits);
            }
            fetch = fetch.saturating_mul(2);
        }
    }

    fn resolve(
        &self,
        candidates: Vec<(Handle, f32)>,
        filter: Option<PayloadFilter<'_>>,
    ) -> Vec<SearchHit> {
        let mut hits = Vec::with_capacity(candidates.len());
        for (handle, score) in candidates {
            let Some(external_id) = self.id_map.resolve(handle) else {
                debug!("Skipping unmapped handle {handle}");
                continue;
            };
            if self.payloads.is_inactive(external_id) {
                continue;
            }
            let Some(document) = self.payloads.get(external_id) else {
                debug!("Skipping {external_id}: no payload");
                continue;
            };
            if filter.is_some_and(|keep| !keep(&document.payload)) {
                continue;
            }
            hits.push(SearchHit {
                external_id: external_id.to_string(),
                payload: document.payload.clone(),
                score,
            });
        }
        hits
    }

    /// Checks that every document has a mapping and a vector and that the
    /// index holds nothing else.
    pub fn verify_consistency(&self) -> StoreResult<()> {
        check_consistency(self.index.as_ref(), &self.id_map, &self.payloads)
    }

    /// Writes index, identifier map and payloads into a fresh generation
    /// directory, then switches to it by rewriting the metadata.
    ///
    /// A crash before the metadata is replaced leaves the previous
    /// generation in effect; the superseded generation is removed afterwards.
    pub fn persist(&mut self) -> StoreResult<()> {
        let current = StoreMetadata::load(&self.dir)
            .map(|m| m.generation)
            .unwrap_or(0)
            .max(self.metadata.generation);
        let mut metadata = self.metadata.clone();
        metadata.generation = current + 1;

        let data_dir = metadata.data_dir(&self.dir);
        std::fs::create_dir_all(&data_dir).map_err(|source| StoreError::Persistence {
            path: data_dir.clone(),
            source,
        })?;

        write_index(&data_dir.join(INDEX_FILE), &self.index.snapshot())?;
        self.id_map.persist(&data_dir.join(ID_MAP_FILE))?;
        self.payloads.persist(&data_dir.join(PAYLOADS_FILE))?;

        metadata.update(self.payloads.len(), self.index.kind());
        metadata.save(&self.dir)?;
        self.metadata = metadata;
        self.discard_generation(current);

        info!(
            "Persisted {} document(s) ({} inactive) to {}",
            self.payloads.len(),
            self.payloads.inactive_count(),
            data_dir.display()
        );
        Ok(())
    }

    /// Directory holding the data files of the current generation.
    pub fn data_dir(&self) -> PathBuf {
        self.metadata.data_dir(&self.dir)
    }

    fn discard_generation(&self, generation: u64) {
        let result = if generation == 0 {
            [INDEX_FILE, ID_MAP_FILE, PAYLOADS_FILE]
                .iter()
                .map(|file| self.dir.join(file))
                .filter(|path| path.exists())
                .try_for_each(std::fs::remove_file)
        } else {
            let dir = StoreMetadata::generation_dir(&self.dir, generation);
            if dir.exists() {
                std::fs::remove_dir_all(&dir)
            } else {
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("Failed to remove superseded generation {generation}: {e}");
        }
    }

    /// Replaces in-memory state with what is on disk.
    ///
    /// Returns `false` when no persisted store exists. Nothing is replaced
    /// unless every file loads and the loaded state is consistent.
    pub fn load(&mut self) -> StoreResult<bool> {
        if !StoreMetadata::exists(&self.dir) {
            return Ok(false);
        }

        let metadata = StoreMetadata::load(&self.dir)?;
        let dimension = self.embedder.dimension().get();
        if metadata.dimension != dimension {
            return Err(StoreError::Corrupted {
                path: self.dir.join(METADATA_FILE),
                reason: format!(
                    "stored dimension {} does not match embedder dimension {dimension}",
                    metadata.dimension
                ),
            });
        }
        if metadata.model_name != self.embedder.model_name() {
            warn!(
                "Vector store was built with '{}' but the embedder is '{}'",
                metadata.model_name,
                self.embedder.model_name()
            );
        }

        let data_dir = metadata.data_dir(&self.dir);
        let index = from_snapshot(read_index(&data_dir.join(INDEX_FILE))?)?;
        if index.kind() != self.index.kind() {
            warn!(
                "Vector store at {} uses a {} index, keeping it instead of {}",
                self.dir.display(),
                index.kind(),
                self.index.kind()
            );
        }

        let id_map_path = data_dir.join(ID_MAP_FILE);
        let mut id_map = IdentifierMap::new();
        if !id_map.load(&id_map_path)? {
            return Err(StoreError::Corrupted {
                path: id_map_path,
                reason: "identifier map is missing".to_string(),
            });
        }

        let payloads_path = data_dir.join(PAYLOADS_FILE);
        let payloads = PayloadStore::load(&payloads_path)?.ok_or_else(|| StoreError::Corrupted {
            path: payloads_path,
            reason: "payload store is missing".to_string(),
        })?;

        check_consistency(index.as_ref(), &id_map, &payloads)?;

        self.index = index;
        self.id_map = id_map;
        self.payloads = payloads;
        self.metadata = metadata;
        Ok(true)
    }

    fn embed(&self, texts: &[&str]) -> StoreResult<Vec<Vec<f32>>> {
        let batch_size = texts.len();
        let vectors = self
            .embedder
            .generate_embeddings(texts)
            .map_err(|source| StoreError::Embedding { batch_size, source })?;
        check_batch(batch_size, self.embedder.dimension(), &vectors)
            .map_err(|source| StoreError::Embedding { batch_size, source })?;
        Ok(vectors)
    }

    /// Applies staged changes: evict, insert, then adopt the staged map and
    /// payloads. Falls back to a rebuild when eviction is refused.
    fn commit(
        &mut self,
        evict: Vec<Handle>,
        insert: Vec<(Handle, Vec<f32>)>,
        id_map: IdentifierMap,
        payloads: PayloadStore,
    ) -> StoreResult<()> {
        // captured for restore if the insert step fails
        let evicted: Vec<(Handle, Vec<f32>)> = evict
            .iter()
            .filter_map(|h| self.index.reconstruct(*h).map(|v| (*h, v)))
            .collect();

        match self.index.remove(&evict) {
            Ok(_) => {
                if let Err(e) = self.index.add(&insert) {
                    self.restore(&evicted)?;
                    return Err(e.into());
                }
                self.id_map = id_map;
                self.payloads = payloads;
            }
            Err(VectorError::RemovalUnsupported { kind }) => {
                warn!("{kind} index cannot remove by handle, rebuilding");
                let mut id_map = id_map;
                let mut payloads = payloads;
                let purged = purge_inactive(&mut id_map, &mut payloads);
                let index = self.rebuild(&id_map, &payloads, insert)?;
                info!(
                    "Rebuilt {kind} index with {} vector(s), purged {purged} inactive",
                    index.len()
                );
                self.index = index;
                self.id_map = id_map;
                self.payloads = payloads;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn restore(&mut self, evicted: &[(Handle, Vec<f32>)]) -> StoreResult<()> {
        if let Err(e) = self.index.add(evicted) {
            let reason = format!(
                "failed to restore {} evicted vector(s) after a failed insert: {e}",
                evicted.len()
            );
            error!("{reason}");
            return Err(StoreError::Consistency { reason });
        }
        Ok(())
    }

    /// Builds a fresh index holding exactly the documents in `payloads`.
    ///
    /// Vectors come from `overrides`, else the current index, else are
    /// re-embedded from stored text in one batch. The current index is not
    /// touched.
    fn rebuild(
        &self,
        id_map: &IdentifierMap,
        payloads: &PayloadStore,
        overrides: Vec<(Handle, Vec<f32>)>,
    ) -> StoreResult<Box<dyn AnnIndex>> {
        let mut overrides: HashMap<Handle, Vec<f32>> = overrides.into_iter().collect();
        let mut entries = Vec::with_capacity(payloads.len());
        let mut missing: Vec<(Handle, &str)> = Vec::new();

        for (external_id, document) in payloads.iter() {
            let handle = id_map.handle_of(external_id).ok_or_else(|| {
                let reason = format!("document '{external_id}' has no handle");
                error!("{reason}");
                StoreError::Consistency { reason }
            })?;
            match overrides
                .remove(&handle)
                .or_else(|| self.index.reconstruct(handle))
            {
                Some(vector) => entries.push((handle, vector)),
                None => missing.push((handle, document.text.as_str())),
            }
        }

        if !missing.is_empty() {
            warn!(
                "Re-embedding {} vector(s) that could not be reconstructed",
                missing.len()
            );
            let texts: Vec<&str> = missing.iter().map(|(_, text)| *text).collect();
            let vectors = self.embed(&texts)?;
            entries.extend(missing.iter().map(|(h, _)| *h).zip(vectors));
        }

        let mut index = self.index.empty_like();
        index.add(&entries)?;
        Ok(index)
    }
}

/// Drops inactive documents and their mappings. Returns how many.
fn purge_inactive(id_map: &mut IdentifierMap, payloads: &mut PayloadStore) -> usize {
    let inactive: Vec<String> = payloads.inactive_ids().map(str::to_string).collect();
    for id in &inactive {
        payloads.remove(id);
        id_map.remove(id);
    }
    inactive.len()
}

fn dedupe_last_wins(units: Vec<IndexedUnit>) -> Vec<IndexedUnit> {
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(units.len());
    let mut deduped: Vec<IndexedUnit> = Vec::with_capacity(units.len());
    for unit in units {
        match positions.get(&unit.external_id) {
            Some(&i) => deduped[i] = unit,
            None => {
                positions.insert(unit.external_id.clone(), deduped.len());
                deduped.push(unit);
            }
        }
    }
    deduped
}

fn check_consistency(
    index: &dyn AnnIndex,
    id_map: &IdentifierMap,
    payloads: &PayloadStore,
) -> StoreResult<()> {
    let fail = |reason: String| {
        error!("Vector store consistency violated: {reason}");
        Err(StoreError::Consistency { reason })
    };

    for external_id in payloads.ids() {
        let Some(handle) = id_map.handle_of(external_id) else {
            return fail(format!("document '{external_id}' has no handle"));
        };
        if !index.contains(handle) {
            return fail(format!("document '{external_id}' has no vector at {handle}"));
        }
    }
    for (external_id, _) in id_map.iter() {
        if !payloads.contains(external_id) {
            return fail(format!("handle for '{external_id}' has no document"));
        }
    }
    let mapped: HashSet<Handle> = id_map.iter().map(|(_, h)| h).collect();
    if let Some(stray) = index.handles().into_iter().find(|h| !mapped.contains(h)) {
        return fail(format!("index holds unmapped handle {stray}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::MockEmbeddingGenerator;
    use tempfile::TempDir;

    fn unit(id: &str, text: &str) -> IndexedUnit {
        let mut payload = Payload::new();
        payload.insert("source_type".into(), "code_unit".into());
        payload.insert("name".into(), id.into());
        IndexedUnit {
            external_id: id.to_string(),
            text: text.to_string(),
            payload,
        }
    }

    fn store(dir: &Path, kind: IndexKind) -> (SyncVectorStore, Arc<MockEmbeddingGenerator>) {
        let embedder = Arc::new(MockEmbeddingGenerator::new());
        let store = SyncVectorStore::with_kind(dir, kind, 8, embedder.clone()).unwrap();
        (store, embedder)
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|h| h.external_id.as_str()).collect()
    }

    #[test]
    fn test_alpha_ranks_first() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, embedder) = store(temp_dir.path(), IndexKind::Flat);
        store
            .add_or_update(vec![
                unit("a:alpha", "alpha computes the alpha channel"),
                unit("b:beta", "beta parses beta releases"),
            ])
            .unwrap();
        assert_eq!(embedder.calls(), 1);

        let query = embedder.embed_one("alpha channel");
        let hits = store.search(&query, 2, None).unwrap();
        assert_eq!(hits[0].external_id, "a:alpha");
        assert!(hits[0].score >= hits[1].score);
        store.verify_consistency().unwrap();
    }

    #[test]
    fn test_update_keeps_handle_and_no_duplicates() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, embedder) = store(temp_dir.path(), IndexKind::Flat);
        store.add_or_update(vec![unit("a:alpha", "alpha one")]).unwrap();
        let handle = store.handle_of("a:alpha").unwrap();

        store.add_or_update(vec![unit("a:alpha", "alpha two")]).unwrap();
        store.add_or_update(vec![unit("a:alpha", "alpha two")]).unwrap();

        assert_eq!(store.handle_of("a:alpha"), Some(handle));
        assert_eq!(store.vector_count(), 1);
        let hits = store.search(&embedder.embed_one("alpha two"), 10, None).unwrap();
        assert_eq!(ids(&hits), vec!["a:alpha"]);
        assert_eq!(store.document("a:alpha").unwrap().text, "alpha two");
    }

    #[test]
    fn test_duplicate_ids_in_batch_last_wins() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, _) = store(temp_dir.path(), IndexKind::Flat);
        let written = store
            .add_or_update(vec![unit("x", "first"), unit("x", "second")])
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(store.document("x").unwrap().text, "second");
    }

    #[test]
    fn test_deactivated_entries_are_excluded() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, embedder) = store(temp_dir.path(), IndexKind::Flat);
        store
            .add_or_update(vec![unit("a:alpha", "alpha"), unit("b:beta", "beta")])
            .unwrap();

        assert_eq!(store.deactivate(&["a:alpha"]), 1);
        assert_eq!(store.deactivate(&["a:alpha", "missing"]), 0);

        let hits = store.search(&embedder.embed_one("alpha"), 1, None).unwrap();
        assert_eq!(ids(&hits), vec!["b:beta"]);
        assert_eq!(store.vector_count(), 2);
        assert!(store.is_indexed("a:alpha"));
        assert!(!store.is_active("a:alpha"));

        // re-adding reactivates
        store.add_or_update(vec![unit("a:alpha", "alpha")]).unwrap();
        let hits = store.search(&embedder.embed_one("alpha"), 1, None).unwrap();
        assert_eq!(ids(&hits), vec!["a:alpha"]);
    }

    #[test]
    fn test_delete_frees_mapping_and_never_reuses_handle() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, embedder) = store(temp_dir.path(), IndexKind::Flat);
        store
            .add_or_update(vec![unit("a", "alpha"), unit("b", "beta")])
            .unwrap();
        let old = store.handle_of("b").unwrap();

        assert_eq!(store.delete(&["b", "unknown"]).unwrap(), 1);
        assert_eq!(store.delete(&["b"]).unwrap(), 0);
        assert!(store.search(&embedder.embed_one("beta"), 5, None).unwrap().iter().all(|h| h.external_id != "b"));

        store.add_or_update(vec![unit("b", "beta")]).unwrap();
        assert!(store.handle_of("b").unwrap() > old);
        store.verify_consistency().unwrap();
    }

    #[test]
    fn test_ivf_update_falls_back_to_rebuild() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, embedder) = store(temp_dir.path(), IndexKind::IvfFlat);
        store
            .add_or_update(vec![
                unit("a", "alpha"),
                unit("b", "beta"),
                unit("c", "gamma"),
            ])
            .unwrap();
        store.deactivate(&["c"]);

        store.add_or_update(vec![unit("a", "alpha delta")]).unwrap();

        // inactive entry purged by the rebuild
        assert!(!store.is_indexed("c"));
        assert_eq!(store.vector_count(), 2);
        store.verify_consistency().unwrap();
        let hits = store.search(&embedder.embed_one("alpha delta"), 1, None).unwrap();
        assert_eq!(ids(&hits), vec!["a"]);

        store.delete(&["b"]).unwrap();
        assert_eq!(store.vector_count(), 1);
        store.verify_consistency().unwrap();
    }

    #[test]
    fn test_embedding_failure_leaves_store_untouched() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, embedder) = store(temp_dir.path(), IndexKind::Flat);
        store.add_or_update(vec![unit("a", "alpha")]).unwrap();

        embedder.set_failing(true);
        let result = store.add_or_update(vec![unit("a", "changed"), unit("b", "beta")]);
        assert!(matches!(result, Err(StoreError::Embedding { batch_size: 2, .. })));

        assert_eq!(store.len(), 1);
        assert!(store.handle_of("b").is_none());
        assert_eq!(store.document("a").unwrap().text, "alpha");
        store.verify_consistency().unwrap();
    }

    #[test]
    fn test_filter_applied_before_truncation() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, embedder) = store(temp_dir.path(), IndexKind::Flat);
        let mut doc = unit("docs/readme.md#0", "alpha guide");
        doc.payload.insert("source_type".into(), "doc".into());
        store
            .add_or_update(vec![doc, unit("m:alpha", "alpha beta gamma")])
            .unwrap();

        let only_code = |p: &Payload| p["source_type"] == "code_unit";
        let hits = store
            .search(&embedder.embed_one("alpha guide"), 1, Some(&only_code))
            .unwrap();
        assert_eq!(ids(&hits), vec!["m:alpha"]);
    }

    #[test]
    fn test_persist_and_load_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("code");
        let (mut store, embedder) = store(&dir, IndexKind::IvfFlat);
        store
            .add_or_update(vec![unit("a", "alpha"), unit("b", "beta"), unit("c", "gamma")])
            .unwrap();
        store.deactivate(&["c"]);
        store.persist().unwrap();
        let query = embedder.embed_one("beta");
        let before = store.search(&query, 3, None).unwrap();

        let mut reopened = SyncVectorStore::with_kind(&dir, IndexKind::IvfFlat, 8, embedder.clone()).unwrap();
        assert!(reopened.load().unwrap());
        assert_eq!(reopened.search(&query, 3, None).unwrap(), before);
        assert!(!reopened.is_active("c"));
        assert_eq!(reopened.handle_of("b"), store.handle_of("b"));

        let mut fresh =
            SyncVectorStore::with_kind(temp_dir.path().join("none"), IndexKind::Flat, 8, embedder).unwrap();
        assert!(!fresh.load().unwrap());
    }

    #[test]
    fn test_interrupted_persist_keeps_previous_generation() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("code");
        let (mut store, embedder) = store(&dir, IndexKind::Flat);
        store
            .add_or_update(vec![unit("a", "alpha"), unit("b", "beta")])
            .unwrap();
        store.persist().unwrap();
        let first = store.data_dir();

        // next state written only partly: index and map, no payloads or metadata
        store.add_or_update(vec![unit("c", "gamma")]).unwrap();
        let next = StoreMetadata::generation_dir(&dir, 2);
        std::fs::create_dir_all(&next).unwrap();
        write_index(&next.join(INDEX_FILE), &store.index.snapshot()).unwrap();
        store.id_map.persist(&next.join(ID_MAP_FILE)).unwrap();

        let mut reopened = SyncVectorStore::with_kind(&dir, IndexKind::Flat, 8, embedder.clone()).unwrap();
        assert!(reopened.load().unwrap());
        assert_eq!(reopened.len(), 2);
        assert!(!reopened.is_indexed("c"));
        reopened.verify_consistency().unwrap();

        // a complete persist replaces the partial generation and drops the old one
        store.persist().unwrap();
        assert_eq!(store.data_dir(), next);
        assert!(!first.exists());
        let mut reopened = SyncVectorStore::with_kind(&dir, IndexKind::Flat, 8, embedder).unwrap();
        assert!(reopened.load().unwrap());
        assert_eq!(reopened.len(), 3);
        reopened.verify_consistency().unwrap();
    }

    #[test]
    fn test_load_rejects_dimension_change() {
        let temp_dir = TempDir::new().unwrap();
        let (mut store, _) = store(temp_dir.path(), IndexKind::Flat);
        store.add_or_update(vec![unit("a", "alpha")]).unwrap();
        store.persist().unwrap();

        let other = Arc::new(MockEmbeddingGenerator::with_dimension(
            crate::vector::VectorDimension::new(32).unwrap(),
        ));
        let mut reopened = SyncVectorStore::with_kind(temp_dir.path(), IndexKind::Flat, 8, other).unwrap();
        assert!(matches!(reopened.load(), Err(StoreError::Corrupted { .. })));
    }
}
