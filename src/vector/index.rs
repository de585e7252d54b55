//! ANN index capability and the two in-process implementations.
//!
//! The store only relies on [`AnnIndex`]: add at a handle, remove by handle
//! (which may be refused), k-nearest search by inner product, and
//! reconstruct-by-handle. Equal scores are ordered by ascending handle.

use crate::vector::clustering::{kmeans_clustering, nearest_centroid, nearest_centroids};
use crate::vector::types::{Handle, IndexKind, VectorDimension, VectorError};
use std::collections::BTreeMap;
use tracing::debug;

/// Default number of lists probed by the IVF index.
pub const DEFAULT_NPROBE: usize = 8;

/// Upper bound on IVF lists regardless of training set size.
const MAX_LISTS: usize = 256;

/// Capability interface over an approximate-nearest-neighbor index.
pub trait AnnIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    fn dimension(&self) -> VectorDimension;

    /// Number of vectors physically present.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn contains(&self, handle: Handle) -> bool;

    /// Inserts vectors at caller-assigned handles.
    ///
    /// The whole batch is validated before anything is inserted.
    fn add(&mut self, entries: &[(Handle, Vec<f32>)]) -> Result<(), VectorError>;

    /// Removes vectors by handle, returning how many were present.
    ///
    /// Implementations that cannot remove return
    /// [`VectorError::RemovalUnsupported`] without modifying themselves.
    fn remove(&mut self, handles: &[Handle]) -> Result<usize, VectorError>;

    /// Up to `k` handles ordered by descending inner product.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Handle, f32)>, VectorError>;

    /// The vector stored at `handle`, if present.
    fn reconstruct(&self, handle: Handle) -> Option<Vec<f32>>;

    fn handles(&self) -> Vec<Handle>;

    /// A fresh, empty index with the same kind and parameters.
    fn empty_like(&self) -> Box<dyn AnnIndex>;

    /// Owned copy of the index contents for serialization.
    fn snapshot(&self) -> IndexSnapshot;
}

/// Serializable contents of an index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexSnapshot {
    pub kind: IndexKind,
    pub dimension: VectorDimension,
    pub nprobe: usize,
    pub centroids: Vec<Vec<f32>>,
    /// `(handle, list, vector)`; the list is 0 for flat indexes.
    pub records: Vec<(Handle, u32, Vec<f32>)>,
}

/// Builds an empty index of the given kind.
pub fn create_index(kind: IndexKind, dimension: VectorDimension, nprobe: usize) -> Box<dyn AnnIndex> {
    match kind {
        IndexKind::Flat => Box::new(FlatIndex::new(dimension)),
        IndexKind::IvfFlat => Box::new(IvfFlatIndex::new(dimension, nprobe)),
    }
}

/// Rebuilds an index from a snapshot read off disk.
pub fn from_snapshot(snapshot: IndexSnapshot) -> Result<Box<dyn AnnIndex>, VectorError> {
    for (_, _, vector) in &snapshot.records {
        snapshot.dimension.validate_vector(vector)?;
    }
    match snapshot.kind {
        IndexKind::Flat => {
            let mut index = FlatIndex::new(snapshot.dimension);
            for (handle, _, vector) in snapshot.records {
                if index.vectors.insert(handle, vector).is_some() {
                    return Err(VectorError::DuplicateHandle(handle));
                }
            }
            Ok(Box::new(index))
        }
        IndexKind::IvfFlat => {
            let mut index = IvfFlatIndex::new(snapshot.dimension, snapshot.nprobe);
            if !snapshot.centroids.is_empty() {
                index.lists = vec![Vec::new(); snapshot.centroids.len()];
                index.centroids = snapshot.centroids;
            }
            for (handle, list, vector) in snapshot.records {
                let list = list as usize;
                if list >= index.lists.len() {
                    return Err(VectorError::InvalidFormat(format!(
                        "record {handle} references list {list} of {}",
                        index.lists.len()
                    )));
                }
                if index.locations.insert(handle, list).is_some() {
                    return Err(VectorError::DuplicateHandle(handle));
                }
                index.lists[list].push((handle, vector));
            }
            Ok(Box::new(index))
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn rank(mut scored: Vec<(Handle, f32)>, k: usize) -> Vec<(Handle, f32)> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.truncate(k);
    scored
}

fn validate_batch(
    dimension: VectorDimension,
    entries: &[(Handle, Vec<f32>)],
    contains: impl Fn(Handle) -> bool,
) -> Result<(), VectorError> {
    let mut seen = std::collections::HashSet::with_capacity(entries.len());
    for (handle, vector) in entries {
        dimension.validate_vector(vector)?;
        if contains(*handle) || !seen.insert(*handle) {
            return Err(VectorError::DuplicateHandle(*handle));
        }
    }
    Ok(())
}

/// Exact inner-product index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: VectorDimension,
    vectors: BTreeMap<Handle, Vec<f32>>,
}

impl FlatIndex {
    #[must_use]
    pub fn new(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            vectors: BTreeMap::new(),
        }
    }
}

impl AnnIndex for FlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Flat
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn contains(&self, handle: Handle) -> bool {
        self.vectors.contains_key(&handle)
    }

    fn add(&mut self, entries: &[(Handle, Vec<f32>)]) -> Result<(), VectorError> {
        validate_batch(self.dimension, entries, |h| self.vectors.contains_key(&h))?;
        for (handle, vector) in entries {
            self.vectors.insert(*handle, vector.clone());
        }
        Ok(())
    }

    fn remove(&mut self, handles: &[Handle]) -> Result<usize, VectorError> {
        Ok(handles
            .iter()
            .filter(|h| self.vectors.remove(*h).is_some())
            .count())
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Handle, f32)>, VectorError> {
        self.dimension.validate_vector(query)?;
        let scored = self
            .vectors
            .iter()
            .map(|(handle, vector)| (*handle, dot(query, vector)))
            .collect();
        Ok(rank(scored, k))
    }

    fn reconstruct(&self, handle: Handle) -> Option<Vec<f32>> {
        self.vectors.get(&handle).cloned()
    }

    fn handles(&self) -> Vec<Handle> {
        self.vectors.keys().copied().collect()
    }

    fn empty_like(&self) -> Box<dyn AnnIndex> {
        Box::new(Self::new(self.dimension))
    }

    fn snapshot(&self) -> IndexSnapshot {
        IndexSnapshot {
            kind: IndexKind::Flat,
            dimension: self.dimension,
            nprobe: 0,
            centroids: Vec::new(),
            records: self
                .vectors
                .iter()
                .map(|(h, v)| (*h, 0, v.clone()))
                .collect(),
        }
    }
}

/// Inverted-file index with flat lists.
///
/// Lists are trained with K-means on the first batch added to an empty
/// index; later batches are assigned to the nearest trained centroid.
/// Removal is refused, so updates go through a store-level rebuild, which
/// retrains on the full live set.
#[derive(Debug, Clone)]
pub struct IvfFlatIndex {
    dimension: VectorDimension,
    nprobe: usize,
    centroids: Vec<Vec<f32>>,
    lists: Vec<Vec<(Handle, Vec<f32>)>>,
    locations: BTreeMap<Handle, usize>,
}

impl IvfFlatIndex {
    #[must_use]
    pub fn new(dimension: VectorDimension, nprobe: usize) -> Self {
        Self {
            dimension,
            nprobe: nprobe.max(1),
            centroids: Vec::new(),
            lists: Vec::new(),
            locations: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn list_count(&self) -> usize {
        self.centroids.len()
    }

    fn train(&mut self, vectors: &[Vec<f32>]) -> Result<(), VectorError> {
        let target = ((vectors.len() as f64).sqrt() as usize).clamp(1, MAX_LISTS);
        let result = match kmeans_clustering(vectors, target) {
            Ok(result) => result,
            // too few distinct points for `target` seeds
            Err(VectorError::ClusteringFailed(_)) if target > 1 => kmeans_clustering(vectors, 1)?,
            Err(e) => return Err(e),
        };
        debug!(
            "Trained IVF index with {} lists over {} vectors in {} iterations",
            result.centroids.len(),
            vectors.len(),
            result.iterations
        );
        self.lists = vec![Vec::new(); result.centroids.len()];
        self.centroids = result.centroids;
        Ok(())
    }
}

impl AnnIndex for IvfFlatIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::IvfFlat
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn len(&self) -> usize {
        self.locations.len()
    }

    fn contains(&self, handle: Handle) -> bool {
        self.locations.contains_key(&handle)
    }

    fn add(&mut self, entries: &[(Handle, Vec<f32>)]) -> Result<(), VectorError> {
        if entries.is_empty() {
            return Ok(());
        }
        validate_batch(self.dimension, entries, |h| self.locations.contains_key(&h))?;
        if self.centroids.is_empty() {
            let training: Vec<Vec<f32>> = entries.iter().map(|(_, v)| v.clone()).collect();
            self.train(&training)?;
        }
        for (handle, vector) in entries {
            let list = nearest_centroid(vector, &self.centroids);
            self.lists[list].push((*handle, vector.clone()));
            self.locations.insert(*handle, list);
        }
        Ok(())
    }

    fn remove(&mut self, handles: &[Handle]) -> Result<usize, VectorError> {
        if handles.iter().any(|h| self.locations.contains_key(h)) {
            return Err(VectorError::RemovalUnsupported {
                kind: IndexKind::IvfFlat,
            });
        }
        Ok(0)
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Handle, f32)>, VectorError> {
        self.dimension.validate_vector(query)?;
        if self.centroids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let scored = nearest_centroids(query, &self.centroids, self.nprobe)
            .into_iter()
            .flat_map(|list| self.lists[list].iter())
            .map(|(handle, vector)| (*handle, dot(query, vector)))
            .collect();
        Ok(rank(scored, k))
    }

    fn reconstruct(&self, handle: Handle) -> Option<Vec<f32>> {
        let list = *self.locations.get(&handle)?;
        self.lists[list]
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, v)| v.clone())
    }

    fn handles(&self) -> Vec<Handle> {
        self.locations.keys().copied().collect()
    }

    fn empty_like(&self) -> Box<dyn AnnIndex> {
        Box::new(Self::new(self.dimension, self.nprobe))
    }

    fn snapshot(&self) -> IndexSnapshot {
        let mut records: Vec<(Handle, u32, Vec<f32>)> = self
            .lists
            .iter()
            .enumerate()
            .flat_map(|(list, entries)| {
                entries
                    .iter()
                    .map(move |(h, v)| (*h, list as u32, v.clone()))
            })
            .collect();
        records.sort_by_key(|(h, _, _)| *h);
        IndexSnapshot {
            kind: IndexKind::IvfFlat,
            dimension: self.dimension,
            nprobe: self.nprobe,
            centroids: self.centroids.clone(),
            records,
        }
    }
}
