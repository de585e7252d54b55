//! Reconciles fresh extraction output against the knowledge store.
//!
//! Every refined source file goes through the same steps: read, extract,
//! load what was stored last time, reconcile lifecycle states, and write the
//! reconciled set back wholesale. Units that disappeared from the source are
//! dropped from the store; removing them from the vector store is the job of
//! the sync step.

use super::intent::IntentGenerator;
use super::store::KnowledgeStore;
use crate::error::{RefineError, RefineResult};
use crate::extract::ExtractorRegistry;
use crate::types::{CodeUnit, LifecycleState};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A file that could not be refined. The rest of the batch still was.
#[derive(Debug)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: RefineError,
}

/// Outcome of one refine pass.
#[derive(Debug, Default)]
pub struct RefineReport {
    pub units: Vec<CodeUnit>,
    pub files_refined: usize,
    pub failures: Vec<FileFailure>,
}

impl RefineReport {
    /// Units that are NEW or STALE after the pass.
    pub fn changed_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.lifecycle_state.is_changed())
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct KnowledgeRefinery {
    store: KnowledgeStore,
    extractors: ExtractorRegistry,
    intent: Box<dyn IntentGenerator>,
}

impl KnowledgeRefinery {
    pub fn new(
        store: KnowledgeStore,
        extractors: ExtractorRegistry,
        intent: Box<dyn IntentGenerator>,
    ) -> Self {
        Self {
            store,
            extractors,
            intent,
        }
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    /// Refines every path in order.
    ///
    /// Read and extraction failures are recorded per file and do not stop
    /// the batch. Knowledge persistence failures abort it.
    pub fn refine<P: AsRef<Path>>(&self, paths: &[P]) -> RefineResult<RefineReport> {
        self.refine_with_progress(paths, |_| {})
    }

    /// Same as [`refine`](Self::refine), calling `on_file` after each path.
    pub fn refine_with_progress<P: AsRef<Path>>(
        &self,
        paths: &[P],
        mut on_file: impl FnMut(&Path),
    ) -> RefineResult<RefineReport> {
        let mut report = RefineReport::default();

        for path in paths {
            let path = path.as_ref();
            match self.refine_file(path) {
                Ok(units) => {
                    report.files_refined += 1;
                    report.units.extend(units);
                }
                Err(error) if error.is_per_file() => {
                    warn!("Skipping {}: {error}", path.display());
                    report.failures.push(FileFailure {
                        path: path.to_path_buf(),
                        error,
                    });
                }
                Err(error) => return Err(error),
            }
            on_file(path);
        }

        info!(
            "Refined {} file(s): {} unit(s), {} changed, {} failure(s)",
            report.files_refined,
            report.units.len(),
            report.changed_count(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Refines a single source file and returns its reconciled units.
    pub fn refine_file(&self, path: &Path) -> RefineResult<Vec<CodeUnit>> {
        let content = std::fs::read_to_string(path).map_err(|source| RefineError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

        let relative = self.store.relative_source(path);
        let extractor = self.extractors.for_path(path);
        let extracted: Vec<CodeUnit> = extractor
            .extract(&relative, &content)?
            .into_iter()
            .map(|unit| CodeUnit::from_extracted(unit, &relative))
            .collect();
        debug!(
            "{} extracted {} unit(s) from {}",
            extractor.language(),
            extracted.len(),
            relative.display()
        );

        let stored = self.store.load(path)?;
        let reconciled = reconcile(extracted, stored, self.intent.as_ref());
        self.store.save(path, &reconciled)?;
        Ok(reconciled)
    }

    /// Removes knowledge for sources that no longer exist on disk.
    pub fn prune_missing(&self) -> RefineResult<Vec<PathBuf>> {
        let mut pruned = Vec::new();
        for source in self.store.sources()? {
            let full = self.store.source_root().join(&source);
            if !full.exists() && self.store.remove_source(&full)? {
                debug!("Pruned knowledge for {}", source.display());
                pruned.push(source);
            }
        }
        if !pruned.is_empty() {
            info!("Pruned {} missing source(s)", pruned.len());
        }
        Ok(pruned)
    }
}

/// Assigns lifecycle states to freshly extracted units.
///
/// - unseen id: `NEW`, intent from `intent`, annotated hash = content hash
/// - seen id: intent and annotated hash carried over; `STALE` when the
///   content hash no longer matches, `NEW` kept while not yet annotated,
///   otherwise `OK`
///
/// Stored units missing from `extracted` are dropped. A repeated id within
/// `extracted` keeps the later unit at the earlier position.
pub fn reconcile(
    extracted: Vec<CodeUnit>,
    stored: Vec<CodeUnit>,
    intent: &dyn IntentGenerator,
) -> Vec<CodeUnit> {
    let stored: HashMap<String, CodeUnit> = stored
        .into_iter()
        .map(|unit| (unit.unit_id.clone(), unit))
        .collect();

    let mut reconciled: Vec<CodeUnit> = Vec::with_capacity(extracted.len());
    let mut positions: HashMap<String, usize> = HashMap::new();

    for mut unit in extracted {
        match stored.get(&unit.unit_id) {
            None => {
                unit.intent = intent.generate(&unit);
                unit.last_annotated_hash = unit.content_hash.clone();
                unit.lifecycle_state = LifecycleState::New;
            }
            Some(previous) => {
                unit.intent = previous.intent.clone();
                unit.last_annotated_hash = previous.last_annotated_hash.clone();
                unit.lifecycle_state = if previous.last_annotated_hash != unit.content_hash {
                    LifecycleState::Stale
                } else if previous.lifecycle_state == LifecycleState::New {
                    LifecycleState::New
                } else {
                    LifecycleState::Ok
                };
            }
        }

        match positions.get(&unit.unit_id) {
            Some(&index) => reconciled[index] = unit,
            None => {
                positions.insert(unit.unit_id.clone(), reconciled.len());
                reconciled.push(unit);
            }
        }
    }

    reconciled
}
