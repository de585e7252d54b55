//! Incremental sync of the vector store against the knowledge store.
//!
//! Per known unit:
//! - `STALE`: deactivate if active, never (re)index in this pass
//! - active with an identical payload: skip
//! - otherwise: queue for insertion
//!
//! Store ids with no unit left in the knowledge store are deleted. Queued
//! units are embedded in a single batch, and deletions, deactivations and
//! insertions are applied together only after that batch succeeds.

use crate::error::StoreResult;
use crate::knowledge::KnowledgeStore;
use crate::types::{CodeUnit, LifecycleState};
use crate::vector::store::{ChangeSet, IndexedUnit, SyncVectorStore};
use std::collections::HashSet;
use tracing::{debug, info};

/// What one sync pass changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub added: usize,
    pub deactivated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.deactivated == 0 && self.deleted == 0
    }
}

impl From<&CodeUnit> for IndexedUnit {
    fn from(unit: &CodeUnit) -> Self {
        Self {
            external_id: unit.unit_id.clone(),
            text: unit.embedding_text(),
            payload: unit.payload(),
        }
    }
}

impl SyncVectorStore {
    /// Brings the store in line with every unit currently in `knowledge`.
    pub fn sync_from_refinery(&mut self, knowledge: &KnowledgeStore) -> StoreResult<SyncReport> {
        let units: Vec<CodeUnit> = knowledge.iter_units()?.collect();
        let known: HashSet<&str> = units.iter().map(|u| u.unit_id.as_str()).collect();

        let deletes: Vec<String> = self
            .ids()
            .filter(|id| !known.contains(id))
            .map(str::to_string)
            .collect();

        let mut report = SyncReport::default();
        let mut deactivations = Vec::new();
        let mut upserts = Vec::new();

        for unit in &units {
            let id = unit.unit_id.as_str();
            if unit.lifecycle_state == LifecycleState::Stale {
                if self.is_active(id) {
                    deactivations.push(unit.unit_id.clone());
                } else {
                    report.skipped += 1;
                }
                continue;
            }
            if self.is_active(id) && self.document(id).is_some_and(|d| d.payload == unit.payload()) {
                report.skipped += 1;
                continue;
            }
            upserts.push(IndexedUnit::from(unit));
        }

        if !deletes.is_empty() {
            debug!("{} unit(s) gone from knowledge", deletes.len());
        }
        let applied = self.apply(ChangeSet {
            upserts,
            deletes,
            deactivations,
        })?;
        report.added = applied.written;
        report.deactivated = applied.deactivated;
        report.deleted = applied.deleted;

        info!(
            "Sync: {} added, {} deactivated, {} deleted, {} unchanged",
            report.added, report.deactivated, report.deleted, report.skipped
        );
        Ok(report)
    }
}
