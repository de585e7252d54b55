//! Intent annotations: the pluggable generator used for new units and the
//! explicit re-annotation path.

use super::store::KnowledgeStore;
use crate::error::{RefineError, RefineResult};
use crate::types::{CodeUnit, LifecycleState};
use std::path::Path;
use tracing::info;

/// Produces the initial intent for a unit seen for the first time.
pub trait IntentGenerator: Send + Sync {
    fn generate(&self, unit: &CodeUnit) -> String;
}

/// Returns a fixed placeholder until someone annotates the unit.
#[derive(Debug, Clone, Default)]
pub struct PlaceholderIntent {
    text: String,
}

impl PlaceholderIntent {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

impl IntentGenerator for PlaceholderIntent {
    fn generate(&self, _unit: &CodeUnit) -> String {
        self.text.clone()
    }
}

/// Applies explicit re-annotations to the knowledge store.
#[derive(Debug, Clone)]
pub struct IntentManager {
    store: KnowledgeStore,
}

impl IntentManager {
    pub fn new(store: KnowledgeStore) -> Self {
        Self { store }
    }

    /// Sets the intent of one unit and marks it current.
    ///
    /// `last_annotated_hash` moves to the unit's present content hash and the
    /// state becomes `OK`. The file's units are saved back as a whole.
    pub fn update_intent(
        &self,
        source_path: &Path,
        unit_id: &str,
        intent: &str,
    ) -> RefineResult<CodeUnit> {
        let mut units = self.store.load(source_path)?;
        let unit = units
            .iter_mut()
            .find(|u| u.unit_id == unit_id)
            .ok_or_else(|| RefineError::UnitNotFound {
                unit_id: unit_id.to_string(),
                path: source_path.to_path_buf(),
            })?;

        unit.intent = intent.to_string();
        unit.last_annotated_hash = unit.content_hash.clone();
        unit.lifecycle_state = LifecycleState::Ok;
        let updated = unit.clone();

        self.store.save(source_path, &units)?;
        info!("Annotated {unit_id}");
        Ok(updated)
    }
}
