//! Search facade: free text in, ranked and rendered code units out.

use crate::error::StoreResult;
use crate::registry::SharedStore;
use crate::vector::{EmbeddingGenerator, Payload, SearchHit};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

/// Placed between rendered results.
pub const RESULT_SEPARATOR: &str = "\n\n---\n\n";

/// Payload field constraints; empty fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub source_type: Option<String>,
    pub tier: Option<String>,
    pub kind: Option<String>,
}

impl SearchFilter {
    pub fn is_empty(&self) -> bool {
        self.source_type.is_none() && self.tier.is_none() && self.kind.is_none()
    }

    pub fn matches(&self, payload: &Payload) -> bool {
        let check = |key: &str, wanted: &Option<String>| match wanted {
            Some(wanted) => payload
                .get(key)
                .and_then(Value::as_str)
                .is_some_and(|v| v.eq_ignore_ascii_case(wanted)),
            None => true,
        };
        check("source_type", &self.source_type)
            && check("tier", &self.tier)
            && check("kind", &self.kind)
    }
}

/// Queries one or more stores and renders the hits.
pub struct SearchFacade {
    stores: Vec<SharedStore>,
}

impl SearchFacade {
    pub fn new(store: SharedStore) -> Self {
        Self {
            stores: vec![store],
        }
    }

    /// Searches several stores and merges their hits by score.
    pub fn over(stores: Vec<SharedStore>) -> Self {
        Self { stores }
    }

    /// Embeds `text` and returns up to `top_k` hits, best first. The filter
    /// applies before truncation.
    pub fn search(
        &self,
        text: &str,
        top_k: usize,
        filter: &SearchFilter,
    ) -> StoreResult<Vec<SearchHit>> {
        let predicate = |payload: &Payload| filter.matches(payload);
        let predicate: Option<&dyn Fn(&Payload) -> bool> =
            (!filter.is_empty()).then_some(&predicate);

        // stores sharing an embedder share one query vector
        let mut queries: Vec<(Arc<dyn EmbeddingGenerator>, Vec<f32>)> = Vec::new();
        let mut hits = Vec::new();
        for store in &self.stores {
            let store = store.read();
            let cached = queries
                .iter()
                .position(|(embedder, _)| Arc::ptr_eq(embedder, store.embedder()));
            let slot = match cached {
                Some(slot) => slot,
                None => {
                    let query = store.embed_query(text)?;
                    queries.push((Arc::clone(store.embedder()), query));
                    queries.len() - 1
                }
            };
            hits.extend(store.search(&queries[slot].1, top_k, predicate)?);
        }
        if self.stores.len() > 1 {
            hits.sort_by(|a, b| {
                b.score
                    .total_cmp(&a.score)
                    .then_with(|| a.external_id.cmp(&b.external_id))
            });
            hits.truncate(top_k);
        }
        debug!("Query '{text}' matched {} unit(s)", hits.len());
        Ok(hits)
    }

    /// [`search`](Self::search) rendered with [`format_results`].
    pub fn query(&self, text: &str, top_k: usize, filter: &SearchFilter) -> StoreResult<String> {
        Ok(format_results(&self.search(text, top_k, filter)?))
    }
}

/// Renders one hit: identifier, location, kind, intent, state and content.
pub fn format_hit(hit: &SearchHit) -> String {
    let field = |key: &str| -> String {
        match hit.payload.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    };
    format!(
        "Symbol: {}\nFile: {}:{}-{}\nKind: {}\nIntent: {}\nStatus: {}\nCode:\n{}",
        hit.external_id,
        field("source_path"),
        field("start_line"),
        field("end_line"),
        field("kind"),
        field("intent"),
        field("lifecycle_state"),
        field("content"),
    )
}

pub fn format_results(hits: &[SearchHit]) -> String {
    hits.iter()
        .map(format_hit)
        .collect::<Vec<_>>()
        .join(RESULT_SEPARATOR)
}
