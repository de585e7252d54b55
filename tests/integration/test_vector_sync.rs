//! Refinery to vector store: sync, search, persistence and failure handling.

use crate::common::{AppendOnlyIndex, ForgetfulIndex, StubEmbedder, TestProject, sample_code};
use code_refinery::vector::{FlatIndex, IndexedUnit, VectorDimension};
use code_refinery::{IntentManager, StoreError, SyncVectorStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn unit(id: &str, text: &str) -> IndexedUnit {
    let mut payload = serde_json::Map::new();
    payload.insert("source_type".into(), "code_unit".into());
    IndexedUnit {
        external_id: id.to_string(),
        text: text.to_string(),
        payload,
    }
}

#[test]
fn test_refine_then_sync_is_searchable() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    project.refinery().refine(&[&file]).unwrap();

    let embedder = StubEmbedder::new();
    let mut store = project.store(embedder.clone());
    let report = store.sync_from_refinery(&project.knowledge()).unwrap();

    assert_eq!(report.added, 4);
    assert_eq!(embedder.calls(), 1);
    store.verify_consistency().unwrap();

    let query = store.embed_query("def process(self, data): return sum(data)").unwrap();
    let hits = store.search(&query, 2, None).unwrap();
    assert_eq!(hits[0].external_id, "pipeline:DataProcessor.process");
    assert!(hits[0].score >= hits[1].score);
    assert_eq!(hits[0].payload["source_path"], "pipeline.py");
}

#[test]
fn test_stale_units_drop_out_of_search() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    let refinery = project.refinery();
    refinery.refine(&[&file]).unwrap();
    let intents = IntentManager::new(project.knowledge());
    intents
        .update_intent(&file, "pipeline:DataProcessor.process", "Sums a batch")
        .unwrap();

    let embedder = StubEmbedder::new();
    let mut store = project.store(embedder.clone());
    store.sync_from_refinery(&project.knowledge()).unwrap();
    assert!(store.is_active("pipeline:DataProcessor.process"));

    project.add_file("pipeline.py", sample_code::PIPELINE_EDITED);
    refinery.refine(&[&file]).unwrap();
    let report = store.sync_from_refinery(&project.knowledge()).unwrap();

    // the class body contains the method, so both drift
    assert_eq!(report.deactivated, 2);
    assert!(!store.is_active("pipeline:DataProcessor"));
    assert!(!store.is_active("pipeline:DataProcessor.process"));
    assert!(store.is_indexed("pipeline:DataProcessor.process"));

    let query = store.embed_query("def process(self, data): return max(data)").unwrap();
    let hits = store.search(&query, 10, None).unwrap();
    assert!(hits.iter().all(|h| h.external_id != "pipeline:DataProcessor.process"));
    assert_eq!(hits.len(), 2);

    intents
        .update_intent(&file, "pipeline:DataProcessor.process", "Largest element")
        .unwrap();
    let report = store.sync_from_refinery(&project.knowledge()).unwrap();
    assert_eq!(report.added, 1);
    let hits = store.search(&query, 1, None).unwrap();
    assert_eq!(hits[0].external_id, "pipeline:DataProcessor.process");
    assert_eq!(hits[0].payload["intent"], "Largest element");
    assert_eq!(hits[0].payload["lifecycle_state"], "OK");
    store.verify_consistency().unwrap();
}

#[test]
fn test_persist_and_reopen() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    project.refinery().refine(&[&file]).unwrap();

    let embedder = StubEmbedder::new();
    let mut store = project.store(embedder.clone());
    store.sync_from_refinery(&project.knowledge()).unwrap();
    store.deactivate(&["pipeline:main"]);
    store.persist().unwrap();

    assert!(project.index_dir().join("metadata.json").exists());
    assert_eq!(store.data_dir(), project.index_dir().join("gen-1"));
    for file in ["index.vec", "id_map.json", "payloads.json"] {
        assert!(store.data_dir().join(file).exists(), "missing {file}");
    }

    let reopened = project.store(embedder.clone());
    assert_eq!(reopened.len(), 4);
    assert_eq!(reopened.vector_count(), 4);
    assert!(!reopened.is_active("pipeline:main"));
    assert_eq!(
        reopened.handle_of("pipeline:DataProcessor"),
        store.handle_of("pipeline:DataProcessor")
    );
    reopened.verify_consistency().unwrap();

    // reopened store picks up without re-embedding unchanged units
    let calls = embedder.calls();
    let mut reopened = reopened;
    let report = reopened.sync_from_refinery(&project.knowledge()).unwrap();
    assert_eq!(report.added, 1); // the deactivated one
    assert_eq!(embedder.calls(), calls + 1);
}

#[test]
fn test_deleted_sources_are_removed_from_store() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    let refinery = project.refinery();
    refinery.refine(&[&file]).unwrap();

    let mut store = project.store(StubEmbedder::new());
    store.sync_from_refinery(&project.knowledge()).unwrap();

    std::fs::remove_file(&file).unwrap();
    refinery.prune_missing().unwrap();
    let report = store.sync_from_refinery(&project.knowledge()).unwrap();

    assert_eq!(report.deleted, 4);
    assert!(store.is_empty());
    assert_eq!(store.vector_count(), 0);
    store.verify_consistency().unwrap();
}

#[test]
fn test_embedding_failure_leaves_store_untouched() {
    let project = TestProject::new();
    let embedder = StubEmbedder::new();
    let mut store = project.store(embedder.clone());
    store
        .add_or_update(vec![unit("a:alpha", "alpha"), unit("b:beta", "beta")])
        .unwrap();
    let before = store.handle_of("a:alpha");

    embedder.set_failing(true);
    let err = store
        .add_or_update(vec![unit("a:alpha", "alpha two"), unit("c:gamma", "gamma")])
        .unwrap_err();

    assert!(matches!(err, StoreError::Embedding { batch_size: 2, .. }));
    assert_eq!(store.len(), 2);
    assert!(!store.is_indexed("c:gamma"));
    assert_eq!(store.handle_of("a:alpha"), before);
    assert_eq!(store.document("a:alpha").unwrap().text, "alpha");
    store.verify_consistency().unwrap();
}

#[test]
fn test_failed_sync_leaves_store_untouched() {
    let project = TestProject::new();
    let pipeline = project.add_file("pipeline.py", sample_code::PIPELINE);
    let legacy = project.add_file("old/legacy.py", "def legacy():\n    pass\n");
    let refinery = project.refinery();
    refinery.refine(&[&pipeline, &legacy]).unwrap();

    let embedder = StubEmbedder::new();
    let mut store = project.store(embedder.clone());
    store.sync_from_refinery(&project.knowledge()).unwrap();
    assert_eq!(store.len(), 5);

    // one source deleted, one edited, one added
    std::fs::remove_file(&legacy).unwrap();
    refinery.prune_missing().unwrap();
    project.add_file("pipeline.py", sample_code::PIPELINE_EDITED);
    let extra = project.add_file("extra.py", "def extra():\n    return 1\n");
    refinery.refine(&[&pipeline, &extra]).unwrap();

    embedder.set_failing(true);
    let err = store.sync_from_refinery(&project.knowledge()).unwrap_err();
    assert!(matches!(err, StoreError::Embedding { batch_size: 1, .. }));
    assert_eq!(store.len(), 5);
    assert_eq!(store.vector_count(), 5);
    assert!(store.is_active("pipeline:DataProcessor.process"));
    assert!(!store.is_indexed("extra:extra"));
    store.verify_consistency().unwrap();

    embedder.set_failing(false);
    let report = store.sync_from_refinery(&project.knowledge()).unwrap();
    assert_eq!(report.deleted, 1);
    assert_eq!(report.deactivated, 2);
    assert_eq!(report.added, 1);
    assert!(store.is_indexed("extra:extra"));
    assert!(!store.is_active("pipeline:DataProcessor.process"));
    store.verify_consistency().unwrap();
}

#[test]
fn test_rebuild_failure_keeps_old_state_then_reembeds() {
    let project = TestProject::new();
    let embedder = StubEmbedder::new();
    let mut store = SyncVectorStore::new(
        project.index_dir(),
        Box::new(ForgetfulIndex::new()),
        embedder.clone(),
    )
    .unwrap();
    store
        .add_or_update(vec![unit("a:alpha", "alpha"), unit("b:beta", "beta")])
        .unwrap();

    // removal is refused and nothing can be reconstructed, so the rebuild
    // has to re-embed the surviving text
    embedder.set_failing(true);
    let err = store.delete(&["b:beta"]).unwrap_err();
    assert!(matches!(err, StoreError::Embedding { batch_size: 1, .. }));
    assert!(store.is_indexed("b:beta"));
    assert_eq!(store.len(), 2);
    assert_eq!(store.vector_count(), 2);
    store.verify_consistency().unwrap();

    embedder.set_failing(false);
    let calls = embedder.calls();
    assert_eq!(store.delete(&["b:beta"]).unwrap(), 1);
    assert_eq!(embedder.calls(), calls + 1);
    assert_eq!(store.len(), 1);
    assert_eq!(store.vector_count(), 1);
    store.verify_consistency().unwrap();

    let query = store.embed_query("alpha").unwrap();
    let hits = store.search(&query, 5, None).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].external_id, "a:alpha");
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[test]
fn test_update_keeps_handle_and_replaces_vector() {
    let project = TestProject::new();
    let embedder = StubEmbedder::new();
    let mut store = project.store(embedder);
    store.add_or_update(vec![unit("a:alpha", "alpha")]).unwrap();
    let handle = store.handle_of("a:alpha");

    store.add_or_update(vec![unit("a:alpha", "omega")]).unwrap();

    assert_eq!(store.handle_of("a:alpha"), handle);
    assert_eq!(store.vector_count(), 1);
    let query = store.embed_query("omega").unwrap();
    let hits = store.search(&query, 1, None).unwrap();
    assert!((hits[0].score - 1.0).abs() < 1e-5);
}

#[test]
fn test_handles_are_not_reused_after_delete() {
    let project = TestProject::new();
    let mut store = project.store(StubEmbedder::new());
    store
        .add_or_update(vec![unit("a:alpha", "alpha"), unit("b:beta", "beta")])
        .unwrap();
    let beta = store.handle_of("b:beta").unwrap();

    assert_eq!(store.delete(&["b:beta", "z:unknown"]).unwrap(), 1);
    store.add_or_update(vec![unit("c:gamma", "gamma")]).unwrap();

    assert_ne!(store.handle_of("c:gamma"), Some(beta));
    store.verify_consistency().unwrap();
}

#[test]
fn test_append_only_index_rebuilds_and_purges_inactive() {
    let project = TestProject::new();
    let rebuilds = Arc::new(AtomicUsize::new(0));
    let embedder = StubEmbedder::new();
    let mut store = SyncVectorStore::new(
        project.index_dir(),
        Box::new(AppendOnlyIndex::new(Arc::clone(&rebuilds))),
        embedder.clone(),
    )
    .unwrap();

    store
        .add_or_update(vec![
            unit("a:alpha", "alpha"),
            unit("b:beta", "beta"),
            unit("c:gamma", "gamma"),
        ])
        .unwrap();
    assert_eq!(rebuilds.load(Ordering::SeqCst), 0);

    store.deactivate(&["c:gamma"]);
    let calls = embedder.calls();
    store.add_or_update(vec![unit("a:alpha", "alpha prime")]).unwrap();

    assert_eq!(rebuilds.load(Ordering::SeqCst), 1);
    // surviving vectors reconstructed, only the update embedded
    assert_eq!(embedder.calls(), calls + 1);
    assert!(!store.is_indexed("c:gamma"));
    assert_eq!(store.vector_count(), 2);
    assert_eq!(store.document("a:alpha").unwrap().text, "alpha prime");
    store.verify_consistency().unwrap();

    assert_eq!(store.delete(&["b:beta"]).unwrap(), 1);
    assert_eq!(rebuilds.load(Ordering::SeqCst), 2);
    assert_eq!(store.vector_count(), 1);
    store.verify_consistency().unwrap();
}

#[test]
fn test_dimension_mismatch_is_rejected() {
    let project = TestProject::new();
    let index = FlatIndex::new(VectorDimension::new(8).unwrap());
    let err = SyncVectorStore::new(project.index_dir(), Box::new(index), StubEmbedder::new())
        .unwrap_err();
    assert!(matches!(err, StoreError::Vector(_)));
}

#[test]
fn test_filtered_search_over_fetches() {
    let project = TestProject::new();
    let mut store = project.store(StubEmbedder::new());
    let mut units: Vec<IndexedUnit> = (0..20)
        .map(|i| unit(&format!("m:f{i}"), &format!("shared token {i}")))
        .collect();
    let mut tagged = unit("m:tagged", "shared token tagged");
    tagged.payload.insert("kind".into(), "class".into());
    units.push(tagged);
    store.add_or_update(units).unwrap();

    let query = store.embed_query("shared token").unwrap();
    let only_classes =
        |p: &serde_json::Map<String, serde_json::Value>| p.get("kind").and_then(|v| v.as_str()) == Some("class");
    let hits = store.search(&query, 1, Some(&only_classes)).unwrap();

    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].external_id, "m:tagged");
}
