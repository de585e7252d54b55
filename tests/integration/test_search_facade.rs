//! End-to-end search: refine, sync into named indexes, query through the facade.

use crate::common::{StubEmbedder, TestProject, sample_code};
use code_refinery::search::RESULT_SEPARATOR;
use code_refinery::{
    IndexKind, IndexRegistry, IntentManager, KeywordRouter, QueryRouter, SearchFacade,
    SearchFilter,
};

fn registry(project: &TestProject) -> IndexRegistry {
    IndexRegistry::new(
        project.dir.path().join("index"),
        IndexKind::Flat,
        4,
        StubEmbedder::new(),
    )
}

#[test]
fn test_query_renders_units() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    project.refinery().refine(&[&file]).unwrap();
    IntentManager::new(project.knowledge())
        .update_intent(&file, "pipeline:DataProcessor.load", "Reads records from JSON")
        .unwrap();

    let mut registry = registry(&project);
    let store = registry.get_or_open("source_code").unwrap();
    store.write().sync_from_refinery(&project.knowledge()).unwrap();

    let facade = SearchFacade::new(store);
    let rendered = facade
        .query("load json records from path", 1, &SearchFilter::default())
        .unwrap();

    assert_eq!(
        rendered,
        "Symbol: pipeline:DataProcessor.load\n\
         File: pipeline.py:10-12\n\
         Kind: method\n\
         Intent: Reads records from JSON\n\
         Status: OK\n\
         Code:\n\
         def load(self, path):\n        with open(path) as handle:\n            return json.load(handle)"
    );
}

#[test]
fn test_kind_filter_and_separator() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    project.refinery().refine(&[&file]).unwrap();

    let mut registry = registry(&project);
    let store = registry.get_or_open("source_code").unwrap();
    store.write().sync_from_refinery(&project.knowledge()).unwrap();
    let facade = SearchFacade::new(store);

    let methods = SearchFilter {
        kind: Some("method".to_string()),
        ..Default::default()
    };
    let hits = facade.search("processor", 10, &methods).unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.payload["kind"] == "method"));

    let rendered = facade.query("processor", 3, &SearchFilter::default()).unwrap();
    assert_eq!(rendered.split(RESULT_SEPARATOR).count(), 3);
    assert!(facade.query("processor", 0, &SearchFilter::default()).unwrap().is_empty());
}

#[test]
fn test_routed_search_across_indexes() {
    let project = TestProject::new();
    let code = project.add_file("pipeline.py", sample_code::PIPELINE);
    let tests = project.add_file(
        "tests/test_pipeline.py",
        "def test_process_sums():\n    assert DataProcessor().process([1, 2]) == 3\n",
    );
    let refinery = project.refinery();
    refinery.refine(&[&code, &tests]).unwrap();

    let mut registry = registry(&project);
    for name in ["source_code", "tests"] {
        registry
            .get_or_open(name)
            .unwrap()
            .write()
            .sync_from_refinery(&project.knowledge())
            .unwrap();
    }
    registry.persist_all().unwrap();
    assert_eq!(registry.persisted_names(), vec!["source_code", "tests"]);

    let router = KeywordRouter::default();
    let query = "which test covers process sums";
    let names = router.route(query);
    assert_eq!(names, vec!["tests"]);

    let stores = names
        .iter()
        .map(|n| registry.get_or_open(n).unwrap())
        .collect();
    let silver = SearchFilter {
        tier: Some("silver".to_string()),
        ..Default::default()
    };
    let hits = SearchFacade::over(stores).search(query, 1, &silver).unwrap();
    assert_eq!(hits[0].external_id, "tests.test_pipeline:test_process_sums");
}
