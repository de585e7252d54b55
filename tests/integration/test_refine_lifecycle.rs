//! Refine, annotate and re-refine a small source tree.

use crate::common::{TestProject, read, sample_code};
use code_refinery::{IntentManager, LifecycleState, RefineError, UnitKind};

#[test]
fn test_first_refine_marks_everything_new() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);

    let report = project.refinery().refine(&[&file]).unwrap();

    assert!(report.is_clean());
    assert_eq!(report.files_refined, 1);
    let ids: Vec<&str> = report.units.iter().map(|u| u.unit_id.as_str()).collect();
    for expected in [
        "pipeline:DataProcessor",
        "pipeline:DataProcessor.process",
        "pipeline:DataProcessor.load",
        "pipeline:main",
    ] {
        assert!(ids.contains(&expected), "missing {expected} in {ids:?}");
    }
    assert_eq!(report.changed_count(), report.units.len());
    assert!(report
        .units
        .iter()
        .all(|u| u.lifecycle_state == LifecycleState::New));

    let process = report
        .units
        .iter()
        .find(|u| u.unit_id == "pipeline:DataProcessor.process")
        .unwrap();
    assert_eq!(process.kind, UnitKind::Method);
    assert_eq!(process.start_line, 7);
    assert_eq!(process.end_line, 8);
    assert!(process.content.starts_with("def process(self, data):"));

    let knowledge = project.dir.path().join("knowledge").join("pipeline.py.json");
    let json: serde_json::Value = serde_json::from_str(&read(&knowledge)).unwrap();
    assert_eq!(json["source_path"], "pipeline.py");
    assert_eq!(json["units"].as_array().unwrap().len(), report.units.len());
}

#[test]
fn test_unchanged_refine_keeps_states() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    let refinery = project.refinery();
    refinery.refine(&[&file]).unwrap();

    IntentManager::new(project.knowledge())
        .update_intent(&file, "pipeline:main", "Entry point printing a sum")
        .unwrap();

    let report = refinery.refine(&[&file]).unwrap();
    let main = report.units.iter().find(|u| u.unit_id == "pipeline:main").unwrap();
    assert_eq!(main.lifecycle_state, LifecycleState::Ok);
    assert_eq!(main.intent, "Entry point printing a sum");

    // never annotated, still waiting
    let load = report
        .units
        .iter()
        .find(|u| u.unit_id == "pipeline:DataProcessor.load")
        .unwrap();
    assert_eq!(load.lifecycle_state, LifecycleState::New);
}

#[test]
fn test_edit_marks_stale_and_annotation_clears_it() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    let refinery = project.refinery();
    refinery.refine(&[&file]).unwrap();

    let intents = IntentManager::new(project.knowledge());
    let annotated = intents
        .update_intent(&file, "pipeline:DataProcessor.process", "Sums a batch of numbers")
        .unwrap();
    assert_eq!(annotated.lifecycle_state, LifecycleState::Ok);
    let annotated_hash = annotated.content_hash.clone();

    project.add_file("pipeline.py", sample_code::PIPELINE_EDITED);
    let report = refinery.refine(&[&file]).unwrap();
    let process = report
        .units
        .iter()
        .find(|u| u.unit_id == "pipeline:DataProcessor.process")
        .unwrap();
    assert_eq!(process.lifecycle_state, LifecycleState::Stale);
    assert_eq!(process.intent, "Sums a batch of numbers");
    assert_eq!(process.last_annotated_hash, annotated_hash);
    assert_ne!(process.content_hash, annotated_hash);

    // stays stale until re-annotated
    let report = refinery.refine(&[&file]).unwrap();
    let process = report
        .units
        .iter()
        .find(|u| u.unit_id == "pipeline:DataProcessor.process")
        .unwrap();
    assert_eq!(process.lifecycle_state, LifecycleState::Stale);

    let fixed = intents
        .update_intent(&file, "pipeline:DataProcessor.process", "Largest element of a batch")
        .unwrap();
    assert_eq!(fixed.lifecycle_state, LifecycleState::Ok);
    assert_eq!(fixed.last_annotated_hash, fixed.content_hash);
}

#[test]
fn test_removed_units_leave_knowledge() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    let refinery = project.refinery();
    refinery.refine(&[&file]).unwrap();

    project.add_file("pipeline.py", "def main():\n    return 0\n");
    let report = refinery.refine(&[&file]).unwrap();

    let ids: Vec<&str> = report.units.iter().map(|u| u.unit_id.as_str()).collect();
    assert_eq!(ids, vec!["pipeline:main"]);
    let stored = project.knowledge().load(&file).unwrap();
    assert_eq!(stored.len(), 1);
    // content changed under the same id
    assert_eq!(stored[0].lifecycle_state, LifecycleState::Stale);
}

#[test]
fn test_syntax_error_does_not_abort_batch() {
    let project = TestProject::new();
    let good = project.add_file("pipeline.py", sample_code::PIPELINE);
    let bad = project.add_file("broken.py", sample_code::BROKEN);
    let guide = project.add_file("docs/guide.md", sample_code::GUIDE);

    let report = project.refinery().refine(&[&bad, &good, &guide]).unwrap();

    assert!(!report.is_clean());
    assert_eq!(report.files_refined, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].path, bad);
    assert!(matches!(
        report.failures[0].error,
        RefineError::Extraction { .. }
    ));
    assert!(project.knowledge().load(&bad).unwrap().is_empty());
    assert!(!project.knowledge().load(&good).unwrap().is_empty());
}

#[test]
fn test_text_files_are_chunked() {
    let project = TestProject::new();
    let guide = project.add_file("docs/guide.md", sample_code::GUIDE);

    let report = project.refinery().refine(&[&guide]).unwrap();

    assert!(report.units.len() > 1);
    assert!(report.units.iter().all(|u| u.kind == UnitKind::Chunk));
    assert_eq!(report.units[0].unit_id, "docs/guide.md#0");
    assert_eq!(report.units[0].name, "guide.md");
    assert!(report.units[0].content.starts_with("# Guide"));
    // consecutive windows overlap
    let first_end = report.units[0].content.split_whitespace().last().unwrap();
    assert!(report.units[1].content.contains(first_end));
}

#[test]
fn test_missing_file_is_a_per_file_failure() {
    let project = TestProject::new();
    let good = project.add_file("pipeline.py", sample_code::PIPELINE);
    let missing = project.source_root().join("gone.py");

    let report = project.refinery().refine(&[&missing, &good]).unwrap();
    assert_eq!(report.files_refined, 1);
    assert!(matches!(report.failures[0].error, RefineError::FileRead { .. }));
}

#[test]
fn test_prune_missing_sources() {
    let project = TestProject::new();
    let keep = project.add_file("pipeline.py", sample_code::PIPELINE);
    let legacy = project.add_file("old/legacy.py", "def legacy():\n    pass\n");
    let refinery = project.refinery();
    refinery.refine(&[&keep, &legacy]).unwrap();

    std::fs::remove_file(&legacy).unwrap();
    let pruned = refinery.prune_missing().unwrap();

    assert_eq!(pruned, vec![std::path::PathBuf::from("old/legacy.py")]);
    assert!(project.knowledge().load(&legacy).unwrap().is_empty());
    assert_eq!(
        project.knowledge().sources().unwrap(),
        vec![std::path::PathBuf::from("pipeline.py")]
    );
}

#[test]
fn test_annotating_unknown_unit_fails() {
    let project = TestProject::new();
    let file = project.add_file("pipeline.py", sample_code::PIPELINE);
    project.refinery().refine(&[&file]).unwrap();

    let err = IntentManager::new(project.knowledge())
        .update_intent(&file, "pipeline:missing", "nothing")
        .unwrap_err();
    assert!(matches!(err, RefineError::UnitNotFound { .. }));
}
