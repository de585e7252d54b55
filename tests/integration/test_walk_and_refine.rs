//! Directory walking with ignore rules feeding the refinery.

use crate::common::{TestProject, sample_code};
use code_refinery::indexing::IGNORE_FILE_NAME;
use code_refinery::{FileWalker, Settings};
use std::sync::Arc;

#[test]
fn test_walker_respects_ignore_rules() {
    let project = TestProject::new();
    project.add_file("pipeline.py", sample_code::PIPELINE);
    project.add_file("docs/guide.md", sample_code::GUIDE);
    project.add_file("generated/schema.py", "def schema():\n    pass\n");
    project.add_file("vendor/lib.py", "def vendored():\n    pass\n");
    project.add_file(".hidden/secret.py", "def secret():\n    pass\n");
    project.add_file("image.png", "not really an image");
    project.add_file(IGNORE_FILE_NAME, "vendor/\n");

    let mut settings = Settings::default();
    settings.refine.ignore_patterns = vec!["generated/**".to_string()];
    let walker = FileWalker::new(Arc::new(settings));

    let files = walker.walk(&project.source_root());
    let relative: Vec<String> = files
        .iter()
        .map(|f| {
            f.strip_prefix(project.source_root())
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/")
        })
        .collect();

    assert_eq!(relative, vec!["docs/guide.md", "pipeline.py"]);
}

#[test]
fn test_walked_files_refine_cleanly() {
    let project = TestProject::new();
    project.add_file("pipeline.py", sample_code::PIPELINE);
    project.add_file("pkg/__init__.py", "def bootstrap():\n    return True\n");
    project.add_file("docs/guide.md", sample_code::GUIDE);

    let walker = FileWalker::new(Arc::new(Settings::default()));
    let files = walker.walk(&project.source_root());
    let report = project.refinery().refine(&files).unwrap();

    assert!(report.is_clean());
    assert_eq!(report.files_refined, 3);
    assert!(report.units.iter().any(|u| u.unit_id == "pkg:bootstrap"));
    assert_eq!(project.knowledge().sources().unwrap().len(), 3);
}
