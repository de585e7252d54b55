//! File system walker for discovering source files to refine
//!
//! This module provides directory traversal with support for:
//! - .gitignore and .refineryignore rules
//! - Custom ignore patterns from configuration
//! - Extension filtering
//! - Hidden and binary file skipping

use crate::Settings;
use crate::indexing::file_info::looks_binary;
use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Name of the project-specific ignore file (gitignore syntax).
pub const IGNORE_FILE_NAME: &str = ".refineryignore";

/// Walks directories to find source files to refine
#[derive(Debug)]
pub struct FileWalker {
    settings: Arc<Settings>,
}

impl FileWalker {
    /// Create a new file walker with the given settings
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    /// Walk a directory and return the files to refine, sorted by path.
    pub fn walk(&self, root: &Path) -> Vec<PathBuf> {
        let mut builder = WalkBuilder::new(root);
        builder
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .follow_links(false)
            .require_git(false)
            .sort_by_file_path(|a, b| a.cmp(b));
        builder.add_custom_ignore_filename(IGNORE_FILE_NAME);
        if let Some(overrides) = self.ignore_overrides(root) {
            builder.overrides(overrides);
        }

        let extensions = &self.settings.refine.extensions;
        let mut files: Vec<PathBuf> = builder
            .build()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| extensions.iter().any(|e| e == ext))
            })
            .filter(|path| match looks_binary(path) {
                Ok(binary) => {
                    if binary {
                        debug!("Skipping binary file {}", path.display());
                    }
                    !binary
                }
                Err(e) => {
                    warn!("Skipping unreadable file {}: {e}", path.display());
                    false
                }
            })
            .collect();
        files.sort();
        files
    }

    /// Configured ignore globs as negated overrides.
    fn ignore_overrides(&self, root: &Path) -> Option<Override> {
        let patterns = &self.settings.refine.ignore_patterns;
        if patterns.is_empty() {
            return None;
        }
        let mut builder = OverrideBuilder::new(root);
        for pattern in patterns {
            if let Err(e) = builder.add(&format!("!{pattern}")) {
                warn!("Ignoring invalid ignore pattern '{pattern}': {e}");
            }
        }
        match builder.build() {
            Ok(overrides) => Some(overrides),
            Err(e) => {
                warn!("Failed to build ignore patterns: {e}");
                None
            }
        }
    }
}
