//! One JSON knowledge file per source file.
//!
//! A source file `<source_root>/pkg/mod.py` is stored as
//! `<knowledge_root>/pkg/mod.py.json` containing the originating source path
//! and the full list of its code units. Files are always written whole.

use crate::error::{RefineError, RefineResult};
use crate::io::atomic::{JsonWriteError, write_json_atomic};
use crate::types::CodeUnit;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const KNOWLEDGE_EXTENSION: &str = "json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KnowledgeFile {
    source_path: PathBuf,
    units: Vec<CodeUnit>,
}

/// Durable store of code-unit metadata, keyed by source file.
#[derive(Debug, Clone)]
pub struct KnowledgeStore {
    source_root: PathBuf,
    knowledge_root: PathBuf,
}

impl KnowledgeStore {
    pub fn new(source_root: impl Into<PathBuf>, knowledge_root: impl Into<PathBuf>) -> Self {
        Self {
            source_root: source_root.into(),
            knowledge_root: knowledge_root.into(),
        }
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn knowledge_root(&self) -> &Path {
        &self.knowledge_root
    }

    /// `path` relative to the source root. Paths outside the root keep their
    /// own relative form.
    pub fn relative_source(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.source_root) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => path.to_path_buf(),
        }
    }

    /// Where the knowledge for `source_path` lives.
    pub fn knowledge_path(&self, source_path: &Path) -> PathBuf {
        let rel: PathBuf = self
            .relative_source(source_path)
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part),
                _ => None,
            })
            .collect();
        let mut file_name = rel
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "_root".into());
        file_name.push(".");
        file_name.push(KNOWLEDGE_EXTENSION);
        self.knowledge_root.join(rel.with_file_name(file_name))
    }

    /// Stored units for `source_path`; empty when nothing was stored yet.
    pub fn load(&self, source_path: &Path) -> RefineResult<Vec<CodeUnit>> {
        let path = self.knowledge_path(source_path);
        if !path.exists() {
            return Ok(Vec::new());
        }
        Ok(Self::read_file(&path)?.units)
    }

    /// Replaces the stored units for `source_path` wholesale.
    pub fn save(&self, source_path: &Path, units: &[CodeUnit]) -> RefineResult<()> {
        let path = self.knowledge_path(source_path);
        let file = KnowledgeFile {
            source_path: self.relative_source(source_path),
            units: units.to_vec(),
        };
        write_json_atomic(&path, &file).map_err(|e| match e {
            JsonWriteError::Serialize(source) => RefineError::Serialization { path, source },
            JsonWriteError::Io(source) => RefineError::Persistence { path, source },
        })?;
        debug!("Saved {} unit(s) for {}", units.len(), source_path.display());
        Ok(())
    }

    /// Deletes the knowledge for `source_path`. Returns whether it existed.
    pub fn remove_source(&self, source_path: &Path) -> RefineResult<bool> {
        let path = self.knowledge_path(source_path);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(RefineError::Persistence { path, source }),
        }
    }

    /// Every stored unit, in knowledge-file path order.
    pub fn iter_units(&self) -> RefineResult<impl Iterator<Item = CodeUnit> + use<>> {
        let mut units = Vec::new();
        for path in self.knowledge_files()? {
            units.extend(Self::read_file(&path)?.units);
        }
        Ok(units.into_iter())
    }

    /// Recorded source paths (relative to the source root), sorted.
    pub fn sources(&self) -> RefineResult<Vec<PathBuf>> {
        self.knowledge_files()?
            .iter()
            .map(|path| Self::read_file(path).map(|file| file.source_path))
            .collect()
    }

    /// Looks up one unit of a source file.
    pub fn find_unit(&self, source_path: &Path, unit_id: &str) -> RefineResult<Option<CodeUnit>> {
        Ok(self
            .load(source_path)?
            .into_iter()
            .find(|u| u.unit_id == unit_id))
    }

    fn knowledge_files(&self) -> RefineResult<Vec<PathBuf>> {
        if !self.knowledge_root.exists() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.knowledge_root).sort_by_file_name() {
            let entry = entry.map_err(|e| RefineError::Persistence {
                path: self.knowledge_root.clone(),
                source: e.into(),
            })?;
            let path = entry.path();
            if entry.file_type().is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(KNOWLEDGE_EXTENSION)
            {
                files.push(path.to_path_buf());
            }
        }
        Ok(files)
    }

    fn read_file(path: &Path) -> RefineResult<KnowledgeFile> {
        let json = std::fs::read_to_string(path).map_err(|source| RefineError::Persistence {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&json).map_err(|e| RefineError::Corrupted {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}
