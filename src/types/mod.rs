//! Code units and their lifecycle.

use crate::indexing::SourceTier;
use crate::knowledge::calculate_hash;
use crate::vector::Payload;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// What a code unit covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    Function,
    Class,
    Method,
    /// Window of a non-symbolic file (docs, text).
    Chunk,
}

impl UnitKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Class => "class",
            Self::Method => "method",
            Self::Chunk => "chunk",
        }
    }
}

impl std::fmt::Display for UnitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UnitKind {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "function" | "fn" => Ok(Self::Function),
            "class" => Ok(Self::Class),
            "method" => Ok(Self::Method),
            "chunk" | "file_chunk" => Ok(Self::Chunk),
            _ => Err("Unknown unit kind"),
        }
    }
}

/// Whether a unit's stored annotation still matches its content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LifecycleState {
    /// First seen in the latest pass and not yet consumed downstream.
    New,
    /// Content changed since the last annotation.
    Stale,
    Ok,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Stale => "STALE",
            Self::Ok => "OK",
        }
    }

    /// NEW and STALE both count as a change in a refine pass.
    #[must_use]
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw extractor output, before hashing and classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedUnit {
    pub unit_id: String,
    pub name: String,
    pub kind: UnitKind,
    /// 1-based, inclusive.
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
}

/// One named or chunked piece of source with its annotation state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub unit_id: String,
    pub source_path: PathBuf,
    pub name: String,
    pub kind: UnitKind,
    pub start_line: usize,
    pub end_line: usize,
    pub content: String,
    pub content_hash: String,
    /// Hash of the content the current intent was written for.
    pub last_annotated_hash: String,
    #[serde(default)]
    pub intent: String,
    pub lifecycle_state: LifecycleState,
}

impl CodeUnit {
    /// Hashes an extracted unit. The result is `NEW` with an empty intent
    /// until the refinery reconciles it.
    pub fn from_extracted(unit: ExtractedUnit, source_path: &Path) -> Self {
        let content_hash = calculate_hash(&unit.content);
        Self {
            unit_id: unit.unit_id,
            source_path: source_path.to_path_buf(),
            name: unit.name,
            kind: unit.kind,
            start_line: unit.start_line,
            end_line: unit.end_line,
            content: unit.content,
            last_annotated_hash: content_hash.clone(),
            content_hash,
            intent: String::new(),
            lifecycle_state: LifecycleState::New,
        }
    }

    /// Text handed to the embedding model.
    #[must_use]
    pub fn embedding_text(&self) -> String {
        format!(
            "# Symbol: {}\n# File: {}\n# Kind: {}\n# Intent: {}\n{}",
            self.unit_id,
            self.source_path.display(),
            self.kind,
            self.intent,
            self.content
        )
    }

    #[must_use]
    pub fn tier(&self) -> SourceTier {
        SourceTier::classify(&self.source_path)
    }

    /// Payload stored next to the unit's vector.
    #[must_use]
    pub fn payload(&self) -> Payload {
        let mut payload = Payload::new();
        payload.insert("source_type".into(), "code_unit".into());
        payload.insert(
            "source_path".into(),
            self.source_path.display().to_string().into(),
        );
        payload.insert("name".into(), self.name.clone().into());
        payload.insert("kind".into(), self.kind.as_str().into());
        payload.insert("start_line".into(), self.start_line.into());
        payload.insert("end_line".into(), self.end_line.into());
        payload.insert("content".into(), self.content.clone().into());
        payload.insert("content_hash".into(), self.content_hash.clone().into());
        payload.insert("intent".into(), self.intent.clone().into());
        payload.insert(
            "lifecycle_state".into(),
            self.lifecycle_state.as_str().into(),
        );
        payload.insert("tier".into(), self.tier().as_str().into());
        payload
    }
}
