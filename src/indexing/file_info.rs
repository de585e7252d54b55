//! Per-file facts used while discovering and tagging sources.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_LEN: usize = 1024;

/// Coarse quality tier of a source file, derived from its location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    /// Library code under `src/` or `lib/`.
    Gold,
    /// Tests, examples and docs.
    Silver,
    Other,
}

impl SourceTier {
    /// Classifies by directory components; the first recognised one wins.
    pub fn classify(path: &Path) -> Self {
        for component in path.components() {
            if let Component::Normal(name) = component {
                match name.to_str() {
                    Some("src" | "lib") => return Self::Gold,
                    Some("tests" | "test" | "examples" | "docs") => return Self::Silver,
                    _ => {}
                }
            }
        }
        Self::Other
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gold => "gold",
            Self::Silver => "silver",
            Self::Other => "other",
        }
    }
}

/// True when the first KiB of the file contains a NUL byte.
pub fn looks_binary(path: &Path) -> std::io::Result<bool> {
    let mut buf = [0u8; BINARY_SNIFF_LEN];
    let mut file = File::open(path)?;
    let read = file.read(&mut buf)?;
    Ok(buf[..read].contains(&0))
}

/// Get current UTC timestamp in seconds since UNIX_EPOCH
pub fn get_utc_timestamp() -> u64 {
    Utc::now().timestamp() as u64
}
