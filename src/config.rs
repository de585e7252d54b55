//! Configuration module for the refinery.
//!
//! This module provides a layered configuration system that supports:
//! - Default values
//! - TOML configuration file (`.refinery/settings.toml`)
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `REFINERY_` and use double
//! underscores to separate nested levels:
//! - `REFINERY_EMBEDDING__PROVIDER=http` sets `embedding.provider`
//! - `REFINERY_INDEX__KIND=ivf` sets `index.kind`
//! - `REFINERY_SEARCH__TOP_K=10` sets `search.top_k`

use crate::indexing::IGNORE_FILE_NAME;
use crate::vector::IndexKind;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Directory holding settings, knowledge and indexes.
pub const CONFIG_DIR: &str = ".refinery";
const SETTINGS_FILE: &str = "settings.toml";
const ENV_PREFIX: &str = "REFINERY_";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    /// Root of the source tree to refine
    #[serde(default = "default_source_root")]
    pub source_root: PathBuf,

    /// Where per-file knowledge JSON lives
    #[serde(default = "default_knowledge_root")]
    pub knowledge_root: PathBuf,

    /// Parent directory of the named vector indexes
    #[serde(default = "default_index_path")]
    pub index_path: PathBuf,

    /// Index used when no `--index` is given
    #[serde(default = "default_index_name")]
    pub default_index: String,

    /// Workspace root directory (where .refinery is located)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    /// Global debug mode
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub refine: RefineConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub search: SearchConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RefineConfig {
    /// File extensions picked up by the walker (no leading dot)
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// Additional glob patterns to ignore
    #[serde(default)]
    pub ignore_patterns: Vec<String>,

    /// Tokens per chunk for non-symbolic files
    #[serde(default = "default_chunk_window")]
    pub chunk_window: usize,

    /// Tokens shared by consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Intent given to units seen for the first time
    #[serde(default)]
    pub placeholder_intent: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EmbeddingConfig {
    /// "fastembed" (local model) or "http" (Ollama-compatible endpoint)
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Base URL of the HTTP provider
    #[serde(default = "default_embedding_url")]
    pub url: String,

    /// Vector dimension of the HTTP provider's model
    #[serde(default = "default_dimension")]
    pub dimension: usize,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries for transient HTTP failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Texts per HTTP request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent HTTP requests per batch
    #[serde(default = "default_parallel_requests")]
    pub parallel_requests: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct IndexConfig {
    /// "flat" or "ivf"
    #[serde(default = "default_index_kind")]
    pub kind: String,

    /// Lists probed per IVF query
    #[serde(default = "default_nprobe")]
    pub nprobe: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_version() -> u32 {
    1
}
fn default_source_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_knowledge_root() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("knowledge")
}
fn default_index_path() -> PathBuf {
    PathBuf::from(CONFIG_DIR).join("index")
}
fn default_index_name() -> String {
    "source_code".to_string()
}
fn default_extensions() -> Vec<String> {
    ["py", "md", "txt", "rst"].map(String::from).to_vec()
}
fn default_chunk_window() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_provider() -> String {
    "fastembed".to_string()
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_dimension() -> usize {
    crate::vector::VECTOR_DIMENSION_384
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_batch_size() -> usize {
    32
}
fn default_parallel_requests() -> usize {
    num_cpus::get().min(4)
}
fn default_index_kind() -> String {
    "flat".to_string()
}
fn default_nprobe() -> usize {
    crate::vector::DEFAULT_NPROBE
}
fn default_top_k() -> usize {
    5
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            source_root: default_source_root(),
            knowledge_root: default_knowledge_root(),
            index_path: default_index_path(),
            default_index: default_index_name(),
            workspace_root: None,
            debug: false,
            refine: RefineConfig::default(),
            embedding: EmbeddingConfig::default(),
            index: IndexConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            ignore_patterns: Vec::new(),
            chunk_window: default_chunk_window(),
            chunk_overlap: default_chunk_overlap(),
            placeholder_intent: String::new(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            url: default_embedding_url(),
            dimension: default_dimension(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            batch_size: default_batch_size(),
            parallel_requests: default_parallel_requests(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            kind: default_index_kind(),
            nprobe: default_nprobe(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

impl IndexConfig {
    pub fn index_kind(&self) -> Result<IndexKind, String> {
        self.kind
            .parse::<IndexKind>()
            .map_err(|e| format!("index.kind: {e}"))
    }
}

impl Settings {
    /// Load configuration from all sources
    pub fn load() -> Result<Self, Box<figment::Error>> {
        // Try to find the workspace root by looking for .refinery directory
        let config_path = Self::find_workspace_config()
            .unwrap_or_else(|| PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE));

        Self::figment(&config_path)
            .extract()
            .map_err(Box::new)
            .map(|mut settings: Settings| {
                if settings.workspace_root.is_none() {
                    settings.workspace_root = Self::workspace_root();
                }
                settings
            })
    }

    /// Load configuration from a specific file
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, Box<figment::Error>> {
        Self::figment(path.as_ref()).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels
            .merge(Env::prefixed(ENV_PREFIX).map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Find the workspace config by looking for a .refinery directory,
    /// searching from the current directory up to the root.
    fn find_workspace_config() -> Option<PathBuf> {
        Self::workspace_root().map(|root| root.join(CONFIG_DIR).join(SETTINGS_FILE))
    }

    /// Get the workspace root directory (where .refinery is located)
    pub fn workspace_root() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        current
            .ancestors()
            .find(|ancestor| ancestor.join(CONFIG_DIR).is_dir())
            .map(Path::to_path_buf)
    }

    /// `path` anchored at the workspace root when relative.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        match &self.workspace_root {
            Some(root) if path.is_relative() => root.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn source_root_path(&self) -> PathBuf {
        self.resolve(&self.source_root)
    }

    pub fn knowledge_root_path(&self) -> PathBuf {
        self.resolve(&self.knowledge_root)
    }

    pub fn index_root_path(&self) -> PathBuf {
        self.resolve(&self.index_path)
    }

    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.refine.chunk_window == 0 {
            return Err("refine.chunk_window must be greater than 0".to_string());
        }
        if self.refine.chunk_overlap >= self.refine.chunk_window {
            return Err(format!(
                "refine.chunk_overlap ({}) must be smaller than refine.chunk_window ({})",
                self.refine.chunk_overlap, self.refine.chunk_window
            ));
        }
        match self.embedding.provider.as_str() {
            "fastembed" | "http" | "ollama" => {}
            other => {
                return Err(format!(
                    "embedding.provider '{other}' is not supported, use 'fastembed' or 'http'"
                ));
            }
        }
        if self.embedding.dimension == 0 {
            return Err("embedding.dimension must be greater than 0".to_string());
        }
        if self.embedding.timeout_secs == 0 {
            return Err("embedding.timeout_secs must be greater than 0".to_string());
        }
        if self.search.top_k == 0 {
            return Err("search.top_k must be greater than 0".to_string());
        }
        if self.default_index.is_empty() {
            return Err("default_index must not be empty".to_string());
        }
        self.index.index_kind().map(|_| ())
    }

    /// Save current configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), Box<dyn std::error::Error>> {
        let parent = path.as_ref().parent().ok_or("Invalid path")?;
        std::fs::create_dir_all(parent)?;

        let toml_string = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_string)?;

        Ok(())
    }

    /// Create a default settings file with helpful comments
    pub fn init_config_file(force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let config_path = PathBuf::from(CONFIG_DIR).join(SETTINGS_FILE);

        if !force && config_path.exists() {
            return Err("Configuration file already exists. Use --force to overwrite".into());
        }

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let template = format!(
            r#"# Refinery Configuration File

# Version of the configuration schema
version = 1

# Source tree to refine (relative to the workspace root)
source_root = "."

# Per-file knowledge JSON
knowledge_root = ".refinery/knowledge"

# Parent directory of the named vector indexes
index_path = ".refinery/index"

# Index used when --index is not given
default_index = "source_code"

# Global debug mode
debug = false

[refine]
# Extensions picked up when walking the source root
extensions = ["py", "md", "txt", "rst"]

# Additional patterns to ignore (gitignore glob syntax)
ignore_patterns = []

# Chunking of files without a symbol extractor, in whitespace tokens
chunk_window = 500
chunk_overlap = 100

# Intent recorded for units seen for the first time
placeholder_intent = ""

[embedding]
# "fastembed" runs a local model, "http" calls an Ollama-compatible /api/embed
provider = "fastembed"
model = "AllMiniLML6V2"

# HTTP provider only
url = "http://localhost:11434"
dimension = 384
timeout_secs = 30
max_retries = 3
batch_size = 32
parallel_requests = {}

[index]
# "flat" (exact) or "ivf" (k-means lists, rebuilt on update)
kind = "flat"
nprobe = 8

[search]
top_k = 5
"#,
            default_parallel_requests()
        );

        std::fs::write(&config_path, template)?;

        if force {
            println!("Overwrote configuration at: {}", config_path.display());
        } else {
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
        }

        Self::create_default_ignore_file(force)?;

        Ok(config_path)
    }

    /// Create a default ignore file with common patterns
    fn create_default_ignore_file(force: bool) -> Result<(), Box<dyn std::error::Error>> {
        let ignore_path = PathBuf::from(IGNORE_FILE_NAME);

        if !force && ignore_path.exists() {
            println!("Found existing {IGNORE_FILE_NAME} file");
            return Ok(());
        }

        let default_content = r#"# Refinery ignore patterns (gitignore syntax)

# Build artifacts
build/
dist/
target/

# Refinery's own directory
.refinery/

# Dependency directories
node_modules/
.venv/
venv/
__pycache__/
*.egg-info/

# Generated files
*_pb2.py
"#;

        std::fs::write(&ignore_path, default_content)?;
        println!("Created default {IGNORE_FILE_NAME} file");

        Ok(())
    }
}
