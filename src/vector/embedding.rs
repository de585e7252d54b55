//! Embedding collaborators.
//!
//! The store only sees [`EmbeddingGenerator`]: one batch in, one vector per
//! input back in the same order, or an error for the whole batch. Two
//! providers are available: a local fastembed model and an HTTP endpoint
//! speaking the Ollama `/api/embed` format.

use crate::config::EmbeddingConfig;
use crate::vector::types::{EmbeddingError, VectorDimension};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use rayon::prelude::*;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Trait for generating embeddings from text.
///
/// Implementations must be thread-safe and return exactly one vector per
/// input, in input order.
pub trait EmbeddingGenerator: Send + Sync {
    /// Generate embeddings for multiple texts.
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Get the dimension of embeddings produced by this generator.
    fn dimension(&self) -> VectorDimension;

    fn model_name(&self) -> &str;
}

/// Builds the generator selected by `config.provider`.
pub fn create_generator(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGenerator>, EmbeddingError> {
    match config.provider.as_str() {
        "fastembed" => Ok(Arc::new(FastEmbedGenerator::new(&config.model, true)?)),
        "http" | "ollama" => Ok(Arc::new(HttpEmbeddingGenerator::new(config)?)),
        other => Err(EmbeddingError::ModelInit(format!(
            "unknown embedding provider '{other}', expected 'fastembed' or 'http'"
        ))),
    }
}

/// Parse a model name from configuration into a fastembed model.
pub fn parse_embedding_model(name: &str) -> Result<EmbeddingModel, EmbeddingError> {
    match name {
        "AllMiniLML6V2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "AllMiniLML12V2" => Ok(EmbeddingModel::AllMiniLML12V2),
        "BGESmallENV15" => Ok(EmbeddingModel::BGESmallENV15),
        "BGEBaseENV15" => Ok(EmbeddingModel::BGEBaseENV15),
        "MultilingualE5Small" => Ok(EmbeddingModel::MultilingualE5Small),
        "NomicEmbedTextV15" => Ok(EmbeddingModel::NomicEmbedTextV15),
        other => Err(EmbeddingError::ModelInit(format!(
            "unsupported fastembed model '{other}'"
        ))),
    }
}

/// Directory fastembed downloads models into.
pub fn models_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("code-refinery")
        .join("models")
}

/// Local fastembed model.
pub struct FastEmbedGenerator {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimension: VectorDimension,
}

impl FastEmbedGenerator {
    /// Loads (downloading on first use) the named model.
    ///
    /// The dimension is probed with a test embedding.
    pub fn new(model_name: &str, show_download_progress: bool) -> Result<Self, EmbeddingError> {
        let model = parse_embedding_model(model_name)?;
        let mut text_model = TextEmbedding::try_new(
            InitOptions::new(model)
                .with_cache_dir(models_dir())
                .with_show_download_progress(show_download_progress),
        )
        .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        let probe = text_model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
        let dimension = probe
            .first()
            .map(Vec::len)
            .and_then(|len| VectorDimension::new(len).ok())
            .ok_or_else(|| EmbeddingError::ModelInit("model produced an empty probe embedding".to_string()))?;

        Ok(Self {
            model: Mutex::new(text_model),
            model_name: model_name.to_string(),
            dimension,
        })
    }
}

impl EmbeddingGenerator for FastEmbedGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self
            .model
            .lock()
            .map_err(|_| {
                EmbeddingError::Request(
                    "Failed to acquire embedding model lock - model may be poisoned".to_string(),
                )
            })?
            .embed(texts.to_vec(), None)
            .map_err(|e| EmbeddingError::Request(format!("Failed to generate embeddings: {e}")))?;

        check_batch(texts.len(), self.dimension, &embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

/// Remote embedding endpoint (Ollama `/api/embed` wire format).
///
/// A batch is split into `batch_size` slices sent concurrently on a bounded
/// worker pool; results are reassembled in submission order. Each request
/// has a timeout and transient failures (429, 5xx, connection errors) are
/// retried with exponential backoff.
pub struct HttpEmbeddingGenerator {
    client: reqwest::blocking::Client,
    url: String,
    model_name: String,
    dimension: VectorDimension,
    timeout_secs: u64,
    max_retries: u32,
    batch_size: usize,
    pool: rayon::ThreadPool,
}

impl HttpEmbeddingGenerator {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let dimension = VectorDimension::new(config.dimension)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ModelInit(format!("failed to build HTTP client: {e}")))?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_requests.max(1))
            .thread_name(|i| format!("embed-{i}"))
            .build()
            .map_err(|e| EmbeddingError::ModelInit(format!("failed to start embedding workers: {e}")))?;

        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model_name: config.model.clone(),
            dimension,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
            batch_size: config.batch_size.max(1),
            pool,
        })
    }

    fn embed_slice(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model_name,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url);
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(250 << (attempt - 1).min(5));
                debug!("Retrying embedding request in {delay:?} (attempt {attempt})");
                std::thread::sleep(delay);
            }

            let response = match self.client.post(&endpoint).json(&body).send() {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    last_err = Some(EmbeddingError::Timeout {
                        secs: self.timeout_secs,
                    });
                    continue;
                }
                Err(e) => {
                    last_err = Some(EmbeddingError::Request(format!(
                        "connection to {} failed: {e}",
                        self.url
                    )));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: serde_json::Value = response
                    .json()
                    .map_err(|e| EmbeddingError::Request(format!("invalid response body: {e}")))?;
                return parse_embed_response(&json);
            }

            let body_text = response.text().unwrap_or_default();
            let err = EmbeddingError::Request(format!("embedding API error {status}: {body_text}"));
            if status.as_u16() == 429 || status.is_server_error() {
                warn!("Transient embedding API error {status}");
                last_err = Some(err);
                continue;
            }
            return Err(err);
        }

        Err(last_err.unwrap_or_else(|| {
            EmbeddingError::Request("embedding failed after retries".to_string())
        }))
    }
}

impl EmbeddingGenerator for HttpEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let slices: Vec<&[&str]> = texts.chunks(self.batch_size).collect();
        debug!(
            "Embedding {} text(s) in {} request(s)",
            texts.len(),
            slices.len()
        );
        let parts: Vec<Vec<Vec<f32>>> = self.pool.install(|| {
            slices
                .par_iter()
                .map(|slice| self.embed_slice(slice))
                .collect::<Result<_, _>>()
        })?;

        let embeddings: Vec<Vec<f32>> = parts.into_iter().flatten().collect();
        check_batch(texts.len(), self.dimension, &embeddings)?;
        Ok(embeddings)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}

fn parse_embed_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Request("response is missing the embeddings array".to_string()))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .ok_or_else(|| EmbeddingError::Request("embedding is not an array".to_string()))?
                .iter()
                .map(|v| {
                    v.as_f64()
                        .map(|f| f as f32)
                        .ok_or_else(|| EmbeddingError::Request("embedding value is not a number".to_string()))
                })
                .collect()
        })
        .collect()
}

/// Enforces one vector per input with the expected dimension.
pub fn check_batch(
    expected: usize,
    dimension: VectorDimension,
    embeddings: &[Vec<f32>],
) -> Result<(), EmbeddingError> {
    if embeddings.len() != expected {
        return Err(EmbeddingError::CountMismatch {
            expected,
            actual: embeddings.len(),
        });
    }
    if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension.get()) {
        return Err(EmbeddingError::DimensionMismatch {
            expected: dimension.get(),
            actual: bad.len(),
        });
    }
    Ok(())
}

/// Mock embedding generator for testing.
///
/// Hashes lowercase word tokens into buckets and normalizes, so texts that
/// share words are close and the output is deterministic.
#[cfg(test)]
pub struct MockEmbeddingGenerator {
    dimension: VectorDimension,
    calls: std::sync::atomic::AtomicUsize,
    fail: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl Default for MockEmbeddingGenerator {
    fn default() -> Self {
        Self::with_dimension(VectorDimension::new(64).unwrap())
    }
}

#[cfg(test)]
impl MockEmbeddingGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_dimension(dimension: VectorDimension) -> Self {
        Self {
            dimension,
            calls: std::sync::atomic::AtomicUsize::new(0),
            fail: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Number of `generate_embeddings` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Makes every following call fail.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.dimension.get();
        let mut embedding = vec![0.0f32; dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let bucket = token
                .bytes()
                .fold(0xcbf29ce484222325u64, |h, b| (h ^ u64::from(b)).wrapping_mul(0x100000001b3));
            embedding[(bucket % dim as u64) as usize] += 1.0;
        }
        crate::vector::clustering::normalize(&mut embedding);
        embedding
    }
}

#[cfg(test)]
impl EmbeddingGenerator for MockEmbeddingGenerator {
    fn generate_embeddings(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(EmbeddingError::Request("mock failure".to_string()));
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}
