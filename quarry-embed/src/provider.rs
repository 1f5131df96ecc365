use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use fnv::FnvHasher;
use half::f16;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::{Arc, Mutex, OnceLock};

/// Embeddings for a batch of texts plus the model dimension.
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    pub embeddings: Vec<Vec<f32>>,
    pub dimension: usize,
}

impl EmbeddingResult {
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Anything that can turn text into vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving input order.
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Dimensionality of the vectors this provider produces.
    fn dimension(&self) -> usize;

    /// Short name identifying the backend, e.g. "fastembed".
    fn provider_name(&self) -> &str;
}

// Initialized models are shared process-wide. Model startup loads ONNX
// weights from disk (or the network on first use), so repeated construction
// of providers with the same config must not pay that cost again.
type CachedModel = (Arc<Mutex<TextEmbedding>>, usize);

static MODEL_CACHE: OnceLock<Mutex<HashMap<String, CachedModel>>> = OnceLock::new();

fn model_cache() -> &'static Mutex<HashMap<String, CachedModel>> {
    MODEL_CACHE.get_or_init(|| Mutex::new(HashMap::new()))
}

fn lock_cache() -> std::sync::MutexGuard<'static, HashMap<String, CachedModel>> {
    model_cache().lock().unwrap_or_else(|e| e.into_inner())
}

/// Embedding provider backed by fastembed's bundled ONNX models.
pub struct FastEmbedProvider {
    config: EmbedConfig,
    model: Option<Arc<Mutex<TextEmbedding>>>,
    dimension: usize,
}

impl std::fmt::Debug for FastEmbedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FastEmbedProvider")
            .field("config", &self.config)
            .field("initialized", &self.model.is_some())
            .field("dimension", &self.dimension)
            .finish()
    }
}

impl FastEmbedProvider {
    /// Create and initialize a provider for the configured model.
    pub async fn create(config: EmbedConfig) -> Result<Self> {
        let mut provider = Self {
            config,
            model: None,
            dimension: 0,
        };
        provider.initialize().await?;
        Ok(provider)
    }

    pub fn config(&self) -> &EmbedConfig {
        &self.config
    }

    /// Map a model name onto one of fastembed's bundled models.
    fn resolve_model(name: &str) -> Result<EmbeddingModel> {
        match name.to_lowercase().as_str() {
            "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
            "all-minilm-l12-v2" => Ok(EmbeddingModel::AllMiniLML12V2),
            "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
            "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
            _ => Err(EmbedError::UnknownModel {
                name: name.to_string(),
            }),
        }
    }

    /// Cache key derived from the full config via FNV. Versioned so stale
    /// entries are ignored if the key derivation ever changes.
    fn cache_key(config: &EmbedConfig) -> Result<String> {
        let serialized = serde_json::to_string(config).map_err(EmbedError::model_init)?;
        let mut hasher = FnvHasher::default();
        hasher.write(serialized.as_bytes());
        Ok(format!("v1:{:x}", hasher.finish()))
    }

    async fn initialize(&mut self) -> Result<()> {
        self.config.validate()?;
        let cache_key = Self::cache_key(&self.config)?;
        {
            let cache = lock_cache();
            if let Some((model, dimension)) = cache.get(&cache_key) {
                tracing::debug!("Reusing cached embedding model {}", self.config.model_name);
                self.model = Some(model.clone());
                self.dimension = *dimension;
                return Ok(());
            }
        }

        let model_kind = Self::resolve_model(&self.config.model_name)?;
        let cache_dir = self.config.cache_dir.clone();
        tracing::info!("Initializing embedding model {}", self.config.model_name);
        let embedding = tokio::task::spawn_blocking(move || {
            let mut options = InitOptions::new(model_kind);
            if let Some(dir) = cache_dir {
                options = options.with_cache_dir(dir);
            }
            TextEmbedding::try_new(options)
        })
        .await?
        .map_err(EmbedError::model_init)?;

        let model = Arc::new(Mutex::new(embedding));

        // Probe with a test embedding to learn the dimension.
        let probe = model.clone();
        let dimension = tokio::task::spawn_blocking(move || {
            let mut guard = probe.lock().unwrap_or_else(|e| e.into_inner());
            guard.embed(vec!["dimension probe".to_string()], None)
        })
        .await?
        .map_err(EmbedError::embedding_gen)?
        .first()
        .map(|e| e.len())
        .unwrap_or(0);
        if dimension == 0 {
            return Err(EmbedError::model_init("model produced an empty probe embedding"));
        }

        lock_cache().insert(cache_key, (model.clone(), dimension));
        self.model = Some(model);
        self.dimension = dimension;
        tracing::info!(
            "Embedding model {} ready ({} dimensions)",
            self.config.model_name,
            dimension
        );
        Ok(())
    }

    /// Number of initialized models in the process-wide cache.
    pub fn cached_model_count() -> usize {
        lock_cache().len()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let result = self.embed_texts(&[text.to_string()]).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::embedding_gen("model returned no embedding"))
    }

    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let Some(model) = &self.model else {
            return Err(EmbedError::invalid_config("provider is not initialized"));
        };
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(Vec::new()));
        }
        let mut embeddings = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size) {
            let model = model.clone();
            let batch: Vec<String> = batch.to_vec();
            let batch_embeddings = tokio::task::spawn_blocking(move || {
                let mut guard = model.lock().unwrap_or_else(|e| e.into_inner());
                guard.embed(batch, None)
            })
            .await?
            .map_err(EmbedError::embedding_gen)?;
            embeddings.extend(batch_embeddings);
        }
        for embedding in &embeddings {
            validate_embedding(embedding)?;
        }
        tracing::debug!("Generated {} embeddings", embeddings.len());
        Ok(EmbeddingResult::new(embeddings))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "fastembed"
    }
}

/// Reject empty or non-finite embeddings before they reach storage.
pub fn validate_embedding(embedding: &[f32]) -> Result<()> {
    if embedding.is_empty() {
        return Err(EmbedError::embedding_gen("embedding is empty"));
    }
    if embedding.iter().any(|v| !v.is_finite()) {
        return Err(EmbedError::embedding_gen(
            "embedding contains non-finite values",
        ));
    }
    Ok(())
}

/// Convert f32 embeddings to the half-precision storage form, optionally
/// L2-normalizing first. Zero vectors are stored unnormalized.
pub fn convert_to_f16(embeddings: &[Vec<f32>], normalize: bool) -> Vec<Vec<f16>> {
    embeddings
        .iter()
        .map(|embedding| {
            if normalize {
                let norm = embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    return embedding.iter().map(|v| f16::from_f32(v / norm)).collect();
                }
            }
            embedding.iter().map(|v| f16::from_f32(*v)).collect()
        })
        .collect()
}
