//! Text embedding providers.
//!
//! [`EmbeddingBackend`] is chosen once, when a [`StyleMemory`](crate::StyleMemory)
//! is opened: a model2vec model when one loads, otherwise the
//! [`HashEmbedder`]. Callers only see the [`EmbeddingProvider`] interface.

mod hashing;

pub use hashing::HashEmbedder;

/// Converts text into a fixed-dimension vector.
///
/// Implementations must be deterministic: the same text always yields the
/// same vector for a given provider configuration.
pub trait EmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, crate::Error>;

    fn dimension(&self) -> usize;

    /// Stable identifier recorded in the index manifest.
    fn name(&self) -> &str;
}

impl EmbeddingProvider for HashEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, crate::Error> {
        Ok(HashEmbedder::embed(self, text))
    }

    fn dimension(&self) -> usize {
        HashEmbedder::dimension(self)
    }

    fn name(&self) -> &str {
        "hash"
    }
}

#[cfg(feature = "model2vec")]
pub struct ModelEmbedder {
    model: model2vec::Model2Vec,
    model_id: String,
    dimension: usize,
}

#[cfg(feature = "model2vec")]
impl ModelEmbedder {
    /// Load `model_id` from the local cache, downloading it on a cache miss.
    ///
    /// The `model_id` should be a HuggingFace model identifier such as
    /// `"minishlab/potion-base-8M"`.
    pub fn load(model_id: &str) -> Result<Self, crate::Error> {
        let model = try_load_model(model_id)?;

        // The dimension is whatever the model produces.
        let probe = model
            .encode(["dimension probe"])
            .map_err(|e: anyhow::Error| crate::Error::Embedding(e.to_string()))?;
        let dimension = probe.ncols();
        if dimension == 0 {
            return Err(crate::Error::Embedding(format!(
                "model '{model_id}' produced empty embeddings"
            )));
        }

        Ok(Self {
            model,
            model_id: model_id.to_string(),
            dimension,
        })
    }
}

#[cfg(feature = "model2vec")]
fn try_load_model(model_id: &str) -> Result<model2vec::Model2Vec, crate::Error> {
    use std::path::Path;

    // e.g. "minishlab/potion-base-8M" -> "potion-base-8M"
    let model_dir_name = model_id.rsplit('/').next().unwrap_or(model_id);

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| Path::new(".").to_path_buf())
        .join(crate::constants::APP_NAME)
        .join(crate::constants::MODELS_SUBDIR);

    let model_path = cache_dir.join(model_dir_name);

    if model_path.exists() && model_path.join("tokenizer.json").exists() {
        match model2vec::Model2Vec::from_pretrained(&model_path, None, None) {
            Ok(model) => return Ok(model),
            Err(e) => {
                tracing::warn!("Failed to load model from cache: {}", e);
            }
        }
    }

    std::fs::create_dir_all(&cache_dir)
        .map_err(|e| crate::Error::Embedding(format!("Failed to create cache dir: {e}")))?;

    model2vec::Model2Vec::from_pretrained(model_id, None, None)
        .map_err(|e: anyhow::Error| crate::Error::Embedding(e.to_string()))
}

#[cfg(feature = "model2vec")]
impl EmbeddingProvider for ModelEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, crate::Error> {
        let embeddings = self
            .model
            .encode([text])
            .map_err(|e: anyhow::Error| crate::Error::Embedding(e.to_string()))?;

        let embedding = embeddings.row(0).to_vec();
        if embedding.len() != self.dimension {
            return Err(crate::Error::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_id
    }
}

/// The provider selected at startup.
pub enum EmbeddingBackend {
    #[cfg(feature = "model2vec")]
    Model(ModelEmbedder),
    Hash(HashEmbedder),
}

impl EmbeddingBackend {
    /// Select a provider. A `model_id` that cannot be loaded (or a build
    /// without the `model2vec` feature) silently yields the hash embedder.
    pub fn new(model_id: Option<&str>) -> Self {
        let Some(model_id) = model_id else {
            return Self::hash();
        };

        #[cfg(feature = "model2vec")]
        {
            match ModelEmbedder::load(model_id) {
                Ok(model) => {
                    tracing::info!(
                        "Using embedding model '{}' (dimension {})",
                        model_id,
                        model.dimension
                    );
                    Self::Model(model)
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to load embedding model '{}': {}. Falling back to hash embeddings.",
                        model_id,
                        e
                    );
                    Self::hash()
                }
            }
        }

        #[cfg(not(feature = "model2vec"))]
        {
            tracing::info!(
                "model2vec support not compiled in, ignoring model '{}'",
                model_id
            );
            Self::hash()
        }
    }

    pub fn hash() -> Self {
        Self::Hash(HashEmbedder::default())
    }

    pub fn is_model_backed(&self) -> bool {
        !matches!(self, Self::Hash(_))
    }

    fn provider(&self) -> &dyn EmbeddingProvider {
        match self {
            #[cfg(feature = "model2vec")]
            Self::Model(model) => model,
            Self::Hash(hash) => hash,
        }
    }
}

impl EmbeddingProvider for EmbeddingBackend {
    fn embed(&self, text: &str) -> Result<Vec<f32>, crate::Error> {
        self.provider().embed(text)
    }

    fn dimension(&self) -> usize {
        self.provider().dimension()
    }

    fn name(&self) -> &str {
        self.provider().name()
    }
}
