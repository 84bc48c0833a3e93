//! # Embedding providers
//!
//! Text → fixed-length vector, behind the [`EmbeddingProvider`] trait. Providers are
//! passed explicitly to every component that embeds, so tests can substitute a
//! deterministic one.
//!
//! - [`SentenceEmbeddingsModel`]: all-MiniLM-L6-v2 via Candle (pure Rust), weights
//!   fetched from the Hugging Face Hub. Produces 384-d, L2-normalized vectors.
//! - [`HashingEmbedder`]: offline feature hashing over words and CJK character
//!   n-grams. Cheap and deterministic; overlapping vocabulary gives positive cosine.

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use std::fmt::Display;
use tokenizers::Tokenizer;
use tracing::info;

use crate::{
    config::{EmbeddingConfig, EmbeddingProviderKind},
    error::{MemoryError, Result},
    vector_index::normalized,
};

/// Maps text to a vector of fixed length [`dimension`](Self::dimension).
///
/// Implementations must be deterministic for a given model configuration.
pub trait EmbeddingProvider: Send + Sync {
    fn dimension(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

fn failure(err: impl Display) -> MemoryError {
    MemoryError::EmbeddingFailure(err.to_string())
}

/// Construct the provider selected in `config`.
pub fn provider_from_config(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider {
        EmbeddingProviderKind::Minilm => Ok(Box::new(SentenceEmbeddingsModel::load()?)),
        EmbeddingProviderKind::Hashing => Ok(Box::new(HashingEmbedder::new(config.dimension))),
    }
}

/// Sentence embeddings model using Candle (pure Rust)
pub struct SentenceEmbeddingsModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl SentenceEmbeddingsModel {
    pub const MODEL_ID: &'static str = "sentence-transformers/all-MiniLM-L6-v2";
    pub const DIMENSION: usize = 384;

    /// Load the model from Hugging Face Hub
    pub fn load() -> Result<Self> {
        let device = Device::Cpu;
        info!("Loading embedding model {}", Self::MODEL_ID);

        let repo = Repo::with_revision(Self::MODEL_ID.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(failure)?;
        let api_repo = api.repo(repo);

        let config_filename = api_repo.get("config.json").map_err(failure)?;
        let tokenizer_filename = api_repo.get("tokenizer.json").map_err(failure)?;
        let weights_filename = api_repo.get("model.safetensors").map_err(failure)?;

        let config = std::fs::read_to_string(config_filename)?;
        let config: Config = serde_json::from_str(&config).map_err(failure)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| failure(format!("Failed to load tokenizer: {e}")))?;

        // SAFETY: the safetensors file is owned by the hub cache and not mutated while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_filename], DTYPE, &device).map_err(failure)?
        };
        let model = BertModel::load(vb, &config).map_err(failure)?;

        info!("Embedding model loaded. Dimension: {}", Self::DIMENSION);
        Ok(Self {
            model,
            tokenizer,
            device,
        })
    }

    fn encode(&self, text: &str) -> candle_core::Result<Vec<f32>> {
        // Tokenize with automatic truncation at 512 tokens
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| candle_core::Error::Msg(format!("Tokenization error: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)?.unsqueeze(0)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)?.unsqueeze(0)?;

        let output = self.model.forward(&token_ids, &token_type_ids, None)?;
        let embedding = self.mean_pooling(&output, tokens.get_attention_mask())?;
        let norm = embedding.sqr()?.sum_all()?.sqrt()?;
        embedding.broadcast_div(&norm)?.to_vec1::<f32>()
    }

    /// Mean pooling over token embeddings, considering attention mask
    fn mean_pooling(&self, embeddings: &Tensor, attention_mask: &[u32]) -> candle_core::Result<Tensor> {
        // embeddings: [1, seq_len, hidden]; mask reshaped to [1, seq_len, 1] for broadcasting
        let mask = Tensor::new(attention_mask, &self.device)?
            .to_dtype(DType::F32)?
            .unsqueeze(0)?
            .unsqueeze(2)?;

        let sum = embeddings.broadcast_mul(&mask)?.sum(1)?;
        let count = mask.sum(1)?.clamp(1f32, f32::INFINITY)?;
        sum.broadcast_div(&count)?.squeeze(0)
    }
}

impl EmbeddingProvider for SentenceEmbeddingsModel {
    fn dimension(&self) -> usize {
        Self::DIMENSION
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(text).map_err(failure)
    }
}

/// Deterministic feature-hashing embedder.
///
/// Features are lowercase ASCII words, single non-ASCII letters (CJK characters)
/// and bigrams of adjacent non-ASCII letters. Each feature adds `1.0` to the bucket
/// chosen by its blake3 hash. Punctuation and whitespace separate features.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, feature: &str) -> usize {
        let hash = blake3::hash(feature.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&hash.as_bytes()[..8]);
        (u64::from_le_bytes(head) % self.dimension as u64) as usize
    }

    fn features(text: &str) -> Vec<String> {
        let mut features = Vec::new();
        let mut word = String::new();
        let mut previous_wide: Option<char> = None;

        for c in text.chars() {
            if c.is_ascii_alphanumeric() {
                word.push(c.to_ascii_lowercase());
                previous_wide = None;
                continue;
            }
            if !word.is_empty() {
                features.push(std::mem::take(&mut word));
            }
            if c.is_alphanumeric() {
                features.push(c.to_string());
                if let Some(prev) = previous_wide {
                    features.push(format!("{prev}{c}"));
                }
                previous_wide = Some(c);
            } else {
                previous_wide = None;
            }
        }
        if !word.is_empty() {
            features.push(word);
        }

        features
    }
}

impl EmbeddingProvider for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for feature in Self::features(text) {
            vector[self.bucket(&feature)] += 1.0;
        }
        Ok(normalized(&vector))
    }
}
