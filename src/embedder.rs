//! Embedding generation (spec.md §4.5, §6 "External interfaces").
//!
//! `Embedder` is the seam the rest of the crate programs against; the
//! concrete model is a local `candle` BERT encoder, grounded on the
//! teacher's `embeddings.rs` (same model family, mean pooling, L2
//! normalize) but widened to the spec's 768-dim encoder and the
//! `search_document:`/`search_query:` asymmetric prefixes.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tokenizers::{PaddingParams, Tokenizer};

const MODEL_ID: &str = "nomic-ai/nomic-embed-text-v1.5";
const MODEL_REVISION: &str = "main";

/// External embedding-model collaborator. Implementors return one
/// L2-normalized, `VECTOR_DIM`-length vector per input string.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> CoreResult<Vec<f32>> {
        let mut out = self.embed_batch(&[text.to_string()]).await?;
        Ok(out.pop().unwrap_or_default())
    }
}

/// Candle-backed BERT encoder loaded from the Hugging Face hub cache
/// (spec.md §6 "Model loading"), same loading shape as the teacher's
/// `EmbeddingModel`.
pub struct LocalEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
}

impl LocalEmbedder {
    pub fn load() -> CoreResult<Self> {
        let device = Device::Cpu;
        let api = Api::new().map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;
        let repo = api.repo(Repo::with_revision(MODEL_ID.to_string(), RepoType::Model, MODEL_REVISION.to_string()));

        let config_path = repo.get("config.json").map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;
        let tokenizer_path = repo.get("tokenizer.json").map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;
        let weights_path = repo.get("model.safetensors").map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;

        let config_str = std::fs::read_to_string(config_path).map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;
        let config: Config = serde_json::from_str(&config_str).map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;
        tokenizer.with_padding(Some(PaddingParams::default()));

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device).map_err(|e| CoreError::ModelLoad {
                model: MODEL_ID.to_string(),
                reason: e.to_string(),
            })?
        };
        let model = BertModel::load(vb, &config).map_err(|e| CoreError::ModelLoad {
            model: MODEL_ID.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self { model, tokenizer, device })
    }

    fn encode(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| CoreError::EmbeddingGeneration {
                context: "tokenize".to_string(),
                reason: e.to_string(),
            })?;

        let token_ids: Vec<Tensor> = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_ids(), &self.device))
            .collect::<candle_core::Result<_>>()
            .map_err(|e| CoreError::EmbeddingGeneration {
                context: "tokenize".to_string(),
                reason: e.to_string(),
            })?;
        let attention_mask: Vec<Tensor> = encodings
            .iter()
            .map(|enc| Tensor::new(enc.get_attention_mask(), &self.device))
            .collect::<candle_core::Result<_>>()
            .map_err(|e| CoreError::EmbeddingGeneration {
                context: "tokenize".to_string(),
                reason: e.to_string(),
            })?;

        let token_ids = Tensor::stack(&token_ids, 0).map_err(|e| CoreError::EmbeddingGeneration {
            context: "stack".to_string(),
            reason: e.to_string(),
        })?;
        let attention_mask = Tensor::stack(&attention_mask, 0).map_err(|e| CoreError::EmbeddingGeneration {
            context: "stack".to_string(),
            reason: e.to_string(),
        })?;
        let token_type_ids = token_ids.zeros_like().map_err(|e| CoreError::EmbeddingGeneration {
            context: "token_type_ids".to_string(),
            reason: e.to_string(),
        })?;

        let output = self
            .model
            .forward(&token_ids, &token_type_ids, Some(&attention_mask))
            .map_err(|e| CoreError::EmbeddingGeneration {
                context: "forward".to_string(),
                reason: e.to_string(),
            })?;

        // Mean pooling over the attention mask, then L2 normalize
        // (spec.md invariant 3), same shape as the teacher's approach.
        let mask = attention_mask
            .to_dtype(DType::F32)
            .map_err(|e| CoreError::EmbeddingGeneration { context: "mask".to_string(), reason: e.to_string() })?
            .unsqueeze(2)
            .map_err(|e| CoreError::EmbeddingGeneration { context: "mask".to_string(), reason: e.to_string() })?;
        let masked = output.broadcast_mul(&mask).map_err(|e| CoreError::EmbeddingGeneration {
            context: "pool".to_string(),
            reason: e.to_string(),
        })?;
        let summed = masked.sum(1).map_err(|e| CoreError::EmbeddingGeneration {
            context: "pool".to_string(),
            reason: e.to_string(),
        })?;
        let counts = mask.sum(1).map_err(|e| CoreError::EmbeddingGeneration {
            context: "pool".to_string(),
            reason: e.to_string(),
        })?;
        let pooled = summed.broadcast_div(&counts).map_err(|e| CoreError::EmbeddingGeneration {
            context: "pool".to_string(),
            reason: e.to_string(),
        })?;

        let norm = pooled
            .sqr()
            .and_then(|t| t.sum_keepdim(1))
            .and_then(|t| t.sqrt())
            .map_err(|e| CoreError::EmbeddingGeneration { context: "normalize".to_string(), reason: e.to_string() })?;
        let normalized = pooled.broadcast_div(&norm).map_err(|e| CoreError::EmbeddingGeneration {
            context: "normalize".to_string(),
            reason: e.to_string(),
        })?;

        let vecs: Vec<Vec<f32>> = normalized.to_vec2().map_err(|e| CoreError::EmbeddingGeneration {
            context: "extract".to_string(),
            reason: e.to_string(),
        })?;
        Ok(vecs)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    /// Per spec.md invariant 5: a batch-level failure falls back to
    /// per-item retries so one bad input doesn't sink the whole batch;
    /// an item that still fails gets a zero vector placeholder rather
    /// than aborting indexing.
    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        match self.encode(texts) {
            Ok(vecs) => Ok(vecs),
            Err(e) => {
                tracing::warn!(error = %e, "batch embedding failed, retrying items individually");
                let mut out = Vec::with_capacity(texts.len());
                for text in texts {
                    match self.encode(std::slice::from_ref(text)) {
                        Ok(mut v) => out.push(v.pop().unwrap_or_else(|| vec![0.0; crate::config::VECTOR_DIM])),
                        Err(item_err) => {
                            tracing::warn!(error = %item_err, "item embedding failed, using zero vector placeholder");
                            out.push(vec![0.0; crate::config::VECTOR_DIM]);
                        }
                    }
                }
                Ok(out)
            }
        }
    }
}

/// Documents longer than this are truncated before the instruction
/// prefix is applied (spec.md §6 "embed_document").
const MAX_DOCUMENT_CHARS: usize = 4 * 8192;

/// Prefixes the model expects for asymmetric search (spec.md §4.5, §6).
pub fn document_text(content: &str) -> String {
    let truncated: String = content.chars().take(MAX_DOCUMENT_CHARS).collect();
    format!("search_document: {truncated}")
}

pub fn query_text(query: &str) -> String {
    format!("search_query: {query}")
}
