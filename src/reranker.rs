//! Optional cross-encoder reranking pass (spec.md §4.7, §6 "External
//! interfaces"). A `Reranker` failure is never fatal to search — the
//! orchestrator falls back to the unreranked candidate order.

use crate::error::{CoreError, CoreResult};
use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Linear, Module, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;

const MODEL_ID: &str = "cross-encoder/ms-marco-MiniLM-L-6-v2";
const MODEL_REVISION: &str = "main";

#[async_trait]
pub trait Reranker: Send + Sync {
    /// Scores each `(query, passage)` pair as a relevance probability in
    /// `0.0..=1.0`. Returns one score per input passage, same order.
    /// Callers are responsible for truncating `passage` to 512 characters
    /// before calling (spec.md §6).
    async fn rerank(&self, query: &str, passages: &[String]) -> CoreResult<Vec<f32>>;
}

pub struct LocalReranker {
    model: BertModel,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
}

impl LocalReranker {
    pub fn load() -> CoreResult<Self> {
        let device = Device::Cpu;
        let api = Api::new().map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;
        let repo = api.repo(Repo::with_revision(MODEL_ID.to_string(), RepoType::Model, MODEL_REVISION.to_string()));

        let config_path = repo.get("config.json").map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;
        let tokenizer_path = repo.get("tokenizer.json").map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;
        let weights_path = repo.get("model.safetensors").map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;

        let config_str = std::fs::read_to_string(config_path).map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;
        let config: Config = serde_json::from_str(&config_str).map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?
        };
        let model = BertModel::load(vb.pp("bert"), &config).map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;
        let classifier = candle_nn::linear(config.hidden_size, 1, vb.pp("classifier"))
            .map_err(|e| CoreError::ModelLoad { model: MODEL_ID.to_string(), reason: e.to_string() })?;

        Ok(Self { model, classifier, tokenizer, device })
    }

    fn score_pair(&self, query: &str, passage: &str) -> CoreResult<f32> {
        let encoding = self
            .tokenizer
            .encode((query.to_string(), passage.to_string()), true)
            .map_err(|e| CoreError::EmbeddingGeneration { context: "rerank tokenize".to_string(), reason: e.to_string() })?;

        let ids = Tensor::new(encoding.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| CoreError::EmbeddingGeneration { context: "rerank tensor".to_string(), reason: e.to_string() })?;
        let mask = Tensor::new(encoding.get_attention_mask(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(|e| CoreError::EmbeddingGeneration { context: "rerank tensor".to_string(), reason: e.to_string() })?;
        let type_ids = ids.zeros_like().map_err(|e| CoreError::EmbeddingGeneration { context: "rerank tensor".to_string(), reason: e.to_string() })?;

        let hidden = self
            .model
            .forward(&ids, &type_ids, Some(&mask))
            .map_err(|e| CoreError::EmbeddingGeneration { context: "rerank forward".to_string(), reason: e.to_string() })?;
        let cls = hidden.i((.., 0, ..)).map_err(|e| CoreError::EmbeddingGeneration { context: "rerank cls".to_string(), reason: e.to_string() })?;
        let logits = self
            .classifier
            .forward(&cls)
            .map_err(|e| CoreError::EmbeddingGeneration { context: "rerank classifier".to_string(), reason: e.to_string() })?;
        let logit: f32 = logits
            .to_dtype(DType::F32)
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1())
            .map_err(|e| CoreError::EmbeddingGeneration { context: "rerank extract".to_string(), reason: e.to_string() })?
            .into_iter()
            .next()
            .unwrap_or(0.0);
        // The classifier head emits a raw logit; spec.md §6 calls for "the
        // relevance label's probability", so squash it with a sigmoid.
        Ok(1.0 / (1.0 + (-logit).exp()))
    }
}

use candle_core::IndexOp;

#[async_trait]
impl Reranker for LocalReranker {
    async fn rerank(&self, query: &str, passages: &[String]) -> CoreResult<Vec<f32>> {
        let mut scores = Vec::with_capacity(passages.len());
        for passage in passages {
            scores.push(self.score_pair(query, passage)?);
        }
        Ok(scores)
    }
}
