//! Local sentence-transformer embeddings via candle.
//!
//! Enabled with the `local-embeddings` feature. Runs a BERT-family model on
//! CPU, so grading can proceed without an embedding endpoint.

use super::embeddings::Embedder;
use crate::error::{GraderError, Result};
use anyhow::Context;
use async_trait::async_trait;
use candle_core::{Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::sync::Arc;
use tokenizers::tokenizer::{Tokenizer, TruncationDirection, TruncationParams, TruncationStrategy};

pub const DEFAULT_LOCAL_MODEL: &str = "sentence-transformers/all-MiniLM-L6-v2";

struct BertEncoder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    hidden_size: usize,
}

/// Mean-pooled, L2-normalized sentence embeddings.
#[derive(Clone)]
pub struct LocalEmbedder {
    encoder: Arc<BertEncoder>,
    model_id: String,
}

impl LocalEmbedder {
    /// Download (or reuse from the HF cache) and load `model_id`.
    pub fn load(model_id: &str) -> Result<Self> {
        let encoder = BertEncoder::load(model_id)
            .map_err(|e| GraderError::Embedding(format!("{model_id}: {e:#}")))?;
        tracing::info!(model = model_id, dimension = encoder.hidden_size, "local embedder ready");
        Ok(Self {
            encoder: Arc::new(encoder),
            model_id: model_id.to_string(),
        })
    }

    pub fn load_default() -> Result<Self> {
        Self::load(DEFAULT_LOCAL_MODEL)
    }
}

/// Cut encodings at the model's position limit; longer inputs would index
/// past the position embedding table.
fn limit_sequence_length(tokenizer: &mut Tokenizer, max_positions: usize) -> anyhow::Result<()> {
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_positions,
            stride: 0,
            strategy: TruncationStrategy::LongestFirst,
            direction: TruncationDirection::Right,
        }))
        .map_err(|e| anyhow::anyhow!("Failed to configure tokenizer truncation: {}", e))?;
    Ok(())
}

impl BertEncoder {
    fn load(model_id: &str) -> anyhow::Result<Self> {
        let device = Device::Cpu;

        let api = Api::new().context("Failed to create HF Hub API")?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

        let config_path = repo.get("config.json").context("Failed to get config.json")?;
        let tokenizer_path = repo
            .get("tokenizer.json")
            .context("Failed to get tokenizer.json")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("Failed to get model weights")?;

        let config: BertConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)
            .context("Failed to parse model config")?;
        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;
        limit_sequence_length(&mut tokenizer, config.max_position_embeddings)?;

        // Safety: the weights file is not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)? };
        let model = BertModel::load(vb, &config).context("Failed to load BERT model")?;

        Ok(Self {
            model,
            tokenizer,
            device,
            hidden_size: config.hidden_size,
        })
    }

    fn encode(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);
        let batch = texts.len();

        let mut ids = Vec::with_capacity(batch * max_len);
        let mut mask = Vec::with_capacity(batch * max_len);
        for encoding in &encodings {
            let mut row_ids = encoding.get_ids().to_vec();
            let mut row_mask = encoding.get_attention_mask().to_vec();
            row_ids.resize(max_len, 0);
            row_mask.resize(max_len, 0);
            ids.extend(row_ids);
            mask.extend(row_mask);
        }

        let input_ids = Tensor::from_vec(ids, (batch, max_len), &self.device)?;
        let attention_mask = Tensor::from_vec(mask, (batch, max_len), &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        let mask = attention_mask
            .unsqueeze(2)?
            .to_dtype(output.dtype())?
            .broadcast_as(output.shape())?;
        let summed = (output * &mask)?.sum(1)?;
        let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
        let pooled = (summed / counts)?;

        let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
        let normalized = pooled.broadcast_div(&norms)?;

        Ok(normalized.to_vec2::<f32>()?)
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let encoder = Arc::clone(&self.encoder);
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || encoder.encode(&texts))
            .await
            .map_err(|e| GraderError::Embedding(format!("embedding task failed: {e}")))?
            .map_err(|e| GraderError::Embedding(format!("{e:#}")))
    }

    fn dimension(&self) -> usize {
        self.encoder.hidden_size
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}
