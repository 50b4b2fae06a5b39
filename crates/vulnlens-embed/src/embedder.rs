//! CodeBERT embedder using Candle.

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Activation, VarBuilder};
use candle_transformers::models::bert::{BertModel, Config, HiddenAct, PositionEmbeddingType};
use candle_transformers::models::xlm_roberta::{Config as RobertaConfig, XLMRobertaModel};
use hf_hub::api::sync::ApiBuilder;
use hf_hub::{Repo, RepoType};
use lru::LruCache;
use tokenizers::models::bpe::BPE;
use tokenizers::pre_tokenizers::byte_level::ByteLevel;
use tokenizers::processors::roberta::RobertaProcessing;
use tokenizers::Tokenizer;
use tracing::{debug, info};
use vulnlens_common::EmbeddingVector;

use crate::pooling::{l2_normalize, mean_pool};
use crate::{EmbedError, EmbeddingConfig, EmbeddingProvider, Result};

enum TokenizerFiles {
    Json(PathBuf),
    /// RoBERTa-style byte-level BPE (`vocab.json` + `merges.txt`), as shipped by codebert-base.
    Bpe { vocab: PathBuf, merges: PathBuf },
}

struct ModelFiles {
    config: PathBuf,
    tokenizer: TokenizerFiles,
    weights: PathBuf,
}

/// Transformer body. RoBERTa checkpoints number positions from
/// `padding_idx + 1` and skip pads, which `BertModel` does not do.
enum EncoderModel {
    Bert(BertModel),
    Roberta(XLMRobertaModel),
}

impl EncoderModel {
    fn load(vb: VarBuilder, config: &Config) -> candle_core::Result<Self> {
        if uses_roberta_positions(config) {
            let roberta = roberta_config(config);
            XLMRobertaModel::new(&roberta, vb.clone())
                .or_else(|_| XLMRobertaModel::new(&roberta, vb.pp("roberta")))
                .map(Self::Roberta)
        } else {
            BertModel::load(vb.clone(), config)
                .or_else(|_| BertModel::load(vb.pp("bert"), config))
                .map(Self::Bert)
        }
    }

    fn forward(&self, input_ids: &Tensor, token_type_ids: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
        match self {
            Self::Bert(model) => model.forward(input_ids, token_type_ids, Some(attention_mask)),
            Self::Roberta(model) => model.forward(input_ids, attention_mask, token_type_ids, None, None, None),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Bert(_) => "bert",
            Self::Roberta(_) => "roberta",
        }
    }
}

/// Loaded model state. Immutable after construction and shared by every
/// blocking worker that runs a forward pass.
struct Encoder {
    model: EncoderModel,
    tokenizer: Tokenizer,
    device: Device,
    max_length: usize,
    pad_id: u32,
    hidden_size: usize,
    normalize: bool,
}

/// CodeBERT embedder for source snippets.
///
/// Loads the encoder once (from the Hugging Face Hub or a local directory)
/// and serves any number of concurrent callers. Each forward pass runs on
/// tokio's blocking pool.
pub struct CodeBertEmbedder {
    encoder: Arc<Encoder>,
    config: EmbeddingConfig,
    cache: Option<Mutex<LruCache<String, EmbeddingVector>>>,
}

impl CodeBertEmbedder {
    /// Load the encoder described by `config`.
    pub async fn new(config: EmbeddingConfig) -> Result<Self> {
        let start = Instant::now();
        info!("Loading embedding model: {}", config.model_id);

        let device = Self::select_device(&config)?;
        debug!("Using device: {:?}", device);

        let load_config = config.clone();
        let encoder = tokio::task::spawn_blocking(move || {
            let files = Self::fetch_files(&load_config)?;
            Encoder::load(&files, device, &load_config)
        })
        .await
        .map_err(|e| EmbedError::ModelLoad(e.to_string()))??;

        info!(
            "Model loaded in {:.2}s (hidden size {}, max {} tokens)",
            start.elapsed().as_secs_f32(),
            encoder.hidden_size,
            encoder.max_length
        );

        let cache = NonZeroUsize::new(config.cache_size).map(|n| Mutex::new(LruCache::new(n)));

        Ok(Self {
            encoder: Arc::new(encoder),
            config,
            cache,
        })
    }

    /// Select the best available device.
    fn select_device(config: &EmbeddingConfig) -> Result<Device> {
        if !config.use_gpu {
            return Ok(Device::Cpu);
        }

        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => {
                    info!("CUDA device available");
                    return Ok(device);
                }
                Err(e) => {
                    debug!("CUDA not available: {}, falling back to CPU", e);
                }
            }
        }

        #[cfg(feature = "metal")]
        {
            match Device::new_metal(0) {
                Ok(device) => {
                    info!("Metal device available");
                    return Ok(device);
                }
                Err(e) => {
                    debug!("Metal not available: {}, falling back to CPU", e);
                }
            }
        }

        Ok(Device::Cpu)
    }

    /// Resolve model files locally or through the Hub (blocking).
    fn fetch_files(config: &EmbeddingConfig) -> Result<ModelFiles> {
        if let Some(dir) = &config.local_dir {
            let dir = Path::new(dir);
            info!("Loading model files from {}", dir.display());
            let tokenizer = if dir.join("tokenizer.json").is_file() {
                TokenizerFiles::Json(dir.join("tokenizer.json"))
            } else {
                TokenizerFiles::Bpe {
                    vocab: dir.join("vocab.json"),
                    merges: dir.join("merges.txt"),
                }
            };
            let weights = ["model.safetensors", "pytorch_model.bin"]
                .iter()
                .map(|name| dir.join(name))
                .find(|path| path.is_file())
                .ok_or_else(|| EmbedError::ModelLoad(format!("no model weights in {}", dir.display())))?;
            return Ok(ModelFiles {
                config: dir.join("config.json"),
                tokenizer,
                weights,
            });
        }

        let mut builder = ApiBuilder::new();
        if let Some(cache_dir) = &config.cache_dir {
            builder = builder.with_cache_dir(PathBuf::from(cache_dir));
        }
        let api = builder
            .build()
            .map_err(|e| EmbedError::Download(format!("API init: {}", e)))?;
        let api_repo = api.repo(Repo::new(config.model_id.clone(), RepoType::Model));

        info!("Downloading config.json...");
        let config_path = api_repo
            .get("config.json")
            .map_err(|e| EmbedError::Download(format!("config.json: {}", e)))?;

        info!("Downloading tokenizer...");
        let tokenizer = match api_repo.get("tokenizer.json") {
            Ok(path) => TokenizerFiles::Json(path),
            Err(_) => {
                info!("tokenizer.json not found, building byte-level BPE from vocab.json + merges.txt");
                TokenizerFiles::Bpe {
                    vocab: api_repo.get("vocab.json")?,
                    merges: api_repo.get("merges.txt")?,
                }
            }
        };

        info!("Downloading model weights...");
        let weights = api_repo
            .get("model.safetensors")
            .or_else(|_| api_repo.get("pytorch_model.bin"))
            .map_err(|e| EmbedError::Download(format!("model weights: {}", e)))?;
        debug!("Weights at: {:?}", weights);

        Ok(ModelFiles {
            config: config_path,
            tokenizer,
            weights,
        })
    }

    /// Get the model name.
    pub fn model_name(&self) -> &str {
        &self.config.model_id
    }

    /// Check if GPU is being used.
    pub fn is_gpu(&self) -> bool {
        matches!(self.encoder.device, Device::Cuda(_) | Device::Metal(_))
    }

    /// Clear the embedding cache.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.cache {
            if let Ok(mut guard) = cache.lock() {
                guard.clear();
            }
        }
    }

    fn lock_cache<'a>(
        cache: &'a Mutex<LruCache<String, EmbeddingVector>>,
    ) -> Result<MutexGuard<'a, LruCache<String, EmbeddingVector>>> {
        cache
            .lock()
            .map_err(|_| EmbedError::Inference("embedding cache lock poisoned".to_string()))
    }
}

#[async_trait]
impl EmbeddingProvider for CodeBertEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut slots: Vec<Option<EmbeddingVector>> = vec![None; texts.len()];
        let mut uncached = Vec::new();

        match &self.cache {
            Some(cache) => {
                let mut guard = Self::lock_cache(cache)?;
                for (i, text) in texts.iter().enumerate() {
                    match guard.get(text) {
                        Some(hit) => slots[i] = Some(hit.clone()),
                        None => uncached.push(i),
                    }
                }
            }
            None => uncached.extend(0..texts.len()),
        }

        for chunk in uncached.chunks(self.config.batch_size.max(1)) {
            let batch: Vec<String> = chunk.iter().map(|&i| texts[i].clone()).collect();
            let encoder = Arc::clone(&self.encoder);
            let (batch, vectors) = tokio::task::spawn_blocking(move || {
                let vectors = encoder.forward(&batch);
                (batch, vectors)
            })
            .await
            .map_err(|e| EmbedError::Inference(format!("embedding worker: {}", e)))?;
            let vectors = vectors?;

            if vectors.len() != batch.len() {
                return Err(EmbedError::Inference(format!(
                    "expected {} embeddings, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }

            if let Some(cache) = &self.cache {
                let mut guard = Self::lock_cache(cache)?;
                for (text, vector) in batch.iter().zip(&vectors) {
                    guard.put(text.clone(), EmbeddingVector::new(vector.clone()));
                }
            }

            for (&i, vector) in chunk.iter().zip(vectors) {
                slots[i] = Some(EmbeddingVector::new(vector));
            }
        }

        debug!(
            "Embedded {} snippets ({} cached) in {:.2}ms",
            texts.len(),
            texts.len() - uncached.len(),
            start.elapsed().as_secs_f32() * 1000.0
        );

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| EmbedError::Inference("missing embedding".to_string())))
            .collect()
    }

    fn dimension(&self) -> usize {
        self.encoder.hidden_size
    }

    fn model_name(&self) -> &str {
        &self.config.model_id
    }
}

impl Encoder {
    fn load(files: &ModelFiles, device: Device, config: &EmbeddingConfig) -> Result<Self> {
        let bert_config = load_config(&files.config)?;
        let tokenizer = load_tokenizer(&files.tokenizer)?;

        info!("Model files resolved, loading weights into memory...");
        let vb = if files.weights.extension().map(|e| e == "safetensors").unwrap_or(false) {
            // SAFETY: the weights file is not modified while mapped.
            unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)? }
        } else {
            VarBuilder::from_pth(&files.weights, DType::F32, &device)?
        };

        let model = EncoderModel::load(vb, &bert_config)
            .map_err(|e| EmbedError::ModelLoad(format!("encoder: {}", e)))?;
        debug!("Encoder architecture: {}", model.kind());

        let max_length = config.max_length.min(position_limit(&bert_config)).max(2);

        Ok(Self {
            model,
            tokenizer,
            device,
            max_length,
            pad_id: bert_config.pad_token_id as u32,
            hidden_size: bert_config.hidden_size,
            normalize: config.normalize,
        })
    }

    /// One forward pass over a batch (blocking).
    fn forward(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let text_refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let encodings = self
            .tokenizer
            .encode_batch(text_refs, true)
            .map_err(|e| EmbedError::Tokenizer(e.to_string()))?;

        let rows: Vec<Vec<u32>> = encodings
            .iter()
            .map(|enc| select_tokens(enc.get_ids(), enc.get_attention_mask(), self.max_length, self.pad_id))
            .collect();
        let packed = pack_rows(&rows, self.pad_id);

        let input_ids = Tensor::from_vec(packed.input_ids, (packed.batch, packed.width), &self.device)?;
        let attention_mask = Tensor::from_vec(packed.attention_mask, (packed.batch, packed.width), &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;

        let hidden = self.model.forward(&input_ids, &token_type_ids, &attention_mask)?;
        let pooled = mean_pool(&hidden, &attention_mask)?;
        let pooled = if self.normalize { l2_normalize(&pooled)? } else { pooled };

        Ok(pooled.to_vec2::<f32>()?)
    }
}

/// Load encoder config, handling both BERT and RoBERTa style `config.json`.
fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let json: serde_json::Value = serde_json::from_str(&content)?;

    let hidden_act = match json.get("hidden_act").and_then(|v| v.as_str()) {
        Some("gelu") => HiddenAct::Gelu,
        Some("relu") => HiddenAct::Relu,
        Some("gelu_new") | Some("gelu_approximate") => HiddenAct::GeluApproximate,
        _ => HiddenAct::Gelu,
    };

    let uint = |key: &str, default: u64| json.get(key).and_then(|v| v.as_u64()).unwrap_or(default) as usize;
    let float = |key: &str, default: f64| json.get(key).and_then(|v| v.as_f64()).unwrap_or(default);

    Ok(Config {
        vocab_size: uint("vocab_size", 50265),
        hidden_size: uint("hidden_size", 768),
        num_hidden_layers: uint("num_hidden_layers", 12),
        num_attention_heads: uint("num_attention_heads", 12),
        intermediate_size: uint("intermediate_size", 3072),
        hidden_act,
        hidden_dropout_prob: float("hidden_dropout_prob", 0.1),
        max_position_embeddings: uint("max_position_embeddings", 514),
        type_vocab_size: uint("type_vocab_size", 1),
        initializer_range: float("initializer_range", 0.02),
        layer_norm_eps: float("layer_norm_eps", 1e-5),
        pad_token_id: uint("pad_token_id", 1),
        position_embedding_type: PositionEmbeddingType::Absolute,
        use_cache: true,
        classifier_dropout: None,
        model_type: json.get("model_type").and_then(|v| v.as_str()).map(str::to_string),
    })
}

fn uses_roberta_positions(config: &Config) -> bool {
    matches!(
        config.model_type.as_deref(),
        Some("roberta") | Some("xlm-roberta") | Some("camembert")
    )
}

/// Longest token row the position table can index.
fn position_limit(config: &Config) -> usize {
    if uses_roberta_positions(config) {
        config
            .max_position_embeddings
            .saturating_sub(config.pad_token_id + 1)
    } else {
        config.max_position_embeddings
    }
}

fn roberta_config(config: &Config) -> RobertaConfig {
    RobertaConfig {
        hidden_size: config.hidden_size,
        layer_norm_eps: config.layer_norm_eps,
        // Dropout is inactive at inference.
        attention_probs_dropout_prob: config.hidden_dropout_prob as f32,
        hidden_dropout_prob: config.hidden_dropout_prob as f32,
        num_attention_heads: config.num_attention_heads,
        position_embedding_type: "absolute".to_string(),
        intermediate_size: config.intermediate_size,
        hidden_act: match config.hidden_act {
            HiddenAct::Gelu => Activation::Gelu,
            HiddenAct::GeluApproximate => Activation::NewGelu,
            HiddenAct::Relu => Activation::Relu,
        },
        num_hidden_layers: config.num_hidden_layers,
        vocab_size: config.vocab_size,
        max_position_embeddings: config.max_position_embeddings,
        type_vocab_size: config.type_vocab_size,
        pad_token_id: config.pad_token_id as u32,
    }
}

fn load_tokenizer(files: &TokenizerFiles) -> Result<Tokenizer> {
    match files {
        TokenizerFiles::Json(path) => {
            Tokenizer::from_file(path).map_err(|e| EmbedError::Tokenizer(e.to_string()))
        }
        TokenizerFiles::Bpe { vocab, merges } => {
            let bpe = BPE::from_file(&vocab.to_string_lossy(), &merges.to_string_lossy())
                .build()
                .map_err(|e| EmbedError::Tokenizer(format!("BPE build: {}", e)))?;
            let mut tokenizer = Tokenizer::new(bpe);

            let special = |token: &str| {
                tokenizer
                    .token_to_id(token)
                    .ok_or_else(|| EmbedError::Tokenizer(format!("{} missing from vocab", token)))
            };
            let cls = special("<s>")?;
            let sep = special("</s>")?;

            tokenizer
                .with_pre_tokenizer(Some(ByteLevel::new(false, true, true)))
                .with_post_processor(Some(RobertaProcessing::new(
                    ("</s>".to_string(), sep),
                    ("<s>".to_string(), cls),
                )));
            Ok(tokenizer)
        }
    }
}

/// Real (unpadded) tokens of one encoding, truncated to `max_length`.
///
/// Truncation keeps the final special token, as the Python tokenizers do.
/// An encoding with no tokens becomes a single pad token so that it still
/// pools to a well-defined vector.
fn select_tokens(ids: &[u32], mask: &[u32], max_length: usize, pad_id: u32) -> Vec<u32> {
    let real: Vec<u32> = ids
        .iter()
        .zip(mask)
        .filter(|(_, &m)| m != 0)
        .map(|(&id, _)| id)
        .collect();

    match real.len() {
        0 => vec![pad_id],
        n if n <= max_length => real,
        n => {
            let mut row = real[..max_length - 1].to_vec();
            row.push(real[n - 1]);
            row
        }
    }
}

struct PackedBatch {
    input_ids: Vec<u32>,
    attention_mask: Vec<f32>,
    batch: usize,
    width: usize,
}

/// Right-pad rows to a common width with a matching attention mask.
fn pack_rows(rows: &[Vec<u32>], pad_id: u32) -> PackedBatch {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0).max(1);
    let mut input_ids = Vec::with_capacity(rows.len() * width);
    let mut attention_mask = Vec::with_capacity(rows.len() * width);

    for row in rows {
        let pad = width - row.len();
        input_ids.extend_from_slice(row);
        input_ids.extend(std::iter::repeat_n(pad_id, pad));
        attention_mask.extend(std::iter::repeat_n(1.0f32, row.len()));
        attention_mask.extend(std::iter::repeat_n(0.0f32, pad));
    }

    PackedBatch {
        input_ids,
        attention_mask,
        batch: rows.len(),
        width,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_tokens_drops_tokenizer_padding() {
        let row = select_tokens(&[0, 10, 11, 2, 1, 1], &[1, 1, 1, 1, 0, 0], 512, 1);
        assert_eq!(row, vec![0, 10, 11, 2]);
    }

    #[test]
    fn test_select_tokens_truncation_keeps_final_special() {
        let row = select_tokens(&[0, 10, 11, 12, 13, 2], &[1; 6], 4, 1);
        assert_eq!(row, vec![0, 10, 11, 2]);
    }

    #[test]
    fn test_select_tokens_empty_becomes_pad() {
        assert_eq!(select_tokens(&[], &[], 512, 1), vec![1]);
    }

    #[test]
    fn test_pack_rows() {
        let packed = pack_rows(&[vec![0, 5, 2], vec![0, 2]], 1);
        assert_eq!(packed.batch, 2);
        assert_eq!(packed.width, 3);
        assert_eq!(packed.input_ids, vec![0, 5, 2, 0, 2, 1]);
        assert_eq!(packed.attention_mask, vec![1.0, 1.0, 1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn test_load_config_reads_roberta_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"model_type": "roberta", "pad_token_id": 1, "layer_norm_eps": 1e-05,
                "max_position_embeddings": 514, "type_vocab_size": 1, "hidden_size": 768}"#,
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.model_type.as_deref(), Some("roberta"));
        assert_eq!(cfg.pad_token_id, 1);
        assert_eq!(cfg.max_position_embeddings, 514);
        assert!(matches!(cfg.hidden_act, HiddenAct::Gelu));
    }

    #[test]
    fn test_roberta_checkpoints_get_padding_aware_positions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        std::fs::write(&path, r#"{"model_type": "roberta", "pad_token_id": 1, "hidden_act": "gelu_new"}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(uses_roberta_positions(&cfg));
        let roberta = roberta_config(&cfg);
        assert_eq!(roberta.pad_token_id, 1);
        assert_eq!(roberta.max_position_embeddings, 514);
        assert!(matches!(roberta.hidden_act, Activation::NewGelu));
        assert_eq!(position_limit(&cfg), 512);

        std::fs::write(&path, r#"{"model_type": "bert", "pad_token_id": 0}"#).unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(!uses_roberta_positions(&cfg));
        assert_eq!(position_limit(&cfg), 514);
    }
}
