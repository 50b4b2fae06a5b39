//! VulnLens Embedding Service
//!
//! Pure Rust CodeBERT embeddings using Candle (Hugging Face).
//! No Python dependency - direct model loading from Hugging Face Hub.
//!
//! # Features
//! - 768-dim embeddings from microsoft/codebert-base
//! - Mean pooling over unpadded tokens, so batching never changes a snippet's vector
//! - GPU support (CUDA, Metal) with automatic fallback to CPU
//! - Forward passes run on the blocking worker pool
//!
//! # Example
//! ```rust,no_run
//! use vulnlens_embed::{CodeBertEmbedder, EmbeddingConfig, EmbeddingProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let embedder = CodeBertEmbedder::new(EmbeddingConfig::default()).await?;
//!
//!     let vector = embedder.embed("os.system(cmd)").await?;
//!     println!("Embedding dimension: {}", vector.dim()); // 768
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod embedder;
pub mod error;
pub mod pooling;
pub mod provider;

pub use config::EmbeddingConfig;
pub use embedder::CodeBertEmbedder;
pub use error::{EmbedError, Result};
pub use provider::EmbeddingProvider;
