//! The seam between the analysis engine and whatever turns text into vectors.

use async_trait::async_trait;
use vulnlens_common::EmbeddingVector;

use crate::{EmbedError, Result};

/// Turns normalized snippets into fixed-length vectors.
///
/// Implementations are shared read-only across concurrent requests and must
/// be deterministic: the same text always yields the same vector, whether it
/// is embedded alone or as part of a batch.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch; output order matches input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<EmbeddingVector>>;

    /// Embed one snippet.
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::InvalidInput("No embedding produced".to_string()))
    }

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    /// Identifier recorded in trained artifacts.
    fn model_name(&self) -> &str;
}
