//! Reduction of token-level hidden states to one vector per snippet.

use candle_core::Tensor;

/// Mean pooling over non-padding tokens.
///
/// * `embeddings` - Tensor of shape (batch_size, seq_len, hidden_dim)
/// * `attention_mask` - F32 tensor of shape (batch_size, seq_len)
///
/// Returns a tensor of shape (batch_size, hidden_dim). Padding positions are
/// zeroed before summing and excluded from the divisor, so a snippet pools to
/// the same vector whatever it was batched with.
pub fn mean_pool(embeddings: &Tensor, attention_mask: &Tensor) -> candle_core::Result<Tensor> {
    // Expand mask to match embedding dimensions: (batch, seq_len, hidden_dim)
    let mask_expanded = attention_mask
        .unsqueeze(2)?
        .expand(embeddings.shape())?;

    let sum_embeddings = (embeddings * &mask_expanded)?.sum(1)?;

    // Clamp to avoid division by zero on an all-padding row
    let sum_mask = attention_mask
        .unsqueeze(2)?
        .sum(1)?
        .clamp(1e-9f32, f32::MAX)?;

    sum_embeddings.broadcast_div(&sum_mask)
}

/// L2 normalize embeddings of shape (batch, hidden_dim).
pub fn l2_normalize(embeddings: &Tensor) -> candle_core::Result<Tensor> {
    let norms = embeddings.sqr()?.sum_keepdim(1)?.sqrt()?;
    let norms_clamped = norms.clamp(1e-9f32, f32::MAX)?;
    embeddings.broadcast_div(&norms_clamped)
}
