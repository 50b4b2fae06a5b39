//! These tests download microsoft/codebert-base on first run.

use vulnlens_embed::{CodeBertEmbedder, EmbeddingConfig, EmbeddingProvider};

fn close(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-4)
}

#[tokio::test]
#[ignore = "requires network access to the Hugging Face Hub"]
async fn codebert_produces_768_dim_vectors() -> anyhow::Result<()> {
    let embedder = CodeBertEmbedder::new(EmbeddingConfig::cpu().with_batch_size(2)).await?;
    assert_eq!(embedder.dimension(), 768);
    assert!(!embedder.is_gpu());

    let empty = embedder.embed("").await?;
    assert_eq!(empty.dim(), 768);
    assert!(empty.as_slice().iter().all(|v| v.is_finite()));

    let snippet = "import os\nos.system(cmd)";
    let first = embedder.embed(snippet).await?;
    embedder.clear_cache();
    let second = embedder.embed(snippet).await?;
    assert!(close(first.as_slice(), second.as_slice()));
    Ok(())
}

#[tokio::test]
#[ignore = "requires network access to the Hugging Face Hub"]
async fn batching_does_not_change_vectors() -> anyhow::Result<()> {
    let embedder = CodeBertEmbedder::new(EmbeddingConfig::cpu().with_batch_size(8)).await?;
    embedder.clear_cache();

    let texts = vec![
        "x".to_string(),
        "eval(user_input)\nprint(result)".to_string(),
        "document.write(userInput)".to_string(),
    ];
    let batched = embedder.embed_batch(&texts).await?;
    embedder.clear_cache();

    for (text, vector) in texts.iter().zip(&batched) {
        embedder.clear_cache();
        let alone = embedder.embed(text).await?;
        assert!(close(alone.as_slice(), vector.as_slice()), "{text:?}");
    }
    Ok(())
}
