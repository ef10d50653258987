//! The [`EmbeddingClient`] seam and cosine similarity.
//!
//! HTTP-backed clients live in the `helpdesk-agent` crate.

use anyhow::{bail, Result};
use async_trait::async_trait;

/// Turns text into fixed-dimension vectors.
///
/// One call embeds a whole batch; the returned vectors are in the same
/// order as `texts` and there is exactly one per input.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    fn model_name(&self) -> &str;
    /// Length of every returned vector. Sizes the vector collection.
    fn dims(&self) -> usize;
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text through a batch call of one.
pub async fn embed_one(client: &dyn EmbeddingClient, text: &str) -> Result<Vec<f32>> {
    let mut vectors = client.embed(&[text.to_string()]).await?;
    match vectors.len() {
        1 => Ok(vectors.remove(0)),
        n => bail!("Embedding client returned {} vectors for 1 input", n),
    }
}

/// Cosine of the angle between `a` and `b`, in `[-1.0, 1.0]`.
///
/// Mismatched lengths, empty input and zero vectors score `0.0`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (dot, aa, bb) = a
        .iter()
        .zip(b)
        .fold((0f32, 0f32, 0f32), |(dot, aa, bb), (x, y)| {
            (dot + x * y, aa + x * x, bb + y * y)
        });
    let magnitude = (aa * bb).sqrt();
    if magnitude < f32::EPSILON {
        0.0
    } else {
        dot / magnitude
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo(usize);

    #[async_trait]
    impl EmbeddingClient for Echo {
        fn model_name(&self) -> &str {
            "echo"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok((0..texts.len() * self.0)
                .map(|i| vec![i as f32, 1.0])
                .collect())
        }
    }

    #[tokio::test]
    async fn test_embed_one() {
        let v = embed_one(&Echo(1), "hello").await.unwrap();
        assert_eq!(v, vec![0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_embed_one_rejects_wrong_count() {
        let err = embed_one(&Echo(2), "hello").await.unwrap_err();
        assert!(err.to_string().contains("2 vectors"));
    }

    #[test]
    fn test_cosine_extremes() {
        let v = [0.3, 0.4, 1.2];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[2.0, 0.0], &[0.0, 5.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 1.0], &[-3.0, -3.0]) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
