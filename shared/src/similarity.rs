//! Embedding comparison for lost/found identity matching.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Length of the multimodal image embeddings the matching flow uses.
pub const EMBEDDING_DIMENSIONS: usize = 1408;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimilarityError {
    #[error("dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("zero-norm embedding")]
    ZeroVector,

    #[error("embedding contains non-finite values")]
    NonFinite,
}

/// Cosine similarity in `[-1, 1]`.
///
/// # Errors
///
/// `DimensionMismatch` for unequal lengths, `ZeroVector` if either vector has
/// zero norm (including empty vectors), `NonFinite` for NaN or infinite
/// components.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, SimilarityError> {
    if a.len() != b.len() {
        return Err(SimilarityError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if !dot.is_finite() || !norm_a.is_finite() || !norm_b.is_finite() {
        return Err(SimilarityError::NonFinite);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(SimilarityError::ZeroVector);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// # Errors
///
/// Same as [`cosine_similarity`].
pub fn is_match(a: &[f32], b: &[f32], threshold: f32) -> Result<bool, SimilarityError> {
    Ok(cosine_similarity(a, b)? >= threshold)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedMatch<I> {
    pub id: I,
    pub similarity: f32,
}

/// Scores every candidate against `query` and returns those at or above
/// `threshold`, best first, at most `limit` of them.
///
/// Candidates that cannot be compared (wrong length, zero vector) are
/// skipped; only a bad query is an error.
///
/// # Errors
///
/// `ZeroVector` or `NonFinite` if `query` itself is degenerate.
pub fn rank_matches<'a, I, C>(
    query: &[f32],
    candidates: C,
    threshold: f32,
    limit: usize,
) -> Result<Vec<RankedMatch<I>>, SimilarityError>
where
    I: std::fmt::Debug,
    C: IntoIterator<Item = (I, &'a [f32])>,
{
    cosine_similarity(query, query)?;

    let mut matches: Vec<RankedMatch<I>> = candidates
        .into_iter()
        .filter_map(|(id, embedding)| {
            let result = cosine_similarity(query, embedding);
            if let Err(e) = &result {
                warn!(candidate = ?id, error = %e, "skipping candidate embedding");
            }
            result.ok().map(|similarity| RankedMatch { id, similarity })
        })
        .filter(|m| m.similarity >= threshold)
        .collect();

    matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    matches.truncate(limit);
    Ok(matches)
}
