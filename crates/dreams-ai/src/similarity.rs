use std::cmp::Ordering;

use dreams_core::DreamEntry;
use serde::Serialize;
use thiserror::Error;

use crate::embeddings::{EmbeddingError, EmbeddingProvider};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;

/// A vector pair cosine similarity is undefined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DegenerateVector {
    #[error("vector has zero norm")]
    ZeroNorm,
    #[error("vector contains a non-finite component")]
    NonFinite,
    #[error("vector dimensions differ ({left} vs {right})")]
    DimensionMismatch { left: usize, right: usize },
}

/// Cosine similarity in `[-1, 1]`, accumulated in `f64`.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32, DegenerateVector> {
    if a.len() != b.len() {
        return Err(DegenerateVector::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if !(dot.is_finite() && norm_a.is_finite() && norm_b.is_finite()) {
        return Err(DegenerateVector::NonFinite);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(DegenerateVector::ZeroNorm);
    }

    let similarity = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(similarity.clamp(-1.0, 1.0) as f32)
}

/// [`cosine_similarity`], treating degenerate input as "unrelated".
pub fn similarity_or_zero(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).unwrap_or_else(|err| {
        tracing::trace!(target: "dreams.ai", %err, "degenerate vector scored as 0");
        0.0
    })
}

/// Indices of `candidates` with their similarity to `query`, best first.
///
/// Equal scores keep their candidate order.
pub fn rank(query: &[f32], candidates: &[Vec<f32>], limit: usize) -> Vec<(usize, f32)> {
    let mut scored: Vec<(usize, f32)> = candidates
        .iter()
        .enumerate()
        .map(|(idx, candidate)| (idx, similarity_or_zero(query, candidate)))
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    scored.truncate(limit);
    scored
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub dream: DreamEntry,
    pub score: f32,
}

/// Rank `dreams` by similarity of their canonical text to `query`.
///
/// Embeddings are computed fresh for every call.
pub fn search_dreams(
    provider: &EmbeddingProvider,
    query: &str,
    dreams: &[DreamEntry],
    limit: usize,
) -> Result<Vec<SearchHit>, EmbeddingError> {
    if dreams.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let query_vector = provider.encode_one(query)?;
    let texts: Vec<String> = dreams.iter().map(DreamEntry::canonical_text).collect();
    let vectors = provider.encode_batch(&texts)?;

    Ok(rank(&query_vector, &vectors, limit)
        .into_iter()
        .map(|(idx, score)| SearchHit {
            dream: dreams[idx].clone(),
            score,
        })
        .collect())
}
