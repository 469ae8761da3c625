//! 3D layout of dreams for visualization.
//!
//! Embeddings are reduced with PCA. The principal components come from the
//! eigendecomposition of the `n x n` Gram matrix of the centered embeddings,
//! which stays small because layout batches are small while embedding
//! dimensions are not.

use dreams_core::{DreamCategory, DreamEntry};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use thiserror::Error;

use crate::embeddings::{EmbeddingError, EmbeddingProvider};

pub const DEFAULT_RADIUS: f64 = 20.0;

/// Random fallback coordinates are drawn from `[-FALLBACK_SPREAD, FALLBACK_SPREAD]`.
const FALLBACK_SPREAD: f64 = 10.0;
/// Below this maximum norm a batch is considered collapsed and left unscaled.
const NORM_FLOOR: f64 = 1e-9;
const MAX_JACOBI_SWEEPS: usize = 100;
const JACOBI_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ReductionError {
    #[error("embedding contains a non-finite component")]
    NonFinite,
    #[error("embedding dimensions differ ({expected} vs {got})")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("eigendecomposition did not converge")]
    NoConvergence,
}

/// How the coordinates of a [`Projection`] were produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LayoutMode {
    /// Principal components of the embeddings.
    Pca,
    /// Zero or one record; nothing to reduce.
    Trivial,
    /// PCA failed numerically; coordinates are random.
    Fallback { reason: String },
    /// No embedding model; coordinates are random.
    Degraded { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedPoint {
    pub id: String,
    pub title: String,
    pub category: DreamCategory,
    pub completed: bool,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ProjectedPoint {
    fn new(dream: &DreamEntry, [x, y, z]: [f64; 3]) -> Self {
        Self {
            id: dream.id.clone(),
            title: dream.title.clone(),
            category: dream.category,
            completed: dream.completed,
            x,
            y,
            z,
        }
    }

    pub fn norm(&self) -> f64 {
        norm(&[self.x, self.y, self.z])
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Projection {
    pub mode: LayoutMode,
    pub points: Vec<ProjectedPoint>,
}

#[derive(Debug, Clone)]
pub struct SpatialProjector {
    radius: f64,
    seed: Option<u64>,
}

impl Default for SpatialProjector {
    fn default() -> Self {
        Self::new(DEFAULT_RADIUS)
    }
}

impl SpatialProjector {
    pub fn new(radius: f64) -> Self {
        Self { radius, seed: None }
    }

    /// Make the random fallback reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Lay out `dreams` in a ball of [`Self::radius`].
    ///
    /// An unavailable embedding model is not an error: the result is random and
    /// labeled [`LayoutMode::Degraded`]. Any other encoding failure is returned.
    pub fn project(
        &self,
        provider: &EmbeddingProvider,
        dreams: &[DreamEntry],
    ) -> Result<Projection, EmbeddingError> {
        match dreams {
            [] => {
                return Ok(Projection {
                    mode: LayoutMode::Trivial,
                    points: Vec::new(),
                })
            }
            [only] => {
                return Ok(Projection {
                    mode: LayoutMode::Trivial,
                    points: vec![ProjectedPoint::new(only, [0.0; 3])],
                })
            }
            _ => {}
        }

        let texts: Vec<String> = dreams.iter().map(DreamEntry::canonical_text).collect();
        let (mode, mut coords) = match provider.encode_batch(&texts) {
            Ok(vectors) => match reduce_to_3d(&vectors) {
                Ok(coords) => (LayoutMode::Pca, coords),
                Err(err) => {
                    tracing::warn!(
                        target: "dreams.ai",
                        error = %err,
                        count = dreams.len(),
                        "PCA failed; using random layout"
                    );
                    (
                        LayoutMode::Fallback {
                            reason: err.to_string(),
                        },
                        self.random_coords(dreams.len()),
                    )
                }
            },
            Err(EmbeddingError::Unavailable(reason)) => {
                tracing::warn!(
                    target: "dreams.ai",
                    %reason,
                    "embedding model unavailable; using random layout"
                );
                (
                    LayoutMode::Degraded { reason },
                    self.random_coords(dreams.len()),
                )
            }
            Err(err) => return Err(err),
        };

        rescale(&mut coords, self.radius);

        Ok(Projection {
            mode,
            points: dreams
                .iter()
                .zip(coords)
                .map(|(dream, coords)| ProjectedPoint::new(dream, coords))
                .collect(),
        })
    }

    fn random_coords(&self, count: usize) -> Vec<[f64; 3]> {
        let mut rng = self.rng();
        (0..count)
            .map(|_| {
                [
                    rng.gen_range(-FALLBACK_SPREAD..=FALLBACK_SPREAD),
                    rng.gen_range(-FALLBACK_SPREAD..=FALLBACK_SPREAD),
                    rng.gen_range(-FALLBACK_SPREAD..=FALLBACK_SPREAD),
                ]
            })
            .collect()
    }
}

fn norm(point: &[f64; 3]) -> f64 {
    point.iter().map(|v| v * v).sum::<f64>().sqrt()
}

/// Scale `points` so the largest norm is `radius`. Collapsed batches are left as is.
pub fn rescale(points: &mut [[f64; 3]], radius: f64) {
    let max_norm = points.iter().map(norm).fold(0.0f64, f64::max);
    if max_norm <= NORM_FLOOR {
        return;
    }
    let scale = radius / max_norm;
    for point in points {
        for value in point.iter_mut() {
            *value *= scale;
        }
    }
}

/// PCA scores on the top `min(3, n - 1)` components, zero-padded to 3.
///
/// Components with no variance score 0, so identical embeddings all land on the
/// origin.
pub fn reduce_to_3d(vectors: &[Vec<f32>]) -> Result<Vec<[f64; 3]>, ReductionError> {
    let n = vectors.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let dim = vectors[0].len();

    let mut matrix = Array2::<f64>::zeros((n, dim));
    for (i, vector) in vectors.iter().enumerate() {
        if vector.len() != dim {
            return Err(ReductionError::DimensionMismatch {
                expected: dim,
                got: vector.len(),
            });
        }
        for (j, &value) in vector.iter().enumerate() {
            if !value.is_finite() {
                return Err(ReductionError::NonFinite);
            }
            matrix[[i, j]] = f64::from(value);
        }
    }

    if let Some(mean) = matrix.mean_axis(Axis(0)) {
        for mut row in matrix.rows_mut() {
            row -= &mean;
        }
    }

    let gram = matrix.dot(&matrix.t());
    let (eigenvalues, eigenvectors) = symmetric_eigen(gram)?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| eigenvalues[b].total_cmp(&eigenvalues[a]));

    let components = 3.min(n - 1);
    let largest = eigenvalues[order[0]].max(0.0);
    let mut coords = vec![[0.0f64; 3]; n];
    for (axis, &k) in order.iter().take(components).enumerate() {
        let variance = eigenvalues[k];
        if variance <= JACOBI_TOLERANCE * largest || variance <= 0.0 {
            continue;
        }
        let scale = variance.sqrt();
        for (row, point) in coords.iter_mut().enumerate() {
            point[axis] = eigenvectors[[row, k]] * scale;
        }
    }

    if coords.iter().flatten().any(|value| !value.is_finite()) {
        return Err(ReductionError::NonFinite);
    }
    Ok(coords)
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix.
///
/// Returns the eigenvalues and a matrix whose columns are the matching unit
/// eigenvectors.
fn symmetric_eigen(mut a: Array2<f64>) -> Result<(Array1<f64>, Array2<f64>), ReductionError> {
    let n = a.nrows();
    let mut v = Array2::<f64>::eye(n);

    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    if !scale.is_finite() {
        return Err(ReductionError::NonFinite);
    }

    for _ in 0..MAX_JACOBI_SWEEPS {
        if off_diagonal_norm(&a) <= JACOBI_TOLERANCE * scale {
            return Ok((a.diag().to_owned(), v));
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = a[[p, q]];
                if apq.abs() <= f64::MIN_POSITIVE {
                    continue;
                }
                let theta = (a[[q, q]] - a[[p, p]]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = a[[k, p]];
                    let akq = a[[k, q]];
                    a[[k, p]] = c * akp - s * akq;
                    a[[k, q]] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[[p, k]];
                    let aqk = a[[q, k]];
                    a[[p, k]] = c * apk - s * aqk;
                    a[[q, k]] = s * apk + c * aqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    if off_diagonal_norm(&a) <= JACOBI_TOLERANCE * scale {
        Ok((a.diag().to_owned(), v))
    } else {
        Err(ReductionError::NoConvergence)
    }
}

fn off_diagonal_norm(a: &Array2<f64>) -> f64 {
    a.indexed_iter()
        .filter(|((i, j), _)| i != j)
        .map(|(_, x)| x * x)
        .sum::<f64>()
        .sqrt()
}
