//! RANSAC wrapper for outlier-robust affine fitting.

use serde::{Deserialize, Serialize};

use super::fit::{fit_affine_exact, fit_affine_lsq, residuals};
use super::{AffineError, AffineTransform};

/// RANSAC configuration for affine fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RansacAffineConfig {
    /// Maximum number of RANSAC iterations.
    pub max_iters: usize,
    /// Inlier threshold (transfer error in pixels).
    pub inlier_threshold: f64,
    /// Minimum number of inliers for a valid model.
    pub min_inliers: usize,
    /// Minimum triangle area (px²) for a 3-point sample to be accepted.
    pub min_sample_area: f64,
    /// Random seed.
    pub seed: u64,
}

impl Default for RansacAffineConfig {
    fn default() -> Self {
        Self {
            max_iters: 2000,
            inlier_threshold: 3.0,
            min_inliers: 3,
            min_sample_area: 100.0,
            seed: 0,
        }
    }
}

/// Result of RANSAC affine fitting.
#[derive(Debug, Clone)]
pub struct AffineRansacResult {
    /// Least-squares transform over the final inlier set.
    pub transform: AffineTransform,
    /// Indices of the inlier pairs, ascending.
    pub inliers: Vec<usize>,
    /// Inlier mask aligned with the input pairs.
    pub inlier_mask: Vec<bool>,
    /// Transfer error of every pair under `transform`.
    pub errors: Vec<f64>,
}

impl AffineRansacResult {
    pub fn n_inliers(&self) -> usize {
        self.inliers.len()
    }
}

fn triangle_area(p: &[[f64; 2]; 3]) -> f64 {
    0.5 * ((p[1][0] - p[0][0]) * (p[2][1] - p[0][1]) - (p[2][0] - p[0][0]) * (p[1][1] - p[0][1]))
        .abs()
}

fn inlier_mask(errors: &[f64], threshold: f64) -> Vec<bool> {
    errors.iter().map(|&e| e.is_finite() && e <= threshold).collect()
}

/// Fit `dst ≈ T(src)` robustly.
///
/// Samples non-degenerate 3-pair subsets, solves each exactly, keeps the
/// candidate with the most pairs inside `inlier_threshold`, then refits by
/// least squares on that candidate's inliers. The reported inlier set is
/// recomputed under the refit model.
pub fn fit_affine_ransac(
    src: &[[f64; 2]],
    dst: &[[f64; 2]],
    config: &RansacAffineConfig,
) -> Result<AffineRansacResult, AffineError> {
    use rand::prelude::*;

    let n = src.len().min(dst.len());
    if n < 3 {
        return Err(AffineError::TooFewPoints { needed: 3, got: n });
    }
    let src = &src[..n];
    let dst = &dst[..n];

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best_count = 0usize;
    let mut best_mask: Vec<bool> = vec![false; n];

    for _ in 0..config.max_iters {
        let sample = sample_indices(&mut rng, n, 3);
        let s = [src[sample[0]], src[sample[1]], src[sample[2]]];
        if triangle_area(&s) < config.min_sample_area {
            continue;
        }
        let d = [dst[sample[0]], dst[sample[1]], dst[sample[2]]];
        let Ok(candidate) = fit_affine_exact(&s, &d) else {
            continue;
        };

        let mask = inlier_mask(&residuals(&candidate, src, dst), config.inlier_threshold);
        let count = mask.iter().filter(|&&m| m).count();
        if count > best_count {
            best_count = count;
            best_mask = mask;
            if best_count == n {
                break;
            }
        }
    }

    let needed = config.min_inliers.max(3);
    if best_count < needed {
        return Err(AffineError::InsufficientInliers {
            needed,
            found: best_count,
        });
    }

    let (in_src, in_dst): (Vec<[f64; 2]>, Vec<[f64; 2]>) = best_mask
        .iter()
        .enumerate()
        .filter(|(_, &m)| m)
        .map(|(i, _)| (src[i], dst[i]))
        .unzip();
    let transform = fit_affine_lsq(&in_src, &in_dst)?;

    let errors = residuals(&transform, src, dst);
    let inlier_mask = inlier_mask(&errors, config.inlier_threshold);
    let inliers: Vec<usize> = inlier_mask
        .iter()
        .enumerate()
        .filter_map(|(i, &m)| m.then_some(i))
        .collect();
    if inliers.len() < needed {
        return Err(AffineError::InsufficientInliers {
            needed,
            found: inliers.len(),
        });
    }

    tracing::debug!(
        "affine RANSAC: {}/{} inliers (threshold {:.2}px)",
        inliers.len(),
        n,
        config.inlier_threshold
    );

    Ok(AffineRansacResult {
        transform,
        inliers,
        inlier_mask,
        errors,
    })
}

/// Sample `k` distinct indices from `0..n` using Fisher–Yates partial shuffle.
fn sample_indices(rng: &mut impl rand::Rng, n: usize, k: usize) -> Vec<usize> {
    debug_assert!(k <= n);
    let mut indices: Vec<usize> = (0..n).collect();
    for i in 0..k {
        let j = rng.gen_range(i..n);
        indices.swap(i, j);
    }
    indices.truncate(k);
    indices
}
