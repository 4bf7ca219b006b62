//! ICP-style refinement of a back→front affine registration.
//!
//! Each pass maps the back vias, pairs them with front vias by mutual
//! nearest neighbour, drops pairs above a median-relative cutoff, regresses
//! the X and Y residuals on position and composes the resulting correction
//! onto the running transform.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::align::mutual_nearest;
use crate::affine::AffineTransform;
use crate::contacts::BoardEdge;
use crate::geometry::{dist, fit_line, median_of};
use crate::outcome::{Outcome, Shortfall};

/// Refiner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerConfig {
    pub max_passes: usize,
    /// Mean residual (pixels) below which refinement has converged.
    pub converge_px: f64,
    /// Passes improving the mean residual by less than this stop the loop.
    pub min_improvement_px: f64,
    /// Mutual-nearest-neighbour search radius (pixels).
    pub match_radius_px: f64,
    /// Outlier cutoff: `min(median × factor, abs_cutoff_px)`, at least `min_cutoff_px`.
    pub outlier_median_factor: f64,
    pub abs_cutoff_px: f64,
    pub min_cutoff_px: f64,
    /// Pairs needed to run a pass.
    pub min_pairs: usize,
    /// Width of the near-connector band for the initial regression, as a
    /// fraction of the front vias' extent across the edge.
    pub connector_band_frac: f64,
}

impl Default for RefinerConfig {
    fn default() -> Self {
        Self {
            max_passes: 5,
            converge_px: 1.0,
            min_improvement_px: 0.01,
            match_radius_px: 20.0,
            outlier_median_factor: 2.5,
            abs_cutoff_px: 8.0,
            min_cutoff_px: 1.0,
            min_pairs: 6,
            connector_band_frac: 0.3,
        }
    }
}

/// Refinement outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefineResult {
    pub transform: AffineTransform,
    pub passes: usize,
    /// Mean residual of the last pass' kept pairs after its correction.
    pub mean_error_px: f64,
    /// Kept pairs in the last pass.
    pub pairs: usize,
    pub converged: bool,
    /// Mean residual after every pass.
    pub history: Vec<f64>,
}

fn across(edge: BoardEdge, p: [f64; 2]) -> f64 {
    if edge.is_horizontal() {
        p[1]
    } else {
        p[0]
    }
}

fn along(edge: BoardEdge, p: [f64; 2]) -> f64 {
    if edge.is_horizontal() {
        p[0]
    } else {
        p[1]
    }
}

/// Initial transform from near-connector vias.
///
/// Back vias mapped through `coarse` are paired with front vias inside a
/// band around the connector line (`line_pos` across `edge`). The across
/// coordinate is regressed 1-D (scale and offset); the along offset is the
/// median difference. Falls back to `coarse` with fewer than three pairs.
pub fn connector_regression_init(
    front: &[[f64; 2]],
    back: &[[f64; 2]],
    coarse: &AffineTransform,
    edge: BoardEdge,
    line_pos: f64,
    config: &RefinerConfig,
) -> AffineTransform {
    let (lo, hi) = front
        .iter()
        .map(|p| across(edge, *p))
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo > hi {
        return *coarse;
    }
    let band = config.connector_band_frac * (hi - lo).max(1.0);
    let mapped = coarse.apply_all(back);

    let pairs: Vec<(usize, usize)> = mutual_nearest(front, &mapped, config.match_radius_px)
        .into_iter()
        .filter(|&(f, _)| (across(edge, front[f]) - line_pos).abs() <= band)
        .collect();
    if pairs.len() < 3 {
        tracing::debug!("connector init: {} pairs near the connector, keeping coarse", pairs.len());
        return *coarse;
    }

    let ms: Vec<f64> = pairs.iter().map(|&(_, b)| across(edge, mapped[b])).collect();
    let fs: Vec<f64> = pairs.iter().map(|&(f, _)| across(edge, front[f])).collect();
    let Some(line) = fit_line(&ms, &fs) else {
        return *coarse;
    };
    let scale = if line.slope.abs() > 0.5 { line.slope } else { 1.0 };
    let offset = if line.slope.abs() > 0.5 {
        line.intercept
    } else {
        fs.iter().zip(&ms).map(|(f, m)| f - m).sum::<f64>() / fs.len() as f64
    };
    let shift = median_of(
        pairs
            .iter()
            .map(|&(f, b)| along(edge, front[f]) - along(edge, mapped[b])),
    )
    .unwrap_or(0.0);

    let correction = if edge.is_horizontal() {
        AffineTransform::new(1.0, 0.0, 0.0, scale, shift, offset)
    } else {
        AffineTransform::new(scale, 0.0, 0.0, 1.0, offset, shift)
    };
    tracing::debug!(
        "connector init: {} pairs, across scale {:.5}, offset {:.2}, along shift {:.2}",
        pairs.len(),
        scale,
        offset,
        shift
    );
    correction.compose(coarse)
}

/// Correction `m ↦ m + r(m)` from a joint regression of both residual
/// components on `[1, x, y]`.
///
/// Besides the mean, X-residual vs Y, X-residual vs X and Y-residual vs Y,
/// this also fits Y-residual vs X, so a small rotation is removed in one
/// pass instead of leaving a shear behind. Falls back to the mean residual
/// when the positions are degenerate.
fn residual_correction(mapped: &[[f64; 2]], residual: &[[f64; 2]]) -> AffineTransform {
    let n = mapped.len() as f64;
    let cx = mapped.iter().map(|p| p[0]).sum::<f64>() / n;
    let cy = mapped.iter().map(|p| p[1]).sum::<f64>() / n;
    let mut ata = Matrix3::<f64>::zeros();
    let mut bx = Vector3::<f64>::zeros();
    let mut by = Vector3::<f64>::zeros();
    for (m, r) in mapped.iter().zip(residual) {
        let row = Vector3::new(1.0, m[0] - cx, m[1] - cy);
        ata += row * row.transpose();
        bx += row * r[0];
        by += row * r[1];
    }

    let lu = ata.lu();
    match (lu.solve(&bx), lu.solve(&by)) {
        (Some(px), Some(py)) if px.iter().chain(py.iter()).all(|v| v.is_finite()) => {
            AffineTransform::new(
                1.0 + px[1],
                px[2],
                py[1],
                1.0 + py[2],
                px[0] - px[1] * cx - px[2] * cy,
                py[0] - py[1] * cx - py[2] * cy,
            )
        }
        _ => {
            let mx = residual.iter().map(|r| r[0]).sum::<f64>() / n;
            let my = residual.iter().map(|r| r[1]).sum::<f64>() / n;
            AffineTransform::translation(mx, my)
        }
    }
}

/// Refine `init` (back → front) over all via centers.
///
/// Stops when the mean residual drops below `converge_px`, when a pass no
/// longer improves it, or after `max_passes`. A correction that raises the
/// mean over the pass' kept pairs is discarded. Too few pairs, or stopping
/// above the threshold, yield a partial result carrying the best transform
/// so far.
pub fn refine_affine(
    front: &[[f64; 2]],
    back: &[[f64; 2]],
    init: &AffineTransform,
    config: &RefinerConfig,
) -> Outcome<RefineResult> {
    let mut result = RefineResult {
        transform: *init,
        passes: 0,
        mean_error_px: f64::INFINITY,
        pairs: 0,
        converged: false,
        history: Vec::new(),
    };
    let min_pairs = config.min_pairs.max(3);

    for pass in 1..=config.max_passes {
        let mapped = result.transform.apply_all(back);
        let nn = mutual_nearest(front, &mapped, config.match_radius_px);
        let errors: Vec<f64> = nn.iter().map(|&(f, b)| dist(front[f], mapped[b])).collect();
        let Some(median) = median_of(errors.iter().copied()) else {
            break;
        };
        let cutoff = (median * config.outlier_median_factor)
            .min(config.abs_cutoff_px)
            .max(config.min_cutoff_px);
        let kept: Vec<(usize, usize)> = nn
            .iter()
            .zip(&errors)
            .filter(|&(_, &e)| e <= cutoff)
            .map(|(p, _)| *p)
            .collect();
        if kept.len() < min_pairs {
            let reason = Shortfall::TooFewMatches {
                found: kept.len(),
                needed: min_pairs,
            };
            tracing::warn!("refinement pass {}: {}", pass, reason);
            return Outcome::partial(result, reason);
        }

        let mean_before = kept
            .iter()
            .map(|&(f, b)| dist(front[f], mapped[b]))
            .sum::<f64>()
            / kept.len() as f64;
        if pass == 1 {
            result.pairs = kept.len();
            result.mean_error_px = mean_before;
        }

        let m: Vec<[f64; 2]> = kept.iter().map(|&(_, b)| mapped[b]).collect();
        let r: Vec<[f64; 2]> = kept
            .iter()
            .map(|&(f, b)| [front[f][0] - mapped[b][0], front[f][1] - mapped[b][1]])
            .collect();
        let candidate = residual_correction(&m, &r).compose(&result.transform);

        let mean_after = kept
            .iter()
            .map(|&(f, b)| dist(front[f], candidate.apply(back[b])))
            .sum::<f64>()
            / kept.len() as f64;
        tracing::debug!(
            "refinement pass {}: {} pairs (cutoff {:.2}px), mean {:.3} -> {:.3}px",
            pass,
            kept.len(),
            cutoff,
            mean_before,
            mean_after
        );

        if mean_after > mean_before {
            tracing::debug!("refinement pass {}: correction raises the mean, keeping previous transform", pass);
            break;
        }
        result.transform = candidate;
        result.passes = pass;
        result.pairs = kept.len();
        result.mean_error_px = mean_after;
        result.history.push(mean_after);

        if mean_after < config.converge_px {
            result.converged = true;
            break;
        }
        if mean_before - mean_after < config.min_improvement_px {
            break;
        }
    }

    if result.converged {
        tracing::info!(
            "refinement converged after {} passes, mean {:.3}px",
            result.passes,
            result.mean_error_px
        );
        return Outcome::Complete(result);
    }
    if result.pairs == 0 {
        let reason = Shortfall::TooFewMatches {
            found: 0,
            needed: min_pairs,
        };
        return Outcome::partial(result, reason);
    }
    let reason = Shortfall::NotConverged {
        passes: result.passes,
        mean_error_px: result.mean_error_px,
    };
    Outcome::partial(result, reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::jittered_grid;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn max_error(t: &AffineTransform, back: &[[f64; 2]], front: &[[f64; 2]]) -> f64 {
        back.iter()
            .zip(front)
            .map(|(b, f)| dist(t.apply(*b), *f))
            .fold(0.0, f64::max)
    }

    #[test]
    fn converges_from_perturbed_start() {
        let mut rng = StdRng::seed_from_u64(11);
        let front = jittered_grid(&mut rng, 10, 6, [50.0, 50.0], 60.0, 12.0);
        let back_to_front = AffineTransform::new(1.001, 0.004, -0.003, 0.997, 9.0, -4.0);
        let Some(front_to_back) = back_to_front.invert() else {
            panic!("test transform must be invertible");
        };
        let back = front_to_back.apply_all(&front);

        let init = AffineTransform::rotation_about_deg(0.3, [300.0, 200.0])
            .compose(&AffineTransform::translation(2.0, -1.5))
            .compose(&back_to_front);
        let out = refine_affine(&front, &back, &init, &RefinerConfig::default());
        assert!(out.is_complete(), "{:?}", out.reason());
        let res = out.value();
        assert!(res.converged);
        assert!(res.passes <= 2, "passes {}", res.passes);
        assert!(max_error(&res.transform, &back, &front) < 1e-6);
    }

    #[test]
    fn displaced_pairs_are_rejected() {
        let mut rng = StdRng::seed_from_u64(5);
        let front = jittered_grid(&mut rng, 10, 6, [50.0, 50.0], 60.0, 12.0);
        let shift = AffineTransform::translation(-7.0, 3.0);
        let mut back = shift.apply_all(&front);
        for i in [3, 17, 40] {
            back[i][0] += 10.0;
        }
        let init = AffineTransform::translation(5.5, -2.0);
        let out = refine_affine(&front, &back, &init, &RefinerConfig::default());
        let res = out.value();
        assert!(res.converged);
        let clean: Vec<usize> = (0..front.len()).filter(|i| ![3, 17, 40].contains(i)).collect();
        for i in clean {
            assert!(dist(res.transform.apply(back[i]), front[i]) < 1e-6);
        }
    }

    #[test]
    fn too_few_points_is_partial() {
        let front = vec![[0.0, 0.0], [50.0, 0.0], [0.0, 50.0]];
        let out = refine_affine(&front, &front, &AffineTransform::identity(), &RefinerConfig::default());
        assert!(matches!(out.reason(), Some(Shortfall::TooFewMatches { .. })));
        assert_eq!(out.value().transform, AffineTransform::identity());
    }

    #[test]
    fn connector_init_recovers_across_scale() {
        let mut rng = StdRng::seed_from_u64(9);
        let front = jittered_grid(&mut rng, 10, 6, [50.0, 50.0], 60.0, 12.0);
        let back: Vec<[f64; 2]> = front.iter().map(|p| [p[0] - 5.0, 0.99 * p[1] + 3.0]).collect();
        let init = connector_regression_init(
            &front,
            &back,
            &AffineTransform::identity(),
            BoardEdge::Top,
            50.0,
            &RefinerConfig::default(),
        );
        assert!(max_error(&init, &back, &front) < 1e-6);
    }

    #[test]
    fn single_pass_removes_y_residual_along_x() {
        let mut rng = StdRng::seed_from_u64(17);
        let front = jittered_grid(&mut rng, 10, 6, [50.0, 50.0], 60.0, 12.0);
        let back_to_front = AffineTransform::new(1.0, 0.0, 0.004, 1.0, 0.0, 0.0);
        let Some(front_to_back) = back_to_front.invert() else {
            panic!("test transform must be invertible");
        };
        let back = front_to_back.apply_all(&front);

        let out = refine_affine(&front, &back, &AffineTransform::identity(), &RefinerConfig::default());
        let res = out.value();
        assert!(res.converged);
        assert_eq!(res.passes, 1);
        approx::assert_abs_diff_eq!(res.transform.c, 0.004, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(res.transform.b, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn correction_raising_the_mean_is_discarded() {
        // 3x3 grid; the four corners are off by 0.9px in x. The least-squares
        // correction is a pure 0.4px shift, which raises the mean distance.
        let front: Vec<[f64; 2]> = (0..9)
            .map(|i| [100.0 + 60.0 * (i % 3) as f64, 100.0 + 60.0 * (i / 3) as f64])
            .collect();
        let mut back = front.clone();
        for i in [0, 2, 6, 8] {
            back[i][0] -= 0.9;
        }
        let config = RefinerConfig {
            converge_px: 0.1,
            ..RefinerConfig::default()
        };

        let out = refine_affine(&front, &back, &AffineTransform::identity(), &config);
        let res = out.value();
        assert_eq!(res.transform, AffineTransform::identity());
        assert_eq!(res.passes, 0);
        assert!(res.history.is_empty());
        approx::assert_abs_diff_eq!(res.mean_error_px, 0.4, epsilon = 1e-9);
        assert!(matches!(out.reason(), Some(Shortfall::NotConverged { passes: 0, .. })));
    }
}
