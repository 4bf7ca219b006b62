//! Via-based affine registration: corner voting, RANSAC, guided re-match
//! and a final least-squares refit.

use serde::{Deserialize, Serialize};

use super::matcher::{match_points, MatcherConfig};
use super::{split_pairs, via_centers, Correspondence, CorrespondenceSource, Via};
use crate::affine::{
    fit_affine_lsq, fit_affine_ransac, AffineTransform, RansacAffineConfig, ResidualStats,
};
use crate::geometry::dist2;
use crate::outcome::{Outcome, Shortfall};

/// Minimum vias per side and minimum pairs for an affine fit.
pub const MIN_POINTS: usize = 3;

/// Result of via registration. `transform` maps back coordinates into the
/// front frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViaAlignmentResult {
    pub transform: AffineTransform,
    /// Pairs proposed by corner voting (plus contact pairs).
    pub matched: usize,
    /// Inliers of the RANSAC stage.
    pub ransac_inliers: usize,
    /// Pairs in the final fit.
    pub inliers: usize,
    /// Residuals of the final pairs under `transform`.
    pub stats: ResidualStats,
    /// Pairs used by the final fit.
    pub pairs: Vec<Correspondence>,
}

impl ViaAlignmentResult {
    fn fallback(transform: AffineTransform) -> Self {
        Self {
            transform,
            matched: 0,
            ransac_inliers: 0,
            inliers: 0,
            stats: ResidualStats::default(),
            pairs: Vec::new(),
        }
    }
}

/// Mutual nearest neighbours between `front` and `mapped` within `radius`.
pub(crate) fn mutual_nearest(front: &[[f64; 2]], mapped: &[[f64; 2]], radius: f64) -> Vec<(usize, usize)> {
    let nearest = |p: [f64; 2], set: &[[f64; 2]]| -> Option<(usize, f64)> {
        set.iter()
            .enumerate()
            .map(|(i, q)| (i, dist2(p, *q)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    };
    let r2 = radius * radius;
    let mut out = Vec::new();
    for (bi, m) in mapped.iter().enumerate() {
        let Some((fi, d2)) = nearest(*m, front) else {
            continue;
        };
        if d2 > r2 {
            continue;
        }
        if let Some((back_of_front, _)) = nearest(front[fi], mapped) {
            if back_of_front == bi {
                out.push((fi, bi));
            }
        }
    }
    out
}

/// Register `back` vias onto `front` vias.
///
/// `initial` maps back coordinates roughly into the front frame (the coarse
/// contact alignment); voting runs on the mapped back set so only local
/// offsets remain. `extra` correspondences (contact inner edges) join the
/// voted pairs before RANSAC. Shortfalls keep `initial` as the transform.
pub fn align_vias(
    front: &[Via],
    back: &[Via],
    initial: &AffineTransform,
    extra: &[Correspondence],
    dpi: Option<f64>,
    matcher: &MatcherConfig,
    ransac: &RansacAffineConfig,
) -> Outcome<ViaAlignmentResult> {
    if front.len() < MIN_POINTS || back.len() < MIN_POINTS {
        let reason = Shortfall::TooFewVias {
            front: front.len(),
            back: back.len(),
            needed: MIN_POINTS,
        };
        tracing::warn!("{}", reason);
        return Outcome::partial(ViaAlignmentResult::fallback(*initial), reason);
    }

    let front_pts = via_centers(front);
    let back_pts = via_centers(back);
    let mapped = initial.apply_all(&back_pts);

    let mut pairs: Vec<Correspondence> = match_points(&front_pts, &mapped, dpi, matcher)
        .into_iter()
        .map(|(f, b)| Correspondence::via(front, back, f, b))
        .collect();
    let n_via_pairs = pairs.len();
    pairs.extend_from_slice(extra);
    let matched = pairs.len();
    tracing::info!("via voting: {} via pairs, {} contact pairs", n_via_pairs, extra.len());

    if matched < MIN_POINTS {
        let reason = Shortfall::TooFewMatches {
            found: matched,
            needed: MIN_POINTS,
        };
        tracing::warn!("{}", reason);
        let mut value = ViaAlignmentResult::fallback(*initial);
        value.matched = matched;
        return Outcome::partial(value, reason);
    }

    let (src, dst) = split_pairs(&pairs);
    let fit = match fit_affine_ransac(&src, &dst, ransac) {
        Ok(fit) => fit,
        Err(e) => {
            tracing::warn!("via RANSAC failed: {}", e);
            let mut value = ViaAlignmentResult::fallback(*initial);
            value.matched = matched;
            return Outcome::partial(value, e.into());
        }
    };
    let ransac_inliers = fit.n_inliers();

    // Guided re-match over all vias under the RANSAC model.
    let remapped = fit.transform.apply_all(&back_pts);
    let mut final_pairs: Vec<Correspondence> =
        mutual_nearest(&front_pts, &remapped, ransac.inlier_threshold)
            .into_iter()
            .map(|(f, b)| Correspondence::via(front, back, f, b))
            .collect();
    final_pairs.extend(
        pairs
            .iter()
            .zip(&fit.inlier_mask)
            .filter(|&(p, &inlier)| inlier && p.source == CorrespondenceSource::Contact)
            .map(|(p, _)| *p),
    );

    let transform = if final_pairs.len() >= MIN_POINTS {
        let (s, d) = split_pairs(&final_pairs);
        fit_affine_lsq(&s, &d).unwrap_or(fit.transform)
    } else {
        final_pairs = fit
            .inliers
            .iter()
            .map(|&i| pairs[i])
            .collect();
        fit.transform
    };

    let (s, d) = split_pairs(&final_pairs);
    let stats = ResidualStats::of(&transform, &s, &d);
    tracing::info!(
        "via alignment: matched={}, ransac inliers={}, final={}, rms={:.3}px",
        matched,
        ransac_inliers,
        final_pairs.len(),
        stats.rms_px
    );

    Outcome::Complete(ViaAlignmentResult {
        transform,
        matched,
        ransac_inliers,
        inliers: final_pairs.len(),
        stats,
        pairs: final_pairs,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{far_outliers, jittered_grid};
    use crate::vias::ViaMethod;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn vias(points: &[[f64; 2]]) -> Vec<Via> {
        points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                let mut v = Via::new(*p, 4.0, 0.9, ViaMethod::Standard);
                v.id = i;
                v
            })
            .collect()
    }

    /// Back = T(front) with T = translate(14, -6) · scale(1.002, 0.998) · rotate(1.2°).
    fn ground_truth() -> AffineTransform {
        AffineTransform::translation(14.0, -6.0)
            .compose(&AffineTransform::scaling(1.002, 0.998))
            .compose(&AffineTransform::rotation_deg(1.2))
    }

    #[test]
    fn recovers_transform_and_excludes_outliers() {
        let mut rng = StdRng::seed_from_u64(42);
        let front_pts = jittered_grid(&mut rng, 10, 5, [60.0, 60.0], 60.0, 10.0);
        let t = ground_truth();
        let mut back_pts = t.apply_all(&front_pts);
        let outliers = far_outliers(&mut rng, &back_pts, 6, 40.0, [0.0, 0.0, 700.0, 400.0]);
        back_pts.extend(outliers);

        let front = vias(&front_pts);
        let back = vias(&back_pts);
        let out = align_vias(
            &front,
            &back,
            &AffineTransform::identity(),
            &[],
            None,
            &MatcherConfig::default(),
            &RansacAffineConfig::default(),
        );
        assert!(out.is_complete(), "{:?}", out.reason());
        let res = out.value();
        assert_eq!(res.inliers, 50);
        assert!(res
            .pairs
            .iter()
            .all(|p| p.back_index.unwrap() < 50 && p.front_index == p.back_index));

        // RMS over the true inliers.
        let back_true = &back_pts[..50];
        let stats = ResidualStats::of(&res.transform, back_true, &front_pts);
        assert!(stats.rms_px < 0.2, "rms {}", stats.rms_px);
    }

    #[test]
    fn too_few_vias_is_partial_with_initial_transform() {
        let front = vias(&[[0.0, 0.0], [10.0, 0.0]]);
        let back = vias(&[[0.0, 0.0], [10.0, 0.0], [0.0, 10.0]]);
        let init = AffineTransform::translation(3.0, 4.0);
        let out = align_vias(
            &front,
            &back,
            &init,
            &[],
            None,
            &MatcherConfig::default(),
            &RansacAffineConfig::default(),
        );
        assert_eq!(
            out.reason().map(|r| r.to_string()).as_deref(),
            Some("not enough vias: front=2, back=3 (need >= 3)")
        );
        assert_eq!(out.value().transform, init);
    }

    #[test]
    fn mutual_nearest_requires_agreement() {
        let front = vec![[0.0, 0.0], [3.0, 0.0]];
        let mapped = vec![[1.0, 0.0]];
        // Mapped point's nearest front is index 0, and vice versa.
        assert_eq!(mutual_nearest(&front, &mapped, 5.0), vec![(0, 0)]);
        assert!(mutual_nearest(&front, &mapped, 0.5).is_empty());
    }
}
