//! Coarse front/back registration from the two contact rows.
//!
//! Fitted rows of equal length are paired slot by slot; raw point rows are
//! paired along the edge after removing each side's centroid. The rotation
//! comes from a regression of the across-edge difference on the along-edge
//! position when enough pairs exist, otherwise from the clamped difference
//! of the two fitted line angles. The result maps back coordinates into the
//! front frame as `T(front centroid) · R(Δθ) · T(-back centroid)`.

use serde::{Deserialize, Serialize};

use crate::affine::AffineTransform;
use crate::contacts::{BoardEdge, Contact, DetectionPass, DetectionResult};
use crate::geometry::{centroid, fit_line, median_of};
use crate::outcome::{Outcome, Shortfall};
use crate::vias::{Correspondence, CorrespondenceSource};

/// Pairs needed for any coarse transform.
const MIN_PAIRS: usize = 2;

/// Coarse aligner configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoarseConfig {
    /// Pairs needed to take the rotation from the pair regression.
    pub min_pairs_for_regression: usize,
    /// Clamp on the line-angle difference fallback (degrees).
    pub max_fallback_deg: f64,
    /// Pairing tolerance along the edge, as a fraction of the pitch.
    pub match_tol_pitch_frac: f64,
}

impl Default for CoarseConfig {
    fn default() -> Self {
        Self {
            min_pairs_for_regression: 5,
            max_fallback_deg: 2.0,
            match_tol_pitch_frac: 0.5,
        }
    }
}

/// Where the rotation estimate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationSource {
    PairRegression,
    LineAngleDifference,
}

/// Coarse back → front transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoarseAlignment {
    pub transform: AffineTransform,
    pub delta_theta_deg: f64,
    pub method: RotationSource,
    /// `(front_index, back_index)` contact pairs.
    pub pairs: Vec<(usize, usize)>,
    pub front_centroid: [f64; 2],
    pub back_centroid: [f64; 2],
}

fn along(edge: BoardEdge, p: [f64; 2]) -> f64 {
    if edge.is_horizontal() {
        p[0]
    } else {
        p[1]
    }
}

fn across(edge: BoardEdge, p: [f64; 2]) -> f64 {
    if edge.is_horizontal() {
        p[1]
    } else {
        p[0]
    }
}

fn spacing_estimate(edge: BoardEdge, points: &[[f64; 2]]) -> Option<f64> {
    let mut pos: Vec<f64> = points.iter().map(|p| along(edge, *p)).collect();
    pos.sort_by(|a, b| a.total_cmp(b));
    median_of(pos.windows(2).map(|w| w[1] - w[0]).filter(|d| *d > 1.0))
}

/// One-to-one pairing by along-edge position after centroid removal,
/// nearest first.
fn pair_contacts(edge: BoardEdge, front: &[[f64; 2]], back: &[[f64; 2]], tol: f64) -> Vec<(usize, usize)> {
    let mean_along = |pts: &[[f64; 2]]| pts.iter().map(|p| along(edge, *p)).sum::<f64>() / pts.len() as f64;
    let fc = mean_along(front);
    let bc = mean_along(back);

    let mut cands: Vec<(f64, usize, usize)> = Vec::new();
    for (fi, f) in front.iter().enumerate() {
        for (bi, b) in back.iter().enumerate() {
            let d = ((along(edge, *f) - fc) - (along(edge, *b) - bc)).abs();
            if d <= tol {
                cands.push((d, fi, bi));
            }
        }
    }
    cands.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut used_f = vec![false; front.len()];
    let mut used_b = vec![false; back.len()];
    let mut pairs = Vec::new();
    for (_, fi, bi) in cands {
        if !used_f[fi] && !used_b[bi] {
            used_f[fi] = true;
            used_b[bi] = true;
            pairs.push((fi, bi));
        }
    }
    pairs.sort_unstable();
    pairs
}

fn clamped_fallback(front_angle_deg: f64, back_angle_deg: f64, config: &CoarseConfig) -> f64 {
    let d = front_angle_deg - back_angle_deg;
    if d.is_finite() {
        d.clamp(-config.max_fallback_deg, config.max_fallback_deg)
    } else {
        0.0
    }
}

/// Transform from already paired points.
///
/// Only pairs flagged in `rotation_pairs` feed the rotation regression; all
/// pairs contribute to the centroids.
fn align_pairs(
    front: &[[f64; 2]],
    back: &[[f64; 2]],
    pairs: Vec<(usize, usize)>,
    rotation_pairs: &[bool],
    edge: BoardEdge,
    fallback_deg: f64,
    config: &CoarseConfig,
) -> Outcome<CoarseAlignment> {
    if pairs.len() < MIN_PAIRS {
        let reason = Shortfall::TooFewContactPairs {
            found: pairs.len(),
            needed: MIN_PAIRS,
        };
        tracing::warn!("coarse alignment: {}", reason);
        let front_centroid = centroid(front).unwrap_or([0.0, 0.0]);
        let back_centroid = centroid(back).unwrap_or(front_centroid);
        let value = CoarseAlignment {
            transform: AffineTransform::translation(
                front_centroid[0] - back_centroid[0],
                front_centroid[1] - back_centroid[1],
            ),
            delta_theta_deg: 0.0,
            method: RotationSource::LineAngleDifference,
            pairs,
            front_centroid,
            back_centroid,
        };
        return Outcome::partial(value, reason);
    }

    let fp: Vec<[f64; 2]> = pairs.iter().map(|&(f, _)| front[f]).collect();
    let bp: Vec<[f64; 2]> = pairs.iter().map(|&(_, b)| back[b]).collect();
    let front_centroid = centroid(&fp).unwrap_or([0.0, 0.0]);
    let back_centroid = centroid(&bp).unwrap_or([0.0, 0.0]);

    let (xs, dy): (Vec<f64>, Vec<f64>) = fp
        .iter()
        .zip(&bp)
        .zip(rotation_pairs)
        .filter(|&(_, &used)| used)
        .map(|((f, b), _)| (along(edge, *b), across(edge, *f) - across(edge, *b)))
        .unzip();
    let regression = if xs.len() >= config.min_pairs_for_regression {
        fit_line(&xs, &dy)
    } else {
        None
    };
    let (delta_theta_deg, method) = match regression {
        Some(line) => {
            let theta = line.slope.atan().to_degrees();
            // Across = x for vertical edges, where rotation moves x by -sin θ · y.
            let theta = if edge.is_horizontal() { theta } else { -theta };
            (theta, RotationSource::PairRegression)
        }
        None => (fallback_deg, RotationSource::LineAngleDifference),
    };

    let transform = AffineTransform::translation(front_centroid[0], front_centroid[1])
        .compose(&AffineTransform::rotation_deg(delta_theta_deg))
        .compose(&AffineTransform::translation(-back_centroid[0], -back_centroid[1]));

    tracing::info!(
        "coarse alignment: {} pairs ({} for rotation), dθ={:.3}° ({:?}), t=({:.1}, {:.1})",
        pairs.len(),
        xs.len(),
        delta_theta_deg,
        method,
        transform.tx,
        transform.ty
    );

    Outcome::Complete(CoarseAlignment {
        transform,
        delta_theta_deg,
        method,
        pairs,
        front_centroid,
        back_centroid,
    })
}

/// Coarse alignment from two contact center rows along `edge`.
///
/// Points are paired by along-edge position after centroid removal, which
/// assumes both rows cover the same contacts. `front_angle_deg` and
/// `back_angle_deg` are the fitted line angles used by the fallback.
/// `pitch_px` sets the pairing tolerance; the median spacing of the front
/// row is used when it is absent.
pub fn coarse_align_points(
    front: &[[f64; 2]],
    back: &[[f64; 2]],
    edge: BoardEdge,
    front_angle_deg: f64,
    back_angle_deg: f64,
    pitch_px: Option<f64>,
    config: &CoarseConfig,
) -> Outcome<CoarseAlignment> {
    let pairs = if front.is_empty() || back.is_empty() {
        Vec::new()
    } else {
        let pitch = pitch_px
            .filter(|p| p.is_finite() && *p > 1.0)
            .or_else(|| spacing_estimate(edge, front))
            .unwrap_or(0.0);
        pair_contacts(edge, front, back, pitch * config.match_tol_pitch_frac)
    };
    let all = vec![true; pairs.len()];
    let fallback_deg = clamped_fallback(front_angle_deg, back_angle_deg, config);
    align_pairs(front, back, pairs, &all, edge, fallback_deg, config)
}

/// Coarse alignment of two contact detections of the same edge.
///
/// Two fitted rows of equal length are paired slot by slot. The rotation is
/// regressed over slots observed on both sides only, since rescued contacts
/// sit on their own side's fitted line. Rows of different length fall back
/// to positional pairing and the result is partial.
pub fn coarse_align(
    front: &DetectionResult,
    back: &DetectionResult,
    config: &CoarseConfig,
) -> Outcome<CoarseAlignment> {
    let fpts = front.centers();
    let bpts = back.centers();
    let edge = front.edge;
    let fallback_deg = clamped_fallback(front.line_angle_deg, back.line_angle_deg, config);
    let both_rows = front.line.is_some() && back.line.is_some();

    if both_rows && fpts.len() == bpts.len() {
        let pairs: Vec<(usize, usize)> = (0..fpts.len()).map(|i| (i, i)).collect();
        let observed: Vec<bool> = pairs
            .iter()
            .map(|&(f, b)| {
                front.contacts[f].pass != DetectionPass::Rescue
                    && back.contacts[b].pass != DetectionPass::Rescue
            })
            .collect();
        return align_pairs(&fpts, &bpts, pairs, &observed, edge, fallback_deg, config);
    }

    let pitch = front.line.or(back.line).map(|l| l.pitch_px);
    let out = coarse_align_points(
        &fpts,
        &bpts,
        edge,
        front.line_angle_deg,
        back.line_angle_deg,
        pitch,
        config,
    );
    let mismatch = both_rows.then(|| {
        let reason = Shortfall::ContactRowMismatch {
            front: fpts.len(),
            back: bpts.len(),
        };
        tracing::warn!("coarse alignment: {}", reason);
        reason
    });
    out.downgrade(mismatch)
}

/// Point on the board-facing edge of a contact's box.
pub fn inner_edge_point(contact: &Contact, edge: BoardEdge) -> [f64; 2] {
    let b = &contact.bbox;
    let [cx, cy] = contact.center;
    match edge {
        BoardEdge::Top => [cx, b.y1],
        BoardEdge::Bottom => [cx, b.y0],
        BoardEdge::Left => [b.x1, cy],
        BoardEdge::Right => [b.x0, cy],
    }
}

/// Inner-edge correspondences for the coarse contact pairs.
pub fn contact_correspondences(
    front: &DetectionResult,
    back: &DetectionResult,
    pairs: &[(usize, usize)],
) -> Vec<Correspondence> {
    pairs
        .iter()
        .filter(|&&(f, b)| f < front.contacts.len() && b < back.contacts.len())
        .map(|&(f, b)| Correspondence {
            front: inner_edge_point(&front.contacts[f], front.edge),
            back: inner_edge_point(&back.contacts[b], back.edge),
            source: CorrespondenceSource::Contact,
            front_index: Some(f),
            back_index: Some(b),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn row(n: usize, start: [f64; 2], pitch: f64) -> Vec<[f64; 2]> {
        (0..n).map(|i| [start[0] + pitch * i as f64, start[1]]).collect()
    }

    #[test]
    fn pair_regression_recovers_rotation() {
        let front = row(20, [100.0, 80.0], 40.0);
        // Back = inverse of a 0.8° rotation plus a shift, so back → front is +0.8°.
        let truth = AffineTransform::translation(12.0, -5.0)
            .compose(&AffineTransform::rotation_about_deg(0.8, [480.0, 80.0]));
        let Some(inv) = truth.invert() else {
            panic!("rotation must invert");
        };
        let back = inv.apply_all(&front);

        let out = coarse_align_points(&front, &back, BoardEdge::Top, 0.0, -0.8, Some(40.0), &CoarseConfig::default());
        assert!(out.is_complete());
        let c = out.value();
        assert_eq!(c.method, RotationSource::PairRegression);
        assert_eq!(c.pairs.len(), 20);
        assert_abs_diff_eq!(c.delta_theta_deg, 0.8, epsilon = 0.05);
        assert_abs_diff_eq!(c.transform.rotation_component_deg(), 0.8, epsilon = 0.05);
        for (f, b) in front.iter().zip(&back) {
            let m = c.transform.apply(*b);
            assert!((m[0] - f[0]).abs() < 0.5 && (m[1] - f[1]).abs() < 0.5);
        }
    }

    #[test]
    fn vertical_edge_rotation_sign() {
        let front: Vec<[f64; 2]> = (0..15).map(|i| [60.0, 100.0 + 40.0 * i as f64]).collect();
        let truth = AffineTransform::rotation_about_deg(0.8, [60.0, 380.0]);
        let Some(inv) = truth.invert() else {
            panic!("rotation must invert");
        };
        let back = inv.apply_all(&front);
        let out = coarse_align_points(&front, &back, BoardEdge::Left, 0.0, 0.0, Some(40.0), &CoarseConfig::default());
        assert_abs_diff_eq!(out.value().delta_theta_deg, 0.8, epsilon = 0.05);
    }

    #[test]
    fn few_pairs_clamp_line_angle_difference() {
        let front = row(3, [100.0, 80.0], 40.0);
        let back = row(3, [95.0, 82.0], 40.0);
        // One side's line fit is off by 5°.
        let out = coarse_align_points(&front, &back, BoardEdge::Top, 5.0, 0.0, Some(40.0), &CoarseConfig::default());
        assert!(out.is_complete());
        let c = out.value();
        assert_eq!(c.method, RotationSource::LineAngleDifference);
        assert_abs_diff_eq!(c.delta_theta_deg, 2.0, epsilon = 1e-12);

        let out = coarse_align_points(&front, &back, BoardEdge::Top, -0.6, 0.0, Some(40.0), &CoarseConfig::default());
        assert_abs_diff_eq!(out.value().delta_theta_deg, -0.6, epsilon = 1e-12);
    }

    #[test]
    fn single_pair_is_partial_translation() {
        let front = vec![[100.0, 50.0]];
        let back = vec![[90.0, 55.0]];
        let out = coarse_align_points(&front, &back, BoardEdge::Top, 0.0, 0.0, Some(40.0), &CoarseConfig::default());
        assert_eq!(
            out.reason(),
            Some(&Shortfall::TooFewContactPairs { found: 1, needed: 2 })
        );
        assert_eq!(out.value().transform.apply([90.0, 55.0]), [100.0, 50.0]);
    }

    #[test]
    fn inner_edge_faces_the_board() {
        let c = Contact {
            bbox: crate::geometry::Rect::new(10.0, 20.0, 30.0, 90.0),
            center: [20.0, 55.0],
            pass: DetectionPass::Seed,
        };
        assert_eq!(inner_edge_point(&c, BoardEdge::Top), [20.0, 90.0]);
        assert_eq!(inner_edge_point(&c, BoardEdge::Bottom), [20.0, 20.0]);
        assert_eq!(inner_edge_point(&c, BoardEdge::Left), [30.0, 55.0]);
        assert_eq!(inner_edge_point(&c, BoardEdge::Right), [10.0, 55.0]);
    }

    fn detection(centers: &[[f64; 2]], rescued: impl Fn(usize) -> bool) -> DetectionResult {
        let contacts: Vec<Contact> = centers
            .iter()
            .enumerate()
            .map(|(i, &c)| Contact {
                bbox: crate::geometry::Rect::centered(c, 18.0, 70.0),
                center: c,
                pass: if rescued(i) {
                    DetectionPass::Rescue
                } else {
                    DetectionPass::Seed
                },
            })
            .collect();
        let n = centers.len() as f64;
        DetectionResult {
            contacts,
            expected_positions: centers.to_vec(),
            edge: BoardEdge::Top,
            rotation_deg: 0,
            board_bounds: crate::geometry::Rect::new(0.0, 0.0, 1000.0, 700.0),
            search_bounds: crate::geometry::Rect::new(0.0, 0.0, 1000.0, 300.0),
            dpi: Some(360.0),
            dpi_estimated: false,
            line_angle_deg: 0.0,
            line: Some(crate::contacts::ContactLineParams {
                line_pos: centers.iter().map(|c| c[1]).sum::<f64>() / n,
                pitch_px: 40.0,
                start_pos: centers[0][0],
                avg_width: 18.0,
                avg_height: 70.0,
                expected_count: centers.len(),
            }),
        }
    }

    fn shifted(points: &[[f64; 2]], dx: f64, dy: f64) -> Vec<[f64; 2]> {
        points.iter().map(|p| [p[0] + dx, p[1] + dy]).collect()
    }

    #[test]
    fn rows_pair_by_slot_when_observed_sets_differ() {
        let front_pts = row(20, [100.0, 80.0], 40.0);
        let back_pts = shifted(&front_pts, -12.0, 5.0);
        let front = detection(&front_pts, |_| false);
        // Back side only observed slots 6..20; the rest were rescued.
        let back = detection(&back_pts, |i| i < 6);

        let out = coarse_align(&front, &back, &CoarseConfig::default());
        assert!(out.is_complete(), "{:?}", out.reason());
        let c = out.value();
        assert_eq!(c.pairs, (0..20).map(|i| (i, i)).collect::<Vec<_>>());
        assert_eq!(c.method, RotationSource::PairRegression);
        assert_abs_diff_eq!(c.delta_theta_deg, 0.0, epsilon = 1e-9);
        for (f, b) in front_pts.iter().zip(&back_pts) {
            let m = c.transform.apply(*b);
            assert_abs_diff_eq!(m[0], f[0], epsilon = 1e-9);
            assert_abs_diff_eq!(m[1], f[1], epsilon = 1e-9);
        }
    }

    #[test]
    fn rotation_uses_slots_observed_on_both_sides() {
        let front_pts = row(20, [100.0, 80.0], 40.0);
        let truth = AffineTransform::translation(12.0, -5.0)
            .compose(&AffineTransform::rotation_about_deg(0.8, [480.0, 80.0]));
        let Some(inv) = truth.invert() else {
            panic!("rotation must invert");
        };
        let mut back_pts = inv.apply_all(&front_pts);
        // Rescued slots sit on a line that disagrees with the observed ones.
        for p in back_pts.iter_mut().take(6) {
            p[1] += 3.0;
        }
        let front = detection(&front_pts, |i| i >= 17);
        let back = detection(&back_pts, |i| i < 6);

        let out = coarse_align(&front, &back, &CoarseConfig::default());
        let c = out.value();
        assert_eq!(c.pairs.len(), 20);
        assert_eq!(c.method, RotationSource::PairRegression);
        assert_abs_diff_eq!(c.delta_theta_deg, 0.8, epsilon = 0.05);
    }

    #[test]
    fn correspondences_follow_slot_pairs() {
        let front_pts = row(20, [100.0, 80.0], 40.0);
        let back_pts = shifted(&front_pts, -12.0, 5.0);
        let front = detection(&front_pts, |_| false);
        let back = detection(&back_pts, |i| i < 6);
        let c = coarse_align(&front, &back, &CoarseConfig::default()).into_value();

        let corr = contact_correspondences(&front, &back, &c.pairs);
        assert_eq!(corr.len(), 20);
        for (i, p) in corr.iter().enumerate() {
            assert_eq!(p.source, CorrespondenceSource::Contact);
            assert_eq!((p.front_index, p.back_index), (Some(i), Some(i)));
            assert_eq!(p.front, [front_pts[i][0], front_pts[i][1] + 35.0]);
            assert_eq!(p.back, [back_pts[i][0], back_pts[i][1] + 35.0]);
            let m = c.transform.apply(p.back);
            assert_abs_diff_eq!(m[0], p.front[0], epsilon = 1e-9);
            assert_abs_diff_eq!(m[1], p.front[1], epsilon = 1e-9);
        }
    }

    #[test]
    fn rows_of_different_length_are_partial() {
        let front_pts = row(20, [100.0, 80.0], 40.0);
        let back_pts = shifted(&front_pts[1..19], -12.0, 5.0);
        let front = detection(&front_pts, |_| false);
        let back = detection(&back_pts, |_| false);

        let out = coarse_align(&front, &back, &CoarseConfig::default());
        assert_eq!(
            out.reason(),
            Some(&Shortfall::ContactRowMismatch { front: 20, back: 18 })
        );
        let c = out.value();
        assert_eq!(c.pairs.len(), 18);
        assert!(c.pairs.iter().all(|&(f, b)| f == b + 1));
        let m = c.transform.apply(back_pts[0]);
        assert_abs_diff_eq!(m[0], front_pts[1][0], epsilon = 1e-6);
        assert_abs_diff_eq!(m[1], front_pts[1][1], epsilon = 1e-6);
    }
}
