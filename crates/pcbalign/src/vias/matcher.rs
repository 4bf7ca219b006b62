//! Localized delta voting between two point sets.
//!
//! The relative transform carries rotation and anisotropic scale, so the
//! offset between corresponding points drifts across the board. Voting is
//! therefore done per image corner over the nearest points only: every
//! front/back delta among them goes into a 2-D histogram, the peak bin
//! (3×3 neighbourhood sum) gives the local offset, and pairs close to it are
//! assigned one-to-one, nearest first.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::geometry::{dist, dist2};

/// Corner voting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Points per side taken around each corner.
    pub per_corner: usize,
    /// Histogram bin size (pixels).
    pub bin_px: f64,
    /// Minimum 3×3 vote sum for an accepted peak.
    pub min_votes: usize,
    /// Largest plausible offset in inches (scaled by DPI).
    pub max_offset_in: f64,
    /// Largest plausible offset in pixels when DPI is unknown.
    pub max_offset_px: f64,
    /// Deltas within this distance of the peak are match candidates (pixels).
    pub match_radius_px: f64,
    /// Append matched contact inner edges as an extra correspondence group.
    pub use_contacts: bool,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            per_corner: 40,
            bin_px: 5.0,
            min_votes: 4,
            max_offset_in: 0.5,
            max_offset_px: 150.0,
            match_radius_px: 8.0,
            use_contacts: true,
        }
    }
}

impl MatcherConfig {
    pub fn max_offset(&self, dpi: Option<f64>) -> f64 {
        match dpi.filter(|d| d.is_finite() && *d > 0.0) {
            Some(dpi) => self.max_offset_in * dpi,
            None => self.max_offset_px,
        }
    }
}

/// Indices of the `n` points nearest to `corner`.
fn nearest_to(points: &[[f64; 2]], corner: [f64; 2], n: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..points.len()).collect();
    idx.sort_by(|&a, &b| dist2(points[a], corner).total_cmp(&dist2(points[b], corner)));
    idx.truncate(n);
    idx
}

fn bin_of(d: [f64; 2], bin: f64) -> (i64, i64) {
    ((d[0] / bin).round() as i64, (d[1] / bin).round() as i64)
}

/// Peak offset of a delta set, refined as the mean of the deltas in the
/// winning 3×3 neighbourhood. Returns the offset and its vote sum.
fn vote_peak(deltas: &[[f64; 2]], bin: f64) -> Option<([f64; 2], usize)> {
    let mut hist: HashMap<(i64, i64), usize> = HashMap::new();
    for d in deltas {
        *hist.entry(bin_of(*d, bin)).or_insert(0) += 1;
    }
    let neighbourhood = |k: (i64, i64)| -> usize {
        let mut s = 0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                s += hist.get(&(k.0 + dx, k.1 + dy)).copied().unwrap_or(0);
            }
        }
        s
    };

    let mut best: Option<((i64, i64), usize, f64)> = None;
    for &k in hist.keys() {
        let votes = neighbourhood(k);
        let mag = ((k.0 * k.0 + k.1 * k.1) as f64).sqrt();
        let better = match best {
            None => true,
            Some((bk, bv, bm)) => {
                votes > bv
                    || (votes == bv && mag < bm)
                    || (votes == bv && mag == bm && k < bk)
            }
        };
        if better {
            best = Some((k, votes, mag));
        }
    }
    let (k, votes, _) = best?;

    let mut sum = [0.0, 0.0];
    let mut n = 0usize;
    for d in deltas {
        let b = bin_of(*d, bin);
        if (b.0 - k.0).abs() <= 1 && (b.1 - k.1).abs() <= 1 {
            sum[0] += d[0];
            sum[1] += d[1];
            n += 1;
        }
    }
    (n > 0).then(|| ([sum[0] / n as f64, sum[1] / n as f64], votes))
}

/// Match `front` to `back` points (same frame, up to local offsets).
///
/// Returns `(front_index, back_index)` pairs, one-to-one across all corners.
/// Deltas are `front - back`.
pub fn match_points(
    front: &[[f64; 2]],
    back: &[[f64; 2]],
    dpi: Option<f64>,
    config: &MatcherConfig,
) -> Vec<(usize, usize)> {
    if front.is_empty() || back.is_empty() {
        return Vec::new();
    }
    let (mut x0, mut y0, mut x1, mut y1) = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
    for p in front.iter().chain(back) {
        x0 = x0.min(p[0]);
        y0 = y0.min(p[1]);
        x1 = x1.max(p[0]);
        y1 = y1.max(p[1]);
    }
    let corners = [[x0, y0], [x1, y0], [x0, y1], [x1, y1]];
    let max_offset = config.max_offset(dpi);
    let bin = config.bin_px.max(0.5);

    let mut used_front = vec![false; front.len()];
    let mut used_back = vec![false; back.len()];
    let mut pairs = Vec::new();

    for (ci, corner) in corners.iter().enumerate() {
        let fi = nearest_to(front, *corner, config.per_corner);
        let bi = nearest_to(back, *corner, config.per_corner);

        let mut deltas = Vec::with_capacity(fi.len() * bi.len());
        let mut owners = Vec::with_capacity(fi.len() * bi.len());
        for &f in &fi {
            for &b in &bi {
                deltas.push([front[f][0] - back[b][0], front[f][1] - back[b][1]]);
                owners.push((f, b));
            }
        }

        let Some((peak, votes)) = vote_peak(&deltas, bin) else {
            continue;
        };
        let magnitude = peak[0].hypot(peak[1]);
        if votes < config.min_votes || magnitude > max_offset {
            tracing::debug!(
                "corner {}: peak ({:.1}, {:.1}) rejected, votes={}, |d|={:.1}",
                ci,
                peak[0],
                peak[1],
                votes,
                magnitude
            );
            continue;
        }

        let mut cands: Vec<(f64, usize, usize)> = deltas
            .iter()
            .zip(&owners)
            .filter_map(|(d, &(f, b))| {
                let e = dist(*d, peak);
                (e <= config.match_radius_px).then_some((e, f, b))
            })
            .collect();
        cands.sort_by(|a, b| a.0.total_cmp(&b.0));

        let before = pairs.len();
        for (_, f, b) in cands {
            if !used_front[f] && !used_back[b] {
                used_front[f] = true;
                used_back[b] = true;
                pairs.push((f, b));
            }
        }
        tracing::debug!(
            "corner {}: peak ({:.1}, {:.1}) with {} votes, {} new pairs",
            ci,
            peak[0],
            peak[1],
            votes,
            pairs.len() - before
        );
    }
    pairs
}
