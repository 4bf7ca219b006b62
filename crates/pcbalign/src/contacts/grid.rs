//! Pitch estimation and grid run search over a candidate row.

use serde::{Deserialize, Serialize};

use super::{Contact, ContactLineParams};
use crate::geometry::{fit_line, median_of};

/// Grid fitting tolerances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Allowed deviation from the next grid slot, as a fraction of pitch.
    pub pitch_tolerance: f64,
    /// Empty slots tolerated between two consecutive run members.
    pub max_gaps: usize,
    /// Accepted contact size relative to the reference size.
    pub size_ratio_min: f64,
    pub size_ratio_max: f64,
    /// Histogram bin width for spacing votes, as a fraction of the median spacing.
    pub spacing_bin_frac: f64,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            pitch_tolerance: 0.2,
            max_gaps: 2,
            size_ratio_min: 0.5,
            size_ratio_max: 1.6,
            spacing_bin_frac: 0.05,
        }
    }
}

/// Best grid run.
#[derive(Debug, Clone, PartialEq)]
pub struct GridFit {
    /// Run members, ordered by x.
    pub members: Vec<Contact>,
    /// Grid slot of every member, first member at slot 0.
    pub slots: Vec<usize>,
    pub params: ContactLineParams,
    /// Least-squares slope of member y against x.
    pub slope: f64,
}

/// Modal spacing between x-neighbours.
///
/// Spacings are voted into bins of `spacing_bin_frac` × median spacing; the
/// winning bin and its direct neighbours are averaged by median.
pub fn estimate_pitch(xs_sorted: &[f64], config: &GridConfig) -> Option<f64> {
    let gaps: Vec<f64> = xs_sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 1.0)
        .collect();
    let med = median_of(gaps.iter().copied())?;
    let bin = (config.spacing_bin_frac * med).max(1.0);

    let mut counts: std::collections::BTreeMap<i64, usize> = std::collections::BTreeMap::new();
    for d in &gaps {
        *counts.entry((d / bin).round() as i64).or_default() += 1;
    }
    let support = |k: i64| -> usize {
        (k - 1..=k + 1).map(|j| counts.get(&j).copied().unwrap_or(0)).sum()
    };
    // Ties go to the smaller spacing; multiples of the pitch come from gaps.
    let (&mode, _) = counts
        .iter()
        .max_by(|(ka, _), (kb, _)| support(**ka).cmp(&support(**kb)).then(kb.cmp(ka)))?;
    median_of(
        gaps.iter()
            .copied()
            .filter(|d| ((d / bin).round() as i64 - mode).abs() <= 1),
    )
}

fn size_ok(c: &Contact, ref_w: f64, ref_h: f64, config: &GridConfig) -> bool {
    let rw = c.bbox.width() / ref_w;
    let rh = c.bbox.height() / ref_h;
    (config.size_ratio_min..=config.size_ratio_max).contains(&rw)
        && (config.size_ratio_min..=config.size_ratio_max).contains(&rh)
}

/// Longest run of candidates that follows `pitch`, trying every start.
fn longest_run(
    sorted: &[Contact],
    valid: &[bool],
    pitch: f64,
    config: &GridConfig,
) -> (Vec<usize>, Vec<usize>) {
    let tol = config.pitch_tolerance * pitch;
    let mut best: (Vec<usize>, Vec<usize>) = (Vec::new(), Vec::new());

    for start in 0..sorted.len() {
        if !valid[start] {
            continue;
        }
        let mut members = vec![start];
        let mut slots = vec![0usize];
        let mut cur = start;
        'run: loop {
            for step in 1..=config.max_gaps + 1 {
                let target = sorted[cur].center[0] + step as f64 * pitch;
                let hit = (cur + 1..sorted.len())
                    .filter(|&j| valid[j])
                    .take_while(|&j| sorted[j].center[0] <= target + tol)
                    .filter(|&j| (sorted[j].center[0] - target).abs() <= tol)
                    .min_by(|&a, &b| {
                        (sorted[a].center[0] - target)
                            .abs()
                            .total_cmp(&(sorted[b].center[0] - target).abs())
                    });
                if let Some(j) = hit {
                    members.push(j);
                    slots.push(slots[slots.len() - 1] + step);
                    cur = j;
                    continue 'run;
                }
            }
            break;
        }
        if members.len() > best.0.len() {
            best = (members, slots);
        }
    }
    best
}

/// Fit an evenly pitched row through `candidates`.
///
/// `prior_pitch` (from a known DPI) replaces the spacing histogram;
/// `ref_size` (`[width, height]`) enables size validation. With `None` the
/// candidates' median size is the reference. Returns `None` below two members.
pub fn fit_grid(
    candidates: &[Contact],
    prior_pitch: Option<f64>,
    ref_size: Option<[f64; 2]>,
    expected_count: usize,
    config: &GridConfig,
) -> Option<GridFit> {
    if candidates.len() < 2 {
        return None;
    }
    let mut sorted = candidates.to_vec();
    sorted.sort_by(|a, b| a.center[0].total_cmp(&b.center[0]));

    let [ref_w, ref_h] = match ref_size {
        Some(s) => s,
        None => [
            median_of(sorted.iter().map(|c| c.bbox.width()))?,
            median_of(sorted.iter().map(|c| c.bbox.height()))?,
        ],
    };
    if ref_w <= 0.0 || ref_h <= 0.0 {
        return None;
    }
    let valid: Vec<bool> = sorted.iter().map(|c| size_ok(c, ref_w, ref_h, config)).collect();

    let xs: Vec<f64> = sorted
        .iter()
        .zip(&valid)
        .filter(|&(_, &v)| v)
        .map(|(c, _)| c.center[0])
        .collect();
    let pitch = match prior_pitch.filter(|p| p.is_finite() && *p > 1.0) {
        Some(p) => p,
        None => estimate_pitch(&xs, config)?,
    };

    let (members_idx, slots) = longest_run(&sorted, &valid, pitch, config);
    if members_idx.len() < 2 {
        return None;
    }
    let members: Vec<Contact> = members_idx.iter().map(|&i| sorted[i].clone()).collect();

    // x = start + pitch * slot
    let slot_f: Vec<f64> = slots.iter().map(|&s| s as f64).collect();
    let mx: Vec<f64> = members.iter().map(|c| c.center[0]).collect();
    let grid = fit_line(&slot_f, &mx)?;
    let pitch_fit = if grid.slope > 0.5 * pitch { grid.slope } else { pitch };

    let my: Vec<f64> = members.iter().map(|c| c.center[1]).collect();
    let row = fit_line(&mx, &my)?;
    let n = members.len() as f64;

    let params = ContactLineParams {
        line_pos: my.iter().sum::<f64>() / n,
        pitch_px: pitch_fit,
        start_pos: grid.intercept,
        avg_width: members.iter().map(|c| c.bbox.width()).sum::<f64>() / n,
        avg_height: members.iter().map(|c| c.bbox.height()).sum::<f64>() / n,
        expected_count,
    };
    tracing::debug!(
        "grid fit: {} members, pitch {:.2} px, line y {:.1}",
        members.len(),
        params.pitch_px,
        params.line_pos
    );
    Some(GridFit {
        members,
        slots,
        params,
        slope: row.slope,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::DetectionPass;
    use crate::geometry::Rect;
    use approx::assert_relative_eq;

    fn contact(cx: f64, cy: f64) -> Contact {
        Contact {
            bbox: Rect::centered([cx, cy], 24.0, 110.0),
            center: [cx, cy],
            pass: DetectionPass::Seed,
        }
    }

    #[test]
    fn modal_pitch_ignores_gaps_and_noise() {
        let xs = [
            100.0, 140.2, 179.8, 220.1, 300.0, 340.3, 380.0, 420.1, 455.0, 500.0,
        ];
        let p = estimate_pitch(&xs, &GridConfig::default()).unwrap();
        assert!((p - 40.0).abs() < 0.5, "pitch {p}");
    }

    #[test]
    fn run_skips_false_positive_and_bridges_gap() {
        let mut cands: Vec<Contact> = (0..12)
            .filter(|&i| i != 5)
            .map(|i| contact(200.0 + 40.0 * i as f64, 60.0))
            .collect();
        // Off-grid blob and a far stray.
        cands.push(contact(417.0, 60.0));
        cands.push(contact(1200.0, 62.0));
        let fit = fit_grid(&cands, None, None, 12, &GridConfig::default()).unwrap();
        assert_eq!(fit.members.len(), 11);
        assert_eq!(*fit.slots.last().unwrap(), 11);
        assert_relative_eq!(fit.params.pitch_px, 40.0, epsilon = 1e-9);
        assert_relative_eq!(fit.params.start_pos, 200.0, epsilon = 1e-9);
        assert_relative_eq!(fit.params.line_pos, 60.0, epsilon = 1e-9);
    }

    #[test]
    fn prior_pitch_and_size_validation() {
        let mut cands: Vec<Contact> = (0..6).map(|i| contact(50.0 + 60.0 * i as f64, 30.0)).collect();
        cands[2].bbox = Rect::centered(cands[2].center, 80.0, 110.0);
        let fit = fit_grid(&cands, Some(60.0), Some([24.0, 110.0]), 6, &GridConfig::default()).unwrap();
        assert_eq!(fit.members.len(), 5);
        assert!(fit.members.iter().all(|c| c.bbox.width() < 30.0));
    }

    #[test]
    fn two_members_are_enough() {
        let cands = vec![contact(10.0, 5.0), contact(50.0, 5.0)];
        let fit = fit_grid(&cands, Some(40.0), None, 20, &GridConfig::default()).unwrap();
        assert_eq!(fit.members.len(), 2);
        assert_eq!(fit.params.expected_count, 20);
        assert!(fit_grid(&cands[..1], Some(40.0), None, 20, &GridConfig::default()).is_none());
    }
}
