//! Robust contact filtering.
//!
//! Two independent passes over a detected row (frame coordinates, row
//! running along +x):
//! - outlier removal by line residual and size deviation,
//! - width normalization for boxes that bled into neighbouring copper.

use serde::{Deserialize, Serialize};

use super::Contact;
use crate::geometry::{fit_line, median_of, Rect};

/// Configuration for robust contact filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobustFilterConfig {
    /// Largest fraction of the input that outlier removal may drop.
    pub max_remove_fraction: f64,
    /// Outlier removal never leaves fewer contacts than this (floored at 2).
    pub min_keep: usize,
    /// Weight of width/height deviation relative to line residual.
    pub size_weight: f64,
    /// Combined score above which a contact is an outlier candidate.
    pub score_threshold: f64,
    /// Width ratio (to median) above which the box is trimmed.
    pub trim_width_ratio: f64,
    /// Width ratio above which the contact is rejected instead.
    pub reject_wide_ratio: f64,
    /// Width ratio below which the contact is rejected.
    pub reject_narrow_ratio: f64,
}

impl Default for RobustFilterConfig {
    fn default() -> Self {
        Self {
            max_remove_fraction: 0.10,
            min_keep: 2,
            size_weight: 2.0,
            score_threshold: 0.35,
            trim_width_ratio: 1.15,
            reject_wide_ratio: 1.30,
            reject_narrow_ratio: 0.75,
        }
    }
}

/// Drop the worst-scoring contacts.
///
/// Score = |line residual| / median height + `size_weight` × relative
/// width/height deviation from the medians. Contacts above
/// `score_threshold` are dropped worst-first, capped at
/// `max_remove_fraction` of the input and at `min_keep` survivors.
pub fn remove_outliers(contacts: &[Contact], config: &RobustFilterConfig) -> Vec<Contact> {
    let n = contacts.len();
    let min_keep = config.min_keep.max(2);
    if n <= min_keep {
        return contacts.to_vec();
    }

    let xs: Vec<f64> = contacts.iter().map(|c| c.center[0]).collect();
    let ys: Vec<f64> = contacts.iter().map(|c| c.center[1]).collect();
    let Some(line) = fit_line(&xs, &ys) else {
        return contacts.to_vec();
    };
    let med_w = median_of(contacts.iter().map(|c| c.bbox.width())).unwrap_or(1.0).max(1e-6);
    let med_h = median_of(contacts.iter().map(|c| c.bbox.height())).unwrap_or(1.0).max(1e-6);

    let mut scored: Vec<(usize, f64)> = contacts
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let pos = (c.center[1] - line.eval(c.center[0])).abs() / med_h;
            let size = (c.bbox.width() - med_w).abs() / med_w + (c.bbox.height() - med_h).abs() / med_h;
            (i, pos + config.size_weight * size)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));

    let budget = ((n as f64 * config.max_remove_fraction).floor() as usize).min(n - min_keep);
    let mut drop = vec![false; n];
    for &(i, score) in scored.iter().take(budget) {
        if score <= config.score_threshold {
            break;
        }
        drop[i] = true;
    }

    let kept: Vec<Contact> = contacts
        .iter()
        .zip(&drop)
        .filter(|&(_, &d)| !d)
        .map(|(c, _)| c.clone())
        .collect();
    if kept.len() < n {
        tracing::debug!("outlier filter removed {} of {} contacts", n - kept.len(), n);
    }
    kept
}

/// Trim or reject contacts whose width departs from the median.
///
/// For a box wider than `trim_width_ratio` × median, the side whose edge
/// lies further out than the center and median width imply is cut back to
/// that implied position; the other side is left alone.
pub fn normalize_widths(contacts: &[Contact], config: &RobustFilterConfig) -> Vec<Contact> {
    let Some(med_w) = median_of(contacts.iter().map(|c| c.bbox.width())) else {
        return Vec::new();
    };
    if med_w <= 0.0 {
        return contacts.to_vec();
    }

    let mut out = Vec::with_capacity(contacts.len());
    for c in contacts {
        let ratio = c.bbox.width() / med_w;
        if ratio > config.reject_wide_ratio || ratio < config.reject_narrow_ratio {
            tracing::debug!(
                "rejecting contact at x={:.1}: width ratio {:.2}",
                c.center[0],
                ratio
            );
            continue;
        }
        if ratio <= config.trim_width_ratio {
            out.push(c.clone());
            continue;
        }

        let implied_left = c.center[0] - 0.5 * med_w;
        let implied_right = c.center[0] + 0.5 * med_w;
        let left_excess = implied_left - c.bbox.x0;
        let right_excess = c.bbox.x1 - implied_right;
        let bbox = if left_excess >= right_excess {
            Rect::new(c.bbox.x1 - med_w, c.bbox.y0, c.bbox.x1, c.bbox.y1)
        } else {
            Rect::new(c.bbox.x0, c.bbox.y0, c.bbox.x0 + med_w, c.bbox.y1)
        };
        out.push(Contact {
            center: [bbox.center()[0], c.center[1]],
            bbox,
            pass: c.pass,
        });
    }
    out
}

/// Both passes: outliers first, then width normalization.
pub fn filter_contacts(contacts: &[Contact], config: &RobustFilterConfig) -> Vec<Contact> {
    let kept = remove_outliers(contacts, config);
    normalize_widths(&kept, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::DetectionPass;

    fn contact(cx: f64, cy: f64, w: f64, h: f64) -> Contact {
        Contact {
            bbox: Rect::centered([cx, cy], w, h),
            center: [cx, cy],
            pass: DetectionPass::Seed,
        }
    }

    fn row(n: usize) -> Vec<Contact> {
        (0..n).map(|i| contact(100.0 + 60.0 * i as f64, 50.0, 38.0, 160.0)).collect()
    }

    #[test]
    fn removal_respects_fraction_budget() {
        let mut contacts = row(20);
        for i in [2, 5, 9, 14] {
            contacts[i] = contact(contacts[i].center[0], 50.0, 90.0, 160.0);
        }
        let config = RobustFilterConfig::default();
        let kept = remove_outliers(&contacts, &config);
        assert_eq!(kept.len(), 18, "at most 10% of 20 may be dropped");
        assert!(kept.iter().filter(|c| c.bbox.width() > 80.0).count() == 2);
    }

    #[test]
    fn removal_never_goes_below_two() {
        let contacts = vec![
            contact(0.0, 0.0, 10.0, 40.0),
            contact(60.0, 30.0, 50.0, 10.0),
            contact(120.0, -20.0, 5.0, 90.0),
        ];
        let config = RobustFilterConfig {
            max_remove_fraction: 1.0,
            ..Default::default()
        };
        let kept = remove_outliers(&contacts, &config);
        assert!(kept.len() >= 2);
        assert!(kept.len() as f64 >= contacts.len() as f64 * (1.0 - config.max_remove_fraction));
    }

    #[test]
    fn clean_row_is_untouched() {
        let contacts = row(12);
        assert_eq!(filter_contacts(&contacts, &RobustFilterConfig::default()), contacts);
    }

    #[test]
    fn wide_contact_trimmed_on_bleeding_side() {
        let mut contacts = row(9);
        // Box bled 8 px to the right; moment center stays near the true one.
        let c = &contacts[4];
        let bleed = Contact {
            bbox: Rect::new(c.bbox.x0, c.bbox.y0, c.bbox.x1 + 8.0, c.bbox.y1),
            center: [c.center[0] + 1.0, c.center[1]],
            pass: c.pass,
        };
        contacts[4] = bleed;
        let out = normalize_widths(&contacts, &RobustFilterConfig::default());
        assert_eq!(out.len(), 9);
        let fixed = &out[4];
        assert_eq!(fixed.bbox.x0, contacts[4].bbox.x0);
        assert!((fixed.bbox.width() - 38.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_widths_rejected() {
        let mut contacts = row(9);
        contacts[1] = contact(contacts[1].center[0], 50.0, 60.0, 160.0);
        contacts[7] = contact(contacts[7].center[0], 50.0, 20.0, 160.0);
        let out = normalize_widths(&contacts, &RobustFilterConfig::default());
        assert_eq!(out.len(), 7);
    }
}
