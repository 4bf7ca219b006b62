//! Grid rescue: emit a complete, evenly pitched contact row.
//!
//! Candidate slots are generated at every pitch multiple across the raster,
//! anchored on the first seed. Each slot is scored by how close its mean
//! colour is to the seeds' reference colour and by brightness; slots holding
//! an observed seed get a bonus. The best `expected_count` slots win and all
//! share one line coordinate.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::{Contact, ContactLineParams, DetectionPass};
use crate::geometry::Rect;
use crate::raster::mean_rgb;

/// Largest possible RGB distance.
const RGB_DIAGONAL: f64 = 441.672_955_930_063_7;

/// Scoring weights for grid rescue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RescueConfig {
    /// Weight of normalized brightness in the slot score.
    pub brightness_weight: f64,
    /// Score bonus for a slot that holds an observed seed.
    pub seed_bonus: f64,
    /// Seed-to-slot distance (fraction of pitch) counting as a hit.
    pub seed_match_frac: f64,
    /// Fraction of the contact box sampled for colour.
    pub sample_frac: f64,
}

impl Default for RescueConfig {
    fn default() -> Self {
        Self {
            brightness_weight: 0.5,
            seed_bonus: 1.0,
            seed_match_frac: 0.3,
            sample_frac: 0.6,
        }
    }
}

struct Slot {
    x: f64,
    seed: Option<DetectionPass>,
    score: f64,
}

/// Rebuild the row from `seeds` and the fitted line.
///
/// Always returns exactly `line.expected_count` contacts when at least two
/// seeds are given, ordered by x and sharing `line.line_pos`.
pub fn rescue_grid(
    img: &RgbImage,
    seeds: &[Contact],
    line: &ContactLineParams,
    config: &RescueConfig,
) -> Vec<Contact> {
    let count = line.expected_count;
    if seeds.len() < 2 || count == 0 || !(line.pitch_px > 0.0) {
        return Vec::new();
    }
    let Some(anchor) = seeds
        .iter()
        .map(|s| s.center[0])
        .min_by(|a, b| a.total_cmp(b))
    else {
        return Vec::new();
    };

    let pitch = line.pitch_px;
    let width = img.width() as f64;
    let half_w = 0.5 * line.avg_width;
    let k_min = -((anchor - half_w) / pitch).floor() as i64;
    let k_max = ((width - 1.0 - half_w - anchor) / pitch).floor() as i64;
    let mut ks: Vec<i64> = (k_min.min(0)..=k_max.max(0)).collect();
    // Narrow rasters: extend past the right border so the count still holds.
    let mut next = ks.last().copied().unwrap_or(0) + 1;
    while ks.len() < count {
        ks.push(next);
        next += 1;
    }

    let sample_box = |x: f64| {
        Rect::centered(
            [x, line.line_pos],
            (line.avg_width * config.sample_frac).max(1.0),
            (line.avg_height * config.sample_frac).max(1.0),
        )
    };
    let match_tol = config.seed_match_frac * pitch;

    let mut slots: Vec<Slot> = ks
        .iter()
        .map(|&k| {
            let x = anchor + k as f64 * pitch;
            let seed = seeds
                .iter()
                .filter(|s| (s.center[0] - x).abs() <= match_tol)
                .min_by(|a, b| (a.center[0] - x).abs().total_cmp(&(b.center[0] - x).abs()))
                .map(|s| s.pass);
            Slot {
                x,
                seed,
                score: f64::NEG_INFINITY,
            }
        })
        .collect();

    let seed_colours: Vec<[f64; 3]> = slots
        .iter()
        .filter(|s| s.seed.is_some())
        .filter_map(|s| mean_rgb(img, &sample_box(s.x)))
        .collect();
    let reference = if seed_colours.is_empty() {
        [255.0, 200.0, 80.0]
    } else {
        let n = seed_colours.len() as f64;
        let mut acc = [0.0; 3];
        for c in &seed_colours {
            for i in 0..3 {
                acc[i] += c[i] / n;
            }
        }
        acc
    };

    for slot in &mut slots {
        let colour = mean_rgb(img, &sample_box(slot.x));
        let mut score = match colour {
            Some(c) => {
                let d = ((c[0] - reference[0]).powi(2)
                    + (c[1] - reference[1]).powi(2)
                    + (c[2] - reference[2]).powi(2))
                .sqrt();
                let brightness = (c[0] + c[1] + c[2]) / (3.0 * 255.0);
                (1.0 - d / RGB_DIAGONAL) + config.brightness_weight * brightness
            }
            None => -1.0,
        };
        if slot.seed.is_some() {
            score += config.seed_bonus;
        }
        slot.score = score;
    }

    slots.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.x.total_cmp(&b.x)));
    slots.truncate(count);
    slots.sort_by(|a, b| a.x.total_cmp(&b.x));

    let rescued = slots.iter().filter(|s| s.seed.is_none()).count();
    tracing::debug!("grid rescue: {} slots, {} filled from grid", count, rescued);

    slots
        .into_iter()
        .map(|s| Contact {
            bbox: Rect::centered([s.x, line.line_pos], line.avg_width, line.avg_height),
            center: [s.x, line.line_pos],
            pass: s.seed.unwrap_or(DetectionPass::Rescue),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_contact_row, ContactRow};
    use image::Rgb;

    fn seed(x: f64, y: f64) -> Contact {
        Contact {
            bbox: Rect::centered([x, y], 20.0, 80.0),
            center: [x, y + 0.3],
            pass: DetectionPass::Seed,
        }
    }

    #[test]
    fn rescue_returns_exact_count_on_one_line() {
        let row = ContactRow {
            start: [60.0, 70.0],
            pitch: 40.0,
            count: 14,
            size: [20.0, 80.0],
        };
        let img = draw_contact_row(700, 200, [30, 90, 40], [215, 170, 60], &row);
        let seeds = vec![seed(140.0, 70.0), seed(300.0, 70.2), seed(420.0, 69.8)];
        let line = ContactLineParams {
            line_pos: 70.0,
            pitch_px: 40.0,
            start_pos: 140.0,
            avg_width: 20.0,
            avg_height: 80.0,
            expected_count: 14,
        };
        let out = rescue_grid(&img, &seeds, &line, &RescueConfig::default());
        assert_eq!(out.len(), 14);
        for c in &out {
            assert!((c.center[1] - out[0].center[1]).abs() <= 0.5);
        }
        // Painted row spans x = 60..580.
        assert!((out[0].center[0] - 60.0).abs() < 1e-9);
        assert!((out[13].center[0] - 580.0).abs() < 1e-9);
        assert_eq!(out.iter().filter(|c| c.pass == DetectionPass::Seed).count(), 3);
    }

    #[test]
    fn narrow_raster_still_yields_count() {
        let img = RgbImage::from_pixel(100, 50, Rgb([20, 20, 20]));
        let seeds = vec![seed(10.0, 20.0), seed(30.0, 20.0)];
        let line = ContactLineParams {
            line_pos: 20.0,
            pitch_px: 20.0,
            start_pos: 10.0,
            avg_width: 8.0,
            avg_height: 20.0,
            expected_count: 9,
        };
        let out = rescue_grid(&img, &seeds, &line, &RescueConfig::default());
        assert_eq!(out.len(), 9);
    }

    #[test]
    fn single_seed_yields_nothing() {
        let img = RgbImage::new(50, 50);
        let line = ContactLineParams {
            line_pos: 10.0,
            pitch_px: 10.0,
            start_pos: 0.0,
            avg_width: 4.0,
            avg_height: 8.0,
            expected_count: 4,
        };
        assert!(rescue_grid(&img, &[seed(5.0, 10.0)], &line, &RescueConfig::default()).is_empty());
    }
}
