//! Named detection profiles and the escalation loop over them.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::detect::{detect_raster_vias, ViaDetectConfig, ViaDetectParams, ViaRaster};
use super::filter::reject_dense_vias;
use super::matcher::{match_points, MatcherConfig};
use super::{renumber, via_centers, Via};
use crate::affine::AffineTransform;

/// Via detection profile, from most to least selective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViaProfile {
    Strict,
    Relaxed,
    Permissive,
}

impl ViaProfile {
    pub const ORDER: [ViaProfile; 3] = [ViaProfile::Strict, ViaProfile::Relaxed, ViaProfile::Permissive];

    /// Detection parameters for this profile over a pixel radius range.
    pub fn params(self, radius_px: [f64; 2], bright_core: bool) -> ViaDetectParams {
        let (contrast, min_circularity, annulus_contrast) = match self {
            ViaProfile::Strict => (35.0, 0.75, 30.0),
            ViaProfile::Relaxed => (22.0, 0.60, 18.0),
            ViaProfile::Permissive => (12.0, 0.45, 8.0),
        };
        ViaDetectParams {
            radius_min_px: radius_px[0],
            radius_max_px: radius_px[1],
            contrast,
            min_circularity,
            annulus_contrast,
            bright_core,
        }
    }
}

impl std::fmt::Display for ViaProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViaProfile::Strict => write!(f, "strict"),
            ViaProfile::Relaxed => write!(f, "relaxed"),
            ViaProfile::Permissive => write!(f, "permissive"),
        }
    }
}

/// Outcome of the profile loop: the vias of the chosen profile.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRun {
    pub profile: ViaProfile,
    pub front: Vec<Via>,
    pub back: Vec<Via>,
    /// Corner-vote matches between front and coarse-mapped back vias.
    pub quick_matches: usize,
    /// Profiles actually run.
    pub attempts: usize,
}

fn quick_match(front: &[Via], back: &[Via], coarse: &AffineTransform, dpi: Option<f64>, matcher: &MatcherConfig) -> usize {
    if front.is_empty() || back.is_empty() {
        return 0;
    }
    let mapped = coarse.apply_all(&via_centers(back));
    match_points(&via_centers(front), &mapped, dpi, matcher).len()
}

/// Run the configured profiles in order on both sides.
///
/// Each profile runs the four variants (standard/bright-core × front/back)
/// concurrently. The loop stops at the first profile whose quick-match
/// count reaches `config.quick_match_min`; otherwise the profile with the
/// most quick matches is returned.
pub fn run_profiles(
    front: &RgbImage,
    back: &RgbImage,
    coarse: &AffineTransform,
    dpi: Option<f64>,
    config: &ViaDetectConfig,
    matcher: &MatcherConfig,
) -> ProfileRun {
    let radius = config.radius_range_px(dpi);
    let dense_r = config.dense_radius_px(dpi);
    let (front_raster, back_raster) = rayon::join(
        || ViaRaster::new(front, radius[1], config.background_sigma_scale),
        || ViaRaster::new(back, radius[1], config.background_sigma_scale),
    );

    let profiles = if config.profiles.is_empty() {
        ViaProfile::ORDER.to_vec()
    } else {
        config.profiles.clone()
    };

    let mut best: Option<ProfileRun> = None;
    for (attempt, &profile) in profiles.iter().enumerate() {
        let params = profile.params(radius, config.bright_core);
        let detect = |raster: &ViaRaster| {
            let vias = detect_raster_vias(raster, &params, config.merge_radius_px);
            let mut kept = reject_dense_vias(vias, dense_r, config.dense_max_neighbours);
            renumber(&mut kept);
            kept
        };
        let (f, b) = rayon::join(|| detect(&front_raster), || detect(&back_raster));
        let quick = quick_match(&f, &b, coarse, dpi, matcher);
        tracing::info!(
            "via profile {}: front={}, back={}, quick matches={}",
            profile,
            f.len(),
            b.len(),
            quick
        );

        let run = ProfileRun {
            profile,
            front: f,
            back: b,
            quick_matches: quick,
            attempts: attempt + 1,
        };
        if quick >= config.quick_match_min {
            return run;
        }
        best = match best {
            Some(prev) if prev.quick_matches >= run.quick_matches => Some(ProfileRun {
                attempts: run.attempts,
                ..prev
            }),
            _ => Some(run),
        };
    }

    best.unwrap_or(ProfileRun {
        profile: ViaProfile::Strict,
        front: Vec::new(),
        back: Vec::new(),
        quick_matches: 0,
        attempts: 0,
    })
}
