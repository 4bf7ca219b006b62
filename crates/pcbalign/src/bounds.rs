//! Board silhouette isolation and rotation estimate.
//!
//! The scanner background is sampled from small patches along all four image
//! edges (corners skipped, they carry lid shadows and scanner artifacts).
//! The patch with median brightness stands in for the background colour, so
//! a minority of patches landing on black borders or on the board itself do
//! not matter. Pixels differing from it form the board mask; the largest
//! plausible region's minimum-area rectangle gives crop and angle.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::morphology;
use serde::{Deserialize, Serialize};

use crate::blob::{label_regions, row_extremes};
use crate::error::{ensure_non_empty, AlignError};
use crate::geometry::{fold_to_quarter_deg, min_area_rect, MinAreaRect, Rect};
use crate::outcome::{Outcome, Shortfall};
use crate::raster::{downsample, mean_rgb};

/// Configuration for board bounds detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundsConfig {
    /// Longest side of the working copy (pixels).
    pub max_side: u32,
    /// Background patch side length on the working copy (pixels).
    pub patch_size: u32,
    /// Patches sampled per image edge.
    pub patches_per_edge: usize,
    /// Fraction of each edge length skipped at both corners.
    pub corner_skip_frac: f64,
    /// Per-channel absolute difference marking a board pixel.
    pub diff_threshold: u8,
    /// Background luma below which the background counts as dark.
    pub dark_background_luma: f64,
    /// Difference threshold used on dark backgrounds.
    pub dark_diff_threshold: u8,
    /// Structuring radius for close-then-open cleanup (pixels, L∞).
    pub morph_radius: u8,
    /// Regions covering more than this fraction of the image are rejected.
    pub max_region_frac: f64,
    /// Safety margin around the crop as a fraction of the longer board side.
    pub crop_margin_frac: f64,
    /// Minimum board extent per dimension as a fraction of the image.
    pub min_coverage: f64,
}

impl Default for BoundsConfig {
    fn default() -> Self {
        Self {
            max_side: 1500,
            patch_size: 8,
            patches_per_edge: 12,
            corner_skip_frac: 0.08,
            diff_threshold: 30,
            dark_background_luma: 60.0,
            dark_diff_threshold: 45,
            morph_radius: 2,
            max_region_frac: 0.9,
            crop_margin_frac: 0.01,
            min_coverage: 0.25,
        }
    }
}

/// Result of board bounds detection, in original image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardBounds {
    /// Axis-aligned crop around the board (with margin), clamped to the image.
    pub crop: Rect,
    /// Orientation of the board's long edge, folded into `[-45, 45]` degrees.
    pub angle_deg: f64,
    /// Minimum-area rectangle of the board silhouette, if one was found.
    pub board_rect: Option<MinAreaRect>,
    /// Representative background colour.
    pub background: [u8; 3],
    /// Source image size `[width, height]`.
    pub image_size: [u32; 2],
    /// True when the detection was rejected and the whole image is used.
    pub fallback: bool,
}

impl BoardBounds {
    fn whole_image(width: u32, height: u32, background: [u8; 3]) -> Self {
        Self {
            crop: Rect::full(width, height),
            angle_deg: 0.0,
            board_rect: None,
            background,
            image_size: [width, height],
            fallback: true,
        }
    }

    pub fn background_pixel(&self) -> Rgb<u8> {
        Rgb(self.background)
    }
}

/// Patch windows along the four edges, skipping corners.
fn patch_windows(width: u32, height: u32, config: &BoundsConfig) -> Vec<Rect> {
    let ps = config.patch_size.max(1) as f64;
    let (w, h) = (width as f64, height as f64);
    let n = config.patches_per_edge.max(1);
    let mut out = Vec::with_capacity(4 * n);
    let along = |len: f64| -> Vec<f64> {
        let skip = len * config.corner_skip_frac;
        let span = (len - 2.0 * skip - ps).max(0.0);
        (0..n)
            .map(|i| {
                let t = if n == 1 { 0.5 } else { i as f64 / (n - 1) as f64 };
                skip + t * span
            })
            .collect()
    };
    for x in along(w) {
        out.push(Rect::new(x, 0.0, x + ps, ps));
        out.push(Rect::new(x, h - ps, x + ps, h));
    }
    for y in along(h) {
        out.push(Rect::new(0.0, y, ps, y + ps));
        out.push(Rect::new(w - ps, y, w, y + ps));
    }
    out
}

/// Median-brightness patch colour; `None` when no patch could be sampled.
pub fn estimate_background(img: &RgbImage, config: &BoundsConfig) -> Option<[u8; 3]> {
    let (w, h) = img.dimensions();
    let mut patches: Vec<[f64; 3]> = patch_windows(w, h, config)
        .iter()
        .filter_map(|r| mean_rgb(img, r))
        .collect();
    if patches.is_empty() {
        return None;
    }
    patches.sort_by(|a, b| {
        let la = a[0] + a[1] + a[2];
        let lb = b[0] + b[1] + b[2];
        la.total_cmp(&lb)
    });
    let m = patches[patches.len() / 2];
    Some([
        m[0].round() as u8,
        m[1].round() as u8,
        m[2].round() as u8,
    ])
}

fn difference_mask(img: &RgbImage, background: [u8; 3], threshold: u8) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let p = img.get_pixel(x, y).0;
        let differs = (0..3).any(|c| p[c].abs_diff(background[c]) > threshold);
        Luma([if differs { 255 } else { 0 }])
    })
}

/// Detect the board silhouette and its rotation.
///
/// Always yields bounds; implausible detections fall back to the whole
/// image with zero rotation and are reported as partial.
pub fn detect_board_bounds(
    img: &RgbImage,
    config: &BoundsConfig,
) -> Result<Outcome<BoardBounds>, AlignError> {
    let (width, height) = img.dimensions();
    ensure_non_empty(width, height, None)?;

    let (small, factor) = downsample(img, config.max_side);
    let Some(background) = estimate_background(&small, config) else {
        tracing::warn!("no background patches sampled, using whole image");
        return Ok(Outcome::partial(
            BoardBounds::whole_image(width, height, [0, 0, 0]),
            Shortfall::BoundsFallback {
                coverage_x: 0.0,
                coverage_y: 0.0,
            },
        ));
    };

    let bg_luma = crate::raster::luma(background[0], background[1], background[2]) as f64;
    let threshold = if bg_luma < config.dark_background_luma {
        config.dark_diff_threshold
    } else {
        config.diff_threshold
    };
    let mask = difference_mask(&small, background, threshold);
    let mask = if config.morph_radius > 0 {
        let closed = morphology::close(&mask, Norm::LInf, config.morph_radius);
        morphology::open(&closed, Norm::LInf, config.morph_radius)
    } else {
        mask
    };

    let (sw, sh) = small.dimensions();
    let max_area = (config.max_region_frac * sw as f64 * sh as f64) as usize;
    let (labels, blobs) = label_regions(&mask);
    let Some(board) = blobs
        .iter()
        .filter(|b| b.area < max_area)
        .max_by_key(|b| b.area)
    else {
        tracing::warn!("no board region below {:.0}% of the image", config.max_region_frac * 100.0);
        return Ok(Outcome::partial(
            BoardBounds::whole_image(width, height, background),
            Shortfall::BoundsFallback {
                coverage_x: 0.0,
                coverage_y: 0.0,
            },
        ));
    };

    let extremes = row_extremes(&labels, board.label);
    let Some(rect_small) = min_area_rect(&extremes) else {
        return Ok(Outcome::partial(
            BoardBounds::whole_image(width, height, background),
            Shortfall::BoundsFallback {
                coverage_x: 0.0,
                coverage_y: 0.0,
            },
        ));
    };

    let rect = scale_rect(&rect_small, factor);
    let angle_deg = fold_to_quarter_deg(rect.long_edge_angle_deg());
    let full = Rect::full(width, height);
    let margin = config.crop_margin_frac * rect.width.max(rect.height);
    let crop = Rect::bounding(&rect.corners)
        .unwrap_or(full)
        .expand(margin)
        .intersect(&full);

    let coverage_x = crop.width() / width as f64;
    let coverage_y = crop.height() / height as f64;
    if coverage_x < config.min_coverage || coverage_y < config.min_coverage {
        tracing::warn!(
            "board bounds cover {:.0}% x {:.0}% of the image, falling back",
            coverage_x * 100.0,
            coverage_y * 100.0
        );
        return Ok(Outcome::partial(
            BoardBounds::whole_image(width, height, background),
            Shortfall::BoundsFallback {
                coverage_x,
                coverage_y,
            },
        ));
    }

    tracing::info!(
        "board bounds: {:.0}x{:.0} at ({:.0}, {:.0}), angle {:.2} deg",
        crop.width(),
        crop.height(),
        crop.x0,
        crop.y0,
        angle_deg
    );

    Ok(Outcome::Complete(BoardBounds {
        crop,
        angle_deg,
        board_rect: Some(rect),
        background,
        image_size: [width, height],
        fallback: false,
    }))
}

fn scale_rect(r: &MinAreaRect, factor: f64) -> MinAreaRect {
    // Downsampled pixel centers map back as (p + 0.5) * f - 0.5.
    let up = |p: [f64; 2]| [(p[0] + 0.5) * factor - 0.5, (p[1] + 0.5) * factor - 0.5];
    MinAreaRect {
        center: up(r.center),
        width: r.width * factor,
        height: r.height * factor,
        angle_deg: r.angle_deg,
        corners: r.corners.map(up),
    }
}
