//! Via detection on a grey raster.
//!
//! Both variants threshold the grey image against a heavily blurred copy
//! (local background), label the mask, and keep round blobs in the expected
//! radius range whose surrounding annulus has the opposite polarity:
//! a dark hole needs a brighter ring, a bright core a darker one.

use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use serde::{Deserialize, Serialize};

use super::filter::{merge_by_proximity, reject_dense_vias};
use super::profile::ViaProfile;
use super::{renumber, Via, ViaMethod};
use crate::blob::label_regions;
use crate::raster::to_gray;

const MM_PER_INCH: f64 = 25.4;

type FloatImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Per-pass detection parameters (usually produced by a [`ViaProfile`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViaDetectParams {
    pub radius_min_px: f64,
    pub radius_max_px: f64,
    /// Grey-level difference from the local background marking a candidate pixel.
    pub contrast: f32,
    pub min_circularity: f64,
    /// Required core/annulus grey difference.
    pub annulus_contrast: f64,
    /// Also run the bright-core variant.
    pub bright_core: bool,
}

/// Via detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViaDetectConfig {
    /// Via radius range in millimetres, used when DPI is known.
    pub radius_min_mm: f64,
    pub radius_max_mm: f64,
    /// Radius range in pixels when DPI is unknown.
    pub radius_px_fallback: [f64; 2],
    /// Background blur sigma as a multiple of the largest radius.
    pub background_sigma_scale: f64,
    /// Vias from different variants closer than this are one via (pixels).
    pub merge_radius_px: f64,
    /// Neighbourhood radius for dense-cluster rejection, millimetres.
    pub dense_radius_mm: f64,
    /// Neighbourhood radius in pixels when DPI is unknown.
    pub dense_radius_px_fallback: f64,
    /// Vias with more neighbours than this inside the radius are dropped.
    pub dense_max_neighbours: usize,
    pub bright_core: bool,
    /// Profiles tried in order.
    pub profiles: Vec<ViaProfile>,
    /// Quick-match count at which the profile loop stops.
    pub quick_match_min: usize,
}

impl Default for ViaDetectConfig {
    fn default() -> Self {
        Self {
            radius_min_mm: 0.15,
            radius_max_mm: 0.6,
            radius_px_fallback: [2.0, 12.0],
            background_sigma_scale: 2.5,
            merge_radius_px: 3.0,
            dense_radius_mm: 2.8,
            dense_radius_px_fallback: 40.0,
            dense_max_neighbours: 2,
            bright_core: true,
            profiles: ViaProfile::ORDER.to_vec(),
            quick_match_min: 12,
        }
    }
}

impl ViaDetectConfig {
    pub fn radius_range_px(&self, dpi: Option<f64>) -> [f64; 2] {
        match dpi.filter(|d| d.is_finite() && *d > 0.0) {
            Some(dpi) => [
                (self.radius_min_mm * dpi / MM_PER_INCH).max(1.0),
                (self.radius_max_mm * dpi / MM_PER_INCH).max(2.0),
            ],
            None => self.radius_px_fallback,
        }
    }

    pub fn dense_radius_px(&self, dpi: Option<f64>) -> f64 {
        match dpi.filter(|d| d.is_finite() && *d > 0.0) {
            Some(dpi) => self.dense_radius_mm * dpi / MM_PER_INCH,
            None => self.dense_radius_px_fallback,
        }
    }
}

/// Grey raster plus its local background, prepared once per side.
pub(crate) struct ViaRaster {
    gray: GrayImage,
    background: FloatImage,
}

impl ViaRaster {
    pub(crate) fn new(img: &RgbImage, radius_max_px: f64, sigma_scale: f64) -> Self {
        let gray = to_gray(img);
        let sigma = (sigma_scale * radius_max_px).max(3.0) as f32;
        let f = FloatImage::from_fn(gray.width(), gray.height(), |x, y| {
            Luma([gray.get_pixel(x, y).0[0] as f32])
        });
        let background = if gray.width() > 0 && gray.height() > 0 {
            gaussian_blur_f32(&f, sigma)
        } else {
            f
        };
        Self { gray, background }
    }
}

/// Mean grey value over the ring `r_in <= d <= r_out` around `c`.
fn ring_mean(gray: &GrayImage, c: [f64; 2], r_in: f64, r_out: f64) -> Option<f64> {
    let (w, h) = gray.dimensions();
    let x0 = (c[0] - r_out).floor().max(0.0) as u32;
    let y0 = (c[1] - r_out).floor().max(0.0) as u32;
    let x1 = ((c[0] + r_out).ceil() as i64).clamp(0, w as i64 - 1) as u32;
    let y1 = ((c[1] + r_out).ceil() as i64).clamp(0, h as i64 - 1) as u32;
    let (ri2, ro2) = (r_in * r_in, r_out * r_out);
    let mut sum = 0.0;
    let mut n = 0usize;
    for y in y0..=y1 {
        for x in x0..=x1 {
            let dx = x as f64 - c[0];
            let dy = y as f64 - c[1];
            let d2 = dx * dx + dy * dy;
            if d2 >= ri2 && d2 <= ro2 {
                sum += gray.get_pixel(x, y).0[0] as f64;
                n += 1;
            }
        }
    }
    (n > 0).then(|| sum / n as f64)
}

/// One detection variant.
pub(crate) fn detect_variant(raster: &ViaRaster, params: &ViaDetectParams, method: ViaMethod) -> Vec<Via> {
    let (w, h) = raster.gray.dimensions();
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let mask = GrayImage::from_fn(w, h, |x, y| {
        let v = raster.gray.get_pixel(x, y).0[0] as f32;
        let bg = raster.background.get_pixel(x, y).0[0];
        let hit = match method {
            ViaMethod::Standard => bg - v > params.contrast,
            ViaMethod::BrightCore => v - bg > params.contrast,
        };
        Luma([if hit { 255 } else { 0 }])
    });

    let area_min = std::f64::consts::PI * params.radius_min_px * params.radius_min_px;
    let area_max = std::f64::consts::PI * params.radius_max_px * params.radius_max_px;
    let (_, blobs) = label_regions(&mask);

    blobs
        .iter()
        .filter(|b| (area_min..=area_max).contains(&(b.area as f64)))
        .filter_map(|b| {
            let circularity = b.circularity();
            if circularity < params.min_circularity {
                return None;
            }
            let r = b.equivalent_radius();
            let core = ring_mean(&raster.gray, b.centroid, 0.0, (0.6 * r).max(0.75))?;
            let annulus = ring_mean(&raster.gray, b.centroid, 1.4 * r, 2.0 * r + 1.0)?;
            let polarity = match method {
                ViaMethod::Standard => annulus - core,
                ViaMethod::BrightCore => core - annulus,
            };
            (polarity >= params.annulus_contrast)
                .then(|| Via::new(b.centroid, r, circularity, method))
        })
        .collect()
}

/// Standard and bright-core vias of one prepared side, merged.
pub(crate) fn detect_raster_vias(raster: &ViaRaster, params: &ViaDetectParams, merge_radius: f64) -> Vec<Via> {
    let (mut standard, bright) = rayon::join(
        || detect_variant(raster, params, ViaMethod::Standard),
        || {
            if params.bright_core {
                detect_variant(raster, params, ViaMethod::BrightCore)
            } else {
                Vec::new()
            }
        },
    );
    tracing::debug!("vias: {} standard, {} bright-core", standard.len(), bright.len());
    standard.extend(bright);
    let mut merged = merge_by_proximity(standard, merge_radius);
    renumber(&mut merged);
    merged
}

/// Detect vias of both variants on one colour raster.
pub fn detect_vias(img: &RgbImage, params: &ViaDetectParams, config: &ViaDetectConfig) -> Vec<Via> {
    let raster = ViaRaster::new(img, params.radius_max_px, config.background_sigma_scale);
    detect_raster_vias(&raster, params, config.merge_radius_px)
}

/// [`detect_vias`] followed by dense-cluster rejection, ids renumbered.
pub fn detect_side_vias(
    img: &RgbImage,
    params: &ViaDetectParams,
    config: &ViaDetectConfig,
    dpi: Option<f64>,
) -> Vec<Via> {
    let vias = detect_vias(img, params, config);
    let mut kept = reject_dense_vias(vias, config.dense_radius_px(dpi), config.dense_max_neighbours);
    renumber(&mut kept);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_vias, ViaStyle};

    const BOARD: [u8; 3] = [30, 90, 40];

    fn params() -> ViaDetectParams {
        ViaProfile::Strict.params([2.0, 12.0], true)
    }

    fn grid(n: usize, origin: [f64; 2], step: f64) -> Vec<[f64; 2]> {
        (0..n)
            .map(|i| [origin[0] + step * (i % 4) as f64 + 0.3, origin[1] + step * (i / 4) as f64 + 0.6])
            .collect()
    }

    #[test]
    fn finds_both_variants() {
        let holes = grid(12, [40.0, 40.0], 50.0);
        let bright = grid(4, [60.0, 240.0], 70.0);
        let mut img = draw_vias(400, 320, BOARD, &holes, ViaStyle::Hole, 4.0);
        crate::test_utils::overlay_vias(&mut img, &bright, ViaStyle::BrightCore, 4.0);

        let vias = detect_vias(&img, &params(), &ViaDetectConfig::default());
        assert_eq!(vias.len(), 16, "{vias:?}");
        for p in &holes {
            let v = vias
                .iter()
                .find(|v| crate::geometry::dist(v.center, *p) < 0.5)
                .unwrap();
            assert_eq!(v.method, ViaMethod::Standard);
        }
        for p in &bright {
            let v = vias
                .iter()
                .find(|v| crate::geometry::dist(v.center, *p) < 0.5)
                .unwrap();
            assert_eq!(v.method, ViaMethod::BrightCore);
        }
        let ids: Vec<usize> = vias.iter().map(|v| v.id).collect();
        assert_eq!(ids, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn plain_board_has_no_vias() {
        let img = RgbImage::from_pixel(120, 90, image::Rgb(BOARD));
        assert!(detect_vias(&img, &params(), &ViaDetectConfig::default()).is_empty());
    }

    #[test]
    fn radius_range_scales_with_dpi() {
        let c = ViaDetectConfig::default();
        let r = c.radius_range_px(Some(254.0));
        assert!((r[0] - 1.5).abs() < 1e-9 && (r[1] - 6.0).abs() < 1e-9);
        assert_eq!(c.radius_range_px(None), c.radius_px_fallback);
    }
}
