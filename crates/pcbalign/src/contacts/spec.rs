//! Board-contact specification supplied by the host application.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::BoardEdge;
use crate::error::AlignError;

const MM_PER_INCH: f64 = 25.4;

/// HSV window for contact colour. Hue in degrees; wraps when
/// `hue_min > hue_max`. Saturation and value in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HsvRange {
    pub hue_min: f32,
    pub hue_max: f32,
    pub sat_min: f32,
    pub sat_max: f32,
    pub val_min: f32,
    pub val_max: f32,
}

impl Default for HsvRange {
    /// Gold plating under a flatbed scanner lamp.
    fn default() -> Self {
        Self {
            hue_min: 25.0,
            hue_max: 65.0,
            sat_min: 0.25,
            sat_max: 1.0,
            val_min: 0.45,
            val_max: 1.0,
        }
    }
}

impl HsvRange {
    pub fn contains(&self, hsv: [f32; 3]) -> bool {
        let [h, s, v] = hsv;
        let hue_ok = if self.hue_min <= self.hue_max {
            h >= self.hue_min && h <= self.hue_max
        } else {
            h >= self.hue_min || h <= self.hue_max
        };
        hue_ok && s >= self.sat_min && s <= self.sat_max && v >= self.val_min && v <= self.val_max
    }

    /// Widened copy: hue padded by `hue_pad` degrees each side, lower
    /// saturation/value bounds scaled down.
    pub fn relaxed(&self, hue_pad: f32, sat_scale: f32, val_scale: f32) -> Self {
        Self {
            hue_min: (self.hue_min - hue_pad).rem_euclid(360.0),
            hue_max: (self.hue_max + hue_pad).rem_euclid(360.0),
            sat_min: self.sat_min * sat_scale,
            sat_max: self.sat_max,
            val_min: self.val_min * val_scale,
            val_max: self.val_max,
        }
    }
}

/// Physical description of one edge connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContactSpec {
    /// Board edge carrying the connector.
    pub edge: BoardEdge,
    /// Number of contacts in the row.
    pub count: usize,
    /// Center-to-center spacing (mm).
    pub pitch_mm: f64,
    /// Contact width along the edge (mm).
    pub width_mm: f64,
    /// Contact height perpendicular to the edge (mm).
    pub height_mm: f64,
    /// Distance from the board edge to the contact row (mm).
    #[serde(default)]
    pub margin_mm: f64,
    /// Colour window for the plating.
    #[serde(default)]
    pub hsv: HsvRange,
    /// Accepted `height / width` range of a contact blob.
    pub aspect_min: f64,
    pub aspect_max: f64,
    /// Accepted blob area range in pixels, used when DPI is unknown.
    pub area_min_px: f64,
    pub area_max_px: f64,
}

/// Expected contact geometry in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpectedGeometry {
    pub width_px: f64,
    pub height_px: f64,
    /// Known only when DPI is known.
    pub pitch_px: Option<f64>,
    pub area_min_px: f64,
    pub area_max_px: f64,
}

impl ExpectedGeometry {
    pub fn area_px(&self) -> f64 {
        self.width_px * self.height_px
    }
}

impl ContactSpec {
    /// Specification with the default gold colour window and loose
    /// aspect/area bounds.
    pub fn new(edge: BoardEdge, count: usize, pitch_mm: f64, width_mm: f64, height_mm: f64) -> Self {
        Self {
            edge,
            count,
            pitch_mm,
            width_mm,
            height_mm,
            margin_mm: 0.0,
            hsv: HsvRange::default(),
            aspect_min: 1.0,
            aspect_max: 8.0,
            area_min_px: 50.0,
            area_max_px: 50_000.0,
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, AlignError> {
        let data = std::fs::read_to_string(path)
            .map_err(|e| AlignError::Config(format!("{}: {}", path.display(), e)))?;
        let spec: ContactSpec = serde_json::from_str(&data)
            .map_err(|e| AlignError::Config(format!("{}: {}", path.display(), e)))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), AlignError> {
        if self.count < 2 {
            return Err(AlignError::InvalidSpec(format!(
                "contact count must be >= 2, got {}",
                self.count
            )));
        }
        for (name, v) in [
            ("pitch_mm", self.pitch_mm),
            ("width_mm", self.width_mm),
            ("height_mm", self.height_mm),
        ] {
            if !(v.is_finite() && v > 0.0) {
                return Err(AlignError::InvalidSpec(format!("{} must be positive, got {}", name, v)));
            }
        }
        if self.width_mm >= self.pitch_mm {
            return Err(AlignError::InvalidSpec(format!(
                "contact width {} mm does not fit pitch {} mm",
                self.width_mm, self.pitch_mm
            )));
        }
        if !(self.aspect_min > 0.0 && self.aspect_min <= self.aspect_max) {
            return Err(AlignError::InvalidSpec("aspect range is empty".into()));
        }
        if !(self.area_min_px >= 0.0 && self.area_min_px <= self.area_max_px) {
            return Err(AlignError::InvalidSpec("area range is empty".into()));
        }
        Ok(())
    }

    pub fn mm_to_px(mm: f64, dpi: f64) -> f64 {
        mm * dpi / MM_PER_INCH
    }

    /// DPI implied by a measured pitch in pixels.
    pub fn dpi_from_pitch(&self, pitch_px: f64) -> f64 {
        pitch_px / self.pitch_mm * MM_PER_INCH
    }

    /// Expected pixel geometry. With a DPI the physical sizes are scaled and
    /// the area window is centered on the scaled area; without one the
    /// specification's pixel area window and aspect midpoint are used.
    pub fn expected_geometry(&self, dpi: Option<f64>) -> ExpectedGeometry {
        match dpi.filter(|d| d.is_finite() && *d > 0.0) {
            Some(dpi) => {
                let w = Self::mm_to_px(self.width_mm, dpi);
                let h = Self::mm_to_px(self.height_mm, dpi);
                ExpectedGeometry {
                    width_px: w,
                    height_px: h,
                    pitch_px: Some(Self::mm_to_px(self.pitch_mm, dpi)),
                    area_min_px: 0.3 * w * h,
                    area_max_px: 3.0 * w * h,
                }
            }
            None => {
                let area = (self.area_min_px.max(1.0) * self.area_max_px.max(1.0)).sqrt();
                let aspect = (self.height_mm / self.width_mm)
                    .clamp(self.aspect_min, self.aspect_max);
                let w = (area / aspect).sqrt();
                ExpectedGeometry {
                    width_px: w,
                    height_px: w * aspect,
                    pitch_px: None,
                    area_min_px: self.area_min_px,
                    area_max_px: self.area_max_px,
                }
            }
        }
    }
}
