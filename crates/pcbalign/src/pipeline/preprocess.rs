//! Deskew and crop a raw scan to the board.
//!
//! The scan is rotated first (about its center, onto an expanded canvas) and
//! cropped afterwards, so the crop is an axis-aligned box around the already
//! upright board.

use image::{imageops, RgbImage};
use serde::Serialize;

use crate::affine::AffineTransform;
use crate::bounds::{detect_board_bounds, BoardBounds, BoundsConfig};
use crate::error::{ensure_non_empty, AlignError, Side};
use crate::geometry::Rect;
use crate::outcome::Outcome;
use crate::raster::{crop, rotate_expand};

/// How a processed image relates to its source scan.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedMeta {
    /// Rotation applied before cropping (degrees, positive turns +x to +y).
    pub rotation_deg: f64,
    /// Crop window in the rotated canvas.
    pub crop: Rect,
    /// Source scan size `[width, height]`.
    pub original_size: [u32; 2],
    /// The source was mirrored horizontally before rotation.
    pub mirrored: bool,
    /// Source → processed pixel mapping.
    pub to_processed: AffineTransform,
}

impl ProcessedMeta {
    /// Processed → source pixel mapping.
    pub fn to_original(&self) -> Option<AffineTransform> {
        self.to_processed.invert()
    }
}

/// A deskewed, cropped scan.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessedImage {
    #[serde(skip)]
    pub image: RgbImage,
    pub meta: ProcessedMeta,
    pub bounds: BoardBounds,
}

fn mirror_transform(width: u32) -> AffineTransform {
    AffineTransform::new(-1.0, 0.0, 0.0, 1.0, width as f64 - 1.0, 0.0)
}

/// Rotate `img` by `-bounds.angle_deg` and crop around the board.
///
/// `bounds` must have been detected on `img`. The crop is the board
/// rectangle mapped into the rotated canvas, grown by `margin_frac` of its
/// longer side; fallback bounds keep the whole canvas.
pub fn preprocess(img: &RgbImage, bounds: &BoardBounds, margin_frac: f64) -> ProcessedImage {
    let rotation_deg = -bounds.angle_deg;
    let (rotated, rot) = rotate_expand(img, rotation_deg, bounds.background_pixel());
    let canvas = Rect::full(rotated.width(), rotated.height());

    let window = bounds
        .board_rect
        .as_ref()
        .and_then(|r| {
            let corners = r.corners.map(|c| rot.apply(c));
            let bb = Rect::bounding(&corners)?;
            Some(bb.expand(margin_frac * r.width.max(r.height)).intersect(&canvas))
        })
        .filter(|r| r.area() > 0.0)
        .unwrap_or(canvas);

    let (image, used) = crop(&rotated, &window);
    let to_processed = AffineTransform::translation(-used.x0, -used.y0).compose(&rot);
    tracing::debug!(
        "preprocess: rotated {:.2} deg, crop {:.0}x{:.0} at ({:.0}, {:.0})",
        rotation_deg,
        used.width(),
        used.height(),
        used.x0,
        used.y0
    );

    ProcessedImage {
        image,
        meta: ProcessedMeta {
            rotation_deg,
            crop: used,
            original_size: [img.width(), img.height()],
            mirrored: false,
            to_processed,
        },
        bounds: bounds.clone(),
    }
}

/// Bounds detection plus [`preprocess`] for one side of the board.
///
/// With `mirror`, the scan is flipped horizontally first and the flip is
/// folded into `to_processed`.
pub fn preprocess_side(
    img: &RgbImage,
    side: Side,
    mirror: bool,
    config: &BoundsConfig,
) -> Result<Outcome<ProcessedImage>, AlignError> {
    ensure_non_empty(img.width(), img.height(), Some(side))?;
    let flipped;
    let source = if mirror {
        flipped = imageops::flip_horizontal(img);
        &flipped
    } else {
        img
    };

    let bounds = detect_board_bounds(source, config)?;
    Ok(bounds.map(|b| {
        let mut processed = preprocess(source, &b, config.crop_margin_frac);
        if mirror {
            processed.meta.mirrored = true;
            processed.meta.to_processed = processed
                .meta
                .to_processed
                .compose(&mirror_transform(img.width()));
        }
        processed
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::draw_board;
    use image::Rgb;

    const BG: [u8; 3] = [226, 226, 220];

    #[test]
    fn deskewed_board_is_upright_and_centered() {
        let img = draw_board(900, 700, BG, [430.0, 360.0], [520.0, 300.0], 6.0);
        let out = preprocess_side(&img, Side::Front, false, &BoundsConfig::default()).unwrap();
        assert!(out.is_complete());
        let p = out.value();
        assert!((p.meta.rotation_deg + 6.0).abs() < 0.5);

        // The board fills the crop up to the margin.
        let (w, h) = p.image.dimensions();
        assert!((w as f64 - 520.0).abs() < 30.0, "width {w}");
        assert!((h as f64 - 300.0).abs() < 30.0, "height {h}");

        let c = p.meta.to_processed.apply([430.0, 360.0]);
        assert!((c[0] - (w as f64 - 1.0) / 2.0).abs() < 4.0, "center {c:?}");
        assert!((c[1] - (h as f64 - 1.0) / 2.0).abs() < 4.0, "center {c:?}");

        let again = detect_board_bounds(&p.image, &BoundsConfig::default()).unwrap();
        assert!(again.value().angle_deg.abs() < 0.5);
    }

    #[test]
    fn mirror_is_folded_into_the_mapping() {
        let img = draw_board(800, 600, BG, [300.0, 300.0], [400.0, 260.0], 0.0);
        let out = preprocess_side(&img, Side::Back, true, &BoundsConfig::default()).unwrap();
        let p = out.value();
        assert!(p.meta.mirrored);
        // The board's left edge in the scan becomes its right edge.
        let left = p.meta.to_processed.apply([100.0, 300.0]);
        let right = p.meta.to_processed.apply([500.0, 300.0]);
        assert!(left[0] > right[0]);
        let back = p.meta.to_original().unwrap().apply(left);
        assert!((back[0] - 100.0).abs() < 1e-6 && (back[1] - 300.0).abs() < 1e-6);
    }

    #[test]
    fn empty_scan_is_a_hard_error() {
        let img = RgbImage::from_pixel(0, 10, Rgb(BG));
        let err = preprocess_side(&img, Side::Back, false, &BoundsConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "back image is empty");
    }
}
