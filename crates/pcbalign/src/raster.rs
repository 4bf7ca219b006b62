//! Raster utilities: colour-space conversion, warping, cropping.
//!
//! Host rasters are `image::RgbImage`. Conversions into the internal HSV and
//! grey buffers are split into horizontal row stripes, one per available
//! worker thread, and joined before the buffer is returned.
//!
//! Pixel centers sit at integer coordinates throughout the crate.

use image::{imageops, GrayImage, Rgb, RgbImage};
use rayon::prelude::*;

use crate::affine::AffineTransform;
use crate::geometry::Rect;

/// Number of rows per conversion stripe so that there is one stripe per
/// worker thread.
fn stripe_rows(height: u32) -> usize {
    let workers = rayon::current_num_threads().max(1);
    (height as usize).div_ceil(workers).max(1)
}

// ── HSV ────────────────────────────────────────────────────────────────────

/// Convert one RGB pixel to `[hue_deg, saturation, value]`, with hue in
/// `[0, 360)` and saturation/value in `[0, 1]`.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [f32; 3] {
    let r = rgb[0] as f32 / 255.0;
    let g = rgb[1] as f32 / 255.0;
    let b = rgb[2] as f32 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;
    let h = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        60.0 * (((g - b) / delta).rem_euclid(6.0))
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    let s = if max <= f32::EPSILON { 0.0 } else { delta / max };
    [h.rem_euclid(360.0), s, max]
}

/// Planar HSV buffer, row-major.
#[derive(Debug, Clone)]
pub struct HsvImage {
    width: u32,
    height: u32,
    data: Vec<[f32; 3]>,
}

impl HsvImage {
    /// Convert an RGB raster, one row stripe per worker.
    pub fn from_rgb(img: &RgbImage) -> Self {
        let (width, height) = img.dimensions();
        let w = width as usize;
        let mut data = vec![[0.0f32; 3]; w * height as usize];
        if w > 0 {
            let rows = stripe_rows(height);
            let raw = img.as_raw();
            data.par_chunks_mut(rows * w)
                .enumerate()
                .for_each(|(stripe, out)| {
                    let base = stripe * rows * w;
                    for (i, px) in out.iter_mut().enumerate() {
                        let k = (base + i) * 3;
                        *px = rgb_to_hsv([raw[k], raw[k + 1], raw[k + 2]]);
                    }
                });
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> [f32; 3] {
        self.data[y as usize * self.width as usize + x as usize]
    }
}

// ── Grey ───────────────────────────────────────────────────────────────────

/// BT.601 luma conversion, one row stripe per worker.
pub fn to_gray(img: &RgbImage) -> GrayImage {
    let (width, height) = img.dimensions();
    let w = width as usize;
    let mut out = vec![0u8; w * height as usize];
    if w > 0 {
        let rows = stripe_rows(height);
        let raw = img.as_raw();
        out.par_chunks_mut(rows * w)
            .enumerate()
            .for_each(|(stripe, dst)| {
                let base = stripe * rows * w;
                for (i, px) in dst.iter_mut().enumerate() {
                    let k = (base + i) * 3;
                    *px = luma(raw[k], raw[k + 1], raw[k + 2]);
                }
            });
    }
    GrayImage::from_raw(width, height, out).unwrap_or_else(|| GrayImage::new(width, height))
}

#[inline]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    (0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32)
        .round()
        .clamp(0.0, 255.0) as u8
}

// ── Sampling ───────────────────────────────────────────────────────────────

/// Bilinear RGB sample, `None` outside the raster.
fn sample_bilinear(img: &RgbImage, x: f64, y: f64) -> Option<[u8; 3]> {
    let (w, h) = img.dimensions();
    if !(x >= 0.0 && y >= 0.0 && x <= (w - 1) as f64 && y <= (h - 1) as f64) {
        return None;
    }
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;
    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;
    let mut out = [0u8; 3];
    for c in 0..3 {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bot = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        out[c] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(out)
}

/// Render `img` through `src_to_dst` onto a `width × height` canvas.
///
/// Each output pixel pulls from the inverse-mapped source location; pixels
/// that map outside the source get `fill`. Rows are rendered in parallel.
pub fn warp_affine(
    img: &RgbImage,
    src_to_dst: &AffineTransform,
    width: u32,
    height: u32,
    fill: Rgb<u8>,
) -> RgbImage {
    let mut out = RgbImage::from_pixel(width, height, fill);
    let (iw, ih) = img.dimensions();
    if iw == 0 || ih == 0 || width == 0 {
        return out;
    }
    let Some(inv) = src_to_dst.invert() else {
        return out;
    };
    let w = width as usize;
    let buf: &mut [u8] = &mut out;
    buf.par_chunks_mut(w * 3).enumerate().for_each(|(y, row)| {
        for x in 0..w {
            let s = inv.apply([x as f64, y as f64]);
            if let Some(px) = sample_bilinear(img, s[0], s[1]) {
                row[x * 3..x * 3 + 3].copy_from_slice(&px);
            }
        }
    });
    out
}

/// Rotate about the image center onto a canvas grown to hold the whole
/// rotated raster. Returns the image and the input→output transform.
pub fn rotate_expand(img: &RgbImage, angle_deg: f64, fill: Rgb<u8>) -> (RgbImage, AffineTransform) {
    let (w, h) = img.dimensions();
    if angle_deg.abs() < 1e-9 || w == 0 || h == 0 {
        return (img.clone(), AffineTransform::identity());
    }
    let (s, c) = angle_deg.to_radians().sin_cos();
    let new_w = (w as f64 * c.abs() + h as f64 * s.abs()).ceil().max(1.0) as u32;
    let new_h = (w as f64 * s.abs() + h as f64 * c.abs()).ceil().max(1.0) as u32;
    let in_center = [(w as f64 - 1.0) * 0.5, (h as f64 - 1.0) * 0.5];
    let out_center = [(new_w as f64 - 1.0) * 0.5, (new_h as f64 - 1.0) * 0.5];
    let t = AffineTransform::translation(out_center[0], out_center[1])
        .compose(&AffineTransform::rotation_deg(angle_deg))
        .compose(&AffineTransform::translation(-in_center[0], -in_center[1]));
    (warp_affine(img, &t, new_w, new_h, fill), t)
}

/// Copy out `rect` (clamped to the raster). Returns the crop and the exact
/// integer window used.
pub fn crop(img: &RgbImage, rect: &Rect) -> (RgbImage, Rect) {
    let (w, h) = img.dimensions();
    let (x, y, cw, ch) = rect.to_pixel_window(w, h);
    let out = imageops::crop_imm(img, x, y, cw, ch).to_image();
    (
        out,
        Rect::new(x as f64, y as f64, (x + cw) as f64, (y + ch) as f64),
    )
}

/// Downsample so the longer side is at most `max_side`. Returns the image
/// and the factor from downsampled to original coordinates (≥ 1).
pub fn downsample(img: &RgbImage, max_side: u32) -> (RgbImage, f64) {
    let (w, h) = img.dimensions();
    let long = w.max(h);
    if long <= max_side || max_side == 0 {
        return (img.clone(), 1.0);
    }
    let factor = long as f64 / max_side as f64;
    let nw = ((w as f64 / factor).round() as u32).max(1);
    let nh = ((h as f64 / factor).round() as u32).max(1);
    let small = imageops::resize(img, nw, nh, imageops::FilterType::Triangle);
    (small, factor)
}

/// Rotate by a multiple of 90° clockwise.
pub fn rotate_quarter_turns(img: &RgbImage, quarter_turns: u32) -> RgbImage {
    match quarter_turns % 4 {
        1 => imageops::rotate90(img),
        2 => imageops::rotate180(img),
        3 => imageops::rotate270(img),
        _ => img.clone(),
    }
}

/// Mean colour over the pixels of `rect`, `None` if the window is empty.
pub fn mean_rgb(img: &RgbImage, rect: &Rect) -> Option<[f64; 3]> {
    let (w, h) = img.dimensions();
    let (x, y, cw, ch) = rect.to_pixel_window(w, h);
    if cw == 0 || ch == 0 {
        return None;
    }
    let mut sum = [0.0f64; 3];
    for yy in y..y + ch {
        for xx in x..x + cw {
            let p = img.get_pixel(xx, yy).0;
            sum[0] += p[0] as f64;
            sum[1] += p[1] as f64;
            sum[2] += p[2] as f64;
        }
    }
    let n = (cw * ch) as f64;
    Some([sum[0] / n, sum[1] / n, sum[2] / n])
}
