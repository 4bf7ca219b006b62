//! Shared synthetic scenes for unit tests: boards, contact rows, vias and
//! point sets.

use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::Rng;

use crate::geometry::{dist2, Rect};

pub(crate) const BOARD_GREEN: [u8; 3] = [30, 90, 40];

/// Fill every pixel whose unit square lies inside `rect`.
///
/// Pixel centers sit on integer coordinates, so a rect centered on `c`
/// yields a pixel set whose centroid is exactly `c` when `c` is integral.
pub(crate) fn paint_rect(img: &mut RgbImage, rect: &Rect, rgb: [u8; 3]) {
    let (w, h) = img.dimensions();
    let x0 = (rect.x0 + 0.5).ceil().max(0.0) as i64;
    let y0 = (rect.y0 + 0.5).ceil().max(0.0) as i64;
    let x1 = (rect.x1 - 0.5).floor().min(w as f64 - 1.0) as i64;
    let y1 = (rect.y1 - 0.5).floor().min(h as f64 - 1.0) as i64;
    for y in y0..=y1 {
        for x in x0..=x1 {
            img.put_pixel(x as u32, y as u32, Rgb(rgb));
        }
    }
}

fn paint_disc(img: &mut RgbImage, center: [f64; 2], radius: f64, rgb: [u8; 3]) {
    let (w, h) = img.dimensions();
    let x0 = (center[0] - radius).floor().max(0.0) as u32;
    let y0 = (center[1] - radius).floor().max(0.0) as u32;
    let x1 = ((center[0] + radius).ceil().max(0.0) as u32).min(w.saturating_sub(1));
    let y1 = ((center[1] + radius).ceil().max(0.0) as u32).min(h.saturating_sub(1));
    let r2 = radius * radius;
    for y in y0..=y1 {
        for x in x0..=x1 {
            if dist2([x as f64, y as f64], center) <= r2 {
                img.put_pixel(x, y, Rgb(rgb));
            }
        }
    }
}

/// Board of `size` rotated by `angle_deg` about `center` on a plain
/// background.
pub(crate) fn draw_board(
    w: u32,
    h: u32,
    background: [u8; 3],
    center: [f64; 2],
    size: [f64; 2],
    angle_deg: f64,
) -> RgbImage {
    let (s, c) = angle_deg.to_radians().sin_cos();
    RgbImage::from_fn(w, h, |x, y| {
        let dx = x as f64 - center[0];
        let dy = y as f64 - center[1];
        // Board-local coordinates (inverse rotation).
        let u = c * dx + s * dy;
        let v = -s * dx + c * dy;
        if u.abs() <= size[0] * 0.5 && v.abs() <= size[1] * 0.5 {
            Rgb(BOARD_GREEN)
        } else {
            Rgb(background)
        }
    })
}

/// Evenly pitched contact row; `start` is the first contact's center.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ContactRow {
    pub start: [f64; 2],
    pub pitch: f64,
    pub count: usize,
    /// Contact `[width, height]`.
    pub size: [f64; 2],
}

impl ContactRow {
    pub(crate) fn contact_rect(&self, i: usize) -> Rect {
        Rect::centered(
            [self.start[0] + self.pitch * i as f64, self.start[1]],
            self.size[0],
            self.size[1],
        )
    }
}

pub(crate) fn draw_contact_row(
    w: u32,
    h: u32,
    board: [u8; 3],
    contact: [u8; 3],
    row: &ContactRow,
) -> RgbImage {
    let mut img = RgbImage::from_pixel(w, h, Rgb(board));
    for i in 0..row.count {
        paint_rect(&mut img, &row.contact_rect(i), contact);
    }
    img
}

/// How a synthetic via looks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ViaStyle {
    /// Dark drill hole of radius `r` inside a copper pad of radius `2r`.
    Hole,
    /// Bright core of radius `r` inside a dark annulus of radius `2r`.
    BrightCore,
}

pub(crate) fn overlay_vias(img: &mut RgbImage, centers: &[[f64; 2]], style: ViaStyle, r: f64) {
    let (outer, inner) = match style {
        ViaStyle::Hole => ([200, 170, 110], [20, 20, 20]),
        ViaStyle::BrightCore => ([50, 50, 45], [235, 235, 225]),
    };
    for c in centers {
        paint_disc(img, *c, 2.0 * r, outer);
        paint_disc(img, *c, r, inner);
    }
}

pub(crate) fn draw_vias(
    w: u32,
    h: u32,
    board: [u8; 3],
    centers: &[[f64; 2]],
    style: ViaStyle,
    r: f64,
) -> RgbImage {
    let mut img = RgbImage::from_pixel(w, h, Rgb(board));
    overlay_vias(&mut img, centers, style, r);
    img
}

/// `cols × rows` grid (row-major) with uniform jitter in `[-jitter, jitter]`
/// per axis.
pub(crate) fn jittered_grid(
    rng: &mut StdRng,
    cols: usize,
    rows: usize,
    origin: [f64; 2],
    spacing: f64,
    jitter: f64,
) -> Vec<[f64; 2]> {
    let mut out = Vec::with_capacity(cols * rows);
    for j in 0..rows {
        for i in 0..cols {
            out.push([
                origin[0] + spacing * i as f64 + rng.gen_range(-jitter..=jitter),
                origin[1] + spacing * j as f64 + rng.gen_range(-jitter..=jitter),
            ]);
        }
    }
    out
}

/// Up to `n` random points in `bounds = [x0, y0, x1, y1]`, each at least
/// `min_dist` from `existing` and from each other.
pub(crate) fn far_outliers(
    rng: &mut StdRng,
    existing: &[[f64; 2]],
    n: usize,
    min_dist: f64,
    bounds: [f64; 4],
) -> Vec<[f64; 2]> {
    let min2 = min_dist * min_dist;
    let mut out: Vec<[f64; 2]> = Vec::with_capacity(n);
    for _ in 0..n * 10_000 {
        if out.len() == n {
            break;
        }
        let p = [
            rng.gen_range(bounds[0]..bounds[2]),
            rng.gen_range(bounds[1]..bounds[3]),
        ];
        if existing.iter().chain(out.iter()).all(|q| dist2(p, *q) >= min2) {
            out.push(p);
        }
    }
    assert_eq!(out.len(), n, "could not place {n} outliers");
    out
}
