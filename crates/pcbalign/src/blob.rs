//! Connected-component blobs with moment statistics.
//!
//! Centroids come from first-order image moments over the binary mask, not
//! from the bounding-box center, so they are sub-pixel and insensitive to
//! ragged edges.

use image::{GrayImage, ImageBuffer, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::geometry::Rect;

/// Label raster produced by connected-component labelling (0 = background).
pub type LabelImage = ImageBuffer<Luma<u32>, Vec<u32>>;

/// One connected foreground region.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Component label in the label raster.
    pub label: u32,
    /// Pixel count.
    pub area: usize,
    /// Bounding box; `x1`/`y1` are exclusive so width equals pixel extent.
    pub bbox: Rect,
    /// Moment centroid.
    pub centroid: [f64; 2],
    /// Central second moments normalized by area: `[mu20, mu02, mu11]`.
    pub second_moments: [f64; 3],
}

impl Blob {
    pub fn width(&self) -> f64 {
        self.bbox.width()
    }

    pub fn height(&self) -> f64 {
        self.bbox.height()
    }

    /// Radius of the disc with the same area.
    pub fn equivalent_radius(&self) -> f64 {
        (self.area as f64 / std::f64::consts::PI).sqrt()
    }

    /// Fraction of the bounding box covered by the blob.
    pub fn fill_ratio(&self) -> f64 {
        let a = self.bbox.area();
        if a <= 0.0 {
            0.0
        } else {
            self.area as f64 / a
        }
    }

    /// `sqrt(λ_min / λ_max)` of the second-moment matrix; 1 for a disc.
    pub fn axis_ratio(&self) -> f64 {
        let [mu20, mu02, mu11] = self.second_moments;
        let tr = mu20 + mu02;
        let disc = ((mu20 - mu02).powi(2) + 4.0 * mu11 * mu11).sqrt();
        let l_max = 0.5 * (tr + disc);
        let l_min = 0.5 * (tr - disc);
        if l_max <= 1e-12 {
            return 1.0;
        }
        (l_min.max(0.0) / l_max).sqrt()
    }

    /// Roundness score in `[0, 1]`: axis ratio times how well the area fills
    /// the disc spanned by the larger bounding-box side.
    pub fn circularity(&self) -> f64 {
        let d = self.width().max(self.height());
        if d <= 0.0 {
            return 0.0;
        }
        let disc_area = std::f64::consts::PI * 0.25 * d * d;
        let fill = (self.area as f64 / disc_area).min(1.0);
        (self.axis_ratio() * fill).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Copy)]
struct Acc {
    n: usize,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    sx: f64,
    sy: f64,
    sxx: f64,
    syy: f64,
    sxy: f64,
}

impl Acc {
    fn new() -> Self {
        Self {
            n: 0,
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
            sx: 0.0,
            sy: 0.0,
            sxx: 0.0,
            syy: 0.0,
            sxy: 0.0,
        }
    }

    fn push(&mut self, x: u32, y: u32) {
        self.n += 1;
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
        let (xf, yf) = (x as f64, y as f64);
        self.sx += xf;
        self.sy += yf;
        self.sxx += xf * xf;
        self.syy += yf * yf;
        self.sxy += xf * yf;
    }

    fn finish(&self, label: u32, offset: [f64; 2]) -> Blob {
        let n = self.n as f64;
        let cx = self.sx / n;
        let cy = self.sy / n;
        Blob {
            label,
            area: self.n,
            bbox: Rect::new(
                self.min_x as f64 + offset[0],
                self.min_y as f64 + offset[1],
                (self.max_x + 1) as f64 + offset[0],
                (self.max_y + 1) as f64 + offset[1],
            ),
            centroid: [cx + offset[0], cy + offset[1]],
            second_moments: [
                (self.sxx / n - cx * cx).max(0.0),
                (self.syy / n - cy * cy).max(0.0),
                self.sxy / n - cx * cy,
            ],
        }
    }
}

/// Label the non-zero pixels of `mask` (8-connectivity) and measure every
/// component. Blobs are ordered by label.
pub fn label_regions(mask: &GrayImage) -> (LabelImage, Vec<Blob>) {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut accs: Vec<Acc> = Vec::new();
    for (x, y, px) in labels.enumerate_pixels() {
        let l = px.0[0];
        if l == 0 {
            continue;
        }
        let idx = (l - 1) as usize;
        if idx >= accs.len() {
            accs.resize(idx + 1, Acc::new());
        }
        accs[idx].push(x, y);
    }
    let blobs = accs
        .iter()
        .enumerate()
        .filter(|(_, a)| a.n > 0)
        .map(|(i, a)| a.finish(i as u32 + 1, [0.0, 0.0]))
        .collect();
    (labels, blobs)
}

/// Blobs of `mask` whose area lies in `[min_area, max_area]`, with
/// coordinates shifted by `offset` (for masks built over a sub-window).
pub fn extract_blobs(mask: &GrayImage, min_area: usize, max_area: usize, offset: [f64; 2]) -> Vec<Blob> {
    let (_, blobs) = label_regions(mask);
    blobs
        .into_iter()
        .filter(|b| b.area >= min_area && b.area <= max_area)
        .map(|mut b| {
            b.bbox = Rect::new(
                b.bbox.x0 + offset[0],
                b.bbox.y0 + offset[1],
                b.bbox.x1 + offset[0],
                b.bbox.y1 + offset[1],
            );
            b.centroid = [b.centroid[0] + offset[0], b.centroid[1] + offset[1]];
            b
        })
        .collect()
}

/// Leftmost and rightmost pixel of `label` on every row it touches.
///
/// The convex hull of these points equals the hull of the whole region.
pub fn row_extremes(labels: &LabelImage, label: u32) -> Vec<[f64; 2]> {
    let (w, h) = labels.dimensions();
    let mut out = Vec::new();
    for y in 0..h {
        let mut first: Option<u32> = None;
        let mut last = 0u32;
        for x in 0..w {
            if labels.get_pixel(x, y).0[0] == label {
                first.get_or_insert(x);
                last = x;
            }
        }
        if let Some(x0) = first {
            out.push([x0 as f64, y as f64]);
            if last != x0 {
                out.push([last as f64, y as f64]);
            }
        }
    }
    out
}
