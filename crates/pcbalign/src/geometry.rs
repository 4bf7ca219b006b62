//! Planar geometry helpers shared by all stages.
//!
//! Everything works in image pixel coordinates: `x` to the right, `y` down,
//! angles in degrees measured as `atan2(dy, dx)`.

use serde::{Deserialize, Serialize};

// ── Rect ───────────────────────────────────────────────────────────────────

/// Axis-aligned rectangle `[x0, x1) × [y0, y1)` in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f64,
    pub y0: f64,
    pub x1: f64,
    pub y1: f64,
}

impl Rect {
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    /// Rectangle covering a whole `width × height` raster.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0.0, 0.0, width as f64, height as f64)
    }

    /// Rectangle centered on `center` with the given size.
    pub fn centered(center: [f64; 2], width: f64, height: f64) -> Self {
        Self::new(
            center[0] - width * 0.5,
            center[1] - height * 0.5,
            center[0] + width * 0.5,
            center[1] + height * 0.5,
        )
    }

    /// Bounding box of a point set, `None` when empty.
    pub fn bounding(points: &[[f64; 2]]) -> Option<Self> {
        let first = points.first()?;
        let mut r = Self::new(first[0], first[1], first[0], first[1]);
        for p in &points[1..] {
            r.x0 = r.x0.min(p[0]);
            r.y0 = r.y0.min(p[1]);
            r.x1 = r.x1.max(p[0]);
            r.y1 = r.y1.max(p[1]);
        }
        Some(r)
    }

    pub fn width(&self) -> f64 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f64 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f64 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center(&self) -> [f64; 2] {
        [(self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5]
    }

    pub fn contains(&self, p: [f64; 2]) -> bool {
        p[0] >= self.x0 && p[0] < self.x1 && p[1] >= self.y0 && p[1] < self.y1
    }

    /// Grow by `margin` on every side.
    pub fn expand(&self, margin: f64) -> Self {
        Self::new(
            self.x0 - margin,
            self.y0 - margin,
            self.x1 + margin,
            self.y1 + margin,
        )
    }

    /// Scale all coordinates about the origin.
    pub fn scale(&self, s: f64) -> Self {
        Self::new(self.x0 * s, self.y0 * s, self.x1 * s, self.y1 * s)
    }

    /// Intersection with `other`; may be empty (zero area).
    pub fn intersect(&self, other: &Rect) -> Self {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1).max(x0);
        let y1 = self.y1.min(other.y1).max(y0);
        Self { x0, y0, x1, y1 }
    }

    /// Integer pixel window `(x, y, w, h)` covering this rect, clamped to
    /// a `width × height` raster.
    pub fn to_pixel_window(&self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        let x0 = self.x0.floor().clamp(0.0, width as f64) as u32;
        let y0 = self.y0.floor().clamp(0.0, height as f64) as u32;
        let x1 = self.x1.ceil().clamp(0.0, width as f64) as u32;
        let y1 = self.y1.ceil().clamp(0.0, height as f64) as u32;
        (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }
}

// ── Point helpers ──────────────────────────────────────────────────────────

#[inline]
pub fn dist2(a: [f64; 2], b: [f64; 2]) -> f64 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    dx * dx + dy * dy
}

#[inline]
pub fn dist(a: [f64; 2], b: [f64; 2]) -> f64 {
    dist2(a, b).sqrt()
}

/// Mean of a point set, `None` when empty.
pub fn centroid(points: &[[f64; 2]]) -> Option<[f64; 2]> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p[0], sy + p[1]));
    Some([sx / n, sy / n])
}

/// Median of finite values; sorts `values` in place.
pub fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    Some(if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    })
}

/// Median of an iterator of values.
pub fn median_of(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut v: Vec<f64> = values.into_iter().filter(|x| x.is_finite()).collect();
    median(&mut v)
}

// ── Line fitting ───────────────────────────────────────────────────────────

/// Least-squares line `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LineFit {
    pub intercept: f64,
    pub slope: f64,
}

impl LineFit {
    pub fn eval(&self, x: f64) -> f64 {
        self.intercept + self.slope * x
    }

    /// Line direction in degrees.
    pub fn angle_deg(&self) -> f64 {
        self.slope.atan().to_degrees()
    }
}

/// Ordinary least squares of `y` on `x`.
///
/// A near-zero `x` variance yields slope 0 through the mean, never NaN.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Option<LineFit> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }
    let nf = n as f64;
    let mx = xs[..n].iter().sum::<f64>() / nf;
    let my = ys[..n].iter().sum::<f64>() / nf;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for i in 0..n {
        let dx = xs[i] - mx;
        sxx += dx * dx;
        sxy += dx * (ys[i] - my);
    }
    let slope = if sxx > 1e-9 * nf { sxy / sxx } else { 0.0 };
    Some(LineFit {
        intercept: my - slope * mx,
        slope,
    })
}

/// Fold an angle in degrees into `[-45, 45]` by repeated ±90° steps.
pub fn fold_to_quarter_deg(angle_deg: f64) -> f64 {
    if !angle_deg.is_finite() {
        return 0.0;
    }
    let mut a = angle_deg % 180.0;
    while a > 45.0 {
        a -= 90.0;
    }
    while a < -45.0 {
        a += 90.0;
    }
    a
}

// ── Convex hull / minimum-area rectangle ───────────────────────────────────

fn cross(o: [f64; 2], a: [f64; 2], b: [f64; 2]) -> f64 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

/// Convex hull by Andrew's monotone chain, counter-clockwise, no repeated
/// closing vertex.
pub fn convex_hull(points: &[[f64; 2]]) -> Vec<[f64; 2]> {
    let mut pts: Vec<[f64; 2]> = points.to_vec();
    pts.sort_by(|a, b| a[0].total_cmp(&b[0]).then(a[1].total_cmp(&b[1])));
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }

    let mut lower: Vec<[f64; 2]> = Vec::with_capacity(pts.len());
    for &p in &pts {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<[f64; 2]> = Vec::with_capacity(pts.len());
    for &p in pts.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

/// Minimum-area enclosing rectangle at arbitrary orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinAreaRect {
    pub center: [f64; 2],
    /// Extent along the `angle_deg` direction.
    pub width: f64,
    /// Extent perpendicular to `angle_deg`.
    pub height: f64,
    /// Direction of the `width` side.
    pub angle_deg: f64,
    pub corners: [[f64; 2]; 4],
}

impl MinAreaRect {
    /// Orientation of the longer side.
    pub fn long_edge_angle_deg(&self) -> f64 {
        if self.width >= self.height {
            self.angle_deg
        } else {
            self.angle_deg + 90.0
        }
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

/// Rotating-edges search over the convex hull.
///
/// The optimal rectangle has one side collinear with a hull edge, so every
/// hull edge direction is tried.
pub fn min_area_rect(points: &[[f64; 2]]) -> Option<MinAreaRect> {
    let hull = convex_hull(points);
    if hull.is_empty() {
        return None;
    }
    if hull.len() < 3 {
        let bb = Rect::bounding(&hull)?;
        return Some(axis_aligned_min_rect(&bb));
    }

    let mut best: Option<(f64, [f64; 2], f64, f64, f64, f64)> = None;
    for i in 0..hull.len() {
        let p = hull[i];
        let q = hull[(i + 1) % hull.len()];
        let len = dist(p, q);
        if len < 1e-12 {
            continue;
        }
        let ux = [(q[0] - p[0]) / len, (q[1] - p[1]) / len];
        let uy = [-ux[1], ux[0]];
        let (mut min_u, mut max_u, mut min_v, mut max_v) =
            (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
        for h in &hull {
            let u = h[0] * ux[0] + h[1] * ux[1];
            let v = h[0] * uy[0] + h[1] * uy[1];
            min_u = min_u.min(u);
            max_u = max_u.max(u);
            min_v = min_v.min(v);
            max_v = max_v.max(v);
        }
        let area = (max_u - min_u) * (max_v - min_v);
        if best.map_or(true, |b| area < b.0) {
            best = Some((area, ux, min_u, max_u, min_v, max_v));
        }
    }

    let (_, ux, min_u, max_u, min_v, max_v) = best?;
    let uy = [-ux[1], ux[0]];
    let to_xy = |u: f64, v: f64| [u * ux[0] + v * uy[0], u * ux[1] + v * uy[1]];
    let corners = [
        to_xy(min_u, min_v),
        to_xy(max_u, min_v),
        to_xy(max_u, max_v),
        to_xy(min_u, max_v),
    ];
    Some(MinAreaRect {
        center: to_xy(0.5 * (min_u + max_u), 0.5 * (min_v + max_v)),
        width: max_u - min_u,
        height: max_v - min_v,
        angle_deg: ux[1].atan2(ux[0]).to_degrees(),
        corners,
    })
}

fn axis_aligned_min_rect(bb: &Rect) -> MinAreaRect {
    MinAreaRect {
        center: bb.center(),
        width: bb.width(),
        height: bb.height(),
        angle_deg: 0.0,
        corners: [[bb.x0, bb.y0], [bb.x1, bb.y0], [bb.x1, bb.y1], [bb.x0, bb.y1]],
    }
}
