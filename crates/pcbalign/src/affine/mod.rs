//! 2-D affine transforms: value type, least-squares fitting, RANSAC.

mod fit;
mod ransac;

pub use fit::{fit_affine_exact, fit_affine_lsq, residuals, ResidualStats};
pub use ransac::{fit_affine_ransac, AffineRansacResult, RansacAffineConfig};

use nalgebra::Matrix3;
use serde::{Deserialize, Serialize};

// ── Error type ─────────────────────────────────────────────────────────────

/// Errors from affine estimation.
#[derive(Debug, Clone, PartialEq)]
pub enum AffineError {
    /// Too few correspondences for the requested operation.
    TooFewPoints {
        /// Required minimum number of pairs.
        needed: usize,
        /// Provided number of pairs.
        got: usize,
    },
    /// Source points are collinear (or coincident); no unique solution.
    Degenerate,
    /// RANSAC never reached the minimum viable inlier count.
    InsufficientInliers {
        /// Required minimum number of inliers.
        needed: usize,
        /// Best inlier count seen.
        found: usize,
    },
}

impl std::fmt::Display for AffineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooFewPoints { needed, got } => {
                write!(f, "too few point pairs: need {}, got {}", needed, got)
            }
            Self::Degenerate => write!(f, "degenerate point configuration"),
            Self::InsufficientInliers { needed, found } => {
                write!(f, "insufficient inliers: need {}, found {}", needed, found)
            }
        }
    }
}

impl std::error::Error for AffineError {}

// ── AffineTransform ────────────────────────────────────────────────────────

/// Affine map `(x, y) → (a x + b y + tx, c x + d y + ty)`.
///
/// Immutable value type; composition returns a new transform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub tx: f64,
    pub ty: f64,
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl AffineTransform {
    pub const fn new(a: f64, b: f64, c: f64, d: f64, tx: f64, ty: f64) -> Self {
        Self { a, b, c, d, tx, ty }
    }

    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    pub const fn translation(tx: f64, ty: f64) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    /// Rotation about the origin; positive angles turn +x towards +y.
    pub fn rotation_deg(angle_deg: f64) -> Self {
        let (s, c) = angle_deg.to_radians().sin_cos();
        Self::new(c, -s, s, c, 0.0, 0.0)
    }

    /// Rotation about an arbitrary pivot.
    pub fn rotation_about_deg(angle_deg: f64, pivot: [f64; 2]) -> Self {
        Self::translation(pivot[0], pivot[1])
            .compose(&Self::rotation_deg(angle_deg))
            .compose(&Self::translation(-pivot[0], -pivot[1]))
    }

    pub const fn scaling(sx: f64, sy: f64) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Build from the two rows of a `2 × 3` matrix.
    pub fn from_rows(rows: [[f64; 3]; 2]) -> Self {
        Self::new(
            rows[0][0], rows[0][1], rows[1][0], rows[1][1], rows[0][2], rows[1][2],
        )
    }

    pub fn to_rows(&self) -> [[f64; 3]; 2] {
        [[self.a, self.b, self.tx], [self.c, self.d, self.ty]]
    }

    /// Homogeneous `3 × 3` matrix.
    pub fn to_matrix3(&self) -> Matrix3<f64> {
        Matrix3::new(self.a, self.b, self.tx, self.c, self.d, self.ty, 0.0, 0.0, 1.0)
    }

    /// Take the affine part of a homogeneous matrix (last row ignored).
    pub fn from_matrix3(m: &Matrix3<f64>) -> Self {
        Self::new(m[(0, 0)], m[(0, 1)], m[(1, 0)], m[(1, 1)], m[(0, 2)], m[(1, 2)])
    }

    pub fn apply(&self, p: [f64; 2]) -> [f64; 2] {
        [
            self.a * p[0] + self.b * p[1] + self.tx,
            self.c * p[0] + self.d * p[1] + self.ty,
        ]
    }

    pub fn apply_all(&self, points: &[[f64; 2]]) -> Vec<[f64; 2]> {
        points.iter().map(|&p| self.apply(p)).collect()
    }

    /// `self ∘ other`: apply `other` first, then `self`.
    pub fn compose(&self, other: &AffineTransform) -> AffineTransform {
        Self::new(
            self.a * other.a + self.b * other.c,
            self.a * other.b + self.b * other.d,
            self.c * other.a + self.d * other.c,
            self.c * other.b + self.d * other.d,
            self.a * other.tx + self.b * other.ty + self.tx,
            self.c * other.tx + self.d * other.ty + self.ty,
        )
    }

    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse map, `None` when the linear part is singular.
    pub fn invert(&self) -> Option<AffineTransform> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < 1e-12 {
            return None;
        }
        let ia = self.d / det;
        let ib = -self.b / det;
        let ic = -self.c / det;
        let id = self.a / det;
        Some(Self::new(
            ia,
            ib,
            ic,
            id,
            -(ia * self.tx + ib * self.ty),
            -(ic * self.tx + id * self.ty),
        ))
    }

    /// Rotation component in degrees (mean of the column angles, which
    /// separates rotation from shear symmetrically).
    pub fn rotation_component_deg(&self) -> f64 {
        let col_x = self.c.atan2(self.a);
        let col_y = (-self.b).atan2(self.d);
        let mut diff = col_y - col_x;
        while diff > std::f64::consts::PI {
            diff -= 2.0 * std::f64::consts::PI;
        }
        while diff < -std::f64::consts::PI {
            diff += 2.0 * std::f64::consts::PI;
        }
        (col_x + 0.5 * diff).to_degrees()
    }

    /// Per-axis scale: lengths of the images of the unit axes.
    pub fn scale_xy(&self) -> [f64; 2] {
        [self.a.hypot(self.c), self.b.hypot(self.d)]
    }

    pub fn is_finite(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.tx, self.ty]
            .iter()
            .all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_close(a: &AffineTransform, b: &AffineTransform, eps: f64) {
        assert_relative_eq!(a.a, b.a, epsilon = eps);
        assert_relative_eq!(a.b, b.b, epsilon = eps);
        assert_relative_eq!(a.c, b.c, epsilon = eps);
        assert_relative_eq!(a.d, b.d, epsilon = eps);
        assert_relative_eq!(a.tx, b.tx, epsilon = eps);
        assert_relative_eq!(a.ty, b.ty, epsilon = eps);
    }

    #[test]
    fn compose_applies_right_operand_first() {
        let t = AffineTransform::translation(10.0, 0.0);
        let r = AffineTransform::rotation_deg(90.0);
        let p = t.compose(&r).apply([1.0, 0.0]);
        assert_relative_eq!(p[0], 10.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn invert_roundtrip_is_identity() {
        let t = AffineTransform::new(1.01, 0.02, -0.03, 0.99, 14.0, -6.0);
        let inv = t.invert().unwrap();
        assert_close(&t.compose(&inv), &AffineTransform::identity(), 1e-12);
        assert!(AffineTransform::scaling(0.0, 1.0).invert().is_none());
    }

    #[test]
    fn rotation_about_pivot_fixes_pivot() {
        let t = AffineTransform::rotation_about_deg(33.0, [120.0, -40.0]);
        let p = t.apply([120.0, -40.0]);
        assert_relative_eq!(p[0], 120.0, epsilon = 1e-9);
        assert_relative_eq!(p[1], -40.0, epsilon = 1e-9);
        assert_relative_eq!(t.rotation_component_deg(), 33.0, epsilon = 1e-9);
    }

    #[test]
    fn matrix3_conversion_matches_compose() {
        let a = AffineTransform::new(1.1, 0.2, -0.1, 0.9, 3.0, 4.0);
        let b = AffineTransform::rotation_deg(-7.0);
        let via_matrix = AffineTransform::from_matrix3(&(a.to_matrix3() * b.to_matrix3()));
        assert_close(&via_matrix, &a.compose(&b), 1e-12);
    }
}
