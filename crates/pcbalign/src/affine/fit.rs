//! Closed-form affine estimation from point correspondences.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::{AffineError, AffineTransform};

/// Relative tolerance on the source covariance below which the point set is
/// treated as collinear.
const COLLINEAR_REL_TOL: f64 = 1e-9;

/// Least-squares affine `dst ≈ T(src)` from `N ≥ 3` pairs.
///
/// Coordinates are centered before solving the normal equations so large
/// pixel offsets do not hurt conditioning.
pub fn fit_affine_lsq(src: &[[f64; 2]], dst: &[[f64; 2]]) -> Result<AffineTransform, AffineError> {
    let n = src.len().min(dst.len());
    if n < 3 {
        return Err(AffineError::TooFewPoints { needed: 3, got: n });
    }
    let nf = n as f64;
    let (mut msx, mut msy, mut mdx, mut mdy) = (0.0, 0.0, 0.0, 0.0);
    for i in 0..n {
        msx += src[i][0];
        msy += src[i][1];
        mdx += dst[i][0];
        mdy += dst[i][1];
    }
    msx /= nf;
    msy /= nf;
    mdx /= nf;
    mdy /= nf;

    let mut xtx = Matrix3::<f64>::zeros();
    let mut xtu = Vector3::<f64>::zeros();
    let mut xtv = Vector3::<f64>::zeros();
    for i in 0..n {
        let row = Vector3::new(src[i][0] - msx, src[i][1] - msy, 1.0);
        xtx += row * row.transpose();
        xtu += row * (dst[i][0] - mdx);
        xtv += row * (dst[i][1] - mdy);
    }

    let sxx = xtx[(0, 0)];
    let syy = xtx[(1, 1)];
    let sxy = xtx[(0, 1)];
    let trace = sxx + syy;
    if trace <= 0.0 || sxx * syy - sxy * sxy <= COLLINEAR_REL_TOL * trace * trace {
        return Err(AffineError::Degenerate);
    }

    let lu = xtx.lu();
    let row_u = lu.solve(&xtu).ok_or(AffineError::Degenerate)?;
    let row_v = lu.solve(&xtv).ok_or(AffineError::Degenerate)?;

    // Undo centering: dst - md = A (src - ms) + t'  =>  t = md + t' - A ms.
    let (a, b, c, d) = (row_u[0], row_u[1], row_v[0], row_v[1]);
    let t = AffineTransform::new(
        a,
        b,
        c,
        d,
        mdx + row_u[2] - a * msx - b * msy,
        mdy + row_v[2] - c * msx - d * msy,
    );
    if t.is_finite() {
        Ok(t)
    } else {
        Err(AffineError::Degenerate)
    }
}

/// Exact affine through three pairs.
pub fn fit_affine_exact(
    src: &[[f64; 2]; 3],
    dst: &[[f64; 2]; 3],
) -> Result<AffineTransform, AffineError> {
    fit_affine_lsq(src, dst)
}

/// Per-pair Euclidean error `|T(src) - dst|`.
pub fn residuals(t: &AffineTransform, src: &[[f64; 2]], dst: &[[f64; 2]]) -> Vec<f64> {
    src.iter()
        .zip(dst)
        .map(|(&s, &d)| {
            let p = t.apply(s);
            (p[0] - d[0]).hypot(p[1] - d[1])
        })
        .collect()
}

/// Summary of residual magnitudes in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResidualStats {
    pub count: usize,
    pub mean_px: f64,
    pub rms_px: f64,
    pub max_px: f64,
}

impl ResidualStats {
    pub fn from_residuals(errors: &[f64]) -> Self {
        let finite: Vec<f64> = errors.iter().copied().filter(|e| e.is_finite()).collect();
        if finite.is_empty() {
            return Self::default();
        }
        let n = finite.len() as f64;
        Self {
            count: finite.len(),
            mean_px: finite.iter().sum::<f64>() / n,
            rms_px: (finite.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
            max_px: finite.iter().copied().fold(0.0, f64::max),
        }
    }

    pub fn of(t: &AffineTransform, src: &[[f64; 2]], dst: &[[f64; 2]]) -> Self {
        Self::from_residuals(&residuals(t, src, dst))
    }
}
