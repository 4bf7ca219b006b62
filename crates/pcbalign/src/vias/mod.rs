//! Plated through-hole vias: detection, filtering, cross-side matching and
//! affine registration.

mod align;
mod detect;
mod filter;
mod matcher;
mod profile;
mod refine;

use serde::{Deserialize, Serialize};

pub(crate) use align::mutual_nearest;
pub use align::{align_vias, ViaAlignmentResult, MIN_POINTS};
pub use detect::{detect_side_vias, detect_vias, ViaDetectConfig, ViaDetectParams};
pub use filter::{merge_by_proximity, reject_dense_vias};
pub use matcher::{match_points, MatcherConfig};
pub use profile::{run_profiles, ProfileRun, ViaProfile};
pub use refine::{connector_regression_init, refine_affine, RefineResult, RefinerConfig};

/// How a via was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViaMethod {
    /// Dark drill hole ringed by brighter copper.
    Standard,
    /// Bright center ringed by a darker annulus.
    BrightCore,
}

/// One detected via.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Via {
    pub id: usize,
    pub center: [f64; 2],
    pub radius: f64,
    /// Circularity-based score in `[0, 1]`.
    pub confidence: f64,
    pub method: ViaMethod,
    /// Id of the matched via on the other side.
    pub matched_id: Option<usize>,
    /// Set when the match survives the final registration.
    pub confirmed: bool,
}

impl Via {
    pub fn new(center: [f64; 2], radius: f64, confidence: f64, method: ViaMethod) -> Self {
        Self {
            id: 0,
            center,
            radius,
            confidence,
            method,
            matched_id: None,
            confirmed: false,
        }
    }
}

/// Centers of a via list.
pub fn via_centers(vias: &[Via]) -> Vec<[f64; 2]> {
    vias.iter().map(|v| v.center).collect()
}

/// Renumber ids `0..n` in list order.
pub(crate) fn renumber(vias: &mut [Via]) {
    for (i, v) in vias.iter_mut().enumerate() {
        v.id = i;
    }
}

/// What a correspondence was built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrespondenceSource {
    Via,
    Contact,
}

/// A front/back point pair. `back` is in the back side's own frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correspondence {
    pub front: [f64; 2],
    pub back: [f64; 2],
    pub source: CorrespondenceSource,
    /// Index into the front via/contact list.
    pub front_index: Option<usize>,
    /// Index into the back via/contact list.
    pub back_index: Option<usize>,
}

impl Correspondence {
    pub fn via(front: &[Via], back: &[Via], fi: usize, bi: usize) -> Self {
        Self {
            front: front[fi].center,
            back: back[bi].center,
            source: CorrespondenceSource::Via,
            front_index: Some(fi),
            back_index: Some(bi),
        }
    }
}

/// Split pairs into `(src = back, dst = front)` point lists.
pub(crate) fn split_pairs(pairs: &[Correspondence]) -> (Vec<[f64; 2]>, Vec<[f64; 2]>) {
    pairs.iter().map(|p| (p.back, p.front)).unzip()
}
