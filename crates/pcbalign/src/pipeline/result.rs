use serde::Serialize;

use super::preprocess::ProcessedImage;
use crate::affine::{AffineTransform, ResidualStats};
use crate::coarse::CoarseAlignment;
use crate::contacts::DetectionResult;
use crate::outcome::Shortfall;
use crate::vias::{Correspondence, RefineResult, Via, ViaAlignmentResult, ViaProfile};

/// Which stage produced the final transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformSource {
    Coarse,
    Vias,
    Refined,
}

/// Final registration of the back scan onto the front scan.
#[derive(Debug, Clone, Serialize)]
pub struct AlignmentResult {
    /// Processed back → processed front.
    pub transform: AffineTransform,
    /// Raw back scan → raw front scan, when the front mapping is invertible.
    pub transform_original: Option<AffineTransform>,
    pub source: TransformSource,
    pub dpi: Option<f64>,
    pub coarse: CoarseAlignment,
    pub via_profile: ViaProfile,
    pub profile_attempts: usize,
    pub via_alignment: ViaAlignmentResult,
    pub refinement: Option<RefineResult>,
    /// Via pairs confirmed under `transform`.
    pub matched: usize,
    /// Residuals of the confirmed pairs.
    pub stats: ResidualStats,
    pub pairs: Vec<Correspondence>,
    /// Every shortfall met along the way, in stage order.
    pub notes: Vec<Shortfall>,
}

/// Everything produced for one side.
#[derive(Debug, Clone, Serialize)]
pub struct SideResult {
    pub processed: ProcessedImage,
    pub contacts: DetectionResult,
    pub vias: Vec<Via>,
}

/// Output of [`align_board_pair`](super::align_board_pair).
#[derive(Debug, Clone, Serialize)]
pub struct BoardAlignment {
    pub front: SideResult,
    pub back: SideResult,
    pub result: AlignmentResult,
}
