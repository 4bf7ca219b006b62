//! pcbalign: registration of front/back PCB scans.
//!
//! Two flatbed scans of opposite board faces are brought into one pixel
//! frame using the physical features both sides share. The stages are:
//!
//! 1. **Bounds** – background sampling, board silhouette, minimum-area
//!    rectangle; the scan is deskewed and cropped to the board.
//! 2. **Contacts** – gold edge-connector fingers: HSV seed pass, pitch grid
//!    fit, brute-force strip scan, robust filtering, grid rescue.
//! 3. **Coarse** – contact rows paired across sides give rotation and
//!    translation.
//! 4. **Vias** – plated through-holes under escalating detection profiles,
//!    matched by per-corner offset voting and fitted with RANSAC.
//! 5. **Refine** – mutual-nearest-neighbour passes with residual
//!    regression polish the affine transform.
//!
//! # Public API
//! - [`align_board_pair`] runs the whole pipeline with an [`AlignConfig`].
//! - Each stage is also usable on its own ([`detect_board_bounds`],
//!   [`detect_contacts`], [`coarse_align`], [`detect_side_vias`],
//!   [`align_vias`], [`refine_affine`]).
//! - Stage results come wrapped in [`Outcome`]: a partial result keeps its
//!   value next to the [`Shortfall`] that made it partial.

pub mod affine;
mod blob;
mod bounds;
mod coarse;
mod config;
pub mod contacts;
mod error;
pub mod geometry;
mod outcome;
mod pipeline;
pub mod raster;
pub mod vias;

#[cfg(test)]
pub(crate) mod test_utils;

pub use affine::{AffineError, AffineTransform, RansacAffineConfig, ResidualStats};
pub use blob::Blob;
pub use bounds::{detect_board_bounds, estimate_background, BoardBounds, BoundsConfig};
pub use coarse::{
    coarse_align, coarse_align_points, contact_correspondences, inner_edge_point,
    CoarseAlignment, CoarseConfig, RotationSource,
};
pub use config::{AlignConfig, Verbosity};
pub use contacts::{
    detect_contacts, BoardEdge, Contact, ContactConfig, ContactLineParams, ContactSpec,
    DetectionPass, DetectionResult, HsvRange, RobustFilterConfig,
};
pub use error::{AlignError, Side};
pub use geometry::Rect;
pub use outcome::{Outcome, Shortfall};
pub use pipeline::{
    align_board_pair, preprocess, preprocess_side, AlignmentResult, BoardAlignment,
    ProcessedImage, ProcessedMeta, SideResult, TransformSource,
};
pub use vias::{
    align_vias, detect_side_vias, detect_vias, refine_affine, Correspondence, MatcherConfig,
    RefineResult, RefinerConfig, Via, ViaAlignmentResult, ViaDetectConfig, ViaMethod,
    ViaProfile,
};
