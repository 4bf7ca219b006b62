//! Gold edge-connector contact detection.
//!
//! Detection runs in an *edge frame* where the nominated board edge is on
//! top: seed blobs from an HSV mask, densest row cluster, pitch grid fit,
//! optional brute-force strip scan, robust filtering, and finally a grid
//! rescue that emits a complete, evenly pitched row. Results are reported in
//! the coordinates of the input raster.

mod brute_force;
mod detect;
mod filter;
mod frame;
mod grid;
mod rescue;
mod spec;

use serde::{Deserialize, Serialize};

use crate::geometry::Rect;

pub use brute_force::{brute_force_scan, dedup_contacts, BlobLimits};
pub use detect::{detect_contacts, ContactConfig};
pub use filter::{filter_contacts, normalize_widths, remove_outliers, RobustFilterConfig};
pub use grid::{fit_grid, GridConfig, GridFit};
pub use rescue::{rescue_grid, RescueConfig};
pub use spec::{ContactSpec, ExpectedGeometry, HsvRange};

/// Board edge carrying the connector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoardEdge {
    Top,
    Bottom,
    Left,
    Right,
}

impl BoardEdge {
    /// Clockwise quarter turns that bring this edge to the top.
    pub fn quarter_turns_to_top(self) -> u32 {
        match self {
            BoardEdge::Top => 0,
            BoardEdge::Left => 1,
            BoardEdge::Bottom => 2,
            BoardEdge::Right => 3,
        }
    }

    /// Clockwise rotation in degrees that brings this edge to the top.
    pub fn rotation_to_top_deg(self) -> u32 {
        self.quarter_turns_to_top() * 90
    }

    /// True for edges whose contact row runs along x.
    pub fn is_horizontal(self) -> bool {
        matches!(self, BoardEdge::Top | BoardEdge::Bottom)
    }
}

impl std::fmt::Display for BoardEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BoardEdge::Top => "top",
            BoardEdge::Bottom => "bottom",
            BoardEdge::Left => "left",
            BoardEdge::Right => "right",
        };
        f.write_str(s)
    }
}

/// Which detection pass produced a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionPass {
    Seed,
    BruteForce,
    Rescue,
}

/// One connector contact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    /// Bounding box; far edges exclusive.
    pub bbox: Rect,
    /// Sub-pixel center (mask moments, or grid position for rescued contacts).
    pub center: [f64; 2],
    pub pass: DetectionPass,
}

/// Fitted contact row.
///
/// `line_pos` is Y for horizontal edges and X for vertical ones;
/// `start_pos` and `pitch_px` run along the edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContactLineParams {
    pub line_pos: f64,
    pub pitch_px: f64,
    pub start_pos: f64,
    pub avg_width: f64,
    pub avg_height: f64,
    pub expected_count: usize,
}

/// Result of one contact detection call, in input raster coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Final contacts, ordered along the edge.
    pub contacts: Vec<Contact>,
    /// Grid centers implied by the fitted row, including missed slots.
    pub expected_positions: Vec<[f64; 2]>,
    pub edge: BoardEdge,
    /// Clockwise rotation (0/90/180/270) bringing the contacts to the top.
    pub rotation_deg: u32,
    pub board_bounds: Rect,
    pub search_bounds: Rect,
    pub dpi: Option<f64>,
    /// True when `dpi` was derived from the measured pitch.
    pub dpi_estimated: bool,
    /// Angle of the fitted contact line relative to the edge, degrees.
    pub line_angle_deg: f64,
    /// Row parameters in input coordinates; absent when no row was found.
    pub line: Option<ContactLineParams>,
}

impl DetectionResult {
    pub fn centers(&self) -> Vec<[f64; 2]> {
        self.contacts.iter().map(|c| c.center).collect()
    }

    /// Contacts that were actually observed rather than grid-rescued.
    pub fn observed_count(&self) -> usize {
        self.contacts
            .iter()
            .filter(|c| c.pass != DetectionPass::Rescue)
            .count()
    }
}
