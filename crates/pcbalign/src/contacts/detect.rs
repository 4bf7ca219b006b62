//! Contact detection orchestration.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use super::brute_force::{scan_window, BlobLimits};
use super::frame::EdgeFrame;
use super::grid::{fit_grid, GridConfig, GridFit};
use super::rescue::{rescue_grid, RescueConfig};
use super::{
    brute_force_scan, filter_contacts, BoardEdge, Contact, ContactLineParams, ContactSpec,
    DetectionPass, DetectionResult, RobustFilterConfig,
};
use crate::error::{ensure_non_empty, AlignError};
use crate::geometry::{dist2, median_of, Rect};
use crate::outcome::{Outcome, Shortfall};

/// Contact detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    /// Search band half-height as a fraction of the board dimension
    /// perpendicular to the edge.
    pub search_band_frac: f64,
    /// Lower bound on the search band half-height (pixels).
    pub search_band_min_px: f64,
    /// Row clustering window as a multiple of the expected contact height.
    pub cluster_window_scale: f64,
    /// Run the brute-force strip pass when the seed pass is short.
    pub brute_force: bool,
    /// Relaxation of the colour window for the brute-force pass.
    pub relax_hue_pad_deg: f32,
    pub relax_sat_scale: f32,
    pub relax_val_scale: f32,
    /// Observed (non-rescued) contacts needed, as a fraction of the count,
    /// for a complete result.
    pub min_observed_fraction: f64,
    pub grid: GridConfig,
    pub rescue: RescueConfig,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            search_band_frac: 0.10,
            search_band_min_px: 300.0,
            cluster_window_scale: 1.0,
            brute_force: true,
            relax_hue_pad_deg: 8.0,
            relax_sat_scale: 0.6,
            relax_val_scale: 0.75,
            min_observed_fraction: 0.3,
            grid: GridConfig::default(),
            rescue: RescueConfig::default(),
        }
    }
}

/// Candidates inside the densest `window`-tall band of center y.
///
/// Ties go to the band nearest the top of the frame.
fn densest_row(cands: &[Contact], window: f64) -> Vec<Contact> {
    if cands.is_empty() {
        return Vec::new();
    }
    let mut sorted = cands.to_vec();
    sorted.sort_by(|a, b| a.center[1].total_cmp(&b.center[1]));
    let mut best = (0usize, 0usize);
    let mut hi = 0usize;
    for lo in 0..sorted.len() {
        hi = hi.max(lo);
        while hi < sorted.len() && sorted[hi].center[1] - sorted[lo].center[1] <= window {
            hi += 1;
        }
        if hi - lo > best.1 - best.0 {
            best = (lo, hi);
        }
    }
    sorted[best.0..best.1].to_vec()
}

/// Add `extra` contacts that do not duplicate an existing one.
fn merge_new(existing: &[Contact], extra: Vec<Contact>, radius: f64) -> Vec<Contact> {
    let r2 = radius * radius;
    let mut out = existing.to_vec();
    for c in extra {
        if !out.iter().any(|e| dist2(e.center, c.center) < r2) {
            out.push(c);
        }
    }
    out
}

/// Everything computed in the edge frame.
struct FrameDetection {
    band: Rect,
    contacts: Vec<Contact>,
    observed: usize,
    fit: Option<GridFit>,
    dpi: Option<f64>,
    dpi_estimated: bool,
}

fn detect_in_frame(
    fimg: &RgbImage,
    fboard: &Rect,
    spec: &ContactSpec,
    dpi: Option<f64>,
    config: &ContactConfig,
    filter: &RobustFilterConfig,
) -> FrameDetection {
    let full = Rect::full(fimg.width(), fimg.height());
    let ext = (config.search_band_frac * fboard.height()).max(config.search_band_min_px);
    let band = Rect::new(fboard.x0, fboard.y0 - ext, fboard.x1, fboard.y0 + ext).intersect(&full);

    let expected = spec.expected_geometry(dpi);
    let limits = BlobLimits {
        area_min: expected.area_min_px,
        area_max: expected.area_max_px,
        aspect_min: spec.aspect_min,
        aspect_max: spec.aspect_max,
    };
    let ref_size = expected.pitch_px.map(|_| [expected.width_px, expected.height_px]);

    let seeds = scan_window(fimg, &band, &spec.hsv, &limits, DetectionPass::Seed);
    let row_window = |cands: &[Contact]| -> f64 {
        let h = if expected.pitch_px.is_some() {
            expected.height_px
        } else {
            median_of(cands.iter().map(|c| c.bbox.height())).unwrap_or(expected.height_px)
        };
        config.cluster_window_scale * h
    };
    let row = densest_row(&seeds, row_window(&seeds));
    tracing::debug!("seed pass: {} blobs, {} in densest row", seeds.len(), row.len());

    let mut fit = fit_grid(&row, expected.pitch_px, ref_size, spec.count, &config.grid);

    let have = fit.as_ref().map_or(0, |f| f.members.len());
    if have < spec.count && config.brute_force {
        let relaxed = spec
            .hsv
            .relaxed(config.relax_hue_pad_deg, config.relax_sat_scale, config.relax_val_scale);
        let contact_h = fit
            .as_ref()
            .map_or(expected.height_px, |f| f.params.avg_height);
        let radius = fit
            .as_ref()
            .map_or(0.5 * expected.width_px, |f| 0.3 * f.params.pitch_px);
        let extra = brute_force_scan(fimg, &band, &relaxed, &limits, contact_h, radius);
        let base = fit.as_ref().map_or(row.clone(), |f| f.members.clone());
        let merged = merge_new(&base, extra, radius);
        let merged_row = densest_row(&merged, row_window(&merged));
        let prior = fit.as_ref().map(|f| f.params.pitch_px).or(expected.pitch_px);
        if let Some(better) = fit_grid(&merged_row, prior, ref_size, spec.count, &config.grid) {
            if better.members.len() > have {
                fit = Some(better);
            }
        }
    }

    let Some(first_fit) = fit else {
        return FrameDetection {
            band,
            contacts: row,
            observed: 0,
            fit: None,
            dpi,
            dpi_estimated: false,
        };
    };

    let (dpi, dpi_estimated) = match dpi {
        Some(d) => (Some(d), false),
        None => {
            let est = spec.dpi_from_pitch(first_fit.params.pitch_px);
            tracing::info!("estimated DPI {:.1} from pitch {:.2} px", est, first_fit.params.pitch_px);
            (Some(est), true)
        }
    };

    let filtered = filter_contacts(&first_fit.members, filter);
    let fit = fit_grid(
        &filtered,
        Some(first_fit.params.pitch_px),
        None,
        spec.count,
        &config.grid,
    )
    .unwrap_or(first_fit);
    let observed = fit.members.len();

    let contacts = if observed >= 2 {
        rescue_grid(fimg, &fit.members, &fit.params, &config.rescue)
    } else {
        fit.members.clone()
    };

    FrameDetection {
        band,
        contacts,
        observed,
        fit: Some(fit),
        dpi,
        dpi_estimated,
    }
}

/// Along-edge coordinate in input raster space.
fn along(edge: BoardEdge, p: [f64; 2]) -> f64 {
    if edge.is_horizontal() {
        p[0]
    } else {
        p[1]
    }
}

fn across(edge: BoardEdge, p: [f64; 2]) -> f64 {
    if edge.is_horizontal() {
        p[1]
    } else {
        p[0]
    }
}

/// Detect the contact row on `spec.edge` of `img`.
///
/// `board` is the board region in `img` coordinates. `dpi` is estimated
/// from the measured pitch when not given. The returned contacts are
/// ordered along the edge; when at least two seeds were found the row holds
/// exactly `spec.count` evenly pitched contacts.
pub fn detect_contacts(
    img: &RgbImage,
    board: &Rect,
    spec: &ContactSpec,
    dpi: Option<f64>,
    config: &ContactConfig,
    filter: &RobustFilterConfig,
) -> Result<Outcome<DetectionResult>, AlignError> {
    let (w, h) = img.dimensions();
    ensure_non_empty(w, h, None)?;
    spec.validate()?;

    let edge = spec.edge;
    let frame = EdgeFrame::new(edge, w, h);
    let fimg = frame.render(img);
    let full_frame = Rect::full(fimg.width(), fimg.height());
    let fboard = frame.rect_to_frame(&board.intersect(&Rect::full(w, h))).intersect(&full_frame);
    let fboard = if fboard.area() > 0.0 { fboard } else { full_frame };

    let det = detect_in_frame(&fimg, &fboard, spec, dpi, config, filter);

    let mut contacts: Vec<Contact> = det
        .contacts
        .iter()
        .map(|c| Contact {
            bbox: frame.rect_to_image(&c.bbox),
            center: frame.to_image(c.center),
            pass: c.pass,
        })
        .collect();
    contacts.sort_by(|a, b| along(edge, a.center).total_cmp(&along(edge, b.center)));

    let (line, expected_positions, line_angle_deg) = match &det.fit {
        Some(fit) if !contacts.is_empty() => {
            let n = contacts.len() as f64;
            let line = ContactLineParams {
                line_pos: contacts.iter().map(|c| across(edge, c.center)).sum::<f64>() / n,
                pitch_px: fit.params.pitch_px,
                start_pos: along(edge, contacts[0].center),
                avg_width: fit.params.avg_width,
                avg_height: fit.params.avg_height,
                expected_count: spec.count,
            };
            let positions = (0..spec.count)
                .map(|k| {
                    let a = line.start_pos + k as f64 * line.pitch_px;
                    if edge.is_horizontal() {
                        [a, line.line_pos]
                    } else {
                        [line.line_pos, a]
                    }
                })
                .collect();
            (Some(line), positions, fit.slope.atan().to_degrees())
        }
        _ => (None, Vec::new(), 0.0),
    };

    let result = DetectionResult {
        contacts,
        expected_positions,
        edge,
        rotation_deg: edge.rotation_to_top_deg(),
        board_bounds: *board,
        search_bounds: frame.rect_to_image(&det.band),
        dpi: det.dpi,
        dpi_estimated: det.dpi_estimated,
        line_angle_deg,
        line,
    };

    if result.line.is_none() {
        tracing::warn!("no contact row found on the {} edge", edge);
        return Ok(Outcome::partial(result, Shortfall::NoContactRow));
    }

    let needed = (config.min_observed_fraction * spec.count as f64).ceil() as usize;
    tracing::info!(
        "contacts on {} edge: {} of {} observed, {} emitted",
        edge,
        det.observed,
        spec.count,
        result.contacts.len()
    );
    let shortfall = (det.observed < needed).then_some(Shortfall::TooFewContacts {
        found: det.observed,
        needed: spec.count,
    });
    if let Some(s) = &shortfall {
        tracing::warn!("{}", s);
    }
    Ok(Outcome::from_check(result, shortfall))
}
