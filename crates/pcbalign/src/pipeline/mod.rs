//! End-to-end front/back registration.
//!
//! Each side is deskewed and cropped to the board, its connector contacts
//! are detected, and the two contact rows give a coarse transform. Vias are
//! then detected under escalating profiles, matched by corner voting, fitted
//! with RANSAC and polished by the iterative refiner.

mod preprocess;
mod result;

use image::RgbImage;

pub use preprocess::{preprocess, preprocess_side, ProcessedImage, ProcessedMeta};
pub use result::{AlignmentResult, BoardAlignment, SideResult, TransformSource};

use crate::affine::{AffineTransform, ResidualStats};
use crate::coarse::{coarse_align, contact_correspondences};
use crate::config::AlignConfig;
use crate::contacts::{detect_contacts, ContactSpec, DetectionResult};
use crate::error::{AlignError, Side};
use crate::geometry::Rect;
use crate::outcome::{Outcome, Shortfall};
use crate::vias::{
    align_vias, connector_regression_init, mutual_nearest, refine_affine, run_profiles,
    split_pairs, via_centers, Correspondence, CorrespondenceSource, Via,
};

struct SideStage {
    processed: ProcessedImage,
    contacts: DetectionResult,
    notes: Vec<Shortfall>,
}

fn process_side(
    img: &RgbImage,
    side: Side,
    mirror: bool,
    spec: &ContactSpec,
    dpi: Option<f64>,
    config: &AlignConfig,
) -> Result<SideStage, AlignError> {
    let (processed, bounds_note) = preprocess_side(img, side, mirror, &config.bounds)?.into_parts();
    let board = Rect::full(processed.image.width(), processed.image.height());
    let (contacts, contact_note) =
        detect_contacts(&processed.image, &board, spec, dpi, &config.contacts, &config.filter)?
            .into_parts();
    tracing::info!(
        "{} side: {} contacts ({} observed)",
        side,
        contacts.contacts.len(),
        contacts.observed_count()
    );
    Ok(SideStage {
        processed,
        contacts,
        notes: bounds_note.into_iter().chain(contact_note).collect(),
    })
}

/// Write cross-side match ids onto both via lists.
///
/// Voted pairs get `matched_id`; pairs that survive under `transform` are
/// additionally `confirmed`. Returns the confirmed pairs.
fn mark_matches(
    front: &mut [Via],
    back: &mut [Via],
    voted: &[Correspondence],
    transform: &AffineTransform,
    radius: f64,
) -> Vec<Correspondence> {
    for p in voted {
        if let (Some(f), Some(b)) = (p.front_index, p.back_index) {
            if p.source == CorrespondenceSource::Via && f < front.len() && b < back.len() {
                front[f].matched_id = Some(back[b].id);
                back[b].matched_id = Some(front[f].id);
            }
        }
    }

    let front_pts = via_centers(front);
    let mapped = transform.apply_all(&via_centers(back));
    let confirmed: Vec<Correspondence> = mutual_nearest(&front_pts, &mapped, radius)
        .into_iter()
        .map(|(f, b)| Correspondence::via(front, back, f, b))
        .collect();
    for p in &confirmed {
        if let (Some(f), Some(b)) = (p.front_index, p.back_index) {
            front[f].matched_id = Some(back[b].id);
            front[f].confirmed = true;
            back[b].matched_id = Some(front[f].id);
            back[b].confirmed = true;
        }
    }
    confirmed
}

/// Register the back scan onto the front scan.
///
/// `dpi` is estimated from the front contact pitch when not given. Only an
/// empty image or an unusable contact specification is a hard error; every
/// other shortfall is collected in `notes` and the result is partial,
/// carrying the best transform reached.
pub fn align_board_pair(
    front: &RgbImage,
    back: &RgbImage,
    spec: &ContactSpec,
    dpi: Option<f64>,
    config: &AlignConfig,
) -> Result<Outcome<BoardAlignment>, AlignError> {
    spec.validate()?;
    let (front_stage, back_stage) = rayon::join(
        || process_side(front, Side::Front, false, spec, dpi, config),
        || process_side(back, Side::Back, config.mirror_back, spec, dpi, config),
    );
    let (front_stage, back_stage) = (front_stage?, back_stage?);

    let mut notes: Vec<Shortfall> = Vec::new();
    notes.extend(front_stage.notes.iter().cloned());
    notes.extend(back_stage.notes.iter().cloned());

    let dpi = dpi.or(front_stage.contacts.dpi).or(back_stage.contacts.dpi);

    let (coarse, coarse_note) =
        coarse_align(&front_stage.contacts, &back_stage.contacts, &config.coarse).into_parts();
    notes.extend(coarse_note);

    let run = run_profiles(
        &front_stage.processed.image,
        &back_stage.processed.image,
        &coarse.transform,
        dpi,
        &config.vias,
        &config.matcher,
    );
    let mut front_vias = run.front;
    let mut back_vias = run.back;

    let extras = if config.matcher.use_contacts {
        contact_correspondences(&front_stage.contacts, &back_stage.contacts, &coarse.pairs)
    } else {
        Vec::new()
    };
    let (via_alignment, via_note) = align_vias(
        &front_vias,
        &back_vias,
        &coarse.transform,
        &extras,
        dpi,
        &config.matcher,
        &config.ransac,
    )
    .into_parts();
    let vias_ok = via_note.is_none();
    notes.extend(via_note);

    let front_pts = via_centers(&front_vias);
    let back_pts = via_centers(&back_vias);
    let init = if vias_ok {
        via_alignment.transform
    } else {
        match front_stage.contacts.line {
            Some(line) => connector_regression_init(
                &front_pts,
                &back_pts,
                &coarse.transform,
                front_stage.contacts.edge,
                line.line_pos,
                &config.refiner,
            ),
            None => coarse.transform,
        }
    };

    let (refined, refine_note) = refine_affine(&front_pts, &back_pts, &init, &config.refiner).into_parts();
    notes.extend(refine_note);
    let (transform, source) = if refined.passes > 0 {
        (refined.transform, TransformSource::Refined)
    } else if vias_ok {
        (via_alignment.transform, TransformSource::Vias)
    } else {
        (coarse.transform, TransformSource::Coarse)
    };

    let pairs = mark_matches(
        &mut front_vias,
        &mut back_vias,
        &via_alignment.pairs,
        &transform,
        config.ransac.inlier_threshold,
    );
    let (src, dst) = split_pairs(&pairs);
    let stats = ResidualStats::of(&transform, &src, &dst);
    if config.verbosity.detailed() {
        for p in &pairs {
            let m = transform.apply(p.back);
            tracing::debug!(
                "pair front ({:.1}, {:.1}) <- back ({:.1}, {:.1}), residual {:.3}px",
                p.front[0],
                p.front[1],
                p.back[0],
                p.back[1],
                crate::geometry::dist(m, p.front)
            );
        }
    }

    let transform_original = front_stage
        .processed
        .meta
        .to_original()
        .map(|f| f.compose(&transform).compose(&back_stage.processed.meta.to_processed));

    tracing::info!(
        "alignment: {:?} transform, {} confirmed pairs, rms {:.3}px, {} notes",
        source,
        pairs.len(),
        stats.rms_px,
        notes.len()
    );
    for n in &notes {
        tracing::warn!("alignment note: {}", n);
    }

    let result = AlignmentResult {
        transform,
        transform_original,
        source,
        dpi,
        coarse,
        via_profile: run.profile,
        profile_attempts: run.attempts,
        via_alignment,
        refinement: (refined.passes > 0).then_some(refined),
        matched: pairs.len(),
        stats,
        pairs,
        notes: notes.clone(),
    };
    let out = BoardAlignment {
        front: SideResult {
            processed: front_stage.processed,
            contacts: front_stage.contacts,
            vias: front_vias,
        },
        back: SideResult {
            processed: back_stage.processed,
            contacts: back_stage.contacts,
            vias: back_vias,
        },
        result,
    };
    Ok(Outcome::from_check(out, notes.into_iter().next()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::BoardEdge;
    use crate::geometry::dist;
    use crate::raster::warp_affine;
    use crate::test_utils::{draw_board, jittered_grid, overlay_vias, paint_rect, ContactRow, ViaStyle};
    use image::Rgb;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const BG: [u8; 3] = [226, 226, 220];
    const GOLD: [u8; 3] = [215, 170, 60];

    fn front_scene() -> (RgbImage, Vec<[f64; 2]>) {
        let mut img = draw_board(1000, 720, BG, [500.0, 370.0], [880.0, 600.0], 0.0);
        let row = ContactRow {
            start: [120.0, 110.0],
            pitch: 36.0,
            count: 20,
            size: [18.0, 70.0],
        };
        for i in 0..row.count {
            paint_rect(&mut img, &row.contact_rect(i), GOLD);
        }
        let mut rng = StdRng::seed_from_u64(21);
        let vias = jittered_grid(&mut rng, 8, 4, [150.0, 300.0], 90.0, 12.0);
        overlay_vias(&mut img, &vias, ViaStyle::Hole, 4.0);
        (img, vias)
    }

    fn spec() -> ContactSpec {
        ContactSpec::new(BoardEdge::Top, 20, 2.54, 1.27, 4.94)
    }

    #[test]
    fn recovers_scan_to_scan_transform() {
        let (front, vias) = front_scene();
        let front_to_back = AffineTransform::translation(8.0, -5.0)
            .compose(&AffineTransform::rotation_about_deg(0.5, [500.0, 370.0]));
        let back = warp_affine(&front, &front_to_back, 1000, 720, Rgb(BG));

        let out = align_board_pair(&front, &back, &spec(), None, &AlignConfig::default()).unwrap();
        let res = &out.value().result;
        assert!(res.matched >= 24, "matched {}", res.matched);
        assert_eq!(out.value().front.contacts.contacts.len(), 20);
        let dpi = res.dpi.unwrap();
        assert!((dpi - 360.0).abs() < 5.0, "dpi {dpi}");

        let t = res.transform_original.unwrap();
        for p in &vias {
            let q = t.apply(front_to_back.apply(*p));
            assert!(dist(q, *p) < 1.0, "via {p:?} mapped to {q:?}");
        }
        assert!(out.value().front.vias.iter().filter(|v| v.confirmed).count() >= 24);
    }

    #[test]
    fn empty_back_is_a_hard_error() {
        let (front, _) = front_scene();
        let back = RgbImage::new(0, 0);
        let err = align_board_pair(&front, &back, &spec(), None, &AlignConfig::default()).unwrap_err();
        assert!(matches!(err, AlignError::EmptyImage { side: Some(Side::Back) }));
    }

    #[test]
    fn blank_back_is_partial_not_an_error() {
        let (front, _) = front_scene();
        let back = RgbImage::from_pixel(1000, 720, Rgb(BG));
        let out = align_board_pair(&front, &back, &spec(), None, &AlignConfig::default()).unwrap();
        assert!(!out.is_complete());
        assert!(!out.value().result.notes.is_empty());
        assert!(out.value().result.transform.is_finite());
    }
}
