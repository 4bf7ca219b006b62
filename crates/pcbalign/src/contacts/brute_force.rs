//! Brute-force strip scan for contacts the seed pass missed.
//!
//! The search band is cut into overlapping horizontal strips that a bounded
//! pool scans with a relaxed colour window. Each strip task collects into a
//! private list; lists are merged under one mutex and deduplicated.

use std::sync::Mutex;

use image::{GrayImage, Luma, RgbImage};
use rayon::prelude::*;

use super::{Contact, DetectionPass, HsvRange};
use crate::blob::{extract_blobs, Blob};
use crate::geometry::{dist2, Rect};
use crate::raster::{crop, HsvImage};

/// Blob shape window applied to candidates; aspect is `height / width`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlobLimits {
    pub area_min: f64,
    pub area_max: f64,
    pub aspect_min: f64,
    pub aspect_max: f64,
}

impl BlobLimits {
    pub fn accepts(&self, b: &Blob) -> bool {
        let area = b.area as f64;
        if area < self.area_min || area > self.area_max || b.width() <= 0.0 {
            return false;
        }
        let aspect = b.height() / b.width();
        aspect >= self.aspect_min && aspect <= self.aspect_max
    }
}

/// HSV mask of `img`: 255 inside `range`.
pub(crate) fn hsv_mask(img: &RgbImage, range: &HsvRange) -> GrayImage {
    let hsv = HsvImage::from_rgb(img);
    let (w, h) = hsv.dimensions();
    GrayImage::from_fn(w, h, |x, y| Luma([if range.contains(hsv.get(x, y)) { 255 } else { 0 }]))
}

/// Contacts from the colour mask over `window` of `img`.
pub(crate) fn scan_window(
    img: &RgbImage,
    window: &Rect,
    range: &HsvRange,
    limits: &BlobLimits,
    pass: DetectionPass,
) -> Vec<Contact> {
    let (sub, used) = crop(img, window);
    if sub.width() == 0 || sub.height() == 0 {
        return Vec::new();
    }
    let mask = hsv_mask(&sub, range);
    let min_area = limits.area_min.max(1.0) as usize;
    let max_area = limits.area_max.max(1.0) as usize;
    extract_blobs(&mask, min_area, max_area, [used.x0, used.y0])
        .into_iter()
        .filter(|b| limits.accepts(b))
        .map(|b| Contact {
            bbox: b.bbox,
            center: b.centroid,
            pass,
        })
        .collect()
}

/// Keep the larger of any two contacts closer than `radius`.
pub fn dedup_contacts(mut contacts: Vec<Contact>, radius: f64) -> Vec<Contact> {
    contacts.sort_by(|a, b| b.bbox.area().total_cmp(&a.bbox.area()));
    let r2 = radius * radius;
    let mut keep = vec![true; contacts.len()];
    for i in 0..contacts.len() {
        if !keep[i] {
            continue;
        }
        for j in (i + 1)..contacts.len() {
            if keep[j] && dist2(contacts[i].center, contacts[j].center) < r2 {
                keep[j] = false;
            }
        }
    }
    let mut out: Vec<Contact> = contacts
        .into_iter()
        .zip(keep)
        .filter_map(|(c, k)| k.then_some(c))
        .collect();
    out.sort_by(|a, b| a.center[0].total_cmp(&b.center[0]));
    out
}

/// Overlapping strips covering `band`: height `strip_h`, step `strip_h / 2`.
fn strips(band: &Rect, strip_h: f64) -> Vec<Rect> {
    let strip_h = strip_h.max(4.0);
    let step = 0.5 * strip_h;
    let mut out = Vec::new();
    let mut y = band.y0;
    loop {
        let y1 = (y + strip_h).min(band.y1);
        out.push(Rect::new(band.x0, y, band.x1, y1));
        if y1 >= band.y1 {
            break;
        }
        y += step;
    }
    out
}

/// Scan `band` strip by strip with a relaxed colour window.
///
/// `contact_h` sets the strip height (three contact heights, half
/// overlap). The pool has one thread per processor.
pub fn brute_force_scan(
    img: &RgbImage,
    band: &Rect,
    range: &HsvRange,
    limits: &BlobLimits,
    contact_h: f64,
    dedup_radius: f64,
) -> Vec<Contact> {
    let windows = strips(band, 3.0 * contact_h);
    let merged: Mutex<Vec<Contact>> = Mutex::new(Vec::new());

    let scan = |w: &Rect| {
        let local = scan_window(img, w, range, limits, DetectionPass::BruteForce);
        if local.is_empty() {
            return;
        }
        let mut guard = merged.lock().unwrap_or_else(|e| e.into_inner());
        guard.extend(local);
    };

    let threads = std::thread::available_parallelism().map_or(1, |n| n.get());
    match rayon::ThreadPoolBuilder::new().num_threads(threads).build() {
        Ok(pool) => pool.install(|| windows.par_iter().for_each(scan)),
        Err(e) => {
            tracing::warn!("brute-force pool unavailable ({e}), scanning serially");
            windows.iter().for_each(scan);
        }
    }

    let raw = merged.into_inner().unwrap_or_else(|e| e.into_inner());
    let n_raw = raw.len();
    let out = dedup_contacts(raw, dedup_radius);
    tracing::debug!(
        "brute force: {} strips, {} raw hits, {} after dedup",
        windows.len(),
        n_raw,
        out.len()
    );
    out
}
