//! Edge frame: the input raster turned so the connector edge is on top.
//!
//! Detection always runs on a horizontal row near the top of the frame;
//! results are mapped back to input coordinates afterwards.

use image::RgbImage;

use super::BoardEdge;
use crate::geometry::Rect;
use crate::raster::rotate_quarter_turns;

#[derive(Debug, Clone, Copy)]
pub(crate) struct EdgeFrame {
    /// Clockwise quarter turns applied to the input.
    turns: u32,
    /// Input raster size.
    width: f64,
    height: f64,
}

impl EdgeFrame {
    pub(crate) fn new(edge: BoardEdge, width: u32, height: u32) -> Self {
        Self {
            turns: edge.quarter_turns_to_top(),
            width: width as f64,
            height: height as f64,
        }
    }

    pub(crate) fn render(&self, img: &RgbImage) -> RgbImage {
        rotate_quarter_turns(img, self.turns)
    }

    /// Input pixel coordinates → frame coordinates.
    pub(crate) fn to_frame(&self, p: [f64; 2]) -> [f64; 2] {
        let (w, h) = (self.width, self.height);
        match self.turns {
            1 => [h - 1.0 - p[1], p[0]],
            2 => [w - 1.0 - p[0], h - 1.0 - p[1]],
            3 => [p[1], w - 1.0 - p[0]],
            _ => p,
        }
    }

    /// Frame coordinates → input pixel coordinates.
    pub(crate) fn to_image(&self, p: [f64; 2]) -> [f64; 2] {
        let (w, h) = (self.width, self.height);
        match self.turns {
            1 => [p[1], h - 1.0 - p[0]],
            2 => [w - 1.0 - p[0], h - 1.0 - p[1]],
            3 => [w - 1.0 - p[1], p[0]],
            _ => p,
        }
    }

    /// Map a pixel-extent rect (exclusive far edges) into the frame.
    pub(crate) fn rect_to_frame(&self, r: &Rect) -> Rect {
        self.map_rect(r, |p| self.to_frame(p))
    }

    pub(crate) fn rect_to_image(&self, r: &Rect) -> Rect {
        self.map_rect(r, |p| self.to_image(p))
    }

    // Extents are converted to first/last pixel centers so the mapping is
    // exact under the integer-center convention.
    fn map_rect(&self, r: &Rect, f: impl Fn([f64; 2]) -> [f64; 2]) -> Rect {
        let a = f([r.x0, r.y0]);
        let b = f([r.x1 - 1.0, r.y1 - 1.0]);
        Rect::new(
            a[0].min(b[0]),
            a[1].min(b[1]),
            a[0].max(b[0]) + 1.0,
            a[1].max(b[1]) + 1.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    #[test]
    fn frame_mapping_matches_raster_rotation() {
        let img = RgbImage::from_fn(7, 4, |x, y| Rgb([x as u8, y as u8, 0]));
        for edge in [BoardEdge::Top, BoardEdge::Left, BoardEdge::Bottom, BoardEdge::Right] {
            let frame = EdgeFrame::new(edge, 7, 4);
            let rotated = frame.render(&img);
            for y in 0..4u32 {
                for x in 0..7u32 {
                    let f = frame.to_frame([x as f64, y as f64]);
                    let px = rotated.get_pixel(f[0] as u32, f[1] as u32).0;
                    assert_eq!(px, [x as u8, y as u8, 0], "{edge:?} at ({x},{y})");
                    assert_eq!(frame.to_image(f), [x as f64, y as f64]);
                }
            }
        }
    }

    #[test]
    fn rect_roundtrip() {
        let frame = EdgeFrame::new(BoardEdge::Left, 100, 60);
        let r = Rect::new(10.0, 5.0, 30.0, 45.0);
        let back = frame.rect_to_image(&frame.rect_to_frame(&r));
        assert_eq!(back, r);
    }
}
