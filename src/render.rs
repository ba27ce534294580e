//! Overlay rendering for human-viewable output.
//!
//! Rendering never fails the pipeline: without a usable font, text calls
//! return the frame unannotated and boxes are still drawn.

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::frame::{BoundingBox, Frame, Region};

pub const TEXT_COLOR: [u8; 3] = [0, 255, 0];
pub const BOX_COLOR: [u8; 3] = [255, 64, 0];
pub const PLACEHOLDER_BACKGROUND: [u8; 3] = [24, 24, 24];
pub const PLACEHOLDER_TEXT: [u8; 3] = [200, 200, 200];

/// Size of the canvas used by handlers that reformat their output.
pub const CANVAS_WIDTH: u32 = 480;
pub const CANVAS_HEIGHT: u32 = 360;
const CANVAS_TEXT_STRIP: u32 = 72;

/// Text rendering collaborator backed by a TrueType font.
pub struct TextRenderer {
    font: Option<FontVec>,
}

impl TextRenderer {
    /// Load the font at `path`. A missing or invalid font yields a renderer
    /// that leaves frames unannotated.
    pub fn load(path: &Path) -> Self {
        let font = match std::fs::read(path) {
            Ok(data) => match FontVec::try_from_vec(data) {
                Ok(font) => {
                    log::debug!("TextRenderer: loaded font {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    log::warn!("TextRenderer: invalid font {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!(
                    "TextRenderer: font not found at {} ({}); text overlays disabled",
                    path.display(),
                    e
                );
                None
            }
        };
        Self { font }
    }

    pub fn disabled() -> Self {
        Self { font: None }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Draw `text` at `position` (top-left of the text box).
    pub fn render(
        &self,
        frame: &Frame,
        text: &str,
        position: (i32, i32),
        size: f32,
        color: [u8; 3],
    ) -> Frame {
        let Some(font) = self.font.as_ref() else {
            return frame.clone();
        };
        let mut image = frame.image().clone();
        draw_text_mut(
            &mut image,
            Rgb(color),
            position.0,
            position.1,
            PxScale::from(size),
            font,
            text,
        );
        Frame::new(image).with_sequence(frame.sequence())
    }
}

/// Outline `bbox` on a copy of `frame`.
pub fn draw_box(frame: &Frame, bbox: &BoundingBox, color: [u8; 3]) -> Frame {
    let mut image = frame.image().clone();
    outline(&mut image, bbox, color);
    Frame::new(image).with_sequence(frame.sequence())
}

fn outline(image: &mut RgbImage, bbox: &BoundingBox, color: [u8; 3]) {
    let clamped = bbox.clamp(image.width(), image.height());
    if clamped.area() == 0 {
        return;
    }
    let rect = Rect::at(clamped.x1, clamped.y1).of_size(clamped.width(), clamped.height());
    draw_hollow_rect_mut(image, rect, Rgb(color));
}

/// Detection visualization: one box and one `label conf` caption per region.
pub fn draw_regions(frame: &Frame, regions: &[Region], renderer: &TextRenderer) -> Frame {
    let mut image = frame.image().clone();
    for region in regions {
        outline(&mut image, &region.bbox, BOX_COLOR);
    }
    let mut annotated = Frame::new(image).with_sequence(frame.sequence());
    for region in regions {
        let caption = format!("{} {:.2}", region.label, region.confidence);
        let y = (region.bbox.y1 - 20).max(0);
        annotated = renderer.render(&annotated, &caption, (region.bbox.x1.max(0), y), 18.0, BOX_COLOR);
    }
    annotated
}

/// Frame served by a channel that has never received any output.
pub fn placeholder(channel: &str, width: u32, height: u32, renderer: &TextRenderer) -> Frame {
    let background = Frame::solid(width, height, PLACEHOLDER_BACKGROUND);
    let size = (height as f32 / 10.0).clamp(12.0, 48.0);
    let x = (width / 10) as i32;
    let y = (height / 2) as i32 - (size / 2.0) as i32;
    renderer.render(&background, channel, (x, y), size, PLACEHOLDER_TEXT)
}

/// Fixed-size result card: `crop` scaled into the upper area, `text` in a
/// strip beneath it.
pub fn result_canvas(crop: &Frame, text: &str, renderer: &TextRenderer) -> Frame {
    let mut canvas = RgbImage::from_pixel(CANVAS_WIDTH, CANVAS_HEIGHT, Rgb([0, 0, 0]));
    let area_height = CANVAS_HEIGHT - CANVAS_TEXT_STRIP;
    if !crop.is_empty() {
        let ratio = (CANVAS_WIDTH as f32 / crop.width() as f32)
            .min(area_height as f32 / crop.height() as f32);
        let w = ((crop.width() as f32 * ratio).round() as u32).clamp(1, CANVAS_WIDTH);
        let h = ((crop.height() as f32 * ratio).round() as u32).clamp(1, area_height);
        let scaled = imageops::resize(crop.image(), w, h, FilterType::Triangle);
        let x = ((CANVAS_WIDTH - w) / 2) as i64;
        let y = ((area_height - h) / 2) as i64;
        imageops::overlay(&mut canvas, &scaled, x, y);
    }
    draw_filled_rect_mut(
        &mut canvas,
        Rect::at(0, area_height as i32).of_size(CANVAS_WIDTH, CANVAS_TEXT_STRIP),
        Rgb([32, 32, 32]),
    );
    let canvas = Frame::new(canvas).with_sequence(crop.sequence());
    renderer.render(&canvas, text, (16, area_height as i32 + 16), 36.0, TEXT_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_font_degrades_to_unannotated_frame() {
        let renderer = TextRenderer::load(Path::new("/nonexistent/font.ttf"));
        assert!(!renderer.has_font());
        let frame = Frame::solid(20, 10, [1, 2, 3]);
        let out = renderer.render(&frame, "42.0", (0, 0), 12.0, TEXT_COLOR);
        assert_eq!(out, frame);
    }

    #[test]
    fn draw_box_outlines_the_region() {
        let frame = Frame::solid(20, 20, [0, 0, 0]);
        let out = draw_box(&frame, &BoundingBox::new(5, 5, 15, 15), [255, 0, 0]);
        assert_eq!(out.image().get_pixel(5, 5), &Rgb([255, 0, 0]));
        assert_eq!(out.image().get_pixel(10, 10), &Rgb([0, 0, 0]));
    }

    #[test]
    fn degenerate_box_is_ignored() {
        let frame = Frame::solid(20, 20, [0, 0, 0]);
        let out = draw_box(&frame, &BoundingBox::new(30, 30, 40, 40), [255, 0, 0]);
        assert_eq!(out, frame);
    }

    #[test]
    fn placeholder_has_requested_dimensions() {
        let frame = placeholder("ocr", 64, 48, &TextRenderer::disabled());
        assert_eq!((frame.width(), frame.height()), (64, 48));
        assert_eq!(frame.image().get_pixel(0, 0), &Rgb(PLACEHOLDER_BACKGROUND));
    }

    #[test]
    fn result_canvas_is_fixed_size() {
        let crop = Frame::solid(40, 10, [200, 100, 50]);
        let canvas = result_canvas(&crop, "42.0", &TextRenderer::disabled());
        assert_eq!((canvas.width(), canvas.height()), (CANVAS_WIDTH, CANVAS_HEIGHT));
        assert_eq!(
            canvas.image().get_pixel(CANVAS_WIDTH / 2, (CANVAS_HEIGHT - 72) / 2),
            &Rgb([200, 100, 50])
        );
    }
}
