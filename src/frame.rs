//! Frame and region types shared by every pipeline stage.
//!
//! - `Frame`: owned 3-channel (RGB) pixel buffer. Immutable once captured;
//!   every transformation (crop, resize, annotate) produces a new frame.
//! - `BoundingBox`: half-open pixel rectangle `[x1, x2) x [y1, y2)`.
//! - `Region`: labelled bounding box produced by a detector.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};

/// Owned RGB frame.
///
/// Cloning a frame copies its pixels, so each queue a frame is pushed into
/// holds independent ownership.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    image: RgbImage,
    /// Capture order within one source. Zero for synthesized frames.
    sequence: u64,
}

impl Frame {
    pub fn new(image: RgbImage) -> Self {
        Self { image, sequence: 0 }
    }

    /// Build a frame from tightly packed RGB bytes.
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("pixel buffer does not match {}x{}", width, height))?;
        Ok(Self::new(image))
    }

    /// Solid-colour frame.
    pub fn solid(width: u32, height: u32, color: [u8; 3]) -> Self {
        Self::new(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// A frame with no pixels is never published.
    pub fn is_empty(&self) -> bool {
        self.image.width() == 0 || self.image.height() == 0
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.image.into_raw()
    }

    /// Crop to `bbox` after clamping it to the frame. Returns `None` for a
    /// zero-area crop.
    pub fn crop(&self, bbox: &BoundingBox) -> Option<Frame> {
        let clamped = bbox.clamp(self.width(), self.height());
        if clamped.area() == 0 {
            return None;
        }
        let sub = imageops::crop_imm(
            &self.image,
            clamped.x1 as u32,
            clamped.y1 as u32,
            clamped.width(),
            clamped.height(),
        )
        .to_image();
        Some(Frame {
            image: sub,
            sequence: self.sequence,
        })
    }

    /// Resize to exactly `width` x `height`.
    pub fn resized(&self, width: u32, height: u32) -> Frame {
        if self.width() == width && self.height() == height {
            return self.clone();
        }
        Frame {
            image: imageops::resize(&self.image, width, height, FilterType::Triangle),
            sequence: self.sequence,
        }
    }
}

/// Half-open pixel rectangle `[x1, x2) x [y1, y2)`.
///
/// Detectors may report coordinates outside the frame; `clamp` brings them
/// back into `[0, width] x [0, height]` before any crop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoundingBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let w = i32::try_from(width).unwrap_or(i32::MAX);
        let h = i32::try_from(height).unwrap_or(i32::MAX);
        Self {
            x1: self.x1.clamp(0, w),
            y1: self.y1.clamp(0, h),
            x2: self.x2.clamp(0, w),
            y2: self.y2.clamp(0, h),
        }
    }

    pub fn width(&self) -> u32 {
        (self.x2 - self.x1).max(0) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 - self.y1).max(0) as u32
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

/// A detected sub-rectangle of a frame with its label.
#[derive(Clone, Debug, PartialEq)]
pub struct Region {
    pub label: String,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Region {
    pub fn new(label: impl Into<String>, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            label: label.into(),
            bbox,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, y| Rgb([x as u8, y as u8, 7]));
        Frame::new(image)
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(Frame::from_raw(4, 4, vec![0u8; 47]).is_err());
        let frame = Frame::from_raw(4, 4, vec![0u8; 48]).unwrap();
        assert_eq!((frame.width(), frame.height()), (4, 4));
    }

    #[test]
    fn bbox_clamps_to_frame_bounds() {
        let bbox = BoundingBox::new(-5, 10, 140, 90).clamp(100, 80);
        assert_eq!(bbox, BoundingBox::new(0, 10, 100, 80));
        assert_eq!(bbox.area(), 100 * 70);
    }

    #[test]
    fn inverted_bbox_has_zero_area() {
        let bbox = BoundingBox::new(50, 50, 10, 10);
        assert_eq!(bbox.area(), 0);
    }

    #[test]
    fn crop_copies_the_clamped_rectangle() {
        let frame = gradient(100, 100);
        let crop = frame.crop(&BoundingBox::new(10, 20, 50, 60)).unwrap();
        assert_eq!((crop.width(), crop.height()), (40, 40));
        assert_eq!(crop.image().get_pixel(0, 0), &Rgb([10, 20, 7]));
    }

    #[test]
    fn crop_outside_frame_is_none() {
        let frame = gradient(100, 100);
        assert!(frame.crop(&BoundingBox::new(120, 120, 150, 150)).is_none());
        assert!(frame.crop(&BoundingBox::new(30, 30, 30, 60)).is_none());
    }

    #[test]
    fn resized_keeps_sequence() {
        let frame = gradient(100, 50).with_sequence(9);
        let resized = frame.resized(32, 24);
        assert_eq!((resized.width(), resized.height()), (32, 24));
        assert_eq!(resized.sequence(), 9);
    }
}
