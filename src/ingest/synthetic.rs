//! Synthetic frames for `stub://` addresses.
//!
//! Lets the whole pipeline run without a camera. Serves as both a stream
//! reader and a snapshot fetcher.

use std::time::Duration;

use anyhow::{anyhow, Result};

use super::source::{SnapshotFetcher, StreamReader};
use crate::frame::Frame;

pub const STUB_SCHEME: &str = "stub://";

const SYNTHETIC_WIDTH: u32 = 640;
const SYNTHETIC_HEIGHT: u32 = 480;
const SYNTHETIC_FRAME_INTERVAL: Duration = Duration::from_millis(40);

pub fn is_stub_url(url: &str) -> bool {
    url.starts_with(STUB_SCHEME)
}

/// Generates a slowly drifting gradient.
pub struct SyntheticReader {
    url: String,
    width: u32,
    height: u32,
    frame_count: u64,
    open: bool,
}

impl SyntheticReader {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            width: SYNTHETIC_WIDTH,
            height: SYNTHETIC_HEIGHT,
            frame_count: 0,
            open: false,
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    fn generate(&mut self) -> Result<Frame> {
        self.frame_count += 1;
        let shift = self.frame_count;
        let (w, h) = (self.width as u64, self.height as u64);
        let mut pixels = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                pixels.push(((x + shift) % 256) as u8);
                pixels.push(((y + shift / 2) % 256) as u8);
                pixels.push((shift % 256) as u8);
            }
        }
        Frame::from_raw(self.width, self.height, pixels)
    }
}

impl StreamReader for SyntheticReader {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.url)
    }

    fn open(&mut self) -> Result<()> {
        self.open = true;
        Ok(())
    }

    fn read_frame(&mut self, timeout: Duration) -> Result<Option<Frame>> {
        if !self.open {
            return Err(anyhow!("synthetic stream not open"));
        }
        std::thread::sleep(SYNTHETIC_FRAME_INTERVAL.min(timeout));
        self.generate().map(Some)
    }

    fn release(&mut self) {
        self.open = false;
    }
}

impl SnapshotFetcher for SyntheticReader {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.url)
    }

    fn fetch(&mut self) -> Result<Option<Frame>> {
        self.generate().map(Some)
    }
}
