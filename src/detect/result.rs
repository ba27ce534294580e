use crate::frame::{Frame, Region};

/// Result of running detection on a frame.
#[derive(Clone, Debug)]
pub struct DetectionResult {
    /// Regions in detector order. Boxes may exceed the frame; the router
    /// clamps them before cropping.
    pub regions: Vec<Region>,
    /// The detector's own visualization of the frame.
    pub annotated: Frame,
}

impl DetectionResult {
    pub fn new(regions: Vec<Region>, annotated: Frame) -> Self {
        Self { regions, annotated }
    }

    /// A frame where nothing was found.
    pub fn empty(annotated: Frame) -> Self {
        Self {
            regions: Vec::new(),
            annotated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}
