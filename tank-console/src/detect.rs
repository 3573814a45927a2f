//! Detection pipeline seam.
//!
//! The console treats detection as a black box: one encoded frame in, a
//! list of labeled boxes out. Real backends (ONNX runners and friends)
//! implement [`Detector`]; the shipped impls cover development and tests.

use tank_protocol::Detection;

pub trait Detector: Send + Sync {
    fn detect(&self, frame: &[u8]) -> Vec<Detection>;
}

/// Detects nothing. Default when no backend is wired in.
pub struct NullDetector;

impl Detector for NullDetector {
    fn detect(&self, _frame: &[u8]) -> Vec<Detection> {
        Vec::new()
    }
}

/// Reports the same detections for every frame. Demo and test backend.
pub struct FixedDetector {
    detections: Vec<Detection>,
}

impl FixedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self { detections }
    }
}

impl Detector for FixedDetector {
    fn detect(&self, _frame: &[u8]) -> Vec<Detection> {
        self.detections.clone()
    }
}
