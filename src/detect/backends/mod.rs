mod nms;
pub mod stub;

#[cfg(feature = "backend-tract")]
pub mod onnx;

pub use nms::non_max_suppression;
pub use stub::StubDetector;

#[cfg(feature = "backend-tract")]
pub use onnx::OnnxDetector;
