//! Detector collaborator seam.
//!
//! Instance detection and depth estimation happen upstream; this module only
//! defines the per-frame data they hand over and the sources that produce it.

mod backend;
mod backends;
mod result;

pub use backend::DetectionSource;
pub use backends::{ReplaySource, SceneConfig, SyntheticSource, Walker};
pub use result::{Detection, FrameDetections, ParallelDetections};
