use anyhow::Result;

use crate::detect::result::FrameDetections;

/// Source of per-frame detector output.
///
/// The detector and depth source run upstream; implementations only hand over
/// boxes, polygons and depths. Frames are yielded in temporal order.
pub trait DetectionSource {
    /// Source identifier.
    fn name(&self) -> &'static str;

    /// Next frame's detections, or `None` once the source is exhausted.
    fn next_frame(&mut self) -> Result<Option<FrameDetections>>;
}
