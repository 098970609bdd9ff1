use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::track::BoundingBox;

/// One detected person: box, mask polygon and externally resolved depth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bbox: BoundingBox,
    /// Mask boundary points `[x, y]` in pixels.
    pub polygon: Vec<[f64; 2]>,
    pub depth: f64,
}

/// All detections of one frame, in detector order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameDetections {
    pub frame: u64,
    pub detections: Vec<Detection>,
}

/// Detector output as parallel arrays, the shape detectors emit.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ParallelDetections {
    pub frame: u64,
    #[serde(default)]
    pub boxes: Vec<BoundingBox>,
    #[serde(default)]
    pub polygons: Vec<Vec<[f64; 2]>>,
    #[serde(default)]
    pub depths: Vec<f64>,
}

impl FrameDetections {
    /// Zip parallel box/polygon/depth arrays; their lengths must agree.
    pub fn from_parallel(parallel: ParallelDetections) -> Result<Self> {
        let ParallelDetections {
            frame,
            boxes,
            polygons,
            depths,
        } = parallel;
        if boxes.len() != polygons.len() || boxes.len() != depths.len() {
            return Err(anyhow!(
                "frame {}: {} boxes, {} polygons and {} depths do not line up",
                frame,
                boxes.len(),
                polygons.len(),
                depths.len()
            ));
        }
        let detections = boxes
            .into_iter()
            .zip(polygons)
            .zip(depths)
            .map(|((bbox, polygon), depth)| Detection {
                bbox,
                polygon,
                depth,
            })
            .collect();
        Ok(Self { frame, detections })
    }

    pub fn boxes(&self) -> Vec<BoundingBox> {
        self.detections.iter().map(|d| d.bbox).collect()
    }
}
