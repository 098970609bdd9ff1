//! Identity continuity and keypoints for detected people.
//!
//! The upstream detector gives no stable identities, so each frame's boxes are
//! matched against the previous boxes of live tracks. Keypoints turn a mask
//! polygon into the head/leg pair whose distance is the observed pixel length.

mod associate;
mod keypoints;

use serde::{Deserialize, Serialize};

pub use associate::{best_match, iou, match_best_box, BoundingBox, BoxMatch, TrackAssociator};
pub use keypoints::{extract_keypoints, Keypoints, DEFAULT_KEYPOINT_THRESHOLD};

/// Integer pixel coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = f64::from(other.x - self.x);
        let dy = f64::from(other.y - self.y);
        dx.hypot(dy)
    }
}
