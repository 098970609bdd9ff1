//! Per-frame height estimate against the session's anchors.

use anyhow::{anyhow, Result};

use crate::anchor::Anchor;
use crate::calib::ScaleModel;

/// Estimate a detection's real height (cm) from its pixel length and depth.
///
/// Each anchor's known length is carried to the detection's depth through the
/// scale model, queried as `infer(current_depth, anchor_depth - current_depth)`.
/// That sign matches the trainer's `p2.depth - p1.depth`; flipping it inverts
/// the calibration. Per-anchor heights are averaged and rounded to 2 decimals.
///
/// An empty anchor slice is a caller error.
pub fn estimate_current_frame(
    pixel_length: f64,
    depth: f64,
    anchors: &[Anchor],
    model: &dyn ScaleModel,
) -> Result<f64> {
    if anchors.is_empty() {
        return Err(anyhow!("height estimation requires at least one anchor"));
    }
    if !(pixel_length.is_finite() && pixel_length > 0.0) {
        return Err(anyhow!("invalid detection pixel length {}", pixel_length));
    }
    if !depth.is_finite() {
        return Err(anyhow!("detection depth must be finite"));
    }

    let n = anchors.len() as f64;
    let mut average = 0.0;
    for anchor in anchors {
        let scale = model.infer(depth, anchor.depth - depth);
        let transformed = scale * pixel_length;
        average += anchor.true_height * (transformed / anchor.pixel_length) / n;
    }
    Ok(round2(average))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
