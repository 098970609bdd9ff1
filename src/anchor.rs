//! Calibration anchors.
//!
//! An anchor is a vertical real-world object of known height that the operator
//! traced in a reference frame. Anchors are validated once, when the session's
//! `AnchorSet` is built, so estimation never sees a non-positive length or height.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::track::Point;

/// One reference measurement: pixel length, true height (cm) and depth.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Anchor {
    pub pixel_length: f64,
    pub true_height: f64,
    pub depth: f64,
}

impl Anchor {
    pub fn new(pixel_length: f64, true_height: f64, depth: f64) -> Self {
        Self {
            pixel_length,
            true_height,
            depth,
        }
    }

    /// Build an anchor from a reference line drawn on the calibration frame.
    ///
    /// The pixel length is the Euclidean length of the line.
    pub fn from_line(start: Point, end: Point, true_height: f64, depth: f64) -> Self {
        Self::new(start.distance(&end), true_height, depth)
    }
}

/// Anchor file entry: either an explicit anchor or a drawn line plus depth.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnchorEntry {
    Measured(Anchor),
    Line {
        start: Point,
        end: Point,
        true_height: f64,
        depth: f64,
    },
}

impl From<AnchorEntry> for Anchor {
    fn from(entry: AnchorEntry) -> Self {
        match entry {
            AnchorEntry::Measured(anchor) => anchor,
            AnchorEntry::Line {
                start,
                end,
                true_height,
                depth,
            } => Anchor::from_line(start, end, true_height, depth),
        }
    }
}

/// Non-empty, validated, ordered anchor list for one calibration session.
#[derive(Clone, Debug)]
pub struct AnchorSet {
    anchors: Vec<Anchor>,
}

impl AnchorSet {
    pub fn new(anchors: Vec<Anchor>) -> Result<Self> {
        if anchors.is_empty() {
            return Err(anyhow!("anchor set must contain at least one anchor"));
        }
        for (idx, anchor) in anchors.iter().enumerate() {
            validate_anchor(idx, anchor)?;
        }
        Ok(Self { anchors })
    }

    /// Load anchors from a JSON array on disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read anchor file {}", path.display()))?;
        let entries: Vec<AnchorEntry> = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid anchor file {}: {}", path.display(), e))?;
        Self::new(entries.into_iter().map(Anchor::from).collect())
            .with_context(|| format!("anchor file {}", path.display()))
    }

    pub fn as_slice(&self) -> &[Anchor] {
        &self.anchors
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

fn validate_anchor(idx: usize, anchor: &Anchor) -> Result<()> {
    if !(anchor.pixel_length.is_finite() && anchor.pixel_length > 0.0) {
        return Err(anyhow!(
            "anchor #{} has invalid pixel length {} (must be > 0)",
            idx,
            anchor.pixel_length
        ));
    }
    if !(anchor.true_height.is_finite() && anchor.true_height > 0.0) {
        return Err(anyhow!(
            "anchor #{} has invalid true height {} (must be > 0)",
            idx,
            anchor.true_height
        ));
    }
    if !anchor.depth.is_finite() {
        return Err(anyhow!("anchor #{} has non-finite depth", idx));
    }
    Ok(())
}
