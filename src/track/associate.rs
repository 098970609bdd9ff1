use serde::{Deserialize, Serialize};

use crate::ObjectId;

/// Axis-aligned box `[x1, y1, x2, y2]` in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Area, zero for degenerate or inverted boxes.
    pub fn area(&self) -> f64 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x1, y1, x2, y2]: [f64; 4]) -> Self {
        Self::new(x1, y1, x2, y2)
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Intersection over union in `[0, 1]`.
///
/// Boxes without mutual area score 0. A zero union (two degenerate boxes)
/// also scores 0 instead of dividing by zero.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f64 {
    let w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.0);
    let h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.0);
    let inter = w * h;
    if inter <= 0.0 {
        return 0.0;
    }

    let union = a.area() + b.area() - inter;
    if union > 0.0 {
        (inter / union).clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Index of the candidate with the highest IoU against `query`.
///
/// Ties go to the first candidate. When nothing overlaps (or `candidates` is
/// empty) this still returns 0: callers must check the overlap themselves
/// before treating the result as a continuation. [`best_match`] makes the
/// no-overlap case explicit.
pub fn match_best_box(query: &BoundingBox, candidates: &[BoundingBox]) -> usize {
    best_match(query, candidates).map_or(0, |m| m.index)
}

/// Best overlapping candidate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoxMatch {
    pub index: usize,
    pub iou: f64,
}

/// Highest-IoU candidate, or `None` when no candidate overlaps at all.
pub fn best_match(query: &BoundingBox, candidates: &[BoundingBox]) -> Option<BoxMatch> {
    let mut best: Option<BoxMatch> = None;
    for (index, candidate) in candidates.iter().enumerate() {
        let score = iou(candidate, query);
        if score > best.map_or(0.0, |m| m.iou) {
            best = Some(BoxMatch { index, iou: score });
        }
    }
    best
}

#[derive(Clone, Debug)]
struct Track {
    id: ObjectId,
    bbox: BoundingBox,
    last_seen: u64,
}

/// Assigns surrogate ids to per-frame boxes by overlap with live tracks.
///
/// A detection continues the live track with the highest IoU above
/// `min_iou`; anything else starts a new id. A track is claimed at most once
/// per frame, in detection order.
#[derive(Clone, Debug)]
pub struct TrackAssociator {
    tracks: Vec<Track>,
    next_id: u64,
    min_iou: f64,
    max_idle_frames: u64,
}

impl TrackAssociator {
    pub fn new(min_iou: f64, max_idle_frames: u64) -> Self {
        Self {
            tracks: Vec::new(),
            next_id: 0,
            min_iou,
            max_idle_frames,
        }
    }

    /// Assign an id to every box of one frame, in input order.
    pub fn associate(&mut self, frame_index: u64, boxes: &[BoundingBox]) -> Vec<ObjectId> {
        let mut claimed = vec![false; self.tracks.len()];
        let mut ids = Vec::with_capacity(boxes.len());

        for bbox in boxes {
            let open: Vec<usize> = (0..self.tracks.len()).filter(|&i| !claimed[i]).collect();
            let candidates: Vec<BoundingBox> = open.iter().map(|&i| self.tracks[i].bbox).collect();

            let continued = best_match(bbox, &candidates)
                .filter(|m| m.iou > self.min_iou)
                .map(|m| open[m.index]);

            let id = match continued {
                Some(slot) => {
                    claimed[slot] = true;
                    let track = &mut self.tracks[slot];
                    track.bbox = *bbox;
                    track.last_seen = frame_index;
                    track.id
                }
                None => {
                    let id = ObjectId(self.next_id);
                    self.next_id += 1;
                    log::debug!("new track {} at frame {}", id, frame_index);
                    self.tracks.push(Track {
                        id,
                        bbox: *bbox,
                        last_seen: frame_index,
                    });
                    // Tracks born this frame are not candidates for later boxes.
                    claimed.push(true);
                    id
                }
            };
            ids.push(id);
        }
        ids
    }

    /// Drop tracks unseen for more than `max_idle_frames`; returns their ids.
    pub fn evict_idle(&mut self, frame_index: u64) -> Vec<ObjectId> {
        let max_idle = self.max_idle_frames;
        let mut evicted = Vec::new();
        self.tracks.retain(|track| {
            let keep = frame_index.saturating_sub(track.last_seen) <= max_idle;
            if !keep {
                evicted.push(track.id);
            }
            keep
        });
        evicted
    }

    pub fn live_ids(&self) -> Vec<ObjectId> {
        self.tracks.iter().map(|t| t.id).collect()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
