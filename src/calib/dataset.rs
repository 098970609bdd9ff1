use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::ObjectId;

/// One object seen in one frame: its depth and head-to-leg pixel length.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub depth: f64,
    pub pixel_length: f64,
}

impl Observation {
    pub fn new(depth: f64, pixel_length: f64) -> Self {
        Self {
            depth,
            pixel_length,
        }
    }
}

/// Per-object observation sequences in temporal order.
///
/// Training rows grow as k·(k−1) per object, so each sequence is capped and
/// the oldest observations are dropped first. The number of objects can be
/// capped too; when a new id would exceed it, the id recorded least recently
/// is forgotten.
#[derive(Clone, Debug)]
pub struct ObjectHistory {
    objects: BTreeMap<ObjectId, ObjectTrace>,
    max_per_object: usize,
    max_objects: Option<usize>,
    clock: u64,
}

#[derive(Clone, Debug, Default)]
struct ObjectTrace {
    seq: VecDeque<Observation>,
    last_recorded: u64,
}

impl ObjectHistory {
    pub fn new(max_per_object: usize) -> Self {
        Self {
            objects: BTreeMap::new(),
            max_per_object: max_per_object.max(1),
            max_objects: None,
            clock: 0,
        }
    }

    /// Keep at most `max_objects` ids.
    pub fn with_max_objects(mut self, max_objects: usize) -> Self {
        self.max_objects = Some(max_objects.max(1));
        self
    }

    pub fn record(&mut self, id: ObjectId, observation: Observation) {
        if let Some(limit) = self.max_objects {
            if !self.objects.contains_key(&id) && self.objects.len() >= limit {
                self.forget_stalest();
            }
        }
        self.clock += 1;
        let trace = self.objects.entry(id).or_default();
        if trace.seq.len() == self.max_per_object {
            trace.seq.pop_front();
        }
        trace.seq.push_back(observation);
        trace.last_recorded = self.clock;
    }

    fn forget_stalest(&mut self) {
        let stalest = self
            .objects
            .iter()
            .min_by_key(|(_, trace)| trace.last_recorded)
            .map(|(id, _)| *id);
        if let Some(id) = stalest {
            self.objects.remove(&id);
            log::debug!("calibration history for object {} dropped", id);
        }
    }

    pub fn observations(&self, id: ObjectId) -> Option<&VecDeque<Observation>> {
        self.objects.get(&id).map(|trace| &trace.seq)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &VecDeque<Observation>)> {
        self.objects.iter().map(|(id, trace)| (*id, &trace.seq))
    }

    pub fn remove(&mut self, id: ObjectId) -> Option<VecDeque<Observation>> {
        self.objects.remove(&id).map(|trace| trace.seq)
    }

    pub fn clear(&mut self) {
        self.objects.clear();
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn observation_count(&self) -> usize {
        self.objects.values().map(|trace| trace.seq.len()).sum()
    }
}

/// One supervised row: `(reference_depth, depth_delta) -> scale_ratio`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainingPair {
    pub reference_depth: f64,
    pub depth_delta: f64,
    pub scale_ratio: f64,
}

/// Training pair for the ordered observations `(p1, p2)`.
///
/// Returns `None` when both share a depth, since the scale change is undefined.
pub fn training_pair(p1: &Observation, p2: &Observation) -> Option<TrainingPair> {
    let depth_delta = p2.depth - p1.depth;
    if depth_delta == 0.0 {
        return None;
    }
    Some(TrainingPair {
        reference_depth: p1.depth,
        depth_delta,
        scale_ratio: p2.pixel_length / p1.pixel_length,
    })
}

/// Rows built from every ordered pair within each object's history.
#[derive(Clone, Debug, Default)]
pub struct TrainingSet {
    pairs: Vec<TrainingPair>,
}

impl TrainingSet {
    /// Build from all ordered observation pairs of each object.
    ///
    /// Pairs never cross object ids: the unknown true height only cancels
    /// within a single object's history. Yields at most k·(k−1) rows for an
    /// object with k observations.
    pub fn from_history(history: &ObjectHistory) -> Self {
        let mut pairs = Vec::new();
        for (_, seq) in history.iter() {
            for (i, p1) in seq.iter().enumerate() {
                for (j, p2) in seq.iter().enumerate() {
                    if i == j {
                        continue;
                    }
                    if let Some(pair) = training_pair(p1, p2) {
                        pairs.push(pair);
                    }
                }
            }
        }
        Self { pairs }
    }

    pub fn from_pairs(pairs: Vec<TrainingPair>) -> Self {
        Self { pairs }
    }

    pub fn pairs(&self) -> &[TrainingPair] {
        &self.pairs
    }

    /// Regression inputs `[reference_depth, depth_delta]`.
    pub fn inputs(&self) -> Vec<[f64; 2]> {
        self.pairs
            .iter()
            .map(|p| [p.reference_depth, p.depth_delta])
            .collect()
    }

    /// Regression targets (scale ratios), parallel to [`TrainingSet::inputs`].
    pub fn targets(&self) -> Vec<f64> {
        self.pairs.iter().map(|p| p.scale_ratio).collect()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
