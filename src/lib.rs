//! Depth-compensated height estimation.
//!
//! This crate estimates the metric height of people seen by one monocular
//! camera. Operator-traced anchors of known height are carried to each
//! detection's depth by a learned scale model, and the per-frame estimates
//! are smoothed per tracked object.
//!
//! # Pipeline
//!
//! Each frame's detections are fully processed before the next frame:
//!
//! 1. **Association**: boxes are matched to live tracks by IoU (`track`).
//! 2. **Keypoints**: head/leg points from the mask polygon give the pixel length.
//! 3. **History**: `(depth, pixel_length)` is appended to the object's history.
//! 4. **Estimate**: anchors are scaled to the detection's depth (`estimate`).
//! 5. **Stabilise**: robust trend plus moving average per id (`stabilize`).
//!
//! Calibration (`calib`) expands the histories into directed training pairs
//! and fits the scale model. Retraining may run on a background thread; the
//! previous model keeps serving until the new one is swapped in.
//!
//! # Module Structure
//!
//! - `anchor`: validated anchor sets
//! - `calib`: training set construction, scale models, live model handle
//! - `config`: engine configuration
//! - `detect`: detector output and detection sources
//! - `estimate`: per-frame estimate against anchors
//! - `stabilize`: per-id temporal smoothing
//! - `track`: keypoints and IoU association

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;

pub mod anchor;
pub mod calib;
pub mod config;
pub mod detect;
pub mod estimate;
pub mod stabilize;
pub mod track;
pub mod ui;

pub use anchor::{Anchor, AnchorSet};
pub use calib::{
    ConstantScaleModel, ModelKind, ObjectHistory, Observation, PolynomialScaleModel,
    RetrainOutcome, ScaleModel, SharedScaleModel, TrainingPair, TrainingSet,
};
pub use config::EngineConfig;
pub use detect::{Detection, DetectionSource, FrameDetections};
pub use estimate::estimate_current_frame;
pub use stabilize::{HeightStabilizer, StabilizerConfig};
pub use track::{BoundingBox, Keypoints, Point, TrackAssociator};

/// Surrogate identity of a tracked object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-object output of one frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ObjectHeight {
    pub id: ObjectId,
    pub head: Point,
    pub leg: Point,
    pub pixel_length: f64,
    pub depth: f64,
    pub raw_height: f64,
    pub stable_height: f64,
}

/// Output of [`HeightEngine::process_frame`].
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FrameReport {
    pub frame: u64,
    pub objects: Vec<ObjectHeight>,
    /// Ids dropped after this frame for being idle too long.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub evicted: Vec<ObjectId>,
}

impl FrameReport {
    pub fn object(&self, id: ObjectId) -> Option<&ObjectHeight> {
        self.objects.iter().find(|o| o.id == id)
    }
}

// -------------------- Engine --------------------

/// Owns all per-session state: anchors, live model, tracks, histories and
/// stabiliser streams.
pub struct HeightEngine {
    config: EngineConfig,
    anchors: AnchorSet,
    model: SharedScaleModel,
    tracks: TrackAssociator,
    history: ObjectHistory,
    stabilizer: HeightStabilizer,
    retrain_job: Option<JoinHandle<Result<RetrainOutcome>>>,
    frames_processed: u64,
}

impl HeightEngine {
    /// Engine with no depth compensation until the first retrain.
    pub fn new(config: EngineConfig, anchors: AnchorSet) -> Result<Self> {
        Self::with_model(config, anchors, Arc::new(ConstantScaleModel::identity()))
    }

    /// Engine starting from an already trained model.
    pub fn with_model(
        config: EngineConfig,
        anchors: AnchorSet,
        model: Arc<dyn ScaleModel>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            tracks: TrackAssociator::new(
                config.tracking.min_iou,
                config.tracking.max_idle_frames,
            ),
            history: ObjectHistory::new(config.calibration.max_observations_per_object)
                .with_max_objects(config.calibration.max_history_objects),
            stabilizer: HeightStabilizer::new(config.stabilizer),
            model: SharedScaleModel::new(model),
            anchors,
            config,
            retrain_job: None,
            frames_processed: 0,
        })
    }

    /// Measure, associate, estimate and stabilise every detection of a frame.
    ///
    /// Detections without a usable measurement are skipped before association,
    /// so they never claim or refresh a track.
    pub fn process_frame(&mut self, frame: &FrameDetections) -> Result<FrameReport> {
        let mut measured = Vec::with_capacity(frame.detections.len());
        for (idx, detection) in frame.detections.iter().enumerate() {
            let keypoints =
                match track::extract_keypoints(&detection.polygon, self.config.keypoint_threshold)
                {
                    Ok(kp) => kp,
                    Err(err) => {
                        log::warn!("frame {}: detection {} skipped: {}", frame.frame, idx, err);
                        continue;
                    }
                };
            let pixel_length = keypoints.pixel_length();
            if pixel_length <= 0.0 || !detection.depth.is_finite() {
                log::warn!(
                    "frame {}: detection {} skipped (pixel length {}, depth {})",
                    frame.frame,
                    idx,
                    pixel_length,
                    detection.depth
                );
                continue;
            }
            measured.push((detection, keypoints, pixel_length));
        }

        let boxes: Vec<BoundingBox> = measured.iter().map(|(d, _, _)| d.bbox).collect();
        let ids = self.tracks.associate(frame.frame, &boxes);
        // One model snapshot per frame, even if a retrain swaps mid-frame.
        let model = self.model.current();

        let mut objects = Vec::with_capacity(measured.len());
        for ((detection, keypoints, pixel_length), id) in measured.into_iter().zip(ids) {
            self.history
                .record(id, Observation::new(detection.depth, pixel_length));
            let raw_height = estimate_current_frame(
                pixel_length,
                detection.depth,
                self.anchors.as_slice(),
                model.as_ref(),
            )?;
            let stable_height = self.stabilizer.stabilize(id, raw_height);
            log::debug!(
                "frame {}: object {} depth {:.2} px {:.1} raw {:.2} stable {:.2}",
                frame.frame,
                id,
                detection.depth,
                pixel_length,
                raw_height,
                stable_height
            );

            objects.push(ObjectHeight {
                id,
                head: keypoints.head,
                leg: keypoints.leg,
                pixel_length,
                depth: detection.depth,
                raw_height,
                stable_height,
            });
        }

        let evicted = self.tracks.evict_idle(frame.frame);
        for id in &evicted {
            self.stabilizer.evict(*id);
            log::info!(
                "object {} evicted after {} idle frames",
                id,
                self.config.tracking.max_idle_frames
            );
        }

        self.frames_processed += 1;
        self.poll_retrain();
        self.schedule_retrain()?;

        Ok(FrameReport {
            frame: frame.frame,
            objects,
            evicted,
        })
    }

    /// Height estimate for one measurement against the session anchors.
    pub fn estimate_current_frame(&self, pixel_length: f64, depth: f64) -> Result<f64> {
        let model = self.model.current();
        estimate_current_frame(pixel_length, depth, self.anchors.as_slice(), model.as_ref())
    }

    /// Feed a raw estimate to the stabiliser directly.
    pub fn stabilize(&mut self, id: ObjectId, raw_height: f64) -> f64 {
        self.stabilizer.stabilize(id, raw_height)
    }

    /// Fit a new scale model on the accumulated histories and swap it in.
    pub fn retrain(&mut self) -> Result<RetrainOutcome> {
        let set = TrainingSet::from_history(&self.history);
        self.model
            .retrain(self.config.calibration.retrain_plan(), &set)
    }

    /// Block until a background retrain, if any, has finished.
    pub fn wait_for_retrain(&mut self) -> Result<Option<RetrainOutcome>> {
        match self.retrain_job.take() {
            Some(job) => join_retrain(job).map(Some),
            None => Ok(None),
        }
    }

    pub fn retrain_in_flight(&self) -> bool {
        self.retrain_job.is_some()
    }

    pub fn model(&self) -> &SharedScaleModel {
        &self.model
    }

    pub fn history(&self) -> &ObjectHistory {
        &self.history
    }

    /// Forget all calibration evidence (e.g. when the camera moves).
    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn stabilizer(&self) -> &HeightStabilizer {
        &self.stabilizer
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    fn poll_retrain(&mut self) {
        if !self
            .retrain_job
            .as_ref()
            .is_some_and(|job| job.is_finished())
        {
            return;
        }
        if let Some(job) = self.retrain_job.take() {
            if let Err(err) = join_retrain(job) {
                log::warn!("background retrain failed, keeping previous model: {:#}", err);
            }
        }
    }

    fn schedule_retrain(&mut self) -> Result<()> {
        let every = self.config.calibration.retrain_every_frames;
        if every == 0 || self.frames_processed % every != 0 || self.retrain_job.is_some() {
            return Ok(());
        }
        log::debug!(
            "scheduling background retrain on {} observations",
            self.history.observation_count()
        );
        let job = self
            .model
            .spawn_retrain(self.config.calibration.retrain_plan(), self.history.clone())?;
        self.retrain_job = Some(job);
        Ok(())
    }
}

impl Drop for HeightEngine {
    fn drop(&mut self) {
        if let Some(job) = self.retrain_job.take() {
            let _ = job.join();
        }
    }
}

fn join_retrain(job: JoinHandle<Result<RetrainOutcome>>) -> Result<RetrainOutcome> {
    job.join()
        .map_err(|_| anyhow!("retrain thread panicked"))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{SceneConfig, SyntheticSource, Walker};

    fn single_anchor() -> AnchorSet {
        AnchorSet::new(vec![Anchor::new(100.0, 170.0, 5.0)]).unwrap()
    }

    #[test]
    fn engine_estimate_matches_worked_example() {
        let engine = HeightEngine::new(EngineConfig::default(), single_anchor()).unwrap();
        assert_eq!(engine.estimate_current_frame(50.0, 5.0).unwrap(), 85.0);
    }

    #[test]
    fn process_frame_assigns_ids_and_records_history() {
        let mut source = SyntheticSource::new(SceneConfig {
            frames: 3,
            ..SceneConfig::default()
        });
        let mut engine = HeightEngine::new(EngineConfig::default(), single_anchor()).unwrap();

        let mut last = FrameReport::default();
        while let Some(frame) = source.next_frame().unwrap() {
            last = engine.process_frame(&frame).unwrap();
        }
        assert_eq!(last.frame, 2);
        let ids: Vec<ObjectId> = last.objects.iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![ObjectId(0), ObjectId(1)]);
        assert_eq!(engine.history().observation_count(), 6);
        assert_eq!(engine.frames_processed(), 3);
        for object in &last.objects {
            assert!(object.head.y < object.leg.y);
            // Cold stabiliser passes the raw estimate through.
            assert_eq!(object.stable_height, object.raw_height);
        }
    }

    #[test]
    fn empty_polygon_is_skipped_not_fatal() {
        let mut engine = HeightEngine::new(EngineConfig::default(), single_anchor()).unwrap();
        let frame = FrameDetections {
            frame: 0,
            detections: vec![Detection {
                bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
                polygon: vec![],
                depth: 5.0,
            }],
        };
        let report = engine.process_frame(&frame).unwrap();
        assert!(report.objects.is_empty());
        assert_eq!(engine.history().observation_count(), 0);
    }

    #[test]
    fn retrain_without_history_keeps_identity_model() {
        let mut engine = HeightEngine::new(EngineConfig::default(), single_anchor()).unwrap();
        let outcome = engine.retrain().unwrap();
        assert_eq!(outcome, RetrainOutcome::Skipped { pairs: 0 });
        assert_eq!(engine.model().current().infer(5.0, 1.0), 1.0);
    }

    #[test]
    fn idle_objects_lose_stabilizer_state() {
        let mut config = EngineConfig::default();
        config.tracking.max_idle_frames = 1;
        let mut engine = HeightEngine::new(config, single_anchor()).unwrap();

        let mut source = SyntheticSource::new(SceneConfig {
            frames: 1,
            ..SceneConfig::default()
        });
        let frame = source.next_frame().unwrap().unwrap();
        engine.process_frame(&frame).unwrap();
        assert_eq!(engine.stabilizer().tracked(), 2);

        let empty = |n| FrameDetections {
            frame: n,
            detections: vec![],
        };
        assert!(engine.process_frame(&empty(1)).unwrap().evicted.is_empty());
        let report = engine.process_frame(&empty(2)).unwrap();
        assert_eq!(report.evicted, vec![ObjectId(0), ObjectId(1)]);
        assert_eq!(engine.stabilizer().tracked(), 0);
        // Calibration evidence survives eviction.
        assert_eq!(engine.history().observation_count(), 2);
    }

    #[test]
    fn person_entering_mid_sequence_gets_next_id() {
        let scene = SceneConfig::default();
        let mut engine = HeightEngine::new(EngineConfig::default(), single_anchor()).unwrap();
        let mut pair = SyntheticSource::new(scene.clone());
        for _ in 0..3 {
            let frame = pair.next_frame().unwrap().unwrap();
            engine.process_frame(&frame).unwrap();
        }

        // Newcomer listed first, between the two walkers and without overlap.
        let mut walkers = vec![Walker {
            height_cm: 175.0,
            lateral_cm: 0.0,
            start_depth: 8.0,
            end_depth: 8.0,
        }];
        walkers.extend(scene.walkers.iter().cloned());
        let mut trio = SyntheticSource::new(SceneConfig { walkers, ..scene });
        for _ in 0..3 {
            trio.next_frame().unwrap();
        }

        for _ in 0..3 {
            let frame = trio.next_frame().unwrap().unwrap();
            let report = engine.process_frame(&frame).unwrap();
            let ids: Vec<ObjectId> = report.objects.iter().map(|o| o.id).collect();
            assert_eq!(ids, vec![ObjectId(2), ObjectId(0), ObjectId(1)]);
        }
        assert_eq!(engine.history().object_count(), 3);
    }

    #[test]
    fn rejected_detection_does_not_refresh_its_track() {
        let mut config = EngineConfig::default();
        config.tracking.max_idle_frames = 0;
        let mut engine = HeightEngine::new(config, single_anchor()).unwrap();
        let mut source = SyntheticSource::new(SceneConfig {
            frames: 1,
            ..SceneConfig::default()
        });
        let mut frame = source.next_frame().unwrap().unwrap();
        frame.detections.truncate(1);
        engine.process_frame(&frame).unwrap();

        // Same box, but the mask is unusable.
        frame.frame = 1;
        frame.detections[0].polygon.clear();
        let report = engine.process_frame(&frame).unwrap();
        assert!(report.objects.is_empty());
        assert_eq!(report.evicted, vec![ObjectId(0)]);
    }

    #[test]
    fn history_object_limit_holds_after_many_evictions() {
        let mut config = EngineConfig::default();
        config.tracking.max_idle_frames = 0;
        config.calibration.max_history_objects = 8;
        let mut engine = HeightEngine::new(config, single_anchor()).unwrap();

        let template = SyntheticSource::new(SceneConfig {
            frames: 1,
            ..SceneConfig::default()
        })
        .next_frame()
        .unwrap()
        .unwrap();
        let person = template.detections[0].clone();
        for n in 0..200u64 {
            // Alternate between two far-apart spots so every frame is a new id.
            let shift = if n % 2 == 0 { 0.0 } else { 400.0 };
            let mut detection = person.clone();
            detection.bbox.x1 += shift;
            detection.bbox.x2 += shift;
            for p in &mut detection.polygon {
                p[0] += shift;
            }
            let report = engine
                .process_frame(&FrameDetections {
                    frame: n,
                    detections: vec![detection],
                })
                .unwrap();
            assert_eq!(report.objects[0].id, ObjectId(n));
        }
        assert_eq!(engine.history().object_count(), 8);
        assert!(engine.stabilizer().tracked() <= 1);
    }
}
