//! Perspective calibration.
//!
//! Per-object observation histories are expanded into directed training pairs
//! and fitted by a [`ScaleModel`] that predicts how a fixed real height's pixel
//! length changes with depth. The live model sits behind a
//! [`SharedScaleModel`] so retraining never blocks estimation.

mod dataset;
mod model;
mod shared;

pub use dataset::{training_pair, ObjectHistory, Observation, TrainingPair, TrainingSet};
pub use model::{ConstantScaleModel, ModelKind, PolynomialScaleModel, ScaleModel, TrainSummary};
pub use shared::{RetrainOutcome, RetrainPlan, SharedScaleModel};
