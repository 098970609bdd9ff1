use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;

use anyhow::{anyhow, Result};

use super::dataset::{ObjectHistory, TrainingSet};
use super::model::{ModelKind, ScaleModel, TrainSummary};

/// Handle to the live scale model.
///
/// Readers take a snapshot `Arc` per inference call and never wait on
/// training: a retrain fits a fresh model off to the side and only takes the
/// write lock for the pointer swap.
#[derive(Clone)]
pub struct SharedScaleModel {
    inner: Arc<RwLock<Arc<dyn ScaleModel>>>,
}

/// Result of a retrain request.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RetrainOutcome {
    /// New model fitted and swapped in.
    Swapped(TrainSummary),
    /// Too few training pairs; the previous model stays live.
    Skipped { pairs: usize },
}

/// Parameters for building and fitting a replacement model.
#[derive(Clone, Copy, Debug)]
pub struct RetrainPlan {
    pub kind: ModelKind,
    pub degree: u32,
    pub ridge: f64,
    pub min_pairs: usize,
}

impl SharedScaleModel {
    pub fn new(model: Arc<dyn ScaleModel>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(model)),
        }
    }

    /// Consistent snapshot of the live model.
    pub fn current(&self) -> Arc<dyn ScaleModel> {
        // A poisoned lock still holds a complete model pointer.
        let guard = self.inner.read().unwrap_or_else(|p| p.into_inner());
        Arc::clone(&*guard)
    }

    /// Atomically replace the live model.
    pub fn replace(&self, model: Arc<dyn ScaleModel>) {
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        *guard = model;
    }

    /// Fit a new model on `set` and swap it in.
    pub fn retrain(&self, plan: RetrainPlan, set: &TrainingSet) -> Result<RetrainOutcome> {
        if set.len() < plan.min_pairs.max(1) {
            log::info!(
                "scale model retrain skipped: {} training pairs (need {})",
                set.len(),
                plan.min_pairs.max(1)
            );
            return Ok(RetrainOutcome::Skipped { pairs: set.len() });
        }

        let mut model = plan.kind.build(plan.degree, plan.ridge);
        let summary = model.train(set)?;
        log::info!(
            "scale model '{}' trained on {} pairs (rms {:.5})",
            model.name(),
            summary.pairs,
            summary.rms
        );
        self.replace(Arc::from(model));
        Ok(RetrainOutcome::Swapped(summary))
    }

    /// Retrain on a background thread from a history snapshot.
    pub fn spawn_retrain(
        &self,
        plan: RetrainPlan,
        history: ObjectHistory,
    ) -> Result<JoinHandle<Result<RetrainOutcome>>> {
        let shared = self.clone();
        std::thread::Builder::new()
            .name("scale-retrain".to_string())
            .spawn(move || {
                let set = TrainingSet::from_history(&history);
                shared.retrain(plan, &set)
            })
            .map_err(|e| anyhow!("failed to spawn retrain thread: {}", e))
    }
}

impl std::fmt::Debug for SharedScaleModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedScaleModel")
            .field("model", &self.current().name())
            .finish()
    }
}
