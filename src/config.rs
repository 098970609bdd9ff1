use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::calib::{ModelKind, RetrainPlan};
use crate::stabilize::{RansacConfig, StabilizerConfig};
use crate::track::DEFAULT_KEYPOINT_THRESHOLD;

const DEFAULT_MIN_IOU: f64 = 0.0;
const DEFAULT_MAX_IDLE_FRAMES: u64 = 30;
const DEFAULT_MAX_OBSERVATIONS: usize = 64;
const DEFAULT_MAX_HISTORY_OBJECTS: usize = 256;
const DEFAULT_MIN_TRAINING_PAIRS: usize = 8;
const DEFAULT_RETRAIN_EVERY: u64 = 0;
const DEFAULT_MODEL: ModelKind = ModelKind::Polynomial;
const DEFAULT_DEGREE: u32 = 3;
const DEFAULT_RIDGE: f64 = 1e-8;
const DEFAULT_WINDOW: usize = 5;
const DEFAULT_ROBUST_WEIGHT: f64 = 0.7;
const DEFAULT_MIN_SAMPLES: usize = 2;
const DEFAULT_MAX_TRIALS: usize = 100;
const DEFAULT_SEED: u64 = 0;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    keypoints: Option<KeypointConfigFile>,
    tracking: Option<TrackingConfigFile>,
    calibration: Option<CalibrationConfigFile>,
    stabilizer: Option<StabilizerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct KeypointConfigFile {
    threshold: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackingConfigFile {
    min_iou: Option<f64>,
    max_idle_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CalibrationConfigFile {
    max_observations_per_object: Option<usize>,
    max_history_objects: Option<usize>,
    min_training_pairs: Option<usize>,
    retrain_every_frames: Option<u64>,
    model: Option<ModelKind>,
    degree: Option<u32>,
    ridge: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct StabilizerConfigFile {
    window: Option<usize>,
    robust_weight: Option<f64>,
    min_samples: Option<usize>,
    max_trials: Option<usize>,
    residual_threshold: Option<f64>,
    seed: Option<u64>,
}

/// Engine settings: file values, then environment overrides, then validation.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub keypoint_threshold: f64,
    pub tracking: TrackingSettings,
    pub calibration: CalibrationSettings,
    pub stabilizer: StabilizerConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSettings {
    /// A continuation needs IoU strictly above this.
    pub min_iou: f64,
    pub max_idle_frames: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationSettings {
    pub max_observations_per_object: usize,
    /// Ids kept in the calibration history, live or evicted.
    pub max_history_objects: usize,
    pub min_training_pairs: usize,
    /// Background retrain period in frames; 0 disables it.
    pub retrain_every_frames: u64,
    pub model: ModelKind,
    pub degree: u32,
    pub ridge: f64,
}

impl CalibrationSettings {
    pub fn retrain_plan(&self) -> RetrainPlan {
        RetrainPlan {
            kind: self.model,
            degree: self.degree,
            ridge: self.ridge,
            min_pairs: self.min_training_pairs,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        // Defaults always validate.
        Self::from_file(EngineConfigFile::default())
    }
}

impl EngineConfig {
    /// Load from `HEIGHT_CONFIG` (JSON, or TOML by extension) with env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("HEIGHT_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load an explicit file, still honouring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut cfg = Self::from_file(read_config_file(path)?);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let keypoint_threshold = file
            .keypoints
            .and_then(|k| k.threshold)
            .unwrap_or(DEFAULT_KEYPOINT_THRESHOLD);

        let tracking = file.tracking.unwrap_or_default();
        let tracking = TrackingSettings {
            min_iou: tracking.min_iou.unwrap_or(DEFAULT_MIN_IOU),
            max_idle_frames: tracking.max_idle_frames.unwrap_or(DEFAULT_MAX_IDLE_FRAMES),
        };

        let calib = file.calibration.unwrap_or_default();
        let calibration = CalibrationSettings {
            max_observations_per_object: calib
                .max_observations_per_object
                .unwrap_or(DEFAULT_MAX_OBSERVATIONS),
            max_history_objects: calib
                .max_history_objects
                .unwrap_or(DEFAULT_MAX_HISTORY_OBJECTS),
            min_training_pairs: calib.min_training_pairs.unwrap_or(DEFAULT_MIN_TRAINING_PAIRS),
            retrain_every_frames: calib.retrain_every_frames.unwrap_or(DEFAULT_RETRAIN_EVERY),
            model: calib.model.unwrap_or(DEFAULT_MODEL),
            degree: calib.degree.unwrap_or(DEFAULT_DEGREE),
            ridge: calib.ridge.unwrap_or(DEFAULT_RIDGE),
        };

        let stab = file.stabilizer.unwrap_or_default();
        let stabilizer = StabilizerConfig {
            window: stab.window.unwrap_or(DEFAULT_WINDOW),
            robust_weight: stab.robust_weight.unwrap_or(DEFAULT_ROBUST_WEIGHT),
            ransac: RansacConfig {
                min_samples: stab.min_samples.unwrap_or(DEFAULT_MIN_SAMPLES),
                max_trials: stab.max_trials.unwrap_or(DEFAULT_MAX_TRIALS),
                residual_threshold: stab.residual_threshold,
                seed: stab.seed.unwrap_or(DEFAULT_SEED),
            },
        };

        Self {
            keypoint_threshold,
            tracking,
            calibration,
            stabilizer,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = env_parse::<f64>("HEIGHT_KEYPOINT_THRESHOLD")? {
            self.keypoint_threshold = v;
        }
        if let Some(v) = env_parse::<f64>("HEIGHT_MIN_IOU")? {
            self.tracking.min_iou = v;
        }
        if let Some(v) = env_parse::<u64>("HEIGHT_MAX_IDLE_FRAMES")? {
            self.tracking.max_idle_frames = v;
        }
        if let Some(v) = env_parse::<u64>("HEIGHT_RETRAIN_EVERY")? {
            self.calibration.retrain_every_frames = v;
        }
        if let Ok(model) = std::env::var("HEIGHT_MODEL") {
            if !model.trim().is_empty() {
                self.calibration.model = ModelKind::parse(&model)
                    .map_err(|e| anyhow!("HEIGHT_MODEL: {}", e))?;
            }
        }
        if let Some(v) = env_parse::<u64>("HEIGHT_STABILIZER_SEED")? {
            self.stabilizer.ransac.seed = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.keypoint_threshold > 0.0 && self.keypoint_threshold <= 0.5) {
            return Err(anyhow!("keypoints.threshold must be in (0, 0.5]"));
        }
        if !(0.0..1.0).contains(&self.tracking.min_iou) {
            return Err(anyhow!("tracking.min_iou must be in [0, 1)"));
        }
        let calib = &self.calibration;
        if calib.max_observations_per_object < 2 {
            return Err(anyhow!("calibration.max_observations_per_object must be >= 2"));
        }
        if calib.max_history_objects == 0 {
            return Err(anyhow!("calibration.max_history_objects must be >= 1"));
        }
        if !(1..=6).contains(&calib.degree) {
            return Err(anyhow!("calibration.degree must be between 1 and 6"));
        }
        if !(calib.ridge.is_finite() && calib.ridge >= 0.0) {
            return Err(anyhow!("calibration.ridge must be a non-negative number"));
        }
        let stab = &self.stabilizer;
        if stab.window < 2 {
            return Err(anyhow!("stabilizer.window must be >= 2"));
        }
        if !(0.0..=1.0).contains(&stab.robust_weight) {
            return Err(anyhow!("stabilizer.robust_weight must be in [0, 1]"));
        }
        if stab.ransac.min_samples < 2 || stab.ransac.min_samples > stab.window {
            return Err(anyhow!(
                "stabilizer.min_samples must be between 2 and the window size"
            ));
        }
        if stab.ransac.max_trials == 0 {
            return Err(anyhow!("stabilizer.max_trials must be >= 1"));
        }
        if let Some(t) = stab.ransac.residual_threshold {
            if !(t.is_finite() && t >= 0.0) {
                return Err(anyhow!("stabilizer.residual_threshold must be >= 0"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, value)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let cfg = EngineConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.keypoint_threshold, 0.12);
        assert_eq!(cfg.stabilizer.window, 5);
        assert_eq!(cfg.stabilizer.robust_weight, 0.7);
        assert_eq!(cfg.calibration.model, ModelKind::Polynomial);
        assert_eq!(cfg.calibration.max_history_objects, 256);
    }

    #[test]
    fn rejects_zero_history_objects() {
        let mut cfg = EngineConfig::default();
        cfg.calibration.max_history_objects = 0;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("max_history_objects"));
    }

    #[test]
    fn rejects_min_samples_above_window() {
        let mut cfg = EngineConfig::default();
        cfg.stabilizer.ransac.min_samples = 6;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("min_samples"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut cfg = EngineConfig::default();
        cfg.keypoint_threshold = 0.0;
        assert!(cfg.validate().is_err());
    }
}
