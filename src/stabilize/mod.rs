//! Temporal height stabilisation.
//!
//! Each object id keeps a bounded window of raw per-frame estimates. Until the
//! window has filled once (cold), the raw estimate passes through. Afterwards
//! (warm, permanently) the output blends a robust trend prediction for the
//! next index with the window's moving average.

mod ransac;

use std::collections::{HashMap, VecDeque};

use crate::ObjectId;

pub use ransac::{fit_robust_trend, FitError, LineFit, RansacConfig};

/// Stabiliser settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StabilizerConfig {
    /// Samples kept per id; filling it once switches the id to warm.
    pub window: usize,
    /// Weight of the robust prediction; the moving average gets the rest.
    pub robust_weight: f64,
    pub ransac: RansacConfig,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            window: 5,
            robust_weight: 0.7,
            ransac: RansacConfig::default(),
        }
    }
}

/// Where the trend component of a warm output came from.
#[derive(Clone, Debug, PartialEq)]
pub enum Trend {
    /// Cold id: raw estimate returned unchanged.
    PassThrough,
    /// Robust fit succeeded; holds its prediction.
    Robust(f64),
    /// Robust fit failed; the newest raw sample stood in.
    Fallback(FitError),
}

/// One stabiliser step.
#[derive(Clone, Debug, PartialEq)]
pub struct Stabilized {
    pub height: f64,
    /// Mean of the window, present once warm.
    pub moving_average: Option<f64>,
    pub trend: Trend,
}

#[derive(Clone, Debug, Default)]
struct HeightStream {
    samples: VecDeque<f64>,
    warm: bool,
    fit_failures: u64,
}

/// Per-id stabiliser state store.
#[derive(Clone, Debug)]
pub struct HeightStabilizer {
    config: StabilizerConfig,
    streams: HashMap<ObjectId, HeightStream>,
}

impl HeightStabilizer {
    pub fn new(config: StabilizerConfig) -> Self {
        Self {
            config: StabilizerConfig {
                window: config.window.max(1),
                ..config
            },
            streams: HashMap::new(),
        }
    }

    /// Append a raw estimate for `id` and return the stable height.
    pub fn stabilize(&mut self, id: ObjectId, raw_height: f64) -> f64 {
        self.update(id, raw_height).height
    }

    /// Like [`HeightStabilizer::stabilize`], with the components exposed.
    pub fn update(&mut self, id: ObjectId, raw_height: f64) -> Stabilized {
        let window = self.config.window;
        let stream = self.streams.entry(id).or_default();
        if stream.samples.len() == window {
            stream.samples.pop_front();
        }
        stream.samples.push_back(raw_height);
        if stream.samples.len() == window {
            stream.warm = true;
        }

        if !stream.warm {
            return Stabilized {
                height: raw_height,
                moving_average: None,
                trend: Trend::PassThrough,
            };
        }

        let samples = stream.samples.make_contiguous();
        let moving_average = samples.iter().sum::<f64>() / samples.len() as f64;

        let (prediction, trend) = match fit_robust_trend(samples, &self.config.ransac) {
            Ok(fit) => {
                let next = fit.predict(samples.len() as f64);
                (next, Trend::Robust(next))
            }
            Err(err) => {
                stream.fit_failures += 1;
                log::warn!(
                    "robust height fit failed for object {} ({} so far): {}",
                    id,
                    stream.fit_failures,
                    err
                );
                (raw_height, Trend::Fallback(err))
            }
        };

        let w = self.config.robust_weight;
        Stabilized {
            height: w * prediction + (1.0 - w) * moving_average,
            moving_average: Some(moving_average),
            trend,
        }
    }

    pub fn is_warm(&self, id: ObjectId) -> bool {
        self.streams.get(&id).is_some_and(|s| s.warm)
    }

    /// Robust-fit failures recorded for `id`.
    pub fn fit_failures(&self, id: ObjectId) -> u64 {
        self.streams.get(&id).map_or(0, |s| s.fit_failures)
    }

    pub fn evict(&mut self, id: ObjectId) -> bool {
        self.streams.remove(&id).is_some()
    }

    pub fn tracked(&self) -> usize {
        self.streams.len()
    }

    pub fn config(&self) -> &StabilizerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_passes_through() {
        let mut s = HeightStabilizer::new(StabilizerConfig::default());
        assert_eq!(s.stabilize(ObjectId(1), 23.1), 23.1);
    }

    #[test]
    fn cold_state_returns_latest_raw() {
        let mut s = HeightStabilizer::new(StabilizerConfig::default());
        for raw in [170.0, 150.0, 190.0, 171.5] {
            assert_eq!(s.stabilize(ObjectId(1), raw), raw);
        }
        assert!(!s.is_warm(ObjectId(1)));
    }

    #[test]
    fn warm_output_blends_trend_and_average() {
        let cfg = StabilizerConfig::default();
        let mut s = HeightStabilizer::new(cfg);
        let samples = [170.0, 171.0, 169.0, 172.0, 170.0];
        let mut last = None;
        for raw in samples {
            last = Some(s.update(ObjectId(4), raw));
        }
        let out = last.unwrap();
        assert!(s.is_warm(ObjectId(4)));

        let ma = out.moving_average.unwrap();
        assert!((ma - 170.4).abs() < 1e-9);

        let expected_trend = fit_robust_trend(&samples, &cfg.ransac)
            .unwrap()
            .predict(5.0);
        assert_eq!(out.trend, Trend::Robust(expected_trend));
        assert!((out.height - (0.7 * expected_trend + 0.3 * ma)).abs() < 1e-9);
    }

    #[test]
    fn warm_state_is_permanent_and_window_bounded() {
        let mut s = HeightStabilizer::new(StabilizerConfig::default());
        for i in 0..12 {
            s.stabilize(ObjectId(2), 160.0 + i as f64);
        }
        assert!(s.is_warm(ObjectId(2)));
        let out = s.update(ObjectId(2), 172.0);
        // Window now holds 168..=172.
        assert_eq!(out.moving_average, Some(170.0));
    }

    #[test]
    fn fit_failure_falls_back_to_newest_sample() {
        let cfg = StabilizerConfig {
            ransac: RansacConfig {
                min_samples: 6,
                ..RansacConfig::default()
            },
            ..StabilizerConfig::default()
        };
        let mut s = HeightStabilizer::new(cfg);
        let mut last = None;
        for raw in [170.0, 170.0, 170.0, 170.0, 180.0] {
            last = Some(s.update(ObjectId(9), raw));
        }
        let out = last.unwrap();
        assert!(matches!(out.trend, Trend::Fallback(FitError::InsufficientSamples { .. })));
        assert!((out.height - (0.7 * 180.0 + 0.3 * 172.0)).abs() < 1e-9);
        assert_eq!(s.fit_failures(ObjectId(9)), 1);
    }

    #[test]
    fn ids_are_independent() {
        let mut s = HeightStabilizer::new(StabilizerConfig::default());
        for _ in 0..5 {
            s.stabilize(ObjectId(1), 170.0);
        }
        assert_eq!(s.stabilize(ObjectId(2), 120.0), 120.0);
        assert!(s.is_warm(ObjectId(1)));
        assert!(!s.is_warm(ObjectId(2)));
        assert!(s.evict(ObjectId(1)));
        assert_eq!(s.tracked(), 1);
    }
}
