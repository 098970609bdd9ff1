use rand::rngs::StdRng;
use rand::SeedableRng;

/// Consensus-sampling parameters for the trend fit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RansacConfig {
    /// Points per hypothesis (at least 2 for a line).
    pub min_samples: usize,
    pub max_trials: usize,
    /// Inlier residual bound; `None` uses the median absolute deviation of y.
    pub residual_threshold: Option<f64>,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            min_samples: 2,
            max_trials: 100,
            residual_threshold: None,
            seed: 0,
        }
    }
}

/// `y = slope * x + intercept`, refitted on the consensus set.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    pub inliers: usize,
}

impl LineFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Why a robust fit produced no line.
#[derive(Clone, Debug, PartialEq)]
pub enum FitError {
    InsufficientSamples { have: usize, need: usize },
    NonFinite,
    NoConsensus { trials: usize },
    InsufficientInliers { have: usize, need: usize },
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsufficientSamples { have, need } => {
                write!(f, "insufficient samples: have {}, need {}", have, need)
            }
            Self::NonFinite => write!(f, "samples contain non-finite values"),
            Self::NoConsensus { trials } => {
                write!(f, "no valid consensus set after {} trials", trials)
            }
            Self::InsufficientInliers { have, need } => {
                write!(f, "insufficient inliers: have {}, need {}", have, need)
            }
        }
    }
}

impl std::error::Error for FitError {}

// Absorbs rounding in residuals of points the hypothesis passes through.
const RESIDUAL_EPS: f64 = 1e-9;

/// Fit an outlier-resistant line through `(i, ys[i])`.
///
/// Random minimal subsets (seeded, so the result is deterministic) propose
/// lines; the one with most points within the residual threshold wins and is
/// refitted by least squares on those inliers.
pub fn fit_robust_trend(ys: &[f64], config: &RansacConfig) -> Result<LineFit, FitError> {
    let need = config.min_samples.max(2);
    let n = ys.len();
    if n < need {
        return Err(FitError::InsufficientSamples { have: n, need });
    }
    if ys.iter().any(|y| !y.is_finite()) {
        return Err(FitError::NonFinite);
    }

    let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
    let threshold = config
        .residual_threshold
        .unwrap_or_else(|| median_absolute_deviation(ys))
        + RESIDUAL_EPS;

    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut best: Option<(usize, f64, Vec<bool>)> = None;

    for _ in 0..config.max_trials {
        let sample = rand::seq::index::sample(&mut rng, n, need).into_vec();
        let sx: Vec<f64> = sample.iter().map(|&i| xs[i]).collect();
        let sy: Vec<f64> = sample.iter().map(|&i| ys[i]).collect();
        let Some((slope, intercept)) = least_squares(&sx, &sy) else {
            continue;
        };

        let mut mask = vec![false; n];
        let mut count = 0;
        let mut residual_sum = 0.0;
        for i in 0..n {
            let r = (ys[i] - (slope * xs[i] + intercept)).abs();
            if r <= threshold {
                mask[i] = true;
                count += 1;
                residual_sum += r;
            }
        }

        let better = match &best {
            None => count > 0,
            Some((best_count, best_sum, _)) => {
                count > *best_count || (count == *best_count && residual_sum < *best_sum)
            }
        };
        if better {
            best = Some((count, residual_sum, mask));
            if count == n {
                break;
            }
        }
    }

    let (count, _, mask) = best.ok_or(FitError::NoConsensus {
        trials: config.max_trials,
    })?;
    if count < need {
        return Err(FitError::InsufficientInliers { have: count, need });
    }

    let (ix, iy): (Vec<f64>, Vec<f64>) = (0..n)
        .filter(|&i| mask[i])
        .map(|i| (xs[i], ys[i]))
        .unzip();
    let (slope, intercept) = least_squares(&ix, &iy).ok_or(FitError::NoConsensus {
        trials: config.max_trials,
    })?;

    Ok(LineFit {
        slope,
        intercept,
        inliers: count,
    })
}

fn least_squares(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let my = ys.iter().sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        sxx += (x - mx) * (x - mx);
        sxy += (x - mx) * (y - my);
    }
    if sxx <= 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, my - slope * mx))
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

fn median_absolute_deviation(ys: &[f64]) -> f64 {
    let mut sorted = ys.to_vec();
    let m = median(&mut sorted);
    let mut deviations: Vec<f64> = ys.iter().map(|y| (y - m).abs()).collect();
    median(&mut deviations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_line_is_recovered() {
        let ys = [10.0, 12.0, 14.0, 16.0, 18.0];
        let fit = fit_robust_trend(&ys, &RansacConfig::default()).unwrap();
        assert!((fit.slope - 2.0).abs() < 1e-9);
        assert!((fit.intercept - 10.0).abs() < 1e-9);
        assert_eq!(fit.inliers, 5);
        assert!((fit.predict(5.0) - 20.0).abs() < 1e-9);
    }

    #[test]
    fn single_outlier_is_ignored() {
        let ys = [170.0, 170.0, 240.0, 170.0, 170.0];
        let fit = fit_robust_trend(&ys, &RansacConfig::default()).unwrap();
        assert_eq!(fit.inliers, 4);
        assert!((fit.predict(5.0) - 170.0).abs() < 1e-9);
    }

    #[test]
    fn same_seed_same_fit() {
        let ys = [170.0, 171.0, 169.0, 172.0, 170.0];
        let cfg = RansacConfig {
            seed: 42,
            ..RansacConfig::default()
        };
        assert_eq!(fit_robust_trend(&ys, &cfg), fit_robust_trend(&ys, &cfg));
    }

    #[test]
    fn too_few_samples_is_an_error() {
        let err = fit_robust_trend(&[1.0], &RansacConfig::default()).unwrap_err();
        assert_eq!(err, FitError::InsufficientSamples { have: 1, need: 2 });
    }

    #[test]
    fn non_finite_samples_are_rejected() {
        let ys = [1.0, f64::NAN, 3.0];
        assert_eq!(
            fit_robust_trend(&ys, &RansacConfig::default()).unwrap_err(),
            FitError::NonFinite
        );
    }

    #[test]
    fn zero_trials_finds_no_consensus() {
        let cfg = RansacConfig {
            max_trials: 0,
            ..RansacConfig::default()
        };
        let err = fit_robust_trend(&[1.0, 2.0, 3.0], &cfg).unwrap_err();
        assert_eq!(err, FitError::NoConsensus { trials: 0 });
    }

    #[test]
    fn mad_of_window() {
        assert_eq!(median_absolute_deviation(&[170.0, 171.0, 169.0, 172.0, 170.0]), 1.0);
    }
}
