use anyhow::{anyhow, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::dataset::TrainingSet;

/// Learned map `(reference_depth, depth_delta) -> scale_ratio`.
///
/// `infer` must be deterministic for fixed trained weights and continuous in
/// both inputs. Implementations are fitted on the current scene only; there is
/// no validation split.
pub trait ScaleModel: Send + Sync {
    /// Model identifier for logs.
    fn name(&self) -> &'static str;

    /// Fit on the full training set, replacing any previous weights.
    fn train(&mut self, set: &TrainingSet) -> Result<TrainSummary>;

    /// Multiplicative pixel-length change when moving from `reference_depth`
    /// by `depth_delta`.
    fn infer(&self, reference_depth: f64, depth_delta: f64) -> f64;
}

/// Outcome of a successful fit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrainSummary {
    pub pairs: usize,
    /// Root-mean-square residual over the training rows.
    pub rms: f64,
}

/// Model family selected by configuration.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Constant,
    Polynomial,
}

impl ModelKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "constant" => Ok(Self::Constant),
            "polynomial" => Ok(Self::Polynomial),
            other => Err(anyhow!("unknown scale model '{}'", other)),
        }
    }

    /// Fresh untrained model of this family.
    pub fn build(self, degree: u32, ridge: f64) -> Box<dyn ScaleModel> {
        match self {
            Self::Constant => Box::new(ConstantScaleModel::identity()),
            Self::Polynomial => Box::new(PolynomialScaleModel::new(degree, ridge)),
        }
    }
}

// ----------------------------------------------------------------------------
// ConstantScaleModel
// ----------------------------------------------------------------------------

/// Same scale for every input. Training sets it to the mean target ratio.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantScaleModel {
    scale: f64,
}

impl ConstantScaleModel {
    pub fn new(scale: f64) -> Self {
        Self { scale }
    }

    /// No depth compensation; used before the first calibration.
    pub fn identity() -> Self {
        Self::new(1.0)
    }
}

impl ScaleModel for ConstantScaleModel {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn train(&mut self, set: &TrainingSet) -> Result<TrainSummary> {
        let targets = set.targets();
        if targets.is_empty() {
            return Err(anyhow!("cannot train on an empty training set"));
        }
        if targets.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("training targets must be finite"));
        }
        let n = targets.len() as f64;
        let mean = targets.iter().sum::<f64>() / n;
        let rms = (targets.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n).sqrt();
        self.scale = mean;
        Ok(TrainSummary {
            pairs: targets.len(),
            rms,
        })
    }

    fn infer(&self, _reference_depth: f64, _depth_delta: f64) -> f64 {
        self.scale
    }
}

// ----------------------------------------------------------------------------
// PolynomialScaleModel
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct PolynomialFit {
    mean: [f64; 2],
    std: [f64; 2],
    /// Per-input `[min, max]` seen in training.
    bounds: [[f64; 2]; 2],
    weights: DVector<f64>,
}

/// Ridge-regularised least squares over all monomials of the standardised
/// inputs up to `degree`.
///
/// Untrained, it returns a scale of 1.0 everywhere.
///
/// The fit is only trustworthy inside the box of reference depths and depth
/// deltas it was trained on; beyond it the polynomial drifts away from the
/// pinhole curve quickly. Such queries still return a value but are logged at
/// debug level, and [`PolynomialScaleModel::in_training_range`] lets callers
/// check first.
#[derive(Clone, Debug)]
pub struct PolynomialScaleModel {
    degree: u32,
    ridge: f64,
    terms: Vec<(i32, i32)>,
    fit: Option<PolynomialFit>,
}

impl PolynomialScaleModel {
    pub fn new(degree: u32, ridge: f64) -> Self {
        let mut terms = Vec::new();
        for total in 0..=degree as i32 {
            for i in 0..=total {
                terms.push((total - i, i));
            }
        }
        Self {
            degree,
            ridge: ridge.max(0.0),
            terms,
            fit: None,
        }
    }

    pub fn degree(&self) -> u32 {
        self.degree
    }

    pub fn is_trained(&self) -> bool {
        self.fit.is_some()
    }

    /// Whether `(reference_depth, depth_delta)` lies inside the trained range.
    /// Always false before training.
    pub fn in_training_range(&self, reference_depth: f64, depth_delta: f64) -> bool {
        self.fit.as_ref().is_some_and(|fit| {
            [reference_depth, depth_delta]
                .iter()
                .zip(fit.bounds.iter())
                .all(|(v, [lo, hi])| (*lo..=*hi).contains(v))
        })
    }

    fn features(&self, z: [f64; 2]) -> impl Iterator<Item = f64> + '_ {
        self.terms
            .iter()
            .map(move |&(a, b)| z[0].powi(a) * z[1].powi(b))
    }

    fn evaluate(&self, fit: &PolynomialFit, x: [f64; 2]) -> f64 {
        let z = standardize(x, fit.mean, fit.std);
        self.features(z)
            .zip(fit.weights.iter())
            .map(|(f, w)| f * w)
            .sum()
    }
}

impl ScaleModel for PolynomialScaleModel {
    fn name(&self) -> &'static str {
        "polynomial"
    }

    fn train(&mut self, set: &TrainingSet) -> Result<TrainSummary> {
        if set.is_empty() {
            return Err(anyhow!("cannot train on an empty training set"));
        }
        let inputs = set.inputs();
        let targets = set.targets();
        if inputs.iter().flatten().chain(targets.iter()).any(|v| !v.is_finite()) {
            return Err(anyhow!("training rows must be finite"));
        }

        let n = inputs.len();
        let mut mean = [0.0; 2];
        let mut std = [0.0; 2];
        let mut bounds = [[f64::INFINITY, f64::NEG_INFINITY]; 2];
        for k in 0..2 {
            for x in &inputs {
                bounds[k][0] = bounds[k][0].min(x[k]);
                bounds[k][1] = bounds[k][1].max(x[k]);
            }
            mean[k] = inputs.iter().map(|x| x[k]).sum::<f64>() / n as f64;
            let var = inputs.iter().map(|x| (x[k] - mean[k]).powi(2)).sum::<f64>() / n as f64;
            std[k] = if var > 0.0 { var.sqrt() } else { 1.0 };
        }

        let p = self.terms.len();
        let mut design = DMatrix::<f64>::zeros(n, p);
        for (row, x) in inputs.iter().enumerate() {
            let z = standardize(*x, mean, std);
            for (col, f) in self.features(z).enumerate() {
                design[(row, col)] = f;
            }
        }
        let y = DVector::from_vec(targets);

        let design_t = design.transpose();
        let mut normal = &design_t * &design;
        for d in 0..p {
            normal[(d, d)] += self.ridge;
        }
        let rhs = &design_t * &y;

        let weights = match normal.clone().cholesky() {
            Some(chol) => chol.solve(&rhs),
            None => normal
                .svd(true, true)
                .solve(&rhs, 1e-12)
                .map_err(|e| anyhow!("polynomial scale fit failed: {}", e))?,
        };
        if weights.iter().any(|w| !w.is_finite()) {
            return Err(anyhow!("polynomial scale fit produced non-finite weights"));
        }

        let residual = &design * &weights - &y;
        let rms = (residual.norm_squared() / n as f64).sqrt();

        self.fit = Some(PolynomialFit {
            mean,
            std,
            bounds,
            weights,
        });
        Ok(TrainSummary { pairs: n, rms })
    }

    fn infer(&self, reference_depth: f64, depth_delta: f64) -> f64 {
        match &self.fit {
            Some(fit) => {
                if !self.in_training_range(reference_depth, depth_delta) {
                    log::debug!(
                        "scale query ({:.2}, {:.2}) outside trained range depth {:?} delta {:?}",
                        reference_depth,
                        depth_delta,
                        fit.bounds[0],
                        fit.bounds[1]
                    );
                }
                self.evaluate(fit, [reference_depth, depth_delta])
            }
            None => 1.0,
        }
    }
}

fn standardize(x: [f64; 2], mean: [f64; 2], std: [f64; 2]) -> [f64; 2] {
    [(x[0] - mean[0]) / std[0], (x[1] - mean[1]) / std[1]]
}
