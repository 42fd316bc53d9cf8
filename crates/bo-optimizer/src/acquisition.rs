//! Acquisition functions (maximization convention).

use bo_types::{AcquisitionKind, BoError, BoResult, SampleStore};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;

use crate::surrogate::FittedSurrogate;

/// Standard normal probability density function.
fn norm_pdf(x: f64) -> f64 {
    const INV_SQRT_2PI: f64 = 0.398_942_280_401_432_7;
    INV_SQRT_2PI * (-0.5 * x * x).exp()
}

/// Standard normal cumulative distribution function.
fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Expected Improvement over the incumbent `best_y`.
///
/// `EI = imp·Φ(Z) + σ·φ(Z)` with `imp = μ - best_y - ξ` and `Z = imp / σ`.
/// Exactly 0 where `σ = 0`.
pub fn expected_improvement(mean: f64, std: f64, best_y: f64, xi: f64) -> f64 {
    if std == 0.0 {
        return 0.0;
    }
    let imp = mean - best_y - xi;
    let z = imp / std;
    let ei = imp * norm_cdf(z) + std * norm_pdf(z);
    // ZΦ(Z) + φ(Z) ≥ 0; rounding in the far tail can dip just below.
    ei.max(0.0)
}

/// Upper Confidence Bound `μ + κ·σ`.
pub fn upper_confidence_bound(mean: f64, std: f64, kappa: f64) -> f64 {
    mean + kappa * std
}

/// Configured acquisition function.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Acquisition {
    ExpectedImprovement { xi: f64 },
    UpperConfidenceBound { kappa: f64 },
}

impl Acquisition {
    /// Interpret `exploration_param` as `xi` or `kappa` depending on `kind`.
    pub fn new(kind: AcquisitionKind, exploration_param: f64) -> Self {
        match kind {
            AcquisitionKind::Ei => Self::ExpectedImprovement {
                xi: exploration_param,
            },
            AcquisitionKind::Ucb => Self::UpperConfidenceBound {
                kappa: exploration_param,
            },
        }
    }

    pub fn kind(&self) -> AcquisitionKind {
        match self {
            Self::ExpectedImprovement { .. } => AcquisitionKind::Ei,
            Self::UpperConfidenceBound { .. } => AcquisitionKind::Ucb,
        }
    }

    pub fn exploration_param(&self) -> f64 {
        match *self {
            Self::ExpectedImprovement { xi } => xi,
            Self::UpperConfidenceBound { kappa } => kappa,
        }
    }

    /// e.g. `EI (xi=0.0100)` or `UCB (kappa=2.5760)`.
    pub fn label(&self) -> String {
        let kind = self.kind();
        format!(
            "{kind} ({}={:.4})",
            kind.parameter_label(),
            self.exploration_param()
        )
    }

    /// Score from predicted moments and the incumbent observation.
    pub fn score_moments(&self, mean: f64, std: f64, best_y: f64) -> f64 {
        match *self {
            Self::ExpectedImprovement { xi } => expected_improvement(mean, std, best_y, xi),
            Self::UpperConfidenceBound { kappa } => upper_confidence_bound(mean, std, kappa),
        }
    }

    pub fn score_one(&self, x: f64, surrogate: &FittedSurrogate, best_y: f64) -> f64 {
        let (mean, std) = surrogate.predict_one(x);
        self.score_moments(mean, std, best_y)
    }

    /// Score a batch of candidates. The incumbent is the best `y` in `samples`.
    pub fn score(
        &self,
        xs: &[f64],
        samples: &SampleStore,
        surrogate: &FittedSurrogate,
    ) -> BoResult<Vec<f64>> {
        let best_y = samples
            .best()
            .ok_or_else(|| BoError::Validation("acquisition needs at least one sample".to_string()))?
            .y;
        let prediction = surrogate.predict(xs);
        Ok(prediction
            .mean
            .iter()
            .zip(prediction.std.iter())
            .map(|(&m, &s)| self.score_moments(m, s, best_y))
            .collect())
    }
}
