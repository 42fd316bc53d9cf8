use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::errors::{BoError, BoResult};

/// Which acquisition function drives the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionKind {
    /// Expected Improvement; the exploration parameter is `xi`.
    #[default]
    #[serde(alias = "EI", alias = "expected_improvement")]
    Ei,
    /// Upper Confidence Bound; the exploration parameter is `kappa`.
    #[serde(alias = "UCB", alias = "upper_confidence_bound")]
    Ucb,
}

impl AcquisitionKind {
    /// Name of the exploration parameter as shown to operators.
    pub fn parameter_label(&self) -> &'static str {
        match self {
            Self::Ei => "xi",
            Self::Ucb => "kappa",
        }
    }

    /// Typical starting value of the exploration parameter.
    pub fn default_exploration_param(&self) -> f64 {
        match self {
            Self::Ei => 0.01,
            Self::Ucb => 2.576,
        }
    }
}

impl std::fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ei => write!(f, "EI"),
            Self::Ucb => write!(f, "UCB"),
        }
    }
}

impl FromStr for AcquisitionKind {
    type Err = BoError;

    fn from_str(s: &str) -> BoResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ei" | "expected_improvement" => Ok(Self::Ei),
            "ucb" | "upper_confidence_bound" => Ok(Self::Ucb),
            other => Err(crate::config_error!("unknown acquisition function: {other}")),
        }
    }
}

/// Top-level configuration for an optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    pub name: String,

    /// Number of Bayesian iterations after the initial design.
    pub n_iterations: usize,

    pub acquisition: AcquisitionKind,

    /// `xi` for EI, `kappa` for UCB. Not rescaled when switching between them.
    pub exploration_param: f64,

    /// Size of the Latin Hypercube initial design.
    pub initial_sample_count: usize,

    /// Random starts for the acquisition maximizer.
    pub restart_count: usize,

    /// Explicit search interval. Overrides the bounds provider when set;
    /// invalid intervals are replaced by the default one.
    pub bounds: Option<(f64, f64)>,

    /// Points in the evaluation grid used for best-predicted and plotting.
    pub grid_size: usize,

    /// Seed for every random draw in the run. `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            name: "bocorr".to_string(),
            n_iterations: 25,
            acquisition: AcquisitionKind::Ei,
            exploration_param: 0.01,
            initial_sample_count: 5,
            restart_count: 25,
            bounds: None,
            grid_size: 1000,
            seed: None,
        }
    }
}

impl OptimizationConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_iterations(mut self, n: usize) -> Self {
        self.n_iterations = n;
        self
    }

    pub fn with_acquisition(mut self, kind: AcquisitionKind, exploration_param: f64) -> Self {
        self.acquisition = kind;
        self.exploration_param = exploration_param;
        self
    }

    pub fn with_initial_samples(mut self, n: usize) -> Self {
        self.initial_sample_count = n;
        self
    }

    pub fn with_restarts(mut self, n: usize) -> Self {
        self.restart_count = n;
        self
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.bounds = Some((min, max));
        self
    }

    pub fn with_grid_size(mut self, n: usize) -> Self {
        self.grid_size = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Reject settings that have no sensible default.
    pub fn validate(&self) -> BoResult<()> {
        if self.n_iterations == 0 {
            return Err(crate::config_error!("n_iterations must be positive"));
        }
        if self.initial_sample_count == 0 {
            return Err(crate::config_error!("initial_sample_count must be positive"));
        }
        if self.restart_count == 0 {
            return Err(crate::config_error!("restart_count must be positive"));
        }
        if !self.exploration_param.is_finite() || self.exploration_param < 0.0 {
            return Err(crate::config_error!(
                "exploration_param ({}) must be a non-negative number, got {}",
                self.acquisition.parameter_label(),
                self.exploration_param
            ));
        }
        if self.grid_size < 2 {
            return Err(crate::config_error!(
                "grid_size must be at least 2, got {}",
                self.grid_size
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = OptimizationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.initial_sample_count, 5);
        assert_eq!(config.restart_count, 25);
        assert_eq!(config.grid_size, 1000);
    }

    #[test]
    fn rejects_zero_iterations() {
        let config = OptimizationConfig::default().with_iterations(0);
        assert!(matches!(config.validate(), Err(BoError::Config(_))));
    }

    #[test]
    fn rejects_negative_or_nan_exploration() {
        let config = OptimizationConfig::default().with_acquisition(AcquisitionKind::Ucb, -1.0);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("kappa"));

        let config = OptimizationConfig::default().with_acquisition(AcquisitionKind::Ei, f64::NAN);
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_counts() {
        assert!(OptimizationConfig::default()
            .with_initial_samples(0)
            .validate()
            .is_err());
        assert!(OptimizationConfig::default().with_restarts(0).validate().is_err());
        assert!(OptimizationConfig::default().with_grid_size(1).validate().is_err());
    }

    #[test]
    fn invalid_bounds_are_not_a_config_error() {
        let config = OptimizationConfig::default().with_bounds(10.0, -2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn acquisition_kind_parsing() {
        assert_eq!("EI".parse::<AcquisitionKind>().unwrap(), AcquisitionKind::Ei);
        assert_eq!(" ucb ".parse::<AcquisitionKind>().unwrap(), AcquisitionKind::Ucb);
        assert!("pi".parse::<AcquisitionKind>().is_err());
        assert_eq!(AcquisitionKind::Ei.parameter_label(), "xi");
        assert_eq!(AcquisitionKind::Ucb.parameter_label(), "kappa");
    }

    #[test]
    fn config_from_partial_json() {
        let config: OptimizationConfig = serde_json::from_str(
            r#"{"n_iterations": 3, "acquisition": "UCB", "exploration_param": 2.0, "bounds": [-2.0, 10.0]}"#,
        )
        .unwrap();
        assert_eq!(config.n_iterations, 3);
        assert_eq!(config.acquisition, AcquisitionKind::Ucb);
        assert_eq!(config.bounds, Some((-2.0, 10.0)));
        assert_eq!(config.restart_count, 25);
    }
}
