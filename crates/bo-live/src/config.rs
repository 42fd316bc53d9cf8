use std::path::Path;
use std::time::Duration;

use bo_types::{config_error, BoResult, OptimizationConfig};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::mock::DEFAULT_NOISE_STD;
use crate::pv::DEFAULT_RANGE_PERCENTAGE;

/// Environment variable naming a JSON [`RunnerConfig`] file.
pub const CONFIG_ENV_VAR: &str = "BOCORR_CONFIG";

/// Everything the `bo-runner` binary needs: the optimization itself plus how
/// to reach the device and how fast to tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub optimization: OptimizationConfig,

    /// PV the candidate input is written to. Empty selects mock mode.
    pub input_pv: String,

    /// PV the objective is read from. Empty selects mock mode.
    pub objective_pv: String,

    /// Settling time between writing the input and reading the objective.
    pub wait_time_secs: f64,

    /// How long a failing objective read is retried. Zero reads once.
    pub read_timeout_millis: u64,

    /// Half-width of the live bounds, in percent of the current input.
    pub range_percentage: f64,

    pub tick_millis: u64,

    /// Consecutive failed steps before the run is aborted.
    pub max_consecutive_failures: usize,

    /// Noise of the simulated device and of the fallback objective.
    pub noise_std: f64,

    /// Starting value of the simulated input PV.
    pub initial_input: f64,

    /// Extra runs re-centered on the previous best x.
    pub follow_up_runs: usize,

    /// Half-width of the re-centered interval.
    pub recenter_half_width: f64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            optimization: OptimizationConfig::default(),
            input_pv: String::new(),
            objective_pv: String::new(),
            wait_time_secs: 3.0,
            read_timeout_millis: 1000,
            range_percentage: DEFAULT_RANGE_PERCENTAGE,
            tick_millis: 1000,
            max_consecutive_failures: 3,
            noise_std: DEFAULT_NOISE_STD,
            initial_input: 4.0,
            follow_up_runs: 0,
            recenter_half_width: 1.0,
        }
    }
}

impl RunnerConfig {
    /// Read from the file named by `BOCORR_CONFIG`, or defaults when unset.
    pub fn load() -> BoResult<Self> {
        match std::env::var(CONFIG_ENV_VAR) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(path.trim()),
            _ => {
                info!("{CONFIG_ENV_VAR} not set, using default runner configuration");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> BoResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_json(&raw)?;
        info!(path = %path.display(), "loaded runner configuration");
        Ok(config)
    }

    pub fn from_json(raw: &str) -> BoResult<Self> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BoResult<()> {
        self.optimization.validate()?;
        if let Err(e) = Duration::try_from_secs_f64(self.wait_time_secs) {
            return Err(config_error!(
                "wait_time_secs must be a non-negative duration, got {}: {e}",
                self.wait_time_secs
            ));
        }
        if self.tick_millis == 0 {
            return Err(config_error!("tick_millis must be positive"));
        }
        if self.max_consecutive_failures == 0 {
            return Err(config_error!("max_consecutive_failures must be positive"));
        }
        if !self.noise_std.is_finite() || self.noise_std < 0.0 {
            return Err(config_error!(
                "noise_std must be a non-negative number, got {}",
                self.noise_std
            ));
        }
        Ok(())
    }

    /// No device configured: evaluate the synthetic objective directly.
    pub fn is_mock(&self) -> bool {
        self.input_pv.trim().is_empty() || self.objective_pv.trim().is_empty()
    }

    /// Settle time after each write. Zero if the value was never validated
    /// and does not fit a [`Duration`].
    pub fn wait_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.wait_time_secs).unwrap_or_default()
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_millis)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}
