//! Simulated device for sandbox runs.
//!
//! Runs the whole loop in-process with no hardware attached: a noisy
//! synthetic objective and a PV client whose objective channel responds to
//! writes on the input channel.

use std::collections::HashMap;

use bo_optimizer::ObjectiveEvaluator;
use bo_types::EvaluationError;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use tracing::info;

use crate::pv::{ProcessVariableClient, PvError, PvResult};

/// Default standard deviation of the synthetic objective's noise.
pub const DEFAULT_NOISE_STD: f64 = 5.0;

/// `f(x) = (x − 0.5)²·sin x + cos 2x + N(0, σ²)`.
#[derive(Debug, Clone)]
pub struct SyntheticObjective {
    noise_std: f64,
    rng: StdRng,
}

impl SyntheticObjective {
    pub fn new(noise_std: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            noise_std: noise_std.max(0.0),
            rng,
        }
    }

    /// Noise-free variant.
    pub fn noiseless() -> Self {
        Self::new(0.0, Some(0))
    }

    pub fn noise_std(&self) -> f64 {
        self.noise_std
    }

    /// The underlying function without noise.
    pub fn true_value(x: f64) -> f64 {
        (x - 0.5).powi(2) * x.sin() + (2.0 * x).cos()
    }

    /// One noisy reading at `x`.
    pub fn sample(&mut self, x: f64) -> f64 {
        let noise = if self.noise_std > 0.0 {
            let z: f64 = self.rng.sample(StandardNormal);
            self.noise_std * z
        } else {
            0.0
        };
        Self::true_value(x) + noise
    }
}

impl Default for SyntheticObjective {
    fn default() -> Self {
        Self::new(DEFAULT_NOISE_STD, None)
    }
}

impl ObjectiveEvaluator for SyntheticObjective {
    fn evaluate(&mut self, x: f64) -> Result<f64, EvaluationError> {
        let y = self.sample(x);
        if y.is_finite() {
            Ok(y)
        } else {
            Err(EvaluationError::NonFinite { x, value: y })
        }
    }
}

#[derive(Debug)]
struct DeviceState {
    channels: HashMap<String, f64>,
    objective: SyntheticObjective,
    connected: bool,
    writes: usize,
}

/// In-process stand-in for a channel-access device. Writing the input PV
/// immediately updates the objective PV with a fresh synthetic reading.
#[derive(Debug)]
pub struct SimulatedPvClient {
    input_pv: String,
    objective_pv: String,
    state: Mutex<DeviceState>,
}

impl SimulatedPvClient {
    pub fn new(
        input_pv: impl Into<String>,
        objective_pv: impl Into<String>,
        initial_input: f64,
        objective: SyntheticObjective,
    ) -> Self {
        let input_pv = input_pv.into();
        let objective_pv = objective_pv.into();
        let mut objective = objective;
        let mut channels = HashMap::new();
        channels.insert(input_pv.clone(), initial_input);
        channels.insert(objective_pv.clone(), objective.sample(initial_input));

        info!(
            input = %input_pv,
            objective = %objective_pv,
            initial_input,
            noise_std = objective.noise_std(),
            "simulated device ready"
        );
        Self {
            input_pv,
            objective_pv,
            state: Mutex::new(DeviceState {
                channels,
                objective,
                connected: true,
                writes: 0,
            }),
        }
    }

    /// Simulate a dropped connection: every access fails until reconnected.
    pub fn set_connected(&self, connected: bool) {
        self.state.lock().connected = connected;
    }

    /// Number of writes to the input PV so far.
    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }
}

impl ProcessVariableClient for SimulatedPvClient {
    fn get(&self, name: &str) -> PvResult<f64> {
        let state = self.state.lock();
        if !state.connected {
            return Err(PvError::NotConnected {
                name: name.to_string(),
            });
        }
        state
            .channels
            .get(name)
            .copied()
            .ok_or_else(|| PvError::UnknownChannel {
                name: name.to_string(),
            })
    }

    fn put(&self, name: &str, value: f64) -> PvResult<()> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(PvError::NotConnected {
                name: name.to_string(),
            });
        }
        if name == self.input_pv {
            if !value.is_finite() {
                return Err(PvError::WriteFailed {
                    name: name.to_string(),
                    value,
                    message: "input must be finite".to_string(),
                });
            }
            let response = state.objective.sample(value);
            state.channels.insert(self.input_pv.clone(), value);
            state.channels.insert(self.objective_pv.clone(), response);
            state.writes += 1;
            Ok(())
        } else if name == self.objective_pv {
            Err(PvError::WriteFailed {
                name: name.to_string(),
                value,
                message: "objective channel is read-only".to_string(),
            })
        } else {
            Err(PvError::UnknownChannel {
                name: name.to_string(),
            })
        }
    }
}
