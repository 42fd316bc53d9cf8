//! Process-variable abstraction for driving a real (or simulated) device.
//!
//! The optimizer writes the candidate input to one PV, waits for the machine
//! to settle, then reads the objective from another PV.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bo_optimizer::{BoundsProvider, ObjectiveEvaluator};
use bo_types::{Bounds, EvaluationError};
use tracing::{debug, warn};

/// Errors surfaced by process-variable access.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PvError {
    #[error("not connected to {name}")]
    NotConnected { name: String },
    #[error("unknown process variable: {name}")]
    UnknownChannel { name: String },
    #[error("failed to read {name}: {message}")]
    ReadFailed { name: String, message: String },
    #[error("failed to write {value} to {name}: {message}")]
    WriteFailed {
        name: String,
        value: f64,
        message: String,
    },
}

/// Result alias for process-variable operations.
pub type PvResult<T> = Result<T, PvError>;

/// Channel-access style client. Implementations synchronize internally so a
/// single client can be shared between the evaluator and a bounds provider.
pub trait ProcessVariableClient: Send + Sync {
    /// Latest value of `name`.
    fn get(&self, name: &str) -> PvResult<f64>;

    /// Request `name` to take `value`.
    fn put(&self, name: &str, value: f64) -> PvResult<()>;
}

impl<T: ProcessVariableClient + ?Sized> ProcessVariableClient for Arc<T> {
    fn get(&self, name: &str) -> PvResult<f64> {
        (**self).get(name)
    }

    fn put(&self, name: &str, value: f64) -> PvResult<()> {
        (**self).put(name, value)
    }
}

/// Pause between objective reads while a read timeout is running.
pub const READ_RETRY_INTERVAL: Duration = Duration::from_millis(50);

/// Evaluates the objective on the device: put `x`, wait, read.
///
/// With a non-zero read timeout a failed objective read is retried every
/// [`READ_RETRY_INTERVAL`] until the timeout elapses, which then surfaces as
/// [`EvaluationError::Timeout`]. With a zero timeout the first failed read
/// is reported as [`EvaluationError::NoReading`].
pub struct PvEvaluator<C> {
    client: C,
    input_pv: String,
    objective_pv: String,
    wait_time: Duration,
    read_timeout: Duration,
}

impl<C: ProcessVariableClient> PvEvaluator<C> {
    pub fn new(
        client: C,
        input_pv: impl Into<String>,
        objective_pv: impl Into<String>,
        wait_time: Duration,
    ) -> Self {
        Self {
            client,
            input_pv: input_pv.into(),
            objective_pv: objective_pv.into(),
            wait_time,
            read_timeout: Duration::ZERO,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    fn read_objective(&self, x: f64) -> Result<f64, EvaluationError> {
        // No deadline if the timeout does not fit an Instant.
        let deadline = Instant::now().checked_add(self.read_timeout);
        loop {
            let e = match self.client.get(&self.objective_pv) {
                Ok(y) => return Ok(y),
                Err(e) => e,
            };
            if self.read_timeout.is_zero() {
                debug!(pv = %self.objective_pv, error = %e, "objective read failed");
                return Err(EvaluationError::NoReading {
                    x,
                    source_name: self.objective_pv.clone(),
                });
            }

            let pause = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => READ_RETRY_INTERVAL,
            };
            if pause.is_zero() {
                let timeout_ms = u64::try_from(self.read_timeout.as_millis()).unwrap_or(u64::MAX);
                warn!(pv = %self.objective_pv, timeout_ms, error = %e, "objective read timed out");
                return Err(EvaluationError::Timeout { x, timeout_ms });
            }
            debug!(pv = %self.objective_pv, error = %e, "objective read failed, retrying");
            std::thread::sleep(pause.min(READ_RETRY_INTERVAL));
        }
    }
}

impl<C: ProcessVariableClient> ObjectiveEvaluator for PvEvaluator<C> {
    fn evaluate(&mut self, x: f64) -> Result<f64, EvaluationError> {
        self.client
            .put(&self.input_pv, x)
            .map_err(|e| EvaluationError::Failed {
                x,
                message: e.to_string(),
            })?;

        if !self.wait_time.is_zero() {
            std::thread::sleep(self.wait_time);
        }

        let y = self.read_objective(x)?;
        if !y.is_finite() {
            return Err(EvaluationError::NonFinite { x, value: y });
        }
        debug!(input = %self.input_pv, x, y, "device evaluated");
        Ok(y)
    }
}

/// Default half-range for [`LiveBounds`], in percent of the current setting.
pub const DEFAULT_RANGE_PERCENTAGE: f64 = 7.0;

/// Bounds around the input PV's current setting, `value · (1 ∓ p/100)`.
/// Falls back to the default interval when the PV cannot be read or the
/// resulting interval is invalid.
pub struct LiveBounds<C> {
    client: C,
    input_pv: String,
    range_percentage: f64,
}

impl<C: ProcessVariableClient> LiveBounds<C> {
    pub fn new(client: C, input_pv: impl Into<String>, range_percentage: f64) -> Self {
        Self {
            client,
            input_pv: input_pv.into(),
            range_percentage,
        }
    }
}

impl<C: ProcessVariableClient> BoundsProvider for LiveBounds<C> {
    fn bounds(&self) -> Bounds {
        let current = match self.client.get(&self.input_pv) {
            Ok(value) => value,
            Err(e) => {
                warn!(pv = %self.input_pv, error = %e, "cannot read input PV, using default bounds");
                return Bounds::DEFAULT;
            }
        };
        match Bounds::around_value(current, self.range_percentage) {
            Ok(bounds) => bounds,
            Err(e) => {
                warn!(
                    pv = %self.input_pv,
                    current,
                    range_percentage = self.range_percentage,
                    error = %e,
                    "invalid live bounds, using default"
                );
                Bounds::DEFAULT
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Echo device: the objective PV reads back whatever `respond` computes
    /// from the last input write.
    struct EchoClient {
        values: Mutex<HashMap<String, f64>>,
        respond: fn(f64) -> f64,
        fail_reads: bool,
    }

    impl EchoClient {
        fn new(respond: fn(f64) -> f64) -> Self {
            let mut values = HashMap::new();
            values.insert("IN".to_string(), 5.0);
            Self {
                values: Mutex::new(values),
                respond,
                fail_reads: false,
            }
        }
    }

    impl ProcessVariableClient for EchoClient {
        fn get(&self, name: &str) -> PvResult<f64> {
            if self.fail_reads {
                return Err(PvError::NotConnected {
                    name: name.to_string(),
                });
            }
            self.values
                .lock()
                .get(name)
                .copied()
                .ok_or_else(|| PvError::UnknownChannel {
                    name: name.to_string(),
                })
        }

        fn put(&self, name: &str, value: f64) -> PvResult<()> {
            let mut values = self.values.lock();
            values.insert(name.to_string(), value);
            values.insert("OUT".to_string(), (self.respond)(value));
            Ok(())
        }
    }

    #[test]
    fn evaluator_writes_then_reads() {
        let client = Arc::new(EchoClient::new(|x| 2.0 * x));
        let mut eval = PvEvaluator::new(client.clone(), "IN", "OUT", Duration::ZERO);
        assert_eq!(eval.evaluate(3.0), Ok(6.0));
        assert_eq!(client.get("IN"), Ok(3.0));
    }

    #[test]
    fn nan_reading_is_an_evaluation_error() {
        let mut eval = PvEvaluator::new(EchoClient::new(|_| f64::NAN), "IN", "OUT", Duration::ZERO);
        assert!(matches!(
            eval.evaluate(1.0),
            Err(EvaluationError::NonFinite { x, .. }) if x == 1.0
        ));
    }

    #[test]
    fn missing_reading_is_an_evaluation_error() {
        let mut eval = PvEvaluator::new(EchoClient::new(|x| x), "IN", "MISSING", Duration::ZERO);
        assert_eq!(
            eval.evaluate(1.0),
            Err(EvaluationError::NoReading {
                x: 1.0,
                source_name: "MISSING".to_string()
            })
        );
    }

    /// Objective reads fail until `failures` runs out.
    struct SlowReadout {
        failures: Mutex<usize>,
    }

    impl ProcessVariableClient for SlowReadout {
        fn get(&self, name: &str) -> PvResult<f64> {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(PvError::ReadFailed {
                    name: name.to_string(),
                    message: "no monitor update yet".to_string(),
                });
            }
            Ok(1.5)
        }

        fn put(&self, _name: &str, _value: f64) -> PvResult<()> {
            Ok(())
        }
    }

    #[test]
    fn read_timeout_retries_until_a_reading_arrives() {
        let client = SlowReadout {
            failures: Mutex::new(2),
        };
        let mut eval = PvEvaluator::new(client, "IN", "OUT", Duration::ZERO)
            .with_read_timeout(Duration::from_secs(5));
        assert_eq!(eval.evaluate(0.5), Ok(1.5));
        assert_eq!(*eval.client().failures.lock(), 0);
    }

    #[test]
    fn exhausted_read_timeout_is_a_timeout_error() {
        let mut offline = EchoClient::new(|x| x);
        offline.fail_reads = true;
        let mut eval = PvEvaluator::new(offline, "IN", "OUT", Duration::ZERO)
            .with_read_timeout(Duration::from_millis(20));
        assert_eq!(
            eval.evaluate(2.0),
            Err(EvaluationError::Timeout {
                x: 2.0,
                timeout_ms: 20
            })
        );
    }

    #[test]
    fn live_bounds_around_current_setting() {
        let bounds = LiveBounds::new(EchoClient::new(|x| x), "IN", 7.0).bounds();
        assert!((bounds.min() - 4.65).abs() < 1e-12);
        assert!((bounds.max() - 5.35).abs() < 1e-12);
    }

    #[test]
    fn live_bounds_fall_back_to_default() {
        let mut offline = EchoClient::new(|x| x);
        offline.fail_reads = true;
        assert_eq!(LiveBounds::new(offline, "IN", 7.0).bounds(), Bounds::DEFAULT);

        // A zero setting collapses the interval.
        let zero = EchoClient::new(|x| x);
        zero.put("IN", 0.0).unwrap();
        assert_eq!(LiveBounds::new(zero, "IN", 7.0).bounds(), Bounds::DEFAULT);

        // Negative settings invert it.
        let negative = EchoClient::new(|x| x);
        negative.put("IN", -3.0).unwrap();
        assert_eq!(
            LiveBounds::new(negative, "IN", 7.0).bounds(),
            Bounds::DEFAULT
        );
    }
}
