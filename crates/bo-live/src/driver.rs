//! Async tick driver: calls `step()` once per interval until the run ends,
//! too many steps fail in a row, or shutdown is requested.

use std::future::Future;
use std::time::Duration;

use bo_optimizer::{ObjectiveEvaluator, OptimizationLoop, PresentationSink, StepOutcome};
use bo_types::{BoResult, LoopPhase};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub tick: Duration,
    pub max_consecutive_failures: usize,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(1000),
            max_consecutive_failures: 3,
        }
    }
}

/// Why the driver returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriverExit {
    Converged,
    /// The loop was aborted from elsewhere (e.g. an `AbortHandle`).
    Aborted,
    /// The shutdown future resolved; the loop was aborted.
    Shutdown,
    /// `max_consecutive_failures` steps failed in a row; the loop was aborted.
    TooManyFailures { failures: usize },
}

/// Drive a started loop to completion.
///
/// Each tick runs one blocking `step()` on the current worker thread via
/// `block_in_place`, so this needs the multi-threaded runtime. Recoverable
/// step errors are retried on the next tick; any other error is returned.
pub async fn run<E, F, S, Sd>(
    bo: &mut OptimizationLoop<E, F, S>,
    config: DriverConfig,
    shutdown: Sd,
) -> BoResult<DriverExit>
where
    E: ObjectiveEvaluator,
    F: ObjectiveEvaluator,
    S: PresentationSink,
    Sd: Future<Output = ()>,
{
    let mut ticker = tokio::time::interval(config.tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::pin!(shutdown);

    let mut failures = 0usize;
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested, aborting run");
                if bo.phase().is_active() {
                    bo.abort()?;
                }
                return Ok(DriverExit::Shutdown);
            }
            _ = ticker.tick() => {}
        }

        let result = tokio::task::block_in_place(|| bo.step());
        match result {
            Ok(StepOutcome::Advanced { iteration }) => {
                failures = 0;
                debug!(iteration, "tick completed");
            }
            Ok(StepOutcome::Converged) => return Ok(DriverExit::Converged),
            Ok(StepOutcome::Aborted) => return Ok(DriverExit::Aborted),
            Err(e) if e.is_recoverable() => {
                failures += 1;
                warn!(
                    failures,
                    max = config.max_consecutive_failures,
                    error = %e,
                    "step failed, retrying next tick"
                );
                if failures >= config.max_consecutive_failures {
                    warn!(failures, "too many consecutive failures, aborting run");
                    bo.abort()?;
                    return Ok(DriverExit::TooManyFailures { failures });
                }
            }
            Err(_) if bo.phase() == LoopPhase::Aborted => return Ok(DriverExit::Aborted),
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bo_optimizer::{DefaultBounds, FnObjective};
    use bo_types::{EvaluationError, LoopEvent, OptimizationConfig};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    fn quick() -> DriverConfig {
        DriverConfig {
            tick: Duration::from_millis(1),
            max_consecutive_failures: 3,
        }
    }

    fn config(iterations: usize) -> OptimizationConfig {
        OptimizationConfig::new("driver")
            .with_iterations(iterations)
            .with_grid_size(100)
            .with_restarts(5)
            .with_seed(4)
    }

    fn parabola(x: f64) -> f64 {
        -(x - 2.0).powi(2)
    }

    struct Flaky(Arc<AtomicBool>);

    impl ObjectiveEvaluator for Flaky {
        fn evaluate(&mut self, x: f64) -> Result<f64, EvaluationError> {
            if self.0.load(Ordering::SeqCst) {
                Err(EvaluationError::Timeout { x, timeout_ms: 10 })
            } else {
                Ok(parabola(x))
            }
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn drives_to_convergence() {
        let mut bo = OptimizationLoop::new(
            FnObjective(parabola as fn(f64) -> f64),
            FnObjective(parabola as fn(f64) -> f64),
            Vec::new(),
        );
        bo.start(config(3), &DefaultBounds).unwrap();

        let exit = run(&mut bo, quick(), std::future::pending()).await.unwrap();
        assert_eq!(exit, DriverExit::Converged);
        assert_eq!(bo.phase(), LoopPhase::Converged);
        assert_eq!(bo.state().unwrap().samples.len(), 8);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_aborts_the_run() {
        let mut bo = OptimizationLoop::new(
            FnObjective(parabola as fn(f64) -> f64),
            FnObjective(parabola as fn(f64) -> f64),
            Vec::new(),
        );
        bo.start(config(1000), &DefaultBounds).unwrap();

        let driver = DriverConfig {
            tick: Duration::from_secs(3600),
            ..quick()
        };
        let shutdown = tokio::time::sleep(Duration::from_millis(20));
        let exit = run(&mut bo, driver, shutdown).await.unwrap();
        assert_eq!(exit, DriverExit::Shutdown);
        assert_eq!(bo.phase(), LoopPhase::Aborted);
        assert!(matches!(bo.sink().last(), Some(LoopEvent::Aborted { .. })));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stops_after_consecutive_failures() {
        let broken = Arc::new(AtomicBool::new(false));
        let mut bo = OptimizationLoop::new(
            Flaky(broken.clone()),
            Flaky(broken.clone()),
            Vec::new(),
        );
        bo.start(config(10), &DefaultBounds).unwrap();
        broken.store(true, Ordering::SeqCst);

        let exit = run(&mut bo, quick(), std::future::pending()).await.unwrap();
        assert_eq!(exit, DriverExit::TooManyFailures { failures: 3 });
        assert_eq!(bo.phase(), LoopPhase::Aborted);
        assert_eq!(bo.state().unwrap().samples.len(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn external_abort_handle_is_honoured() {
        let mut bo = OptimizationLoop::new(
            FnObjective(parabola as fn(f64) -> f64),
            FnObjective(parabola as fn(f64) -> f64),
            Vec::new(),
        );
        bo.start(config(1000), &DefaultBounds).unwrap();
        bo.abort_handle().abort();

        let exit = run(&mut bo, quick(), std::future::pending()).await.unwrap();
        assert_eq!(exit, DriverExit::Aborted);
    }
}
