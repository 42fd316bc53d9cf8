//! The optimization loop: a headless state machine advanced one `step()` at a
//! time by whatever driver owns it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bo_types::{
    BoError, BoResult, Bounds, IntoBoError, IterationSummary, LoopEvent, LoopPhase,
    OptimizationConfig, RunId, Sample, SampleStore, SurrogateSnapshot,
};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::acquisition::Acquisition;
use crate::candidate::{AcquisitionMaximizer, MultiStartMaximizer};
use crate::evaluator::{BoundsProvider, ObjectiveEvaluator};
use crate::sampling::{self, EvaluationGrid};
use crate::sink::PresentationSink;
use crate::surrogate::{FittedSurrogate, GaussianProcess};

/// Everything that belongs to one run. Dropped (replaced) on the next `start`.
#[derive(Debug, Clone)]
pub struct RunState {
    pub id: RunId,
    pub config: OptimizationConfig,
    pub bounds: Bounds,
    pub samples: SampleStore,
    pub grid: EvaluationGrid,
    /// Completed Bayesian iterations (the initial design is iteration 0).
    pub iteration: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl RunState {
    fn new(config: OptimizationConfig, bounds: Bounds) -> Self {
        let grid = EvaluationGrid::new(bounds, config.grid_size);
        Self {
            id: Uuid::new_v4(),
            config,
            bounds,
            samples: SampleStore::new(),
            grid,
            iteration: 0,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn remaining_iterations(&self) -> usize {
        self.config.n_iterations.saturating_sub(self.iteration)
    }
}

/// Cloneable flag that stops the current run from any thread.
///
/// An evaluation already in flight finishes, but its result is discarded.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Result of a successful `step()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// One more sample was taken; carries the iteration just completed.
    Advanced { iteration: usize },
    /// The iteration budget was already spent; the run is now finished.
    Converged,
    /// An abort request landed during this step; nothing was appended.
    Aborted,
}

/// Sequential single-variable Bayesian optimizer.
///
/// `E` is the objective, `F` the fallback used when the objective fails and
/// `S` receives every [`LoopEvent`].
pub struct OptimizationLoop<E, F, S> {
    evaluator: E,
    fallback: F,
    sink: S,
    surrogate_model: GaussianProcess,
    custom_maximizer: Option<Box<dyn AcquisitionMaximizer>>,
    default_maximizer: MultiStartMaximizer,
    phase: LoopPhase,
    state: Option<RunState>,
    last_summary: Option<IterationSummary>,
    abort: AbortHandle,
    rng: StdRng,
}

impl<E, F, S> OptimizationLoop<E, F, S>
where
    E: ObjectiveEvaluator,
    F: ObjectiveEvaluator,
    S: PresentationSink,
{
    pub fn new(evaluator: E, fallback: F, sink: S) -> Self {
        Self {
            evaluator,
            fallback,
            sink,
            surrogate_model: GaussianProcess::default(),
            custom_maximizer: None,
            default_maximizer: MultiStartMaximizer::default(),
            phase: LoopPhase::Idle,
            state: None,
            last_summary: None,
            abort: AbortHandle::default(),
            rng: StdRng::seed_from_u64(0),
        }
    }

    pub fn with_surrogate(mut self, surrogate_model: GaussianProcess) -> Self {
        self.surrogate_model = surrogate_model;
        self
    }

    /// Replace the multi-start maximizer. When set, `restart_count` from the
    /// run configuration is ignored.
    pub fn with_maximizer(mut self, maximizer: Box<dyn AcquisitionMaximizer>) -> Self {
        self.custom_maximizer = Some(maximizer);
        self
    }

    /// Current phase. A pending abort request on an active run reads as
    /// [`LoopPhase::Aborted`].
    pub fn phase(&self) -> LoopPhase {
        if self.phase.is_active() && self.abort.is_aborted() {
            LoopPhase::Aborted
        } else {
            self.phase
        }
    }

    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    pub fn run_id(&self) -> Option<RunId> {
        self.state.as_ref().map(|s| s.id)
    }

    /// Summary of the most recent `start` or `step`.
    pub fn last_summary(&self) -> Option<&IterationSummary> {
        self.last_summary.as_ref()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn into_parts(self) -> (E, F, S) {
        (self.evaluator, self.fallback, self.sink)
    }

    /// Begin a fresh run: evaluate the initial design, fit and emit the
    /// iteration-0 summary.
    ///
    /// Configuration errors are returned before the evaluator is touched. If
    /// an initial point cannot be evaluated even by the fallback the run is
    /// discarded and the loop returns to `Idle`.
    pub fn start(
        &mut self,
        config: OptimizationConfig,
        bounds_provider: &dyn BoundsProvider,
    ) -> BoResult<RunId> {
        if self.phase.is_active() && self.abort.is_aborted() {
            self.finish_aborted();
        }
        if self.phase.is_active() {
            return Err(self.invalid_state("start"));
        }
        config.validate()?;

        let bounds = resolve_bounds(&config, bounds_provider);
        self.rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        self.default_maximizer = MultiStartMaximizer::new(config.restart_count);
        // Handles from a run that was aborted must not reach this one.
        if self.abort.is_aborted() {
            self.abort = AbortHandle::default();
        }

        let state = RunState::new(config, bounds);
        let run_id = state.id;
        info!(
            %run_id,
            name = %state.config.name,
            %bounds,
            acquisition = %state.config.acquisition,
            n_iterations = state.config.n_iterations,
            "Starting optimization run"
        );
        self.sink.emit(LoopEvent::Started {
            run_id,
            bounds,
            config: state.config.clone(),
        });
        let design_size = state.config.initial_sample_count;
        self.state = Some(state);
        self.last_summary = None;
        self.phase = LoopPhase::Initializing;

        let design = sampling::latin_hypercube(design_size, bounds, &mut self.rng);
        for x in design {
            let y = match self.evaluate_with_fallback(x) {
                Ok(y) => y,
                Err(e) => {
                    warn!(%run_id, x, error = %e, "initial design evaluation failed, run discarded");
                    self.phase = LoopPhase::Idle;
                    self.state = None;
                    return Err(e);
                }
            };
            if self.abort.is_aborted() {
                self.finish_aborted();
                return Ok(run_id);
            }
            self.state_mut()?.samples.push(Sample::new(x, y));
        }

        let summary = match self
            .fit_current()
            .and_then(|(surrogate, acquisition, best_y)| {
                self.summarize(&surrogate, &acquisition, best_y, None)
            }) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(%run_id, error = %e, "initial fit failed, run discarded");
                self.phase = LoopPhase::Idle;
                self.state = None;
                return Err(e);
            }
        };
        info!(
            %run_id,
            samples = summary.sample_count,
            best_x = summary.best_observed.x,
            best_y = summary.best_observed.y,
            "Initial design evaluated"
        );
        self.publish(summary);
        self.phase = LoopPhase::Iterating;
        Ok(run_id)
    }

    /// Advance the run by one iteration.
    ///
    /// Only valid while `Iterating`; any other phase yields
    /// [`BoError::InvalidState`] and leaves the loop untouched. A recoverable
    /// error (evaluation or numerics) leaves the loop `Iterating` with nothing
    /// appended, so the next call retries.
    pub fn step(&mut self) -> BoResult<StepOutcome> {
        if self.phase.is_active() && self.abort.is_aborted() {
            self.finish_aborted();
        }
        if self.phase != LoopPhase::Iterating {
            return Err(self.invalid_state("step"));
        }

        let (run_id, bounds, remaining) = {
            let state = self.state_ref()?;
            (state.id, state.bounds, state.remaining_iterations())
        };
        if remaining == 0 {
            return self.finish_converged();
        }

        let (surrogate, acquisition, best_y) = self.fit_current()?;
        let objective = |x: f64| acquisition.score_one(x, &surrogate, best_y);
        let maximizer: &dyn AcquisitionMaximizer = match &self.custom_maximizer {
            Some(custom) => custom.as_ref(),
            None => &self.default_maximizer,
        };
        let candidate = maximizer.maximize(&objective, bounds, &mut self.rng);
        let x = bounds.clamp(candidate.x);
        debug!(
            %run_id,
            x,
            acquisition = candidate.value,
            maximizer = maximizer.name(),
            "candidate proposed"
        );

        let y = self.evaluate_with_fallback(x)?;
        if self.abort.is_aborted() {
            debug!(%run_id, x, y, "abort requested during evaluation, result discarded");
            self.finish_aborted();
            return Ok(StepOutcome::Aborted);
        }

        let proposal = Sample::new(x, y);
        let iteration = {
            let state = self.state_mut()?;
            state.samples.push(proposal);
            state.iteration += 1;
            state.iteration
        };

        let summary = self.summarize(&surrogate, &acquisition, best_y, Some(proposal))?;
        info!(
            %run_id,
            iteration,
            x,
            y,
            best_x = summary.best_observed.x,
            best_y = summary.best_observed.y,
            predicted_x = summary.best_predicted.x,
            "Completed iteration {}",
            iteration
        );
        self.publish(summary);
        Ok(StepOutcome::Advanced { iteration })
    }

    /// Stop the active run immediately.
    pub fn abort(&mut self) -> BoResult<()> {
        if !self.phase.is_active() {
            return Err(self.invalid_state("abort"));
        }
        self.abort.abort();
        self.finish_aborted();
        Ok(())
    }

    fn state_ref(&self) -> BoResult<&RunState> {
        self.state
            .as_ref()
            .ok_or_else(|| "no run state".into_bo_error())
    }

    fn state_mut(&mut self) -> BoResult<&mut RunState> {
        self.state
            .as_mut()
            .ok_or_else(|| "no run state".into_bo_error())
    }

    fn invalid_state(&self, operation: &str) -> BoError {
        BoError::InvalidState {
            operation: operation.to_string(),
            phase: self.phase(),
        }
    }

    fn fit_current(&self) -> BoResult<(FittedSurrogate, Acquisition, f64)> {
        let state = self.state_ref()?;
        let surrogate = self.surrogate_model.fit(&state.samples)?;
        let best_y = state
            .samples
            .best()
            .map(|s| s.y)
            .ok_or_else(|| "fitted an empty sample store".into_bo_error())?;
        let acquisition =
            Acquisition::new(state.config.acquisition, state.config.exploration_param);
        Ok((surrogate, acquisition, best_y))
    }

    /// Primary evaluator, then the fallback. Non-finite readings count as
    /// failures for both.
    fn evaluate_with_fallback(&mut self, x: f64) -> BoResult<f64> {
        let primary = self.evaluator.evaluate(x).and_then(|y| finite(x, y));
        let reason = match primary {
            Ok(y) => return Ok(y),
            Err(e) => e,
        };

        let run_id = self.state_ref()?.id;
        warn!(%run_id, x, error = %reason, "Objective evaluation failed, using fallback");
        let y = self
            .fallback
            .evaluate(x)
            .and_then(|y| finite(x, y))
            .map_err(BoError::Evaluation)?;
        self.sink.emit(LoopEvent::EvaluationFallback {
            run_id,
            sample: Sample::new(x, y),
            reason: reason.to_string(),
        });
        Ok(y)
    }

    fn summarize(
        &self,
        surrogate: &FittedSurrogate,
        acquisition: &Acquisition,
        best_y: f64,
        proposal: Option<Sample>,
    ) -> BoResult<IterationSummary> {
        let state = self.state_ref()?;
        let grid = state.grid.points();
        let prediction = surrogate.predict(grid);
        let scores: Vec<f64> = prediction
            .mean
            .iter()
            .zip(prediction.std.iter())
            .map(|(&m, &s)| acquisition.score_moments(m, s, best_y))
            .collect();

        let best_predicted = argmax(grid, &prediction.mean)
            .ok_or_else(|| "empty evaluation grid".into_bo_error())?;
        let best_observed = state
            .samples
            .best()
            .ok_or_else(|| "no observations to summarize".into_bo_error())?;

        Ok(IterationSummary {
            run_id: state.id,
            iteration: state.iteration,
            proposal,
            best_observed,
            best_predicted,
            sample_count: state.samples.len(),
            samples: state.samples.clone(),
            snapshot: SurrogateSnapshot {
                grid: grid.to_vec(),
                mean: prediction.mean,
                std: prediction.std,
                acquisition: scores,
                acquisition_label: acquisition.label(),
            },
            timestamp: Utc::now(),
        })
    }

    fn publish(&mut self, summary: IterationSummary) {
        self.sink.emit(LoopEvent::Summary(summary.clone()));
        self.last_summary = Some(summary);
    }

    fn finish_converged(&mut self) -> BoResult<StepOutcome> {
        let summary = self
            .last_summary
            .clone()
            .ok_or_else(|| "converged without a summary".into_bo_error())?;
        let state = self.state_mut()?;
        state.finished_at = Some(Utc::now());
        let run_id = state.id;
        self.phase = LoopPhase::Converged;
        info!(
            %run_id,
            best_x = summary.best_observed.x,
            best_y = summary.best_observed.y,
            "Optimization complete"
        );
        self.sink.emit(LoopEvent::Converged(summary));
        Ok(StepOutcome::Converged)
    }

    fn finish_aborted(&mut self) {
        self.phase = LoopPhase::Aborted;
        let Some(state) = self.state.as_mut() else {
            return;
        };
        state.finished_at = Some(Utc::now());
        let run_id = state.id;
        let iterations_completed = state.iteration;
        info!(%run_id, iterations_completed, "Optimization aborted");
        self.sink.emit(LoopEvent::Aborted {
            run_id,
            iterations_completed,
        });
    }
}

fn finite(x: f64, y: f64) -> Result<f64, bo_types::EvaluationError> {
    if y.is_finite() {
        Ok(y)
    } else {
        Err(bo_types::EvaluationError::NonFinite { x, value: y })
    }
}

/// Config bounds win over the provider; an unusable interval becomes the
/// default one.
fn resolve_bounds(config: &OptimizationConfig, provider: &dyn BoundsProvider) -> Bounds {
    match config.bounds {
        Some((min, max)) => Bounds::new(min, max).unwrap_or_else(|e| {
            warn!(min, max, error = %e, "invalid configured bounds, using default {}", Bounds::DEFAULT);
            Bounds::DEFAULT
        }),
        None => provider.bounds(),
    }
}

/// Grid point with the largest value; the first one wins ties.
fn argmax(grid: &[f64], values: &[f64]) -> Option<Sample> {
    let mut best: Option<Sample> = None;
    for (&x, &v) in grid.iter().zip(values.iter()) {
        match best {
            Some(current) if v <= current.y => {}
            _ => best = Some(Sample::new(x, v)),
        }
    }
    best
}
