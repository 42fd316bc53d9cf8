//! Bounded local minimization.
//!
//! Wraps argmin's L-BFGS with a More–Thuente line search. Box constraints are
//! handled by clamping every trial point into the bounds and projecting the
//! gradient at active bounds, so the solver never evaluates the objective
//! outside the feasible box.

use argmin::core::{CostFunction, Executor, Gradient, State, TerminationReason, TerminationStatus};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use bo_types::{BoError, BoResult};

/// Configuration for the bounded L-BFGS minimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSearchConfig {
    /// Maximum number of solver iterations per run.
    pub max_iter: u64,
    /// Convergence tolerance on the gradient norm.
    pub tol_grad: f64,
    /// Number of corrections kept for the inverse Hessian approximation.
    pub memory: usize,
    /// Relative step of the central-difference gradient.
    pub diff_step: f64,
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol_grad: 1e-6,
            memory: 5,
            diff_step: 1e-7,
        }
    }
}

/// Outcome of one local run.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalMinimum {
    /// Minimizer, always inside the bounds.
    pub params: Vec<f64>,
    pub value: f64,
    pub iterations: u64,
    /// `false` when the run stopped on the iteration cap.
    pub converged: bool,
}

fn clamp_params(params: &[f64], bounds: &[(f64, f64)]) -> Vec<f64> {
    params
        .iter()
        .zip(bounds.iter())
        .map(|(&v, &(lo, hi))| v.clamp(lo, hi))
        .collect()
}

struct ClampedProblem<'a, F> {
    objective: &'a F,
    bounds: &'a [(f64, f64)],
    diff_step: f64,
}

impl<F> CostFunction for ClampedProblem<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> Result<Self::Output, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let value = (self.objective)(&clamped);
        if !value.is_finite() {
            return Err(argmin::core::Error::msg(format!(
                "non-finite objective {value} at {clamped:?}"
            )));
        }
        Ok(value)
    }
}

impl<F> Gradient for ClampedProblem<'_, F>
where
    F: Fn(&[f64]) -> f64,
{
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> Result<Self::Gradient, argmin::core::Error> {
        let clamped = clamp_params(params, self.bounds);
        let mut grad = vec![0.0; clamped.len()];

        for (i, &(lo, hi)) in self.bounds.iter().enumerate() {
            let step = self.diff_step * clamped[i].abs().max(1.0);

            // Central difference, one-sided where a bound cuts the stencil.
            let mut plus = clamped.clone();
            plus[i] = (clamped[i] + step).min(hi);
            let mut minus = clamped.clone();
            minus[i] = (clamped[i] - step).max(lo);

            let span = plus[i] - minus[i];
            if span <= 0.0 {
                continue;
            }
            grad[i] = ((self.objective)(&plus) - (self.objective)(&minus)) / span;
            if !grad[i].is_finite() {
                return Err(argmin::core::Error::msg("non-finite gradient"));
            }

            // Projected gradient: drop components that push out of the box.
            const EPS: f64 = 1e-12;
            if clamped[i] <= lo + EPS && grad[i] > 0.0 {
                grad[i] = 0.0;
            }
            if clamped[i] >= hi - EPS && grad[i] < 0.0 {
                grad[i] = 0.0;
            }
        }

        Ok(grad)
    }
}

/// Bounded L-BFGS minimizer.
#[derive(Debug, Clone, Default)]
pub struct BoundedMinimizer {
    config: LocalSearchConfig,
}

impl BoundedMinimizer {
    pub fn new(config: LocalSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LocalSearchConfig {
        &self.config
    }

    /// Minimize `objective` from `init` within `bounds`.
    ///
    /// Fails when the solver errors out or ends on a non-finite value; callers
    /// treat that as a failed restart rather than a fatal condition.
    pub fn minimize<F>(
        &self,
        objective: &F,
        init: &[f64],
        bounds: &[(f64, f64)],
    ) -> BoResult<LocalMinimum>
    where
        F: Fn(&[f64]) -> f64,
    {
        if init.len() != bounds.len() {
            return Err(BoError::Validation(format!(
                "parameter and bounds length mismatch: {} != {}",
                init.len(),
                bounds.len()
            )));
        }

        let problem = ClampedProblem {
            objective,
            bounds,
            diff_step: self.config.diff_step,
        };

        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, self.config.memory)
            .with_tolerance_grad(self.config.tol_grad)
            .map_err(|e| BoError::Config(format!("invalid local search tolerance: {e}")))?;

        let res = Executor::new(problem, solver)
            .configure(|state| {
                state
                    .param(clamp_params(init, bounds))
                    .max_iters(self.config.max_iter)
            })
            .run()
            .map_err(|e| BoError::Numerical(format!("local search failed: {e}")))?;

        let state = res.state();
        let best = state
            .get_best_param()
            .ok_or_else(|| BoError::Numerical("local search produced no parameters".to_string()))?;
        let params = clamp_params(best, bounds);
        let value = objective(&params);
        if !value.is_finite() || params.iter().any(|p| !p.is_finite()) {
            return Err(BoError::Numerical(format!(
                "local search ended on a non-finite value {value}"
            )));
        }

        let converged = matches!(
            state.get_termination_status(),
            TerminationStatus::Terminated(TerminationReason::SolverConverged)
                | TerminationStatus::Terminated(TerminationReason::TargetCostReached)
        );

        Ok(LocalMinimum {
            params,
            value,
            iterations: state.get_iter(),
            converged,
        })
    }
}
