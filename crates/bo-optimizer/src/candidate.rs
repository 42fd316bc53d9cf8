//! Acquisition maximization over the search interval.

use bo_types::Bounds;
use rand::RngCore;
use tracing::{debug, warn};

use crate::local::{BoundedMinimizer, LocalSearchConfig};
use crate::sampling;

/// Default number of random starts for the multi-start search.
pub const DEFAULT_RESTARTS: usize = 25;

/// Best point found by a maximizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: f64,
    pub value: f64,
}

/// Finds the input that maximizes a scalar objective inside `bounds`.
///
/// Implementations are stateless between calls; all randomness comes from
/// the supplied generator. They always return a candidate.
pub trait AcquisitionMaximizer: Send + Sync {
    fn maximize(
        &self,
        objective: &dyn Fn(f64) -> f64,
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Candidate;

    /// Human-readable backend name.
    fn name(&self) -> &str;
}

/// Keep `incumbent` unless `challenger` is strictly better.
fn keep_best(incumbent: Option<Candidate>, challenger: Candidate) -> Option<Candidate> {
    match incumbent {
        Some(best) if challenger.value <= best.value => Some(best),
        _ => Some(challenger),
    }
}

/// Best of a set of points evaluated directly. Non-finite scores lose to any
/// finite one; if nothing is finite the first point is returned.
fn best_of_points(objective: &dyn Fn(f64) -> f64, points: &[f64], bounds: Bounds) -> Candidate {
    let mut best: Option<Candidate> = None;
    for &x in points {
        let value = objective(x);
        if value.is_finite() {
            best = keep_best(best, Candidate { x, value });
        }
    }
    best.unwrap_or_else(|| {
        let x = points.first().copied().unwrap_or_else(|| bounds.lerp(0.5));
        Candidate {
            x,
            value: objective(x),
        }
    })
}

/// Multi-start bounded L-BFGS.
///
/// Draws `restarts` uniform start points, runs a local minimizer on the
/// negated objective from each and keeps the best result. Only a strictly
/// better value replaces the incumbent, so the first optimum found wins ties.
/// If every local run fails the best raw start point is returned.
#[derive(Debug, Clone)]
pub struct MultiStartMaximizer {
    restarts: usize,
    minimizer: BoundedMinimizer,
}

impl MultiStartMaximizer {
    pub fn new(restarts: usize) -> Self {
        Self::with_local_search(restarts, LocalSearchConfig::default())
    }

    pub fn with_local_search(restarts: usize, config: LocalSearchConfig) -> Self {
        Self {
            restarts: restarts.max(1),
            minimizer: BoundedMinimizer::new(config),
        }
    }

    pub fn restarts(&self) -> usize {
        self.restarts
    }
}

impl Default for MultiStartMaximizer {
    fn default() -> Self {
        Self::new(DEFAULT_RESTARTS)
    }
}

impl AcquisitionMaximizer for MultiStartMaximizer {
    fn maximize(
        &self,
        objective: &dyn Fn(f64) -> f64,
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Candidate {
        let starts = sampling::uniform(self.restarts, bounds, rng);
        let negated = |p: &[f64]| -objective(p[0]);
        let box_bounds = [(bounds.min(), bounds.max())];

        let mut best: Option<Candidate> = None;
        let mut failures = 0usize;
        for &start in &starts {
            match self.minimizer.minimize(&negated, &[start], &box_bounds) {
                Ok(local) => {
                    best = keep_best(
                        best,
                        Candidate {
                            x: local.params[0],
                            value: -local.value,
                        },
                    );
                }
                Err(e) => {
                    failures += 1;
                    debug!(start, error = %e, "local acquisition search failed");
                }
            }
        }

        match best {
            Some(candidate) => candidate,
            None => {
                warn!(
                    restarts = self.restarts,
                    failures, "all local searches failed, using best random start"
                );
                best_of_points(objective, &starts, bounds)
            }
        }
    }

    fn name(&self) -> &str {
        "multi-start-lbfgs"
    }
}

/// Gradient-free backend: scores `samples` uniform random points and keeps the
/// best one.
#[derive(Debug, Clone)]
pub struct RandomSamplingMaximizer {
    samples: usize,
}

impl RandomSamplingMaximizer {
    pub fn new(samples: usize) -> Self {
        Self {
            samples: samples.max(1),
        }
    }
}

impl Default for RandomSamplingMaximizer {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl AcquisitionMaximizer for RandomSamplingMaximizer {
    fn maximize(
        &self,
        objective: &dyn Fn(f64) -> f64,
        bounds: Bounds,
        rng: &mut dyn RngCore,
    ) -> Candidate {
        let points = sampling::uniform(self.samples, bounds, rng);
        best_of_points(objective, &points, bounds)
    }

    fn name(&self) -> &str {
        "random-sampling"
    }
}
