//! # bo-optimizer
//!
//! Single-variable Bayesian optimization for bocorr.
//!
//! A Gaussian process surrogate is refitted after every observation, an
//! acquisition function (EI or UCB) is maximized over the search interval and
//! the winning point is evaluated next. [`OptimizationLoop`] owns the run and
//! is advanced one [`OptimizationLoop::step`] at a time by an external driver.

mod acquisition;
mod candidate;
mod engine;
mod evaluator;
mod local;
mod sampling;
mod sink;
mod surrogate;

pub use acquisition::{expected_improvement, upper_confidence_bound, Acquisition};
pub use candidate::{
    AcquisitionMaximizer, Candidate, MultiStartMaximizer, RandomSamplingMaximizer,
    DEFAULT_RESTARTS,
};
pub use engine::{AbortHandle, OptimizationLoop, RunState, StepOutcome};
pub use evaluator::{
    BoundsProvider, CenteredBounds, DefaultBounds, FnObjective, ObjectiveEvaluator, StaticBounds,
};
pub use local::{BoundedMinimizer, LocalMinimum, LocalSearchConfig};
pub use sampling::{latin_hypercube, linspace, uniform, EvaluationGrid};
pub use sink::{NullSink, PresentationSink, TracingSink};
pub use surrogate::{
    FittedSurrogate, GaussianProcess, KernelParams, Prediction, SurrogateOptions,
};
