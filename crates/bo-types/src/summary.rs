use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bounds::Bounds;
use crate::config::OptimizationConfig;
use crate::run::RunId;
use crate::samples::{Sample, SampleStore};

/// Surrogate evaluated on the evaluation grid, for plotting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateSnapshot {
    pub grid: Vec<f64>,
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub acquisition: Vec<f64>,
    /// e.g. "EI (xi=0.0100)"
    pub acquisition_label: String,
}

/// What one call to `start` or `step` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationSummary {
    pub run_id: RunId,
    /// 0 for the initial design, then 1..=n_iterations.
    pub iteration: usize,
    /// The point chosen and observed this iteration; `None` for the initial design.
    pub proposal: Option<Sample>,
    pub best_observed: Sample,
    /// Argmax of the surrogate mean over the evaluation grid.
    pub best_predicted: Sample,
    pub sample_count: usize,
    /// Every observation so far, including this iteration's proposal.
    pub samples: SampleStore,
    pub snapshot: SurrogateSnapshot,
    pub timestamp: DateTime<Utc>,
}

impl IterationSummary {
    pub fn proposed_x(&self) -> Option<f64> {
        self.proposal.map(|s| s.x)
    }

    pub fn observed_y(&self) -> Option<f64> {
        self.proposal.map(|s| s.y)
    }
}

/// Events emitted by the optimization loop for external consumption
/// (rendering, logging, status lines).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LoopEvent {
    Started {
        run_id: RunId,
        bounds: Bounds,
        config: OptimizationConfig,
    },
    Summary(IterationSummary),
    /// The primary evaluator failed and the fallback produced `sample`.
    EvaluationFallback {
        run_id: RunId,
        sample: Sample,
        reason: String,
    },
    /// The iteration budget is spent; carries the final summary.
    Converged(IterationSummary),
    Aborted {
        run_id: RunId,
        iterations_completed: usize,
    },
}

impl LoopEvent {
    /// Short operator-facing status line.
    pub fn status_message(&self) -> String {
        match self {
            Self::Started { .. } => "Starting optimization...".to_string(),
            Self::Summary(summary) if summary.iteration == 0 => {
                format!("Initial design evaluated ({} samples)", summary.sample_count)
            }
            Self::Summary(summary) => format!("Completed iteration {}", summary.iteration),
            Self::EvaluationFallback { reason, .. } => {
                format!("Warning: evaluation failed, using fallback ({reason})")
            }
            Self::Converged(_) => "Optimization complete!".to_string(),
            Self::Aborted { .. } => "Optimization aborted.".to_string(),
        }
    }

    pub fn summary(&self) -> Option<&IterationSummary> {
        match self {
            Self::Summary(summary) | Self::Converged(summary) => Some(summary),
            _ => None,
        }
    }
}
