use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique optimization run identifier.
pub type RunId = Uuid;

/// Lifecycle phase of an optimization loop.
///
/// `Idle → Initializing → Iterating → {Converged | Aborted}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LoopPhase {
    #[default]
    Idle,
    Initializing,
    Iterating,
    Converged,
    Aborted,
}

impl LoopPhase {
    /// A run is in flight and may be aborted.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Initializing | Self::Iterating)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Converged | Self::Aborted)
    }
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Iterating => "iterating",
            Self::Converged => "converged",
            Self::Aborted => "aborted",
        };
        f.write_str(label)
    }
}
