//! Seams between the loop and the outside world: the objective being
//! optimized and where the search interval comes from.

use bo_types::{Bounds, EvaluationError};
use tracing::warn;

/// Produces the objective value at `x`. May block (e.g. a hardware
/// round-trip); the loop treats the call as synchronous.
pub trait ObjectiveEvaluator: Send {
    fn evaluate(&mut self, x: f64) -> Result<f64, EvaluationError>;
}

impl<T: ObjectiveEvaluator + ?Sized> ObjectiveEvaluator for Box<T> {
    fn evaluate(&mut self, x: f64) -> Result<f64, EvaluationError> {
        (**self).evaluate(x)
    }
}

/// Adapts a plain function into an [`ObjectiveEvaluator`]. Non-finite return
/// values are reported as [`EvaluationError::NonFinite`].
pub struct FnObjective<F>(pub F);

impl<F> ObjectiveEvaluator for FnObjective<F>
where
    F: FnMut(f64) -> f64 + Send,
{
    fn evaluate(&mut self, x: f64) -> Result<f64, EvaluationError> {
        let value = (self.0)(x);
        if value.is_finite() {
            Ok(value)
        } else {
            Err(EvaluationError::NonFinite { x, value })
        }
    }
}

/// Supplies the search interval once per run.
pub trait BoundsProvider {
    fn bounds(&self) -> Bounds;
}

/// Always the same interval.
#[derive(Debug, Clone, Copy)]
pub struct StaticBounds(pub Bounds);

impl BoundsProvider for StaticBounds {
    fn bounds(&self) -> Bounds {
        self.0
    }
}

/// The default interval `[-2, 10]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultBounds;

impl BoundsProvider for DefaultBounds {
    fn bounds(&self) -> Bounds {
        Bounds::DEFAULT
    }
}

/// `center ± half_width`, e.g. to re-center a follow-up run on a previous best.
#[derive(Debug, Clone, Copy)]
pub struct CenteredBounds {
    pub center: f64,
    pub half_width: f64,
}

impl CenteredBounds {
    pub const DEFAULT_HALF_WIDTH: f64 = 1.0;

    pub fn new(center: f64) -> Self {
        Self {
            center,
            half_width: Self::DEFAULT_HALF_WIDTH,
        }
    }

    pub fn with_half_width(mut self, half_width: f64) -> Self {
        self.half_width = half_width;
        self
    }
}

impl BoundsProvider for CenteredBounds {
    fn bounds(&self) -> Bounds {
        Bounds::centered(self.center, self.half_width).unwrap_or_else(|e| {
            warn!(
                center = self.center,
                half_width = self.half_width,
                error = %e,
                "invalid centered bounds, using default"
            );
            Bounds::DEFAULT
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fn_objective_rejects_non_finite() {
        let mut eval = FnObjective(|x: f64| if x > 0.0 { x * 2.0 } else { f64::NAN });
        assert_eq!(eval.evaluate(1.5), Ok(3.0));
        assert!(matches!(
            eval.evaluate(-1.0),
            Err(EvaluationError::NonFinite { x, .. }) if x == -1.0
        ));
    }

    #[test]
    fn fn_objective_can_carry_state() {
        let mut calls = 0;
        let mut eval = FnObjective(move |x: f64| {
            calls += 1;
            x + calls as f64
        });
        assert_eq!(eval.evaluate(0.0), Ok(1.0));
        assert_eq!(eval.evaluate(0.0), Ok(2.0));
    }

    #[test]
    fn boxed_evaluator_delegates() {
        let mut boxed: Box<dyn ObjectiveEvaluator> = Box::new(FnObjective(|x: f64| -x));
        assert_eq!(boxed.evaluate(4.0), Ok(-4.0));
    }

    #[test]
    fn providers() {
        let b = Bounds::new(0.0, 1.0).unwrap();
        assert_eq!(StaticBounds(b).bounds(), b);
        assert_eq!(DefaultBounds.bounds(), Bounds::DEFAULT);

        let centered = CenteredBounds::new(3.0).bounds();
        assert_eq!((centered.min(), centered.max()), (2.0, 4.0));

        let wide = CenteredBounds::new(3.0).with_half_width(0.25).bounds();
        assert_eq!((wide.min(), wide.max()), (2.75, 3.25));

        assert_eq!(
            CenteredBounds::new(f64::NAN).bounds(),
            Bounds::DEFAULT
        );
        assert_eq!(
            CenteredBounds::new(1.0).with_half_width(-1.0).bounds(),
            Bounds::DEFAULT
        );
    }
}
