//! Point sets over the search interval: initial designs, random starts and the
//! dense evaluation grid.

use bo_types::Bounds;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use serde::{Deserialize, Serialize};

/// Latin Hypercube design of `n` points in one dimension.
///
/// The interval is cut into `n` equal strata and one point is drawn uniformly
/// inside each; the strata are visited in random order.
pub fn latin_hypercube(n: usize, bounds: Bounds, rng: &mut dyn RngCore) -> Vec<f64> {
    let mut points: Vec<f64> = (0..n)
        .map(|i| {
            let u: f64 = rng.random();
            bounds.lerp((i as f64 + u) / n as f64)
        })
        .collect();
    points.shuffle(rng);
    points
}

/// `n` independent uniform draws inside the bounds.
pub fn uniform(n: usize, bounds: Bounds, rng: &mut dyn RngCore) -> Vec<f64> {
    (0..n)
        .map(|_| rng.random_range(bounds.min()..=bounds.max()))
        .collect()
}

/// `n` evenly spaced points from `bounds.min()` to `bounds.max()` inclusive.
pub fn linspace(bounds: Bounds, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![bounds.min()],
        _ => {
            let steps = (n - 1) as f64;
            (0..n)
                .map(|i| {
                    if i == n - 1 {
                        bounds.max()
                    } else {
                        bounds.lerp(i as f64 / steps)
                    }
                })
                .collect()
        }
    }
}

/// Fixed, ordered grid spanning the bounds; built once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationGrid {
    points: Vec<f64>,
}

impl EvaluationGrid {
    pub fn new(bounds: Bounds, size: usize) -> Self {
        Self {
            points: linspace(bounds, size),
        }
    }

    pub fn points(&self) -> &[f64] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}
