//! Gaussian-process surrogate for a single input variable.
//!
//! Kernel: `c · Matern₅/₂(|x - x'| / ℓ) + σ_n² · δ(x, x')`. The three
//! hyperparameters are re-estimated on every fit by maximizing the log
//! marginal likelihood with bounded L-BFGS in log-space. Targets are
//! standardized before fitting and predictions are mapped back.

use bo_types::{BoError, BoResult, SampleStore};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::local::{BoundedMinimizer, LocalSearchConfig};

const SQRT_5: f64 = 2.236_067_977_499_79;
const LN_2PI: f64 = 1.837_877_066_409_345_5;

/// Cost returned for hyperparameters whose covariance cannot be factorized.
const INFEASIBLE_COST: f64 = 1e25;

/// Kernel hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KernelParams {
    /// Constant scale `c` multiplying the Matérn term.
    pub amplitude: f64,
    /// Matérn length scale `ℓ`, in input units.
    pub length_scale: f64,
    /// White-noise variance `σ_n²`.
    pub noise_level: f64,
}

impl Default for KernelParams {
    fn default() -> Self {
        Self {
            amplitude: 1.0,
            length_scale: 1.0,
            noise_level: 1.0,
        }
    }
}

impl KernelParams {
    /// Noise-free part of the kernel, `c · Matern₅/₂`.
    pub fn covariance(&self, a: f64, b: f64) -> f64 {
        let r = (a - b).abs() / self.length_scale;
        let sqrt5_r = SQRT_5 * r;
        self.amplitude * (1.0 + sqrt5_r + 5.0 / 3.0 * r * r) * (-sqrt5_r).exp()
    }

    fn to_log(self) -> Vec<f64> {
        vec![
            self.amplitude.ln(),
            self.length_scale.ln(),
            self.noise_level.ln(),
        ]
    }

    fn from_log(theta: &[f64]) -> Self {
        Self {
            amplitude: theta[0].exp(),
            length_scale: theta[1].exp(),
            noise_level: theta[2].exp(),
        }
    }
}

/// Fitting options for [`GaussianProcess`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurrogateOptions {
    /// Starting hyperparameters; also used as-is when optimization is off.
    pub initial: KernelParams,
    pub amplitude_bounds: (f64, f64),
    pub length_scale_bounds: (f64, f64),
    pub noise_bounds: (f64, f64),
    /// Added to the covariance diagonal on every fit.
    pub jitter: f64,
    /// How many times the jitter may grow ×10 before giving up.
    pub max_jitter_escalations: usize,
    pub optimize_hyperparameters: bool,
}

impl Default for SurrogateOptions {
    fn default() -> Self {
        Self {
            initial: KernelParams::default(),
            amplitude_bounds: (1e-2, 1e2),
            length_scale_bounds: (1e-2, 1e2),
            noise_bounds: (1e-4, 1e1),
            jitter: 1e-4,
            max_jitter_escalations: 12,
            optimize_hyperparameters: true,
        }
    }
}

impl SurrogateOptions {
    fn log_bounds(&self) -> Vec<(f64, f64)> {
        [
            self.amplitude_bounds,
            self.length_scale_bounds,
            self.noise_bounds,
        ]
        .iter()
        .map(|&(lo, hi)| (lo.ln(), hi.ln()))
        .collect()
    }

    fn clamp(&self, params: KernelParams) -> KernelParams {
        KernelParams {
            amplitude: params
                .amplitude
                .clamp(self.amplitude_bounds.0, self.amplitude_bounds.1),
            length_scale: params
                .length_scale
                .clamp(self.length_scale_bounds.0, self.length_scale_bounds.1),
            noise_level: params
                .noise_level
                .clamp(self.noise_bounds.0, self.noise_bounds.1),
        }
    }
}

/// Batch prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
}

/// Gaussian-process regressor. Stateless: every [`fit`](Self::fit) builds a
/// fresh [`FittedSurrogate`].
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    options: SurrogateOptions,
    minimizer: BoundedMinimizer,
}

impl Default for GaussianProcess {
    fn default() -> Self {
        Self::new(SurrogateOptions::default())
    }
}

struct Factorization {
    cholesky: Cholesky<f64, Dyn>,
    jitter: f64,
}

fn factorize(
    x: &[f64],
    params: &KernelParams,
    jitter: f64,
    escalations: usize,
) -> Option<Factorization> {
    let n = x.len();
    let mut jitter = jitter;
    for _ in 0..=escalations {
        let k = DMatrix::from_fn(n, n, |i, j| {
            let v = params.covariance(x[i], x[j]);
            if i == j {
                v + params.noise_level + jitter
            } else {
                v
            }
        });
        if let Some(cholesky) = Cholesky::new(k) {
            return Some(Factorization { cholesky, jitter });
        }
        jitter *= 10.0;
    }
    None
}

fn log_marginal_likelihood(cholesky: &Cholesky<f64, Dyn>, y: &DVector<f64>) -> f64 {
    let alpha = cholesky.solve(y);
    let log_det_half: f64 = cholesky.l_dirty().diagonal().iter().map(|d| d.ln()).sum();
    -0.5 * y.dot(&alpha) - log_det_half - 0.5 * y.len() as f64 * LN_2PI
}

impl GaussianProcess {
    pub fn new(options: SurrogateOptions) -> Self {
        Self {
            options,
            minimizer: BoundedMinimizer::new(LocalSearchConfig {
                max_iter: 200,
                ..LocalSearchConfig::default()
            }),
        }
    }

    pub fn options(&self) -> &SurrogateOptions {
        &self.options
    }

    /// Fit to every observation in `samples`.
    ///
    /// Never fails on conditioning: the diagonal jitter grows until the
    /// covariance factorizes.
    pub fn fit(&self, samples: &SampleStore) -> BoResult<FittedSurrogate> {
        if samples.is_empty() {
            return Err(BoError::Validation(
                "cannot fit a surrogate without samples".to_string(),
            ));
        }

        let x = samples.xs();
        let y = samples.ys();
        if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
            return Err(BoError::Validation(
                "surrogate training data must be finite".to_string(),
            ));
        }

        let n = y.len() as f64;
        let y_mean = y.iter().sum::<f64>() / n;
        let y_var = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n;
        let y_std = if y_var.sqrt() > 1e-12 { y_var.sqrt() } else { 1.0 };
        let y_scaled = DVector::from_iterator(y.len(), y.iter().map(|v| (v - y_mean) / y_std));

        let params = if self.options.optimize_hyperparameters && samples.len() > 1 {
            self.optimize_hyperparameters(&x, &y_scaled)
        } else {
            self.options.clamp(self.options.initial)
        };

        let factorization = factorize(
            &x,
            &params,
            self.options.jitter,
            self.options.max_jitter_escalations,
        )
        .ok_or_else(|| {
            BoError::Numerical(format!(
                "covariance not positive definite even with jitter for {params:?}"
            ))
        })?;

        let alpha = factorization.cholesky.solve(&y_scaled);
        let lml = log_marginal_likelihood(&factorization.cholesky, &y_scaled);

        debug!(
            samples = samples.len(),
            amplitude = params.amplitude,
            length_scale = params.length_scale,
            noise_level = params.noise_level,
            jitter = factorization.jitter,
            log_marginal_likelihood = lml,
            "surrogate fitted"
        );

        Ok(FittedSurrogate {
            params,
            jitter: factorization.jitter,
            x_train: x,
            alpha,
            cholesky: factorization.cholesky,
            y_mean,
            y_std,
            log_marginal_likelihood: lml,
        })
    }

    fn starting_points(&self, x: &[f64]) -> Vec<KernelParams> {
        let lo = x.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = if hi - lo > 0.0 { hi - lo } else { 1.0 };

        vec![
            self.options.initial,
            KernelParams {
                amplitude: 1.0,
                length_scale: 0.25 * span,
                noise_level: 1e-2,
            },
            KernelParams {
                amplitude: 1.0,
                length_scale: span,
                noise_level: 1e-3,
            },
        ]
        .into_iter()
        .map(|p| self.options.clamp(p))
        .collect()
    }

    fn optimize_hyperparameters(&self, x: &[f64], y: &DVector<f64>) -> KernelParams {
        let negative_lml = |theta: &[f64]| -> f64 {
            let params = KernelParams::from_log(theta);
            match factorize(x, &params, self.options.jitter, self.options.max_jitter_escalations) {
                Some(f) => -log_marginal_likelihood(&f.cholesky, y),
                None => INFEASIBLE_COST,
            }
        };
        let bounds = self.options.log_bounds();

        let mut best: Option<(KernelParams, f64)> = None;
        for start in self.starting_points(x) {
            let candidate = match self.minimizer.minimize(&negative_lml, &start.to_log(), &bounds) {
                Ok(result) => (KernelParams::from_log(&result.params), result.value),
                Err(e) => {
                    debug!(error = %e, "hyperparameter search failed from {start:?}");
                    (start, negative_lml(&start.to_log()))
                }
            };
            if !candidate.1.is_finite() {
                continue;
            }
            match best {
                Some((_, cost)) if candidate.1 >= cost => {}
                _ => best = Some(candidate),
            }
        }

        best.map(|(params, _)| self.options.clamp(params))
            .unwrap_or_else(|| self.options.clamp(self.options.initial))
    }
}

/// A fitted Gaussian process. Disposable; rebuilt from the sample store on
/// every iteration.
#[derive(Debug, Clone)]
pub struct FittedSurrogate {
    params: KernelParams,
    jitter: f64,
    x_train: Vec<f64>,
    /// `(K + σ²I)⁻¹ y` on the standardized targets.
    alpha: DVector<f64>,
    cholesky: Cholesky<f64, Dyn>,
    y_mean: f64,
    y_std: f64,
    log_marginal_likelihood: f64,
}

impl FittedSurrogate {
    pub fn kernel_params(&self) -> KernelParams {
        self.params
    }

    /// Diagonal jitter that was needed for the factorization.
    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn log_marginal_likelihood(&self) -> f64 {
        self.log_marginal_likelihood
    }

    pub fn training_inputs(&self) -> &[f64] {
        &self.x_train
    }

    /// Posterior mean and standard deviation of the latent function at `x`.
    pub fn predict_one(&self, x: f64) -> (f64, f64) {
        let k_star = DVector::from_iterator(
            self.x_train.len(),
            self.x_train.iter().map(|&xi| self.params.covariance(x, xi)),
        );

        let mean = k_star.dot(&self.alpha);
        let v = self.cholesky.solve(&k_star);
        let var = (self.params.amplitude - k_star.dot(&v)).max(0.0);

        (self.y_mean + self.y_std * mean, self.y_std * var.sqrt())
    }

    /// Vectorized [`predict_one`](Self::predict_one), evaluated in parallel.
    pub fn predict(&self, xs: &[f64]) -> Prediction {
        let (mean, std): (Vec<f64>, Vec<f64>) =
            xs.par_iter().map(|&x| self.predict_one(x)).unzip();
        Prediction { mean, std }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bo_types::Sample;

    fn store(points: &[(f64, f64)]) -> SampleStore {
        points.iter().map(|&(x, y)| Sample::new(x, y)).collect()
    }

    #[test]
    fn matern_kernel_shape() {
        let params = KernelParams {
            amplitude: 2.0,
            length_scale: 1.5,
            noise_level: 0.1,
        };
        assert!((params.covariance(0.3, 0.3) - 2.0).abs() < 1e-12);
        assert!((params.covariance(0.0, 1.0) - params.covariance(1.0, 0.0)).abs() < 1e-15);
        assert!(params.covariance(0.0, 1.0) > params.covariance(0.0, 2.0));
        assert!(params.covariance(0.0, 50.0) < 1e-10);
    }

    #[test]
    fn empty_store_cannot_be_fitted() {
        let gp = GaussianProcess::default();
        assert!(matches!(
            gp.fit(&SampleStore::new()),
            Err(BoError::Validation(_))
        ));
    }

    #[test]
    fn interpolates_training_points() {
        let points: Vec<(f64, f64)> = [0.0, 1.2, 2.5, 3.7, 5.0, 6.0]
            .iter()
            .map(|&x: &f64| (x, x.sin()))
            .collect();
        let gp = GaussianProcess::default();
        let fitted = gp.fit(&store(&points)).unwrap();

        let xs: Vec<f64> = points.iter().map(|p| p.0).collect();
        let prediction = fitted.predict(&xs);
        for (i, &(x, y)) in points.iter().enumerate() {
            assert!(
                (prediction.mean[i] - y).abs() < 0.1,
                "mean at {x}: {} vs {y} ({:?})",
                prediction.mean[i],
                fitted.kernel_params()
            );
            assert!(
                prediction.std[i] < 0.1,
                "std at {x}: {} ({:?})",
                prediction.std[i],
                fitted.kernel_params()
            );
        }
    }

    #[test]
    fn uncertainty_grows_away_from_data() {
        let gp = GaussianProcess::default();
        let fitted = gp
            .fit(&store(&[(0.0, 1.0), (0.5, 1.4), (1.0, 0.9)]))
            .unwrap();
        let (_, near) = fitted.predict_one(0.5);
        let (_, far) = fitted.predict_one(40.0);
        assert!(far > near, "far {far} should exceed near {near}");
    }

    #[test]
    fn single_sample_fit_uses_initial_hyperparameters() {
        let gp = GaussianProcess::default();
        let fitted = gp.fit(&store(&[(2.0, 7.0)])).unwrap();
        assert_eq!(fitted.kernel_params(), KernelParams::default());
        let (mean, std) = fitted.predict_one(2.0);
        assert!((mean - 7.0).abs() < 1e-9);
        assert!(std.is_finite());
    }

    #[test]
    fn duplicate_inputs_do_not_break_the_fit() {
        let gp = GaussianProcess::new(SurrogateOptions {
            optimize_hyperparameters: false,
            initial: KernelParams {
                amplitude: 1.0,
                length_scale: 1.0,
                noise_level: 1e-12,
            },
            noise_bounds: (1e-12, 1.0),
            jitter: 1e-14,
            ..SurrogateOptions::default()
        });
        let fitted = gp
            .fit(&store(&[(1.0, 2.0), (1.0, 2.0), (1.0, 2.0), (3.0, 0.0)]))
            .unwrap();
        let (mean, std) = fitted.predict_one(1.0);
        assert!(mean.is_finite());
        assert!(std.is_finite());
    }

    #[test]
    fn batch_prediction_matches_single_points() {
        let gp = GaussianProcess::default();
        let fitted = gp
            .fit(&store(&[(-1.0, 0.0), (0.0, 1.0), (2.0, -0.5), (4.0, 0.3)]))
            .unwrap();
        let xs = [-2.0, 0.5, 3.3];
        let batch = fitted.predict(&xs);
        for (i, &x) in xs.iter().enumerate() {
            let (m, s) = fitted.predict_one(x);
            assert_eq!(batch.mean[i], m);
            assert_eq!(batch.std[i], s);
        }
    }
}
