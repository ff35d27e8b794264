//! Base distribution trait and types.

use crate::error::{Result, ZeroLssError};
use crate::utils::{InverseResponseFn, ResponseFn};
use argmin::core::{CostFunction, Error as ArgminError, Executor, Gradient, State};
use argmin::solver::linesearch::MoreThuenteLineSearch;
use argmin::solver::quasinewton::LBFGS;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, warn};

/// Raw value used for every parameter when no better start value is known.
const DEFAULT_RAW_START: f64 = 0.5;

/// Draws per observation when differentiating the sampled CRPS.
pub const CRPS_N_SAMPLES: usize = 100;
/// Seed of the draws used for CRPS gradients.
pub const CRPS_SEED: u64 = 123;
/// Central-difference step for CRPS gradients in raw space.
pub const CRPS_EPS: f64 = 1e-3;

/// Loss function types for distributional regression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossFn {
    /// Negative log-likelihood loss.
    Nll,
    /// Continuous Ranked Probability Score.
    Crps,
}

impl LossFn {
    /// Get the string name of the loss function.
    pub fn name(&self) -> &'static str {
        match self {
            LossFn::Nll => "nll",
            LossFn::Crps => "crps",
        }
    }
}

impl fmt::Display for LossFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for LossFn {
    type Err = ZeroLssError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "nll" => Ok(LossFn::Nll),
            "crps" => Ok(LossFn::Crps),
            other => Err(ZeroLssError::InvalidParameter(format!(
                "Invalid loss function '{other}'. Please choose from 'nll' or 'crps'."
            ))),
        }
    }
}

/// Stabilization methods for gradients and hessians.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stabilization {
    /// No stabilization.
    None,
    /// Median Absolute Deviation stabilization.
    #[serde(rename = "MAD")]
    Mad,
    /// L2 norm stabilization.
    L2,
}

impl Stabilization {
    /// Get the string name of the stabilization method.
    pub fn name(&self) -> &'static str {
        match self {
            Stabilization::None => "None",
            Stabilization::Mad => "MAD",
            Stabilization::L2 => "L2",
        }
    }
}

impl fmt::Display for Stabilization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stabilization {
    type Err = ZeroLssError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "None" => Ok(Stabilization::None),
            "MAD" => Ok(Stabilization::Mad),
            "L2" => Ok(Stabilization::L2),
            other => Err(ZeroLssError::InvalidParameter(format!(
                "Invalid stabilization method '{other}'. Please choose from 'None', 'MAD' or 'L2'."
            ))),
        }
    }
}

/// A distributional parameter with its response function.
///
/// The inverse response function is always the one paired with `response_fn`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionParam {
    /// Name of the parameter (e.g., "rate", "gate").
    pub name: String,
    /// Response function to transform predictions to parameter space.
    pub response_fn: ResponseFn,
}

impl DistributionParam {
    /// Create a new distribution parameter.
    pub fn new(name: impl Into<String>, response_fn: ResponseFn) -> Self {
        Self {
            name: name.into(),
            response_fn,
        }
    }

    /// Inverse of the response function.
    pub fn inverse_response_fn(&self) -> InverseResponseFn {
        self.response_fn.inverse()
    }
}

/// Container for gradients and hessians.
#[derive(Debug, Clone)]
pub struct GradientsAndHessians {
    /// Gradients with shape (n_samples, n_params).
    pub gradients: Array2<f64>,
    /// Hessians with shape (n_samples, n_params).
    pub hessians: Array2<f64>,
}

/// Core trait for the distribution heads.
///
/// Implementors describe a distribution (parameters, log density, sampler)
/// and inherit the shared machinery used by the boosting framework:
/// gradients and hessians, stabilization, loss evaluation and start values.
#[typetag::serde(tag = "type")]
pub trait Distribution: Send + Sync {
    /// Clone the distribution into a boxed trait object.
    fn clone_box(&self) -> Box<dyn Distribution>;

    /// Get the name of this distribution (e.g., "ZAGamma").
    fn name(&self) -> &'static str;

    /// Whether this distribution has discrete support.
    fn is_discrete(&self) -> bool {
        false
    }

    /// Number of distributional parameters.
    fn n_params(&self) -> usize {
        self.params().len()
    }

    /// Get the distribution parameters with their response functions.
    fn params(&self) -> &[DistributionParam];

    /// Get the parameter names.
    fn param_names(&self) -> Vec<&str> {
        self.params().iter().map(|p| p.name.as_str()).collect()
    }

    /// Ordered mapping from parameter name to response function.
    fn param_dict(&self) -> Vec<(&str, ResponseFn)> {
        self.params()
            .iter()
            .map(|p| (p.name.as_str(), p.response_fn))
            .collect()
    }

    /// Ordered mapping from parameter name to inverse response function.
    fn param_dict_inv(&self) -> Vec<(&str, InverseResponseFn)> {
        self.params()
            .iter()
            .map(|p| (p.name.as_str(), p.inverse_response_fn()))
            .collect()
    }

    /// Get the loss function.
    fn loss_fn(&self) -> LossFn;

    /// Get the stabilization method.
    fn stabilization(&self) -> Stabilization;

    /// Whether to initialize with start values.
    fn should_initialize(&self) -> bool;

    /// Compute the log probability of a single observation.
    ///
    /// # Arguments
    /// * `params` - Parameter values (response scale) for this observation
    /// * `target` - Observed value
    fn log_prob(&self, params: &[f64], target: f64) -> f64;

    /// Draw `n_samples` values for one observation.
    ///
    /// Invalid parameters yield zeros.
    fn sample_observation(
        &self,
        params: &[f64],
        n_samples: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<f64>;

    /// Draw samples from the distribution given parameters.
    ///
    /// Every observation draws from its own ChaCha stream, so its samples
    /// depend only on its own parameters and the seed.
    ///
    /// # Arguments
    /// * `params` - Distribution parameters with shape (n_obs, n_params)
    /// * `n_samples` - Number of samples to draw per observation
    /// * `seed` - Random seed
    ///
    /// # Returns
    /// Samples with shape (n_samples, n_obs).
    fn sample(&self, params: &ArrayView2<f64>, n_samples: usize, seed: u64) -> Array2<f64> {
        let mut result = Array2::zeros((n_samples, params.nrows()));
        for (j, row) in params.rows().into_iter().enumerate() {
            let mut rng = observation_rng(seed, j);
            let draws = self.sample_observation(&row.to_vec(), n_samples, &mut rng);
            result.column_mut(j).assign(&Array1::from_vec(draws));
        }
        result
    }

    /// Rough parameter-space estimates used to seed the start value search.
    ///
    /// Returns `None` when the target carries too little information.
    fn moment_estimates(&self, _target: &ArrayView1<f64>) -> Option<Vec<f64>> {
        None
    }

    /// Compute the negative log-likelihood summed over observations.
    ///
    /// # Arguments
    /// * `params` - Transformed parameters with shape (n_obs, n_params)
    /// * `target` - Target values
    fn nll(&self, params: &ArrayView2<f64>, target: &ArrayView1<f64>) -> f64 {
        params
            .rows()
            .into_iter()
            .zip(target.iter())
            .map(|(row, &y)| -self.log_prob(&row.to_vec(), y))
            .sum()
    }

    /// Transform raw predictions to the parameter space.
    fn transform_params(&self, predictions: &ArrayView2<f64>) -> Array2<f64> {
        let mut result = Array2::zeros(predictions.dim());
        for (i, param) in self.params().iter().enumerate() {
            let col = predictions.column(i);
            let transformed = param.response_fn.apply(&col);
            result.column_mut(i).assign(&transformed);
        }
        result
    }

    /// Compute closed-form gradients and hessians of the NLL if available.
    ///
    /// # Arguments
    /// * `predictions` - Raw predictions with shape (n_obs, n_params)
    /// * `transformed` - Transformed parameters with shape (n_obs, n_params)
    /// * `target` - Target values
    ///
    /// # Returns
    /// `Some((gradients, hessians))` if analytical gradients are available.
    fn analytical_gradients(
        &self,
        _predictions: &ArrayView2<f64>,
        _transformed: &ArrayView2<f64>,
        _target: &ArrayView1<f64>,
    ) -> Option<(Array2<f64>, Array2<f64>)> {
        None
    }

    /// Compute gradients and hessians for the boosting objective.
    ///
    /// For NLL, analytical gradients are used when the distribution provides
    /// them, otherwise central differences on the log density. For CRPS the
    /// gradient is a central difference of the sampled CRPS with common draws
    /// on both sides, and the hessian is set to one.
    ///
    /// # Arguments
    /// * `predictions` - Raw predictions with shape (n_obs, n_params)
    /// * `target` - Target values
    /// * `weights` - Optional sample weights
    fn compute_gradients_and_hessians(
        &self,
        predictions: &ArrayView2<f64>,
        target: &ArrayView1<f64>,
        weights: Option<&ArrayView1<f64>>,
    ) -> Result<GradientsAndHessians> {
        check_predictions(self.n_params(), predictions, target)?;
        let n_obs = predictions.nrows();

        let (mut gradients, mut hessians) = match self.loss_fn() {
            LossFn::Nll => {
                let transformed = self.transform_params(predictions);
                match self.analytical_gradients(predictions, &transformed.view(), target) {
                    Some(derivatives) => derivatives,
                    None => {
                        self.numerical_gradients_hessians(predictions, &transformed.view(), target)
                    }
                }
            }
            LossFn::Crps => (
                self.crps_gradients(predictions, target),
                Array2::ones(predictions.dim()),
            ),
        };

        self.stabilize_derivatives(&mut gradients, &mut hessians);

        if let Some(w) = weights {
            if w.len() != n_obs {
                return Err(ZeroLssError::InvalidInput(format!(
                    "expected {} weights, got {}",
                    n_obs,
                    w.len()
                )));
            }
            for (j, &wj) in w.iter().enumerate() {
                gradients.row_mut(j).mapv_inplace(|g| g * wj);
                hessians.row_mut(j).mapv_inplace(|h| h * wj);
            }
        }

        Ok(GradientsAndHessians {
            gradients,
            hessians,
        })
    }

    /// Compute numerical gradients and hessians in prediction space.
    fn numerical_gradients_hessians(
        &self,
        predictions: &ArrayView2<f64>,
        transformed: &ArrayView2<f64>,
        target: &ArrayView1<f64>,
    ) -> (Array2<f64>, Array2<f64>) {
        let n_obs = predictions.nrows();
        let n_params = self.n_params();
        let eps = 1e-5;

        let mut gradients = Array2::zeros((n_obs, n_params));
        let mut hessians = Array2::zeros((n_obs, n_params));

        for i in 0..n_obs {
            let y = target[i];
            let base_params: Vec<f64> = transformed.row(i).to_vec();
            let loss_center = -self.log_prob(&base_params, y);

            for (p, param) in self.params().iter().enumerate() {
                let pred_val = predictions[[i, p]];

                // Perturb in prediction space so the response function is included.
                let mut params_plus = base_params.clone();
                let mut params_minus = base_params.clone();
                params_plus[p] = param.response_fn.apply_scalar(pred_val + eps);
                params_minus[p] = param.response_fn.apply_scalar(pred_val - eps);

                let loss_plus = -self.log_prob(&params_plus, y);
                let loss_minus = -self.log_prob(&params_minus, y);

                gradients[[i, p]] = (loss_plus - loss_minus) / (2.0 * eps);
                let hess = (loss_plus - 2.0 * loss_center + loss_minus) / (eps * eps);
                hessians[[i, p]] = hess.max(1e-6);
            }
        }

        (gradients, hessians)
    }

    /// Central-difference gradients of the sampled CRPS in prediction space.
    ///
    /// Each observation is scored with [`CRPS_N_SAMPLES`] draws from its own
    /// stream seeded by [`CRPS_SEED`], the same draws
    /// [`Distribution::eval_loss`] uses with that seed.
    fn crps_gradients(
        &self,
        predictions: &ArrayView2<f64>,
        target: &ArrayView1<f64>,
    ) -> Array2<f64> {
        let mut gradients = Array2::zeros(predictions.dim());

        for (i, row) in predictions.rows().into_iter().enumerate() {
            let y = target[i];
            for p in 0..self.n_params() {
                let mut raw_plus = row.to_vec();
                let mut raw_minus = row.to_vec();
                raw_plus[p] += CRPS_EPS;
                raw_minus[p] -= CRPS_EPS;

                let crps_plus = self.crps_observation(&raw_plus, y, i);
                let crps_minus = self.crps_observation(&raw_minus, y, i);
                gradients[[i, p]] = (crps_plus - crps_minus) / (2.0 * CRPS_EPS);
            }
        }

        gradients
    }

    /// Sampled CRPS of observation `obs_idx` given its raw predictions.
    fn crps_observation(&self, raw: &[f64], y: f64, obs_idx: usize) -> f64 {
        let params: Vec<f64> = raw
            .iter()
            .zip(self.params())
            .map(|(&r, param)| param.response_fn.apply_scalar(r))
            .collect();
        let mut rng = observation_rng(CRPS_SEED, obs_idx);
        let mut draws = self.sample_observation(&params, CRPS_N_SAMPLES, &mut rng);
        draws.sort_by(|a, b| a.total_cmp(b));
        crps_sorted(y, &draws)
    }

    /// Stabilize gradients and hessians.
    fn stabilize_derivatives(&self, gradients: &mut Array2<f64>, hessians: &mut Array2<f64>) {
        match self.stabilization() {
            Stabilization::None => {
                replace_nans_with_mean(gradients);
                replace_nans_with_mean(hessians);
            }
            Stabilization::Mad => {
                stabilize_mad(gradients);
                stabilize_mad(hessians);
            }
            Stabilization::L2 => {
                stabilize_l2(gradients);
                stabilize_l2(hessians);
            }
        }
    }

    /// Calculate unconditional start values for distributional parameters.
    ///
    /// The search runs L-BFGS with a More-Thuente line search on the raw
    /// scale. It starts from [`Distribution::moment_estimates`] mapped
    /// through the inverse response functions, or 0.5 per parameter.
    ///
    /// # Returns
    /// Tuple of (loss, start_values) where start values are on the raw scale.
    fn calculate_start_values(
        &self,
        target: &ArrayView1<f64>,
        max_iter: usize,
    ) -> Result<(f64, Array1<f64>)> {
        if target.is_empty() {
            return Err(ZeroLssError::InvalidInput(
                "cannot compute start values for an empty target".to_string(),
            ));
        }
        let n_params = self.n_params();

        let init_params: Vec<f64> = match self.moment_estimates(target) {
            Some(estimates) => estimates
                .iter()
                .zip(self.params())
                .map(|(&v, param)| {
                    let raw = param.inverse_response_fn().apply_scalar(v);
                    if raw.is_finite() { raw } else { DEFAULT_RAW_START }
                })
                .collect(),
            None => vec![DEFAULT_RAW_START; n_params],
        };

        let problem = StartValueProblem {
            dist: self.clone_box(),
            target: target.to_vec(),
        };
        let initial_cost = problem.cost(&init_params)?;

        let linesearch = MoreThuenteLineSearch::new();
        let solver = LBFGS::new(linesearch, 7);

        let result = Executor::new(problem, solver)
            .configure(|state| state.param(init_params.clone()).max_iters(max_iter as u64))
            .run();

        match result {
            Ok(res) => {
                let best_params: Vec<f64> = res
                    .state()
                    .get_best_param()
                    .cloned()
                    .unwrap_or_else(|| init_params.clone());
                let best_cost: f64 = res.state().get_best_cost();

                let (loss, params) = if best_cost.is_finite() && best_cost <= initial_cost {
                    (best_cost, best_params)
                } else {
                    (initial_cost, init_params)
                };
                let params_arr = Array1::from_vec(params)
                    .mapv(|v| if v.is_finite() { v } else { DEFAULT_RAW_START });

                debug!(
                    distribution = self.name(),
                    loss,
                    start_values = ?params_arr.to_vec(),
                    "computed start values"
                );
                Ok((loss, params_arr))
            }
            Err(err) => {
                let err = ZeroLssError::from(err);
                warn!(
                    distribution = self.name(),
                    error = %err,
                    "L-BFGS start value search failed, using initial guess"
                );
                Ok((initial_cost, Array1::from_vec(init_params)))
            }
        }
    }

    /// Total negative log-likelihood for one set of parameters shared by all observations.
    fn compute_total_loss(&self, params: &[f64], target: &ArrayView1<f64>) -> f64 {
        target.iter().map(|&y| -self.log_prob(params, y)).sum()
    }

    /// Compute CRPS score using sampling.
    ///
    /// # Arguments
    /// * `target` - Target values
    /// * `samples` - Samples from predicted distribution with shape (n_samples, n_obs)
    fn crps_score(&self, target: &ArrayView1<f64>, samples: &ArrayView2<f64>) -> f64 {
        target
            .iter()
            .enumerate()
            .map(|(j, &y)| {
                let mut obs_samples: Vec<f64> = samples.column(j).to_vec();
                obs_samples.sort_by(|a, b| a.total_cmp(b));
                crps_sorted(y, &obs_samples)
            })
            .sum()
    }

    /// Evaluation metric for the configured loss function.
    ///
    /// NLL is evaluated in closed form. CRPS is estimated from `n_samples`
    /// draws per observation.
    fn eval_loss(
        &self,
        predictions: &ArrayView2<f64>,
        target: &ArrayView1<f64>,
        n_samples: usize,
        seed: u64,
    ) -> Result<f64> {
        check_predictions(self.n_params(), predictions, target)?;
        let params = self.transform_params(predictions);
        match self.loss_fn() {
            LossFn::Nll => Ok(self.nll(&params.view(), target)),
            LossFn::Crps => {
                if n_samples == 0 {
                    return Err(ZeroLssError::InvalidParameter(
                        "CRPS evaluation needs at least one sample".to_string(),
                    ));
                }
                let samples = self.sample(&params.view(), n_samples, seed);
                Ok(self.crps_score(target, &samples.view()))
            }
        }
    }
}

/// RNG for observation `obs_idx`: the seed picks the key, the index the stream.
pub(crate) fn observation_rng(seed: u64, obs_idx: usize) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(obs_idx as u64);
    rng
}

/// Check that deserialized parameters carry the expected names in order,
/// with the gate linked through the sigmoid.
pub(crate) fn check_param_layout(
    distribution: &str,
    params: &[DistributionParam],
    expected: &[&str],
) -> Result<()> {
    let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
    if names != expected {
        return Err(ZeroLssError::InvalidParameter(format!(
            "{distribution} expects parameters {expected:?}, got {names:?}"
        )));
    }
    if let Some(gate) = params.iter().find(|p| p.name == "gate") {
        if gate.response_fn != ResponseFn::Sigmoid {
            return Err(ZeroLssError::InvalidParameter(format!(
                "{distribution} links 'gate' through 'sigmoid', got '{}'",
                gate.response_fn
            )));
        }
    }
    Ok(())
}

/// Reject response functions outside the set a distribution supports.
pub(crate) fn check_response_fn(
    distribution: &str,
    response_fn: ResponseFn,
    allowed: &[ResponseFn],
) -> Result<ResponseFn> {
    if allowed.contains(&response_fn) {
        Ok(response_fn)
    } else {
        Err(invalid_response_fn(distribution, response_fn.name(), allowed))
    }
}

/// Parse the string options shared by every distribution head.
pub(crate) fn parse_options(
    distribution: &str,
    stabilization: &str,
    response_fn: &str,
    loss_fn: &str,
    allowed: &[ResponseFn],
) -> Result<(Stabilization, ResponseFn, LossFn)> {
    let stabilization = stabilization.parse::<Stabilization>()?;
    let loss_fn = loss_fn.parse::<LossFn>()?;
    let parsed = response_fn
        .parse::<ResponseFn>()
        .map_err(|_| invalid_response_fn(distribution, response_fn, allowed))?;
    let response_fn = check_response_fn(distribution, parsed, allowed)?;
    Ok((stabilization, response_fn, loss_fn))
}

fn invalid_response_fn(distribution: &str, name: &str, allowed: &[ResponseFn]) -> ZeroLssError {
    let choices: Vec<String> = allowed.iter().map(|f| format!("'{f}'")).collect();
    ZeroLssError::InvalidParameter(format!(
        "Invalid response function '{name}' for {distribution}. Please choose from {}.",
        choices.join(", ")
    ))
}

/// Check raw predictions against the parameter count and target length.
pub(crate) fn check_predictions(
    n_params: usize,
    predictions: &ArrayView2<f64>,
    target: &ArrayView1<f64>,
) -> Result<()> {
    if predictions.ncols() != n_params {
        return Err(ZeroLssError::ShapeMismatch {
            expected_shape: format!("({}, {})", predictions.nrows(), n_params),
            actual_shape: format!("{:?}", predictions.dim()),
        });
    }
    if predictions.nrows() != target.len() {
        return Err(ZeroLssError::InvalidInput(format!(
            "{} prediction rows but {} target values",
            predictions.nrows(),
            target.len()
        )));
    }
    Ok(())
}

/// CRPS of one observation against its sorted samples.
fn crps_sorted(y: f64, sorted_samples: &[f64]) -> f64 {
    let n_samples = sorted_samples.len();
    if n_samples == 0 {
        return 0.0;
    }

    let mut crps = 0.0;
    let mut yhat_prev = 0.0;
    let mut yhat_cdf = 0.0;
    let mut y_cdf = 0.0;

    for &yhat in sorted_samples {
        if y_cdf == 0.0 && y < yhat {
            crps += (y - yhat_prev) * yhat_cdf * yhat_cdf;
            crps += (yhat - y) * (yhat_cdf - 1.0) * (yhat_cdf - 1.0);
            y_cdf = 1.0;
        } else {
            crps += (yhat - yhat_prev) * (yhat_cdf - y_cdf) * (yhat_cdf - y_cdf);
        }

        yhat_cdf += 1.0 / n_samples as f64;
        yhat_prev = yhat;
    }

    // y above every sample
    if y_cdf == 0.0 {
        crps += y - yhat_prev;
    }

    crps
}

/// Replace NaN values in array with column means.
fn replace_nans_with_mean(arr: &mut Array2<f64>) {
    for mut col in arr.columns_mut() {
        let valid: Vec<f64> = col.iter().filter(|v| v.is_finite()).copied().collect();
        let mean = if valid.is_empty() {
            0.0
        } else {
            valid.iter().sum::<f64>() / valid.len() as f64
        };
        for v in col.iter_mut() {
            if !v.is_finite() {
                *v = mean;
            }
        }
    }
}

/// MAD stabilization.
fn stabilize_mad(arr: &mut Array2<f64>) {
    replace_nans_with_mean(arr);

    for mut col in arr.columns_mut() {
        let median = compute_median(&col.to_vec());
        let deviations: Vec<f64> = col.iter().map(|&v| (v - median).abs()).collect();
        let mad = compute_median(&deviations).max(1e-4);

        for v in col.iter_mut() {
            *v /= mad;
        }
    }
}

/// L2 stabilization.
fn stabilize_l2(arr: &mut Array2<f64>) {
    replace_nans_with_mean(arr);

    for mut col in arr.columns_mut() {
        let sum_sq: f64 = col.iter().map(|v| v * v).sum();
        let l2 = (sum_sq / col.len() as f64).sqrt().clamp(1e-4, 10000.0);

        for v in col.iter_mut() {
            *v /= l2;
        }
    }
}

/// Compute median of a slice.
fn compute_median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().filter(|v| v.is_finite()).copied().collect();
    if sorted.is_empty() {
        return 0.0;
    }

    sorted.sort_by(|a, b| a.total_cmp(b));

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

// ============================================================================
// L-BFGS Optimization for Start Values
// ============================================================================

/// Unconditional NLL of a distribution as a function of raw parameters.
struct StartValueProblem {
    dist: Box<dyn Distribution>,
    target: Vec<f64>,
}

impl CostFunction for StartValueProblem {
    type Param = Vec<f64>;
    type Output = f64;

    fn cost(&self, params: &Self::Param) -> std::result::Result<Self::Output, ArgminError> {
        let transformed: Vec<f64> = params
            .iter()
            .zip(self.dist.params())
            .map(|(&p, param)| {
                let val = if p.is_finite() { p } else { DEFAULT_RAW_START };
                param.response_fn.apply_scalar(val)
            })
            .collect();

        let loss = self
            .dist
            .compute_total_loss(&transformed, &ArrayView1::from(&self.target[..]));

        if loss.is_finite() {
            Ok(loss)
        } else {
            Ok(f64::MAX)
        }
    }
}

impl Gradient for StartValueProblem {
    type Param = Vec<f64>;
    type Gradient = Vec<f64>;

    fn gradient(&self, params: &Self::Param) -> std::result::Result<Self::Gradient, ArgminError> {
        let eps = 1e-5;
        let mut grad = vec![0.0; params.len()];

        let base_cost = self.cost(params)?;

        for (i, g) in grad.iter_mut().enumerate() {
            let mut params_plus = params.clone();
            params_plus[i] += eps;
            let cost_plus = self.cost(&params_plus)?;
            let raw = (cost_plus - base_cost) / eps;

            // Clip gradient to prevent instability
            *g = if raw.is_finite() {
                raw.clamp(-100.0, 100.0)
            } else {
                0.0
            };
        }

        Ok(grad)
    }
}
