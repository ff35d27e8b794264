//! Zero-Inflated Poisson distribution implementation.

use super::base::{
    Distribution, DistributionParam, LossFn, Stabilization, check_param_layout,
    check_response_fn, parse_options,
};
use crate::error::{Result, ZeroLssError};
use crate::utils::ResponseFn;
use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution as RandDistribution, Poisson as RandPoisson};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, Poisson as StatrsPoisson};
use tracing::debug;

/// Zero-Inflated Poisson distribution.
///
/// Distributional parameters, in order:
/// - `rate`: Poisson rate (lambda)
/// - `gate`: probability of an extra zero, always linked through the sigmoid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawZIPoisson")]
pub struct ZIPoisson {
    params: Vec<DistributionParam>,
    stabilization: Stabilization,
    loss_fn: LossFn,
    initialize: bool,
}

impl ZIPoisson {
    /// Response functions accepted for `rate`.
    pub const RESPONSE_FNS: &'static [ResponseFn] =
        &[ResponseFn::Exp, ResponseFn::Softplus, ResponseFn::Relu];

    pub fn new(
        stabilization: Stabilization,
        response_fn: ResponseFn,
        loss_fn: LossFn,
        initialize: bool,
    ) -> Result<Self> {
        let response_fn = check_response_fn("ZIPoisson", response_fn, Self::RESPONSE_FNS)?;
        let params = vec![
            DistributionParam::new("rate", response_fn),
            DistributionParam::new("gate", ResponseFn::Sigmoid),
        ];
        debug!(
            %stabilization,
            %response_fn,
            %loss_fn,
            "configured ZIPoisson"
        );
        Ok(Self {
            params,
            stabilization,
            loss_fn,
            initialize,
        })
    }

    /// Build from option strings, e.g. `("None", "relu", "nll")`.
    pub fn from_options(stabilization: &str, response_fn: &str, loss_fn: &str) -> Result<Self> {
        let (stabilization, response_fn, loss_fn) = parse_options(
            "ZIPoisson",
            stabilization,
            response_fn,
            loss_fn,
            Self::RESPONSE_FNS,
        )?;
        Self::new(stabilization, response_fn, loss_fn, false)
    }

    /// Whether start values are computed before boosting.
    pub fn with_initialize(mut self, initialize: bool) -> Self {
        self.initialize = initialize;
        self
    }

    fn log_prob_scalar(&self, params: &[f64], target: f64) -> f64 {
        let rate = params[0];
        let gate = params[1];

        if rate <= 0.0 || !(0.0..=1.0).contains(&gate) {
            return f64::NEG_INFINITY;
        }
        if target < 0.0 || target.fract() != 0.0 {
            return f64::NEG_INFINITY;
        }

        if target == 0.0 {
            (gate + (1.0 - gate) * (-rate).exp()).ln()
        } else {
            match StatrsPoisson::new(rate) {
                Ok(poisson) => (-gate).ln_1p() + poisson.ln_pmf(target as u64),
                Err(_) => f64::NEG_INFINITY,
            }
        }
    }
}

#[derive(Deserialize)]
struct RawZIPoisson {
    params: Vec<DistributionParam>,
    stabilization: Stabilization,
    loss_fn: LossFn,
    initialize: bool,
}

impl TryFrom<RawZIPoisson> for ZIPoisson {
    type Error = ZeroLssError;

    fn try_from(raw: RawZIPoisson) -> Result<Self> {
        check_param_layout("ZIPoisson", &raw.params, &["rate", "gate"])?;
        Self::new(
            raw.stabilization,
            raw.params[0].response_fn,
            raw.loss_fn,
            raw.initialize,
        )
    }
}

impl Default for ZIPoisson {
    fn default() -> Self {
        Self {
            params: vec![
                DistributionParam::new("rate", ResponseFn::Relu),
                DistributionParam::new("gate", ResponseFn::Sigmoid),
            ],
            stabilization: Stabilization::None,
            loss_fn: LossFn::Nll,
            initialize: false,
        }
    }
}

#[typetag::serde]
impl Distribution for ZIPoisson {
    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "ZIPoisson"
    }

    fn is_discrete(&self) -> bool {
        true
    }

    fn params(&self) -> &[DistributionParam] {
        &self.params
    }

    fn loss_fn(&self) -> LossFn {
        self.loss_fn
    }

    fn stabilization(&self) -> Stabilization {
        self.stabilization
    }

    fn should_initialize(&self) -> bool {
        self.initialize
    }

    fn log_prob(&self, params: &[f64], target: f64) -> f64 {
        self.log_prob_scalar(params, target)
    }

    /// Mean of the positive counts as the rate, remaining zero excess as the gate.
    fn moment_estimates(&self, target: &ArrayView1<f64>) -> Option<Vec<f64>> {
        let positive: Vec<f64> = target.iter().copied().filter(|&y| y > 0.0).collect();
        if positive.is_empty() {
            return None;
        }
        let rate = positive.iter().sum::<f64>() / positive.len() as f64;
        let zero_share = target.iter().filter(|&&y| y == 0.0).count() as f64 / target.len() as f64;
        let poisson_zero = (-rate).exp();
        let gate = (zero_share - poisson_zero) / (1.0 - poisson_zero);
        Some(vec![rate, gate.clamp(0.01, 0.99)])
    }

    fn sample_observation(
        &self,
        params: &[f64],
        n_samples: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<f64> {
        let rate = params[0];
        let gate = params[1];

        if rate <= 0.0 || !(0.0..=1.0).contains(&gate) {
            return vec![0.0; n_samples];
        }
        let Ok(poisson) = RandPoisson::new(rate) else {
            return vec![0.0; n_samples];
        };
        (0..n_samples)
            .map(|_| {
                if rng.random_bool(gate) {
                    0.0
                } else {
                    poisson.sample(rng)
                }
            })
            .collect()
    }

    /// Analytical gradients for the Zero-Inflated Poisson NLL.
    ///
    /// With `p0 = gate + (1 - gate) * exp(-rate)`:
    /// - y = 0: NLL = -ln(p0)
    /// - y > 0: NLL = -ln(1 - gate) - y ln(rate) + rate + ln(y!)
    ///
    /// Derivatives are taken w.r.t. the parameters and chained through the
    /// response functions. Hessians use the Gauss-Newton diagonal.
    fn analytical_gradients(
        &self,
        predictions: &ArrayView2<f64>,
        transformed: &ArrayView2<f64>,
        target: &ArrayView1<f64>,
    ) -> Option<(Array2<f64>, Array2<f64>)> {
        let n_obs = predictions.nrows();
        let mut gradients = Array2::zeros((n_obs, 2));
        let mut hessians = Array2::zeros((n_obs, 2));

        let rate_fn = self.params[0].response_fn;
        let gate_fn = self.params[1].response_fn;

        for i in 0..n_obs {
            let rate = transformed[[i, 0]];
            let gate = transformed[[i, 1]];
            let y = target[i];

            let (grad_rate, hess_rate, grad_gate, hess_gate) = if y < 0.0 || y.fract() != 0.0 {
                (f64::NAN, f64::NAN, f64::NAN, f64::NAN)
            } else if y == 0.0 {
                let e = (-rate).exp();
                let p0 = gate + (1.0 - gate) * e;
                let a = (1.0 - gate) * e / p0;
                let b = (1.0 - e) / p0;
                (a, a * a - a, -b, b * b)
            } else {
                let one_minus_gate = 1.0 - gate;
                (
                    1.0 - y / rate,
                    y / (rate * rate),
                    1.0 / one_minus_gate,
                    1.0 / (one_minus_gate * one_minus_gate),
                )
            };

            let d_rate = rate_fn.derivative(predictions[[i, 0]]);
            let d_gate = gate_fn.derivative(predictions[[i, 1]]);

            gradients[[i, 0]] = grad_rate * d_rate;
            gradients[[i, 1]] = grad_gate * d_gate;
            // Invalid targets stay NaN so stabilization can replace them.
            hessians[[i, 0]] = floor_hessian(hess_rate * d_rate * d_rate);
            hessians[[i, 1]] = floor_hessian(hess_gate * d_gate * d_gate);
        }

        Some((gradients, hessians))
    }
}

fn floor_hessian(h: f64) -> f64 {
    if h.is_nan() { h } else { h.max(1e-6) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZeroLssError;
    use crate::utils::InverseResponseFn;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_zipoisson_creation() {
        let dist = ZIPoisson::default();
        assert_eq!(dist.n_params(), 2);
        assert_eq!(dist.param_names(), vec!["rate", "gate"]);
        assert!(dist.is_discrete());
        assert_eq!(
            dist.param_dict(),
            vec![("rate", ResponseFn::Relu), ("gate", ResponseFn::Sigmoid)]
        );
        assert_eq!(
            dist.param_dict_inv(),
            vec![
                ("rate", InverseResponseFn::ReluInv),
                ("gate", InverseResponseFn::SigmoidInv)
            ]
        );
    }

    #[test]
    fn test_zipoisson_rejects_unsupported_response_fn() {
        for bad in ["sigmoid", "identity", "EXP"] {
            let err = ZIPoisson::from_options("None", bad, "nll").unwrap_err();
            assert!(matches!(err, ZeroLssError::InvalidParameter(_)), "{bad}");
        }
        assert!(ZIPoisson::from_options("Huber", "exp", "nll").is_err());
        assert!(ZIPoisson::from_options("None", "exp", "mse").is_err());
    }

    #[test]
    fn test_zipoisson_log_prob() {
        let dist = ZIPoisson::default();
        let poisson = StatrsPoisson::new(3.0).unwrap();

        let log_p_zero = dist.log_prob_scalar(&[3.0, 0.2], 0.0);
        let expected_zero = (0.2 + 0.8 * poisson.pmf(0)).ln();
        assert_relative_eq!(log_p_zero, expected_zero, epsilon = 1e-10);

        let log_p_two = dist.log_prob_scalar(&[3.0, 0.2], 2.0);
        let expected_two = 0.8f64.ln() + poisson.ln_pmf(2);
        assert_relative_eq!(log_p_two, expected_two, epsilon = 1e-10);

        assert_eq!(dist.log_prob_scalar(&[3.0, 0.2], 1.5), f64::NEG_INFINITY);
        assert_eq!(dist.log_prob_scalar(&[3.0, 0.2], -1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_zipoisson_analytical_matches_numerical() {
        let dist = ZIPoisson::new(Stabilization::None, ResponseFn::Exp, LossFn::Nll, false)
            .unwrap();
        let predictions = array![[0.3, -0.5], [1.2, 0.4], [-0.2, 1.0], [0.8, -1.5]];
        let target = array![0.0, 3.0, 1.0, 0.0];
        let transformed = dist.transform_params(&predictions.view());

        let (grad_a, hess_a) = dist
            .analytical_gradients(&predictions.view(), &transformed.view(), &target.view())
            .unwrap();
        let (grad_n, _) = dist.numerical_gradients_hessians(
            &predictions.view(),
            &transformed.view(),
            &target.view(),
        );

        for (a, n) in grad_a.iter().zip(grad_n.iter()) {
            assert_relative_eq!(*a, *n, epsilon = 1e-4);
        }
        assert!(hess_a.iter().all(|&h| h > 0.0));
    }

    #[test]
    fn test_zipoisson_saturated_gate_has_flat_gradient() {
        let dist = ZIPoisson::new(Stabilization::None, ResponseFn::Exp, LossFn::Nll, false)
            .unwrap();
        // sigmoid(8) lies above the clamp band, sigmoid(-8) below it.
        let predictions = array![[0.5, 8.0], [0.5, -8.0], [1.0, 8.0]];
        let target = array![0.0, 0.0, 2.0];
        let transformed = dist.transform_params(&predictions.view());

        let (grad_a, _) = dist
            .analytical_gradients(&predictions.view(), &transformed.view(), &target.view())
            .unwrap();
        let (grad_n, _) = dist.numerical_gradients_hessians(
            &predictions.view(),
            &transformed.view(),
            &target.view(),
        );

        for i in 0..3 {
            assert_eq!(grad_a[[i, 1]], 0.0);
            assert_relative_eq!(grad_n[[i, 1]], 0.0, epsilon = 1e-8);
            assert_relative_eq!(grad_a[[i, 0]], grad_n[[i, 0]], epsilon = 1e-4);
        }
    }

    #[test]
    fn test_zipoisson_deserialize_validates() {
        let json = serde_json::to_string(&ZIPoisson::from_options("MAD", "exp", "crps").unwrap())
            .unwrap();
        let restored: ZIPoisson = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.params()[0].response_fn, ResponseFn::Exp);
        assert_eq!(restored.loss_fn(), LossFn::Crps);

        let sigmoid_rate = json.replacen("\"exp\"", "\"sigmoid\"", 1);
        assert!(serde_json::from_str::<ZIPoisson>(&sigmoid_rate).is_err());

        let relu_gate = r#"{"params":[{"name":"rate","response_fn":"exp"},
            {"name":"gate","response_fn":"relu"}],
            "stabilization":"None","loss_fn":"nll","initialize":false}"#;
        assert!(serde_json::from_str::<ZIPoisson>(relu_gate).is_err());

        let rate_only = r#"{"params":[{"name":"rate","response_fn":"exp"}],
            "stabilization":"None","loss_fn":"nll","initialize":false}"#;
        assert!(serde_json::from_str::<ZIPoisson>(rate_only).is_err());
    }

    #[test]
    fn test_zipoisson_sample() {
        let dist = ZIPoisson::default();
        let params = array![[4.0, 0.25]];
        let samples = dist.sample(&params.view(), 5000, 11);

        assert_eq!(samples.dim(), (5000, 1));
        assert!(samples.iter().all(|&v| v >= 0.0 && v.fract() == 0.0));

        // P(0) = 0.25 + 0.75 * exp(-4); mean = 0.75 * 4
        let zeros = samples.iter().filter(|&&v| v == 0.0).count() as f64 / 5000.0;
        assert_relative_eq!(zeros, 0.25 + 0.75 * (-4.0f64).exp(), epsilon = 0.03);
        assert_relative_eq!(samples.mean().unwrap(), 3.0, epsilon = 0.15);
    }

    #[test]
    fn test_zipoisson_moment_estimates() {
        let dist = ZIPoisson::default();
        let target = array![0.0, 0.0, 0.0, 2.0, 4.0];
        let est = dist.moment_estimates(&target.view()).unwrap();
        assert_relative_eq!(est[0], 3.0);
        let e = (-3.0f64).exp();
        assert_relative_eq!(est[1], (0.6 - e) / (1.0 - e), epsilon = 1e-12);

        let all_zero = array![0.0, 0.0];
        assert!(dist.moment_estimates(&all_zero.view()).is_none());
    }
}
