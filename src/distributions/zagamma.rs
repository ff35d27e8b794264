//! Zero-Adjusted Gamma distribution implementation.

use super::base::{
    Distribution, DistributionParam, LossFn, Stabilization, check_param_layout,
    check_response_fn, parse_options,
};
use crate::error::{Result, ZeroLssError};
use crate::utils::ResponseFn;
use ndarray::ArrayView1;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution as RandDistribution, Gamma as RandGamma};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Gamma as StatrsGamma};
use tracing::debug;

/// Zero-Adjusted Gamma distribution.
///
/// A Gamma distribution with an additional point mass at zero.
///
/// Distributional parameters, in order:
/// - `concentration`: shape of the Gamma part (alpha)
/// - `rate`: inverse scale of the Gamma part (beta)
/// - `gate`: probability of a zero, always linked through the sigmoid
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "RawZAGamma")]
pub struct ZAGamma {
    params: Vec<DistributionParam>,
    stabilization: Stabilization,
    loss_fn: LossFn,
    initialize: bool,
}

impl ZAGamma {
    /// Response functions accepted for `concentration` and `rate`.
    pub const RESPONSE_FNS: &'static [ResponseFn] = &[ResponseFn::Exp, ResponseFn::Softplus];

    pub fn new(
        stabilization: Stabilization,
        response_fn: ResponseFn,
        loss_fn: LossFn,
        initialize: bool,
    ) -> Result<Self> {
        let response_fn = check_response_fn("ZAGamma", response_fn, Self::RESPONSE_FNS)?;
        let params = vec![
            DistributionParam::new("concentration", response_fn),
            DistributionParam::new("rate", response_fn),
            DistributionParam::new("gate", ResponseFn::Sigmoid),
        ];
        debug!(
            %stabilization,
            %response_fn,
            %loss_fn,
            "configured ZAGamma"
        );
        Ok(Self {
            params,
            stabilization,
            loss_fn,
            initialize,
        })
    }

    /// Build from option strings, e.g. `("None", "exp", "nll")`.
    pub fn from_options(stabilization: &str, response_fn: &str, loss_fn: &str) -> Result<Self> {
        let (stabilization, response_fn, loss_fn) = parse_options(
            "ZAGamma",
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
        let concentration = params[0];
        let rate = params[1];
        let gate = params[2];

        if concentration <= 0.0 || rate <= 0.0 || !(0.0..=1.0).contains(&gate) || target < 0.0 {
            return f64::NEG_INFINITY;
        }

        if target == 0.0 {
            gate.ln()
        } else {
            match StatrsGamma::new(concentration, rate) {
                Ok(gamma_dist) => (-gate).ln_1p() + gamma_dist.ln_pdf(target),
                Err(_) => f64::NEG_INFINITY,
            }
        }
    }
}

/// Serialized form, validated through [`ZAGamma::new`] on deserialization.
#[derive(Deserialize)]
struct RawZAGamma {
    params: Vec<DistributionParam>,
    stabilization: Stabilization,
    loss_fn: LossFn,
    initialize: bool,
}

impl TryFrom<RawZAGamma> for ZAGamma {
    type Error = ZeroLssError;

    fn try_from(raw: RawZAGamma) -> Result<Self> {
        check_param_layout("ZAGamma", &raw.params, &["concentration", "rate", "gate"])?;
        let response_fn = raw.params[0].response_fn;
        if raw.params[1].response_fn != response_fn {
            return Err(ZeroLssError::InvalidParameter(format!(
                "ZAGamma links 'concentration' and 'rate' through the same function, got '{}' and '{}'",
                response_fn, raw.params[1].response_fn
            )));
        }
        Self::new(raw.stabilization, response_fn, raw.loss_fn, raw.initialize)
    }
}

impl Default for ZAGamma {
    fn default() -> Self {
        Self {
            params: vec![
                DistributionParam::new("concentration", ResponseFn::Exp),
                DistributionParam::new("rate", ResponseFn::Exp),
                DistributionParam::new("gate", ResponseFn::Sigmoid),
            ],
            stabilization: Stabilization::None,
            loss_fn: LossFn::Nll,
            initialize: false,
        }
    }
}

#[typetag::serde]
impl Distribution for ZAGamma {
    fn clone_box(&self) -> Box<dyn Distribution> {
        Box::new(self.clone())
    }

    fn name(&self) -> &'static str {
        "ZAGamma"
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

    /// Method-of-moments fit of the Gamma part plus the observed zero share.
    fn moment_estimates(&self, target: &ArrayView1<f64>) -> Option<Vec<f64>> {
        let positive: Vec<f64> = target.iter().copied().filter(|&y| y > 0.0).collect();
        if positive.len() < 2 {
            return None;
        }
        let n = positive.len() as f64;
        let mean = positive.iter().sum::<f64>() / n;
        let var = positive.iter().map(|y| (y - mean).powi(2)).sum::<f64>() / (n - 1.0);
        if var <= 0.0 {
            return None;
        }
        let zero_share = target.iter().filter(|&&y| y == 0.0).count() as f64 / target.len() as f64;
        Some(vec![
            mean * mean / var,
            mean / var,
            zero_share.clamp(0.01, 0.99),
        ])
    }

    fn sample_observation(
        &self,
        params: &[f64],
        n_samples: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<f64> {
        let concentration = params[0];
        let rate = params[1];
        let gate = params[2];

        if concentration <= 0.0 || rate <= 0.0 || !(0.0..=1.0).contains(&gate) {
            return vec![0.0; n_samples];
        }
        // rand_distr::Gamma uses shape and scale (1/rate) parameterization
        let Ok(gamma_dist) = RandGamma::new(concentration, 1.0 / rate) else {
            return vec![0.0; n_samples];
        };
        (0..n_samples)
            .map(|_| {
                if rng.random_bool(gate) {
                    0.0
                } else {
                    gamma_dist.sample(rng)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ZeroLssError;
    use crate::utils::InverseResponseFn;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_zagamma_creation() {
        let dist = ZAGamma::default();
        assert_eq!(dist.n_params(), 3);
        assert_eq!(dist.param_names(), vec!["concentration", "rate", "gate"]);
        assert!(!dist.is_discrete());
        assert!(!dist.should_initialize());
    }

    #[test]
    fn test_zagamma_rejects_unsupported_response_fn() {
        for bad in ["relu", "sigmoid", "squareplus", ""] {
            let err = ZAGamma::from_options("None", bad, "nll").unwrap_err();
            assert!(matches!(err, ZeroLssError::InvalidParameter(_)), "{bad}");
        }
        assert!(
            ZAGamma::new(Stabilization::None, ResponseFn::Relu, LossFn::Nll, false).is_err()
        );
    }

    #[test]
    fn test_zagamma_softplus_pairs() {
        let dist = ZAGamma::from_options("MAD", "softplus", "crps").unwrap();
        assert_eq!(
            dist.param_dict(),
            vec![
                ("concentration", ResponseFn::Softplus),
                ("rate", ResponseFn::Softplus),
                ("gate", ResponseFn::Sigmoid),
            ]
        );
        assert_eq!(
            dist.param_dict_inv(),
            vec![
                ("concentration", InverseResponseFn::SoftplusInv),
                ("rate", InverseResponseFn::SoftplusInv),
                ("gate", InverseResponseFn::SigmoidInv),
            ]
        );
        assert_eq!(dist.stabilization(), Stabilization::Mad);
        assert_eq!(dist.loss_fn(), LossFn::Crps);
    }

    #[test]
    fn test_zagamma_log_prob() {
        let dist = ZAGamma::default();

        let log_p_zero = dist.log_prob_scalar(&[2.0, 1.0, 0.1], 0.0);
        assert_relative_eq!(log_p_zero, 0.1f64.ln(), epsilon = 1e-10);

        let log_p_non_zero = dist.log_prob_scalar(&[2.0, 1.0, 0.1], 1.5);
        let gamma_dist = StatrsGamma::new(2.0, 1.0).unwrap();
        let expected_non_zero = (1.0 - 0.1f64).ln() + gamma_dist.ln_pdf(1.5);
        assert_relative_eq!(log_p_non_zero, expected_non_zero, epsilon = 1e-10);

        assert_eq!(dist.log_prob_scalar(&[2.0, 1.0, 0.1], -1.0), f64::NEG_INFINITY);
        assert_eq!(dist.log_prob_scalar(&[-2.0, 1.0, 0.1], 1.0), f64::NEG_INFINITY);
    }

    #[test]
    fn test_zagamma_sample_zero_share() {
        let dist = ZAGamma::default();
        let params = array![[2.0, 1.0, 0.3], [5.0, 2.0, 0.0]];
        let samples = dist.sample(&params.view(), 4000, 7);

        assert_eq!(samples.dim(), (4000, 2));
        assert!(samples.iter().all(|&v| v >= 0.0));

        let zeros = samples.column(0).iter().filter(|&&v| v == 0.0).count() as f64;
        assert_relative_eq!(zeros / 4000.0, 0.3, epsilon = 0.03);
        assert!(samples.column(1).iter().all(|&v| v > 0.0));

        // Mean of the Gamma(5, 2) column is 2.5
        let mean_1 = samples.column(1).sum() / 4000.0;
        assert_relative_eq!(mean_1, 2.5, epsilon = 0.1);
    }

    #[test]
    fn test_zagamma_deserialize_validates() {
        let json = serde_json::to_string(&ZAGamma::from_options("L2", "softplus", "nll").unwrap())
            .unwrap();
        let restored: ZAGamma = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.params()[0].response_fn, ResponseFn::Softplus);
        assert_eq!(restored.stabilization(), Stabilization::L2);

        let relu = json.replace("\"softplus\"", "\"relu\"");
        assert!(serde_json::from_str::<ZAGamma>(&relu).is_err());

        let two_params = r#"{"params":[{"name":"rate","response_fn":"exp"},
            {"name":"gate","response_fn":"sigmoid"}],
            "stabilization":"None","loss_fn":"nll","initialize":false}"#;
        assert!(serde_json::from_str::<ZAGamma>(two_params).is_err());

        let mixed = r#"{"params":[{"name":"concentration","response_fn":"exp"},
            {"name":"rate","response_fn":"softplus"},{"name":"gate","response_fn":"sigmoid"}],
            "stabilization":"None","loss_fn":"nll","initialize":false}"#;
        assert!(serde_json::from_str::<ZAGamma>(mixed).is_err());
    }

    #[test]
    fn test_zagamma_moment_estimates() {
        let dist = ZAGamma::default();
        let target = array![0.0, 1.0, 2.0, 3.0];
        let est = dist.moment_estimates(&target.view()).unwrap();
        // positives: mean 2, var 1
        assert_relative_eq!(est[0], 4.0);
        assert_relative_eq!(est[1], 2.0);
        assert_relative_eq!(est[2], 0.25);

        let sparse = array![0.0, 0.0, 4.0];
        assert!(dist.moment_estimates(&sparse.view()).is_none());
    }
}
