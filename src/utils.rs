//! Response functions and their inverses.
//!
//! Response functions map unconstrained boosting outputs onto the support of
//! each distributional parameter. The inverse functions go the other way and
//! are used to turn parameter-space estimates into raw start values.

use crate::error::{Result, ZeroLssError};
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Response function types for transforming distributional parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFn {
    /// Exponential transformation for strictly positive values.
    Exp,
    /// Softplus transformation for strictly positive values.
    Softplus,
    /// ReLU transformation for non-negative values.
    Relu,
    /// Sigmoid transformation for values in (0, 1).
    Sigmoid,
}

/// Inverse of a [`ResponseFn`], mapping parameter values back to the raw scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InverseResponseFn {
    /// Natural logarithm, inverse of `exp`.
    Log,
    /// Inverse softplus.
    SoftplusInv,
    /// Inverse ReLU on the non-negative half line.
    ReluInv,
    /// Logit, inverse of `sigmoid`.
    SigmoidInv,
}

impl ResponseFn {
    /// Key used to select this function in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            ResponseFn::Exp => "exp",
            ResponseFn::Softplus => "softplus",
            ResponseFn::Relu => "relu",
            ResponseFn::Sigmoid => "sigmoid",
        }
    }

    /// The inverse paired with this response function.
    pub fn inverse(&self) -> InverseResponseFn {
        match self {
            ResponseFn::Exp => InverseResponseFn::Log,
            ResponseFn::Softplus => InverseResponseFn::SoftplusInv,
            ResponseFn::Relu => InverseResponseFn::ReluInv,
            ResponseFn::Sigmoid => InverseResponseFn::SigmoidInv,
        }
    }

    /// Apply the response function to an array of values.
    pub fn apply(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        match self {
            ResponseFn::Exp => exp_fn(x),
            ResponseFn::Softplus => softplus_fn(x),
            ResponseFn::Relu => relu_fn(x),
            ResponseFn::Sigmoid => sigmoid_fn(x),
        }
    }

    /// Apply the response function to a single value.
    pub fn apply_scalar(&self, x: f64) -> f64 {
        match self {
            ResponseFn::Exp => exp_scalar(x),
            ResponseFn::Softplus => softplus_scalar(x),
            ResponseFn::Relu => relu_scalar(x),
            ResponseFn::Sigmoid => sigmoid_scalar(x),
        }
    }

    /// Compute the derivative of the response function at x.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ResponseFn::Exp => x.exp(),
            // d/dx softplus(x) = sigmoid(x)
            ResponseFn::Softplus => 1.0 / (1.0 + (-x).exp()),
            ResponseFn::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            ResponseFn::Sigmoid => {
                let s = 1.0 / (1.0 + (-x).exp());
                // Flat where the output is clamped
                let shifted = s + EPSILON;
                if shifted <= SIGMOID_CLAMP_MIN || shifted >= SIGMOID_CLAMP_MAX {
                    0.0
                } else {
                    s * (1.0 - s)
                }
            }
        }
    }
}

impl fmt::Display for ResponseFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResponseFn {
    type Err = ZeroLssError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exp" => Ok(ResponseFn::Exp),
            "softplus" => Ok(ResponseFn::Softplus),
            "relu" => Ok(ResponseFn::Relu),
            "sigmoid" => Ok(ResponseFn::Sigmoid),
            other => Err(ZeroLssError::InvalidParameter(format!(
                "Unknown response function '{other}'. Please choose from 'exp', 'softplus', 'relu' or 'sigmoid'."
            ))),
        }
    }
}

impl InverseResponseFn {
    /// Key of the inverse function.
    pub fn name(&self) -> &'static str {
        match self {
            InverseResponseFn::Log => "log",
            InverseResponseFn::SoftplusInv => "softplusinv",
            InverseResponseFn::ReluInv => "reluinv",
            InverseResponseFn::SigmoidInv => "sigmoidinv",
        }
    }

    /// Apply the inverse to an array of parameter values.
    pub fn apply(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        x.mapv(|v| self.apply_scalar(v))
    }

    /// Apply the inverse to a single parameter value.
    pub fn apply_scalar(&self, x: f64) -> f64 {
        match self {
            InverseResponseFn::Log => log_scalar(x),
            InverseResponseFn::SoftplusInv => softplusinv_scalar(x),
            InverseResponseFn::ReluInv => reluinv_scalar(x),
            InverseResponseFn::SigmoidInv => sigmoidinv_scalar(x),
        }
    }
}

impl fmt::Display for InverseResponseFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

const EPSILON: f64 = 1e-6;
const SIGMOID_CLAMP_MIN: f64 = 1e-3;
const SIGMOID_CLAMP_MAX: f64 = 1.0 - 1e-3;

/// Replace NaN and infinity values with the mean of the array.
pub fn nan_to_num(x: &ArrayView1<f64>) -> Array1<f64> {
    let valid_values: Vec<f64> = x.iter().filter(|v| v.is_finite()).copied().collect();
    let mean = if valid_values.is_empty() {
        0.0
    } else {
        valid_values.iter().sum::<f64>() / valid_values.len() as f64
    };

    x.mapv(|v| if v.is_finite() { v } else { mean })
}

fn nan_to_num_scalar(x: f64, replacement: f64) -> f64 {
    if x.is_finite() { x } else { replacement }
}

// ============================================================================
// Array functions
// ============================================================================

/// Exponential function for strictly positive values.
pub fn exp_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    nan_to_num(x).mapv(|v| v.exp() + EPSILON)
}

/// Softplus function for strictly positive values.
/// softplus(x) = ln(1 + exp(x))
pub fn softplus_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    nan_to_num(x).mapv(softplus_scalar)
}

/// ReLU function for non-negative values.
pub fn relu_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    nan_to_num(x).mapv(|v| v.max(0.0) + EPSILON)
}

/// Sigmoid function for values in (0, 1).
pub fn sigmoid_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    nan_to_num(x).mapv(sigmoid_scalar)
}

/// Natural logarithm, inverse of [`exp_fn`].
pub fn log_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    InverseResponseFn::Log.apply(x)
}

/// Inverse softplus, inverse of [`softplus_fn`].
pub fn softplusinv_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    InverseResponseFn::SoftplusInv.apply(x)
}

/// Inverse ReLU, inverse of [`relu_fn`] on the non-negative half line.
pub fn reluinv_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    InverseResponseFn::ReluInv.apply(x)
}

/// Logit, inverse of [`sigmoid_fn`].
pub fn sigmoidinv_fn(x: &ArrayView1<f64>) -> Array1<f64> {
    InverseResponseFn::SigmoidInv.apply(x)
}

// ============================================================================
// Scalar functions
// ============================================================================

fn exp_scalar(x: f64) -> f64 {
    nan_to_num_scalar(x, 0.0).exp() + EPSILON
}

fn softplus_scalar(x: f64) -> f64 {
    let x = nan_to_num_scalar(x, 0.0);
    // Numerically stable softplus
    if x > 20.0 {
        x + EPSILON
    } else if x < -20.0 {
        EPSILON
    } else {
        x.exp().ln_1p() + EPSILON
    }
}

fn sigmoid_scalar(x: f64) -> f64 {
    let x = nan_to_num_scalar(x, 0.0);
    let s = 1.0 / (1.0 + (-x).exp()) + EPSILON;
    s.clamp(SIGMOID_CLAMP_MIN, SIGMOID_CLAMP_MAX)
}

fn relu_scalar(x: f64) -> f64 {
    nan_to_num_scalar(x, 0.0).max(0.0) + EPSILON
}

fn log_scalar(x: f64) -> f64 {
    x.max(EPSILON).ln()
}

fn softplusinv_scalar(x: f64) -> f64 {
    let x = x.max(EPSILON);
    if x > 20.0 {
        x
    } else {
        x + (-(-x).exp_m1()).ln()
    }
}

fn reluinv_scalar(x: f64) -> f64 {
    x.max(0.0)
}

fn sigmoidinv_scalar(x: f64) -> f64 {
    let x = x.clamp(SIGMOID_CLAMP_MIN, SIGMOID_CLAMP_MAX);
    (x / (1.0 - x)).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_exp_fn() {
        let x = array![0.0, 1.0];
        let result = exp_fn(&x.view());
        assert_relative_eq!(result[0], 1.0 + EPSILON, epsilon = 1e-10);
        assert_relative_eq!(result[1], std::f64::consts::E + EPSILON, epsilon = 1e-10);
    }

    #[test]
    fn test_softplus_fn() {
        let x = array![0.0];
        let result = softplus_fn(&x.view());
        assert_relative_eq!(result[0], 2.0_f64.ln() + EPSILON, epsilon = 1e-10);
    }

    #[test]
    fn test_sigmoid_fn() {
        let x = array![0.0, 50.0, -50.0];
        let result = sigmoid_fn(&x.view());
        assert_relative_eq!(result[0], 0.5 + EPSILON, epsilon = 1e-6);
        assert_relative_eq!(result[1], SIGMOID_CLAMP_MAX);
        assert_relative_eq!(result[2], SIGMOID_CLAMP_MIN);
    }

    #[test]
    fn test_relu_fn() {
        let x = array![-2.0, 3.0];
        let result = relu_fn(&x.view());
        assert_relative_eq!(result[0], EPSILON);
        assert_relative_eq!(result[1], 3.0 + EPSILON);
    }

    #[test]
    fn test_nan_handling() {
        let x = array![1.0, f64::NAN, 3.0];
        let result = nan_to_num(&x.view());
        // Mean of valid values is 2.0
        assert_eq!(result[0], 1.0);
        assert_eq!(result[1], 2.0);
        assert_eq!(result[2], 3.0);

        assert_relative_eq!(ResponseFn::Exp.apply_scalar(f64::NAN), 1.0 + EPSILON);
    }

    #[test]
    fn test_inverse_pairs() {
        assert_eq!(ResponseFn::Exp.inverse(), InverseResponseFn::Log);
        assert_eq!(ResponseFn::Softplus.inverse(), InverseResponseFn::SoftplusInv);
        assert_eq!(ResponseFn::Relu.inverse(), InverseResponseFn::ReluInv);
        assert_eq!(ResponseFn::Sigmoid.inverse(), InverseResponseFn::SigmoidInv);
    }

    #[test]
    fn test_inverse_recovers_raw_value() {
        for x in [-1.5, -0.2, 0.3, 2.0] {
            let exp = ResponseFn::Exp;
            assert_relative_eq!(
                exp.inverse().apply_scalar(exp.apply_scalar(x)),
                x,
                epsilon = 1e-5
            );
            let softplus = ResponseFn::Softplus;
            assert_relative_eq!(
                softplus.inverse().apply_scalar(softplus.apply_scalar(x)),
                x,
                epsilon = 1e-5
            );
            let sigmoid = ResponseFn::Sigmoid;
            assert_relative_eq!(
                sigmoid.inverse().apply_scalar(sigmoid.apply_scalar(x)),
                x,
                epsilon = 1e-4
            );
        }
        assert_relative_eq!(
            ResponseFn::Relu
                .inverse()
                .apply_scalar(ResponseFn::Relu.apply_scalar(2.5)),
            2.5,
            epsilon = 1e-5
        );
    }

    #[test]
    fn test_inverse_array_fns() {
        let x = array![0.5, 1.0];
        assert_relative_eq!(log_fn(&x.view())[1], 0.0);
        assert_relative_eq!(sigmoidinv_fn(&x.view())[0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(reluinv_fn(&x.view())[0], 0.5);
        assert_relative_eq!(
            softplusinv_fn(&x.view())[1],
            (1.0_f64.exp() - 1.0).ln(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn test_response_fn_from_str() {
        assert_eq!("exp".parse::<ResponseFn>().unwrap(), ResponseFn::Exp);
        assert_eq!("relu".parse::<ResponseFn>().unwrap(), ResponseFn::Relu);
        assert!(matches!(
            "tanh".parse::<ResponseFn>(),
            Err(ZeroLssError::InvalidParameter(_))
        ));
        assert_eq!(ResponseFn::Softplus.to_string(), "softplus");
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let h = 1e-6;
        for f in [ResponseFn::Exp, ResponseFn::Softplus, ResponseFn::Sigmoid] {
            let x = 0.7;
            let fd = (f.apply_scalar(x + h) - f.apply_scalar(x - h)) / (2.0 * h);
            assert_relative_eq!(f.derivative(x), fd, epsilon = 1e-6);
        }
        assert_eq!(ResponseFn::Relu.derivative(1.0), 1.0);
        assert_eq!(ResponseFn::Relu.derivative(-1.0), 0.0);
    }

    #[test]
    fn test_sigmoid_derivative_vanishes_when_clamped() {
        for x in [-10.0, -7.0, 7.0, 10.0] {
            assert_eq!(
                ResponseFn::Sigmoid.apply_scalar(x + 1e-3),
                ResponseFn::Sigmoid.apply_scalar(x)
            );
            assert_eq!(ResponseFn::Sigmoid.derivative(x), 0.0, "{x}");
        }
        assert!(ResponseFn::Sigmoid.derivative(6.0) > 0.0);
        assert!(ResponseFn::Sigmoid.derivative(-6.0) > 0.0);
    }
}
