//! Prediction output for fitted distribution heads.

use crate::distributions::Distribution;
use crate::error::{Result, ZeroLssError};
use ndarray::{Array2, ArrayView1, ArrayView2};

/// Prediction types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredType {
    /// Return distributional parameters.
    Parameters,
    /// Draw samples from the predicted distribution.
    Samples,
    /// Calculate quantiles from samples.
    Quantiles,
}

/// Output of [`predict_dist`].
#[derive(Debug, Clone)]
pub enum PredictionOutput {
    /// Distributional parameters with shape (n_obs, n_params).
    Parameters(Array2<f64>),
    /// Samples with shape (n_samples, n_obs).
    Samples(Array2<f64>),
    /// Quantiles with shape (n_obs, n_quantiles).
    Quantiles(Array2<f64>),
}

/// Turn raw boosting outputs into parameters, samples or quantiles.
///
/// # Arguments
/// * `dist` - Distribution head
/// * `predictions` - Raw predictions with shape (n_obs, n_params)
/// * `start_values` - Raw start values added to every row, if the model was initialized
/// * `pred_type` - Kind of output
/// * `n_samples` - Samples per observation for `Samples` and `Quantiles`
/// * `quantiles` - Quantile levels in [0, 1]
/// * `seed` - Random seed
pub fn predict_dist<D: Distribution + ?Sized>(
    dist: &D,
    predictions: &ArrayView2<f64>,
    start_values: Option<&ArrayView1<f64>>,
    pred_type: PredType,
    n_samples: usize,
    quantiles: &[f64],
    seed: u64,
) -> Result<PredictionOutput> {
    let n_params = dist.n_params();
    if predictions.ncols() != n_params {
        return Err(ZeroLssError::ShapeMismatch {
            expected_shape: format!("({}, {})", predictions.nrows(), n_params),
            actual_shape: format!("{:?}", predictions.dim()),
        });
    }

    let mut raw = predictions.to_owned();
    if let Some(start) = start_values {
        if start.len() != n_params {
            return Err(ZeroLssError::InvalidInput(format!(
                "expected {} start values, got {}",
                n_params,
                start.len()
            )));
        }
        for mut row in raw.rows_mut() {
            row += start;
        }
    }

    let params = dist.transform_params(&raw.view());

    match pred_type {
        PredType::Parameters => Ok(PredictionOutput::Parameters(params)),
        PredType::Samples => {
            check_n_samples(n_samples)?;
            Ok(PredictionOutput::Samples(
                dist.sample(&params.view(), n_samples, seed),
            ))
        }
        PredType::Quantiles => {
            check_n_samples(n_samples)?;
            if let Some(&q) = quantiles.iter().find(|q| !(0.0..=1.0).contains(*q)) {
                return Err(ZeroLssError::InvalidParameter(format!(
                    "quantile level {q} is outside [0, 1]"
                )));
            }

            let samples = dist.sample(&params.view(), n_samples, seed);
            let n_obs = params.nrows();
            let mut result = Array2::zeros((n_obs, quantiles.len()));

            for i in 0..n_obs {
                let mut obs_samples: Vec<f64> = samples.column(i).to_vec();
                obs_samples.sort_by(|a, b| a.total_cmp(b));

                for (q_idx, &q) in quantiles.iter().enumerate() {
                    let value = interpolate_quantile(&obs_samples, q);
                    result[[i, q_idx]] = if dist.is_discrete() {
                        value.floor()
                    } else {
                        value
                    };
                }
            }
            Ok(PredictionOutput::Quantiles(result))
        }
    }
}

fn check_n_samples(n_samples: usize) -> Result<()> {
    if n_samples == 0 {
        return Err(ZeroLssError::InvalidParameter(
            "n_samples must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// Linear interpolation between the closest ranks of sorted samples.
fn interpolate_quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (pos - lo as f64) * (sorted[hi] - sorted[lo])
}
