//! # zerolss
//!
//! Zero-adjusted and zero-inflated distribution heads for distributional
//! gradient boosting (Location, Scale, and Shape).
//!
//! Each head validates its response functions at construction, exposes its
//! parameters in a fixed order with paired inverse links, and inherits
//! gradient, hessian and loss computation from the [`Distribution`] trait.
//!
//! ## Example
//!
//! ```ignore
//! use zerolss::prelude::*;
//!
//! let dist = ZIPoisson::from_options("None", "softplus", "nll")?;
//! assert_eq!(dist.param_names(), vec!["rate", "gate"]);
//!
//! // Rejected: ZAGamma only supports "exp" and "softplus".
//! assert!(ZAGamma::from_options("None", "relu", "nll").is_err());
//! ```
//!
//! [`Distribution`]: distributions::Distribution

pub mod config;
pub mod distributions;
pub mod error;
pub mod prediction;
pub mod utils;

pub mod prelude {
    //! Convenient re-exports of commonly used types.
    pub use crate::config::{DistributionConfig, HeadOptions};
    pub use crate::distributions::{
        Distribution, DistributionParam, GradientsAndHessians, LossFn, Stabilization, ZAGamma,
        ZIPoisson,
    };
    pub use crate::error::{Result, ZeroLssError};
    pub use crate::prediction::{PredType, PredictionOutput, predict_dist};
    pub use crate::utils::{InverseResponseFn, ResponseFn};
}
