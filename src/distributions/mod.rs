//! Distribution heads for zero-adjusted and zero-inflated targets.
//!
//! The [`Distribution`] trait carries the machinery shared by every head.
//! Each head only declares its parameters, log density and sampler.

pub mod base;
mod zagamma;
mod zipoisson;

pub use base::{Distribution, DistributionParam, GradientsAndHessians, LossFn, Stabilization};
pub use zagamma::ZAGamma;
pub use zipoisson::ZIPoisson;
