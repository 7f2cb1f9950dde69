//! # Apex iSAM
//!
//! Incremental smoothing and mapping for nonlinear least squares problems such
//! as pose-graph SLAM. New measurements are folded into an existing solution
//! by re-eliminating only the part of a Bayes tree they affect, instead of
//! re-solving the whole problem.
//!
//! ## Features
//!
//! - **Incremental updates**: add and remove factors and variables; only the
//!   cliques above the touched variables are rebuilt
//! - **Fluid relinearization**: variables whose correction grows beyond a
//!   threshold get a new linearization point, on a configurable schedule
//! - **Wildfire back-substitution**: the correction is refreshed only where it
//!   changes by more than a threshold
//! - **Dogleg mode**: Powell's dogleg trust-region step computed on the tree
//! - **Cholesky or QR** elimination of every clique
//! - **Batch reference solver**: sparse Gauss-Newton on faer for comparison
//!
//! ## Modules
//!
//! - [`core`]: keys, values, the nonlinear factor graph and the variable index
//! - [`factors`]: measurement models and their whitened linearization
//! - [`manifold`]: Lie groups the variables live on (Rⁿ, SE(2))
//! - [`linalg`]: Jacobian factors, Gaussian conditionals and sparse solvers
//! - [`inference`]: orderings, elimination trees and the Bayes tree
//! - [`optimizer`]: wildfire, dogleg and the batch Gauss-Newton solver
//! - [`isam`]: the incremental estimator

pub mod core;
pub mod error;
pub mod factors;
pub mod inference;
pub mod isam;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod manifold;
pub mod optimizer;

// Re-export core types
pub use core::{
    Key,
    factor_graph::NonlinearFactorGraph,
    values::{Value, Values},
    variable_index::VariableIndex,
};
pub use error::{ApexIsamError, ApexIsamResult};

// Re-export factor types
pub use factors::{BetweenFactor, Factor, NoiseModelFactor, NonlinearFactor, PriorFactor};

pub use inference::{BayesTree, Ordering};
pub use isam::{
    DoglegParams, GaussNewtonParams, Isam2, Isam2Params, Isam2Result, OptimizationParams,
    RelinearizationThreshold,
};
pub use linalg::{Factorization, JacobianFactor, VectorValues};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use optimizer::{BatchGaussNewton, GaussNewtonConfig, TrustRegionAdaptationMode};
