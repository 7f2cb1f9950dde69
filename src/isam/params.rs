//! Configuration of the incremental estimator.

use crate::core::{CoreError, CoreResult};
use crate::isam::relinearization::RelinearizationThreshold;
use crate::linalg::Factorization;
use crate::optimizer::TrustRegionAdaptationMode;
use tracing::info;

/// Wildfire back-substitution after every update.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussNewtonParams {
    /// Variables whose delta moves less than this (max-abs) do not wake
    /// their children.
    pub wildfire_threshold: f64,
}

impl Default for GaussNewtonParams {
    fn default() -> Self {
        Self {
            wildfire_threshold: 0.001,
        }
    }
}

/// Powell's dogleg step on the Bayes tree after every update.
#[derive(Debug, Clone, PartialEq)]
pub struct DoglegParams {
    /// Trust-region radius used by the first update.
    pub initial_delta: f64,
    /// Wildfire threshold used when refreshing the Gauss-Newton point.
    pub wildfire_threshold: f64,
    pub adaptation_mode: TrustRegionAdaptationMode,
    /// Log every trial step at info level.
    pub verbose: bool,
}

impl Default for DoglegParams {
    fn default() -> Self {
        Self {
            initial_delta: 1.0,
            wildfire_threshold: 1e-5,
            adaptation_mode: TrustRegionAdaptationMode::SearchEachIteration,
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptimizationParams {
    GaussNewton(GaussNewtonParams),
    Dogleg(DoglegParams),
}

impl Default for OptimizationParams {
    fn default() -> Self {
        OptimizationParams::GaussNewton(GaussNewtonParams::default())
    }
}

impl OptimizationParams {
    pub fn wildfire_threshold(&self) -> f64 {
        match self {
            OptimizationParams::GaussNewton(p) => p.wildfire_threshold,
            OptimizationParams::Dogleg(p) => p.wildfire_threshold,
        }
    }
}

/// Parameters of [`crate::isam::Isam2`].
///
/// ```
/// use apex_isam::isam::{Isam2Params, RelinearizationThreshold};
/// use apex_isam::linalg::Factorization;
///
/// let params = Isam2Params::new()
///     .with_relinearize_threshold(RelinearizationThreshold::Uniform(0.05))
///     .with_relinearize_skip(1)
///     .with_factorization(Factorization::QR);
/// assert!(params.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Isam2Params {
    pub optimization: OptimizationParams,
    pub relinearize_threshold: RelinearizationThreshold,
    /// Relinearization is checked only on every `relinearize_skip`-th update.
    pub relinearize_skip: usize,
    pub enable_relinearization: bool,
    /// Fill `error_before` and `error_after` of every result.
    pub evaluate_nonlinear_error: bool,
    pub factorization: Factorization,
    /// Reuse the last linearization of factors whose variables did not move.
    pub cache_linearized_factors: bool,
    /// Fill per-variable status in every result.
    pub enable_detailed_results: bool,
}

impl Default for Isam2Params {
    fn default() -> Self {
        Self {
            optimization: OptimizationParams::default(),
            relinearize_threshold: RelinearizationThreshold::Uniform(0.1),
            relinearize_skip: 10,
            enable_relinearization: true,
            evaluate_nonlinear_error: false,
            factorization: Factorization::Cholesky,
            cache_linearized_factors: true,
            enable_detailed_results: false,
        }
    }
}

impl Isam2Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_optimization(mut self, optimization: OptimizationParams) -> Self {
        self.optimization = optimization;
        self
    }

    /// Use the dogleg solver with the given parameters.
    pub fn with_dogleg(self, dogleg: DoglegParams) -> Self {
        self.with_optimization(OptimizationParams::Dogleg(dogleg))
    }

    pub fn with_relinearize_threshold(mut self, threshold: RelinearizationThreshold) -> Self {
        self.relinearize_threshold = threshold;
        self
    }

    pub fn with_relinearize_skip(mut self, skip: usize) -> Self {
        self.relinearize_skip = skip;
        self
    }

    pub fn with_relinearization(mut self, enable: bool) -> Self {
        self.enable_relinearization = enable;
        self
    }

    pub fn with_nonlinear_error(mut self, evaluate: bool) -> Self {
        self.evaluate_nonlinear_error = evaluate;
        self
    }

    pub fn with_factorization(mut self, factorization: Factorization) -> Self {
        self.factorization = factorization;
        self
    }

    pub fn with_linearized_factor_cache(mut self, enable: bool) -> Self {
        self.cache_linearized_factors = enable;
        self
    }

    pub fn with_detailed_results(mut self, enable: bool) -> Self {
        self.enable_detailed_results = enable;
        self
    }

    /// Reject parameter combinations the estimator cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.relinearize_skip == 0 {
            return Err(
                CoreError::InvalidInput("relinearize_skip must be at least 1".to_string()).log(),
            );
        }
        let wildfire = self.optimization.wildfire_threshold();
        if !(wildfire >= 0.0) || !wildfire.is_finite() {
            return Err(CoreError::InvalidInput(format!(
                "wildfire threshold must be finite and non-negative, got {wildfire}"
            ))
            .log());
        }
        if let OptimizationParams::Dogleg(dogleg) = &self.optimization
            && !(dogleg.initial_delta > 0.0 && dogleg.initial_delta.is_finite())
        {
            return Err(CoreError::InvalidInput(format!(
                "initial trust region radius must be positive, got {}",
                dogleg.initial_delta
            ))
            .log());
        }
        self.relinearize_threshold.validate()
    }

    /// Print configuration parameters (info level logging)
    pub fn print_configuration(&self) {
        let optimization = match &self.optimization {
            OptimizationParams::GaussNewton(p) => {
                format!("Gauss-Newton (wildfire {:.1e})", p.wildfire_threshold)
            }
            OptimizationParams::Dogleg(p) => format!(
                "Dogleg (Δ₀ {:.2e}, {}, wildfire {:.1e})",
                p.initial_delta, p.adaptation_mode, p.wildfire_threshold
            ),
        };
        info!(
            "\nConfiguration:\n  Solver:            iSAM2\n  Optimization:      {}\n  Factorization:     {}\n  Relinearization:   {} (every {} updates, threshold {})\n  Factor cache:      {}\n  Nonlinear error:   {}\n  Detailed results:  {}",
            optimization,
            self.factorization,
            if self.enable_relinearization {
                "enabled"
            } else {
                "disabled"
            },
            self.relinearize_skip,
            self.relinearize_threshold,
            if self.cache_linearized_factors {
                "enabled"
            } else {
                "disabled"
            },
            self.evaluate_nonlinear_error,
            self.enable_detailed_results,
        );
    }
}
