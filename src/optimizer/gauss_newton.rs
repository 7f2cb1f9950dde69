//! Batch Gauss-Newton over a whole nonlinear factor graph.
//!
//! Each iteration linearizes every factor at the current estimate, stacks the
//! whitened Jacobians into one sparse matrix and solves the normal equations
//!
//! ```text
//! JᵀJ·h = -Jᵀr
//! ```
//!
//! with the faer sparse Cholesky or QR backend, then retracts the estimate by
//! `h`. No trust region or damping is applied, so the solver is meant for
//! well-initialized problems. It serves as the reference the incremental
//! estimator is checked against.
//!
//! # Example
//!
//! ```
//! use apex_isam::core::{factor_graph::NonlinearFactorGraph, values::Values};
//! use apex_isam::factors::{NoiseModelFactor, PriorFactor};
//! use apex_isam::manifold::rn::Rn;
//! use apex_isam::optimizer::BatchGaussNewton;
//! use nalgebra::dvector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = NonlinearFactorGraph::new();
//! graph.add(NoiseModelFactor::new(
//!     vec![0],
//!     Box::new(PriorFactor::new(Rn::from_vec(vec![2.0]))),
//!     dvector![1.0],
//! )?);
//! let mut initial = Values::new();
//! initial.insert(0, Rn::from_vec(vec![0.0]))?;
//!
//! let result = BatchGaussNewton::new().optimize(&graph, &initial)?;
//! assert!(result.status.is_converged());
//! # Ok(())
//! # }
//! ```

use crate::core::{
    Key,
    factor_graph::{NonlinearFactorGraph, SharedFactor, linearize_factors},
    values::Values,
};
use crate::error::ApexIsamResult;
use crate::linalg::{self, Factorization, VectorValues};
use crate::optimizer::{OptimizationStatus, OptimizerError, SolverResult};
use faer::{
    Mat,
    sparse::{SparseColMat, Triplet},
};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::time;
use tracing::debug;

/// Configuration parameters for the batch Gauss-Newton solver.
#[derive(Clone, Debug)]
pub struct GaussNewtonConfig {
    /// Sparse factorization of the normal equations
    pub factorization: Factorization,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Relative cost change below which the run stops
    pub cost_tolerance: f64,
    /// Relative step size below which the run stops
    pub parameter_tolerance: f64,
    /// Gradient norm below which the run stops
    pub gradient_tolerance: f64,
    /// Optional wall-clock limit
    pub timeout: Option<time::Duration>,
}

impl Default for GaussNewtonConfig {
    fn default() -> Self {
        Self {
            factorization: Factorization::Cholesky,
            max_iterations: 50,
            cost_tolerance: 1e-6,
            parameter_tolerance: 1e-8,
            gradient_tolerance: 1e-10,
            timeout: None,
        }
    }
}

impl GaussNewtonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factorization(mut self, factorization: Factorization) -> Self {
        self.factorization = factorization;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_cost_tolerance(mut self, cost_tolerance: f64) -> Self {
        self.cost_tolerance = cost_tolerance;
        self
    }

    pub fn with_parameter_tolerance(mut self, parameter_tolerance: f64) -> Self {
        self.parameter_tolerance = parameter_tolerance;
        self
    }

    pub fn with_gradient_tolerance(mut self, gradient_tolerance: f64) -> Self {
        self.gradient_tolerance = gradient_tolerance;
        self
    }

    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Print configuration parameters (debug level logging)
    pub fn print_configuration(&self) {
        debug!(
            "\nConfiguration:\n  Solver:        Batch Gauss-Newton\n  Factorization: {}\n  Max iterations:      {}\n  Cost tolerance:      {:.2e}\n  Parameter tolerance: {:.2e}\n  Gradient tolerance:  {:.2e}\n  Timeout:             {:?}",
            self.factorization,
            self.max_iterations,
            self.cost_tolerance,
            self.parameter_tolerance,
            self.gradient_tolerance,
            self.timeout,
        );
    }
}

/// Column layout of the stacked Jacobian: key order and block offsets.
struct ColumnLayout {
    offsets: BTreeMap<Key, (usize, usize)>,
    total: usize,
}

impl ColumnLayout {
    fn new(values: &Values) -> Self {
        let mut offsets = BTreeMap::new();
        let mut total = 0;
        for (key, value) in values.iter() {
            offsets.insert(key, (total, value.dim()));
            total += value.dim();
        }
        ColumnLayout { offsets, total }
    }

    fn split(&self, step: &Mat<f64>) -> VectorValues {
        self.offsets
            .iter()
            .map(|(&key, &(offset, dim))| {
                (key, DVector::from_fn(dim, |i, _| step[(offset + i, 0)]))
            })
            .collect()
    }
}

/// Batch Gauss-Newton solver.
#[derive(Debug, Clone, Default)]
pub struct BatchGaussNewton {
    config: GaussNewtonConfig,
}

impl BatchGaussNewton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: GaussNewtonConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GaussNewtonConfig {
        &self.config
    }

    /// Stack every factor's whitened linearization into `(r, J)`.
    fn assemble(
        graph: &NonlinearFactorGraph,
        values: &Values,
        layout: &ColumnLayout,
    ) -> ApexIsamResult<(Mat<f64>, SparseColMat<usize, f64>)> {
        let factors: Vec<(usize, &SharedFactor)> = graph.iter().collect();
        let linearized = linearize_factors(&factors, values)?;

        let rows: usize = linearized.iter().map(|(_, f)| f.rows()).sum();
        let mut triplets = Vec::new();
        let mut residuals = Mat::<f64>::zeros(rows, 1);
        let mut row = 0;
        for (_, factor) in &linearized {
            for (i, key) in factor.keys().iter().enumerate() {
                let &(col, _) = layout
                    .offsets
                    .get(key)
                    .ok_or(crate::core::CoreError::UnknownVariable(*key))?;
                let block = factor.a_block(i);
                for c in 0..block.ncols() {
                    for r in 0..block.nrows() {
                        let value = block[(r, c)];
                        if value != 0.0 {
                            triplets.push(Triplet::new(row + r, col + c, value));
                        }
                    }
                }
            }
            // The factor stores b = -W r.
            for (r, b) in factor.b().iter().enumerate() {
                residuals[(row + r, 0)] = -b;
            }
            row += factor.rows();
        }

        let jacobian = SparseColMat::try_new_from_triplets(rows, layout.total, &triplets)
            .map_err(|e| {
                linalg::LinAlgError::SparseMatrixCreation(format!(
                    "{rows}x{} stacked Jacobian",
                    layout.total
                ))
                .log_with_source(e)
            })?;
        Ok((residuals, jacobian))
    }

    fn parameter_norm(values: &Values) -> f64 {
        values
            .iter()
            .map(|(_, v)| v.to_vector().norm_squared())
            .sum::<f64>()
            .sqrt()
    }

    /// Termination criteria in the order: numerical safety, limits, then
    /// gradient, step and cost tolerances.
    #[allow(clippy::too_many_arguments)]
    fn check_convergence(
        &self,
        iteration: usize,
        current_cost: f64,
        new_cost: f64,
        parameter_norm: f64,
        step_norm: f64,
        gradient_norm: f64,
        elapsed: time::Duration,
    ) -> Option<OptimizationStatus> {
        if !new_cost.is_finite() || !step_norm.is_finite() || !gradient_norm.is_finite() {
            return Some(OptimizationStatus::InvalidNumericalValues);
        }

        if let Some(timeout) = self.config.timeout
            && elapsed >= timeout
        {
            return Some(OptimizationStatus::Timeout);
        }

        if gradient_norm < self.config.gradient_tolerance {
            return Some(OptimizationStatus::GradientToleranceReached);
        }

        if iteration > 0 {
            // ||h|| ≤ ε (||x|| + ε)
            let relative_step_tolerance = self.config.parameter_tolerance
                * (parameter_norm + self.config.parameter_tolerance);
            if step_norm <= relative_step_tolerance {
                return Some(OptimizationStatus::ParameterToleranceReached);
            }

            let relative_cost_change = (current_cost - new_cost).abs() / current_cost.max(1e-10);
            if relative_cost_change < self.config.cost_tolerance {
                return Some(OptimizationStatus::CostToleranceReached);
            }
        }

        if iteration + 1 >= self.config.max_iterations {
            return Some(OptimizationStatus::MaxIterationsReached);
        }

        None
    }

    /// Minimize the error of `graph` starting from `initial`.
    ///
    /// Every variable in `initial` is optimized; every factor key must have a
    /// value in `initial`.
    pub fn optimize(
        &self,
        graph: &NonlinearFactorGraph,
        initial: &Values,
    ) -> ApexIsamResult<SolverResult<Values>> {
        if initial.is_empty() || graph.num_factors() == 0 {
            return Err(OptimizerError::EmptyProblem.log().into());
        }
        if self.config.max_iterations == 0 {
            return Err(OptimizerError::InvalidParameters(
                "max_iterations must be at least 1".to_string(),
            )
            .log()
            .into());
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration();
        }

        let start_time = time::Instant::now();
        let layout = ColumnLayout::new(initial);
        let mut solver = linalg::sparse_solver(self.config.factorization);
        let mut values = initial.clone();
        let initial_cost = graph.error(&values)?;
        let mut current_cost = initial_cost;
        let mut iteration = 0;

        loop {
            let (residuals, jacobian) = Self::assemble(graph, &values, &layout)?;
            let step = solver.solve_normal_equation(&residuals, &jacobian)?;
            let gradient_norm = solver
                .get_gradient()
                .map(|g| g.norm_l2())
                .ok_or_else(|| {
                    OptimizerError::LinearSolveFailed("solver kept no gradient".to_string()).log()
                })?;

            let step = layout.split(&step);
            let step_norm = step.norm();
            values = values.retract(&step)?;
            let new_cost = graph.error(&values)?;

            debug!(
                "iter {:>3}: cost {:.6e} -> {:.6e}, |g| {:.3e}, |h| {:.3e}",
                iteration, current_cost, new_cost, gradient_norm, step_norm
            );

            let status = self.check_convergence(
                iteration,
                current_cost,
                new_cost,
                Self::parameter_norm(&values),
                step_norm,
                gradient_norm,
                start_time.elapsed(),
            );
            current_cost = new_cost;

            if let Some(status) = status {
                let result = SolverResult {
                    parameters: values,
                    status,
                    initial_cost,
                    final_cost: current_cost,
                    iterations: iteration + 1,
                    elapsed_time: start_time.elapsed(),
                };
                debug!("{}", result);
                return Ok(result);
            }
            iteration += 1;
        }
    }
}
