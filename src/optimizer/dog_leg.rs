//! Dog Leg trust region step on the Bayes tree.
//!
//! Powell's Dog Leg method constructs a piecewise linear path within a
//! spherical trust region of radius Δ, connecting three points:
//!
//! 1. **Origin** (the current linearization point)
//! 2. **Steepest-descent point** `dx_u = -α·g` with `α = (gᵀg) / ||R g||²`
//! 3. **Gauss-Newton point** `dx_n` (back-substitution through the tree)
//!
//! The gradient `g = -[R S]ᵀ d` is summed from the per-clique contributions
//! cached when each clique was eliminated, so no Jacobian is rebuilt.
//!
//! ## Step Selection Strategy
//!
//! **Case 1: GN step inside trust region** (`||dx_n|| ≤ Δ`)
//! ```text
//! h = dx_n
//! ```
//!
//! **Case 2: Even the steepest-descent point is outside** (`||dx_u|| ≥ Δ`)
//! ```text
//! h = (Δ / ||dx_u||) · dx_u
//! ```
//!
//! **Case 3: Dog leg interpolation**
//! ```text
//! h(β) = dx_u + β·(dx_n - dx_u),  where β ∈ [0,1] satisfies ||h(β)|| = Δ
//! ```
//!
//! ## Trust Region Management
//!
//! The gain ratio compares the actual nonlinear error reduction with the
//! reduction predicted by the Bayes tree's linear model:
//!
//! ```text
//! ρ = (f(x) - f(x ⊞ h)) / (M(0) - M(h))
//! ```
//!
//! **Good step** (`ρ ≥ 0.75`): `Δ ← max(Δ, 3·||h||)`
//! **Moderate step** (`0.25 ≤ ρ < 0.75`): keep Δ
//! **Poor step** (`ρ < 0.25`): `Δ ← Δ/2`, down to a minimum of 1e-5, at
//! which point a rejected step becomes the zero step.
//!
//! [`TrustRegionAdaptationMode`] decides whether the radius search repeats
//! within one update.

use crate::error::ApexIsamResult;
use crate::inference::BayesTree;
use crate::linalg::{LinAlgResult, VectorValues};
use std::fmt;
use tracing::{debug, info, warn};

/// Radius below which the trust region stops shrinking.
const MIN_RADIUS: f64 = 1e-5;

/// Gain ratio above which the radius grows.
const GOOD_STEP_QUALITY: f64 = 0.75;

/// Gain ratio below which the radius shrinks.
const POOR_STEP_QUALITY: f64 = 0.25;

/// How the trust region radius is adapted within one update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TrustRegionAdaptationMode {
    /// Take the dogleg point for the current radius without evaluating the
    /// step; the radius never changes.
    Fixed,
    /// Evaluate one step and adapt the radius once.
    OneStepPerIteration,
    /// Keep growing or shrinking the radius until the step quality settles.
    #[default]
    SearchEachIteration,
}

impl fmt::Display for TrustRegionAdaptationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrustRegionAdaptationMode::Fixed => write!(f, "Fixed"),
            TrustRegionAdaptationMode::OneStepPerIteration => write!(f, "One step per iteration"),
            TrustRegionAdaptationMode::SearchEachIteration => write!(f, "Search each iteration"),
        }
    }
}

/// Type of step taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    /// Full Gauss-Newton step
    GaussNewton,
    /// Scaled steepest descent
    SteepestDescent,
    /// Dog leg interpolation
    DogLeg,
    /// No step; the trust region collapsed
    Zero,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepType::GaussNewton => write!(f, "GN"),
            StepType::SteepestDescent => write!(f, "SD"),
            StepType::DogLeg => write!(f, "DL"),
            StepType::Zero => write!(f, "0"),
        }
    }
}

/// Outcome of one trust-region update.
#[derive(Debug, Clone)]
pub struct DoglegIteration {
    /// Radius after adaptation.
    pub delta: f64,
    /// Accepted step.
    pub dx: VectorValues,
    pub step_type: StepType,
    /// Nonlinear error at the accepted step; `None` in fixed mode.
    pub f_error: Option<f64>,
    /// Gain ratio of the last evaluated step; `None` in fixed mode.
    pub rho: Option<f64>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum LastAction {
    None,
    IncreasedDelta,
    DecreasedDelta,
}

/// Steepest-descent point `-α·g` minimizing the linear model along `-g`.
pub fn steepest_descent_point(tree: &BayesTree) -> LinAlgResult<VectorValues> {
    let gradient = tree.gradient_at_zero();
    let g_norm_sq = gradient.squared_norm();
    let rg_norm_sq = tree.r_norm_squared(&gradient)?;

    // Avoid division by zero
    let alpha = if rg_norm_sq.abs() > 1e-15 {
        g_norm_sq / rg_norm_sq
    } else {
        1.0
    };
    Ok(gradient.scaled(-alpha))
}

/// Point on the dog leg path at radius `delta`.
pub fn dog_leg_point(
    dx_u: &VectorValues,
    dx_n: &VectorValues,
    delta: f64,
) -> (VectorValues, StepType) {
    let gn_norm = dx_n.norm();
    let cauchy_norm = dx_u.norm();

    // Case 1: Full Gauss-Newton step fits in trust region
    if gn_norm <= delta {
        return (dx_n.clone(), StepType::GaussNewton);
    }

    // Case 2: Even the steepest-descent point is outside trust region
    if cauchy_norm >= delta {
        let scale = if cauchy_norm > 0.0 {
            delta / cauchy_norm
        } else {
            0.0
        };
        return (dx_u.scaled(scale), StepType::SteepestDescent);
    }

    // Case 3: intersect the segment dx_u + β·(dx_n - dx_u) with the boundary.
    //   a = vᵀv, b = dx_uᵀv, c = ||dx_u||² - Δ²  with  v = dx_n - dx_u
    let v = dx_n.axpy(-1.0, dx_u);
    let a = v.squared_norm();
    let b = dx_u.dot(&v);
    let c = cauchy_norm * cauchy_norm - delta * delta;
    let d_squared = b * b - a * c;

    let beta = if d_squared < 0.0 || a.abs() < 1e-15 {
        1.0
    } else {
        let d = d_squared.sqrt();
        // Pick the form that avoids cancellation.
        if b <= 0.0 { (-b + d) / a } else { -c / (b + d) }
    };
    let beta = beta.clamp(0.0, 1.0);

    (dx_u.axpy(beta, &v), StepType::DogLeg)
}

/// Gain ratio `(f_before - f_after) / (M(0) - M(h))`, 0.5 when either
/// reduction vanishes.
fn step_quality(f_before: f64, f_after: f64, m_zero: f64, m_step: f64) -> f64 {
    let actual = f_before - f_after;
    let predicted = m_zero - m_step;
    if actual.abs() < 1e-15 || predicted.abs() < 1e-15 {
        0.5
    } else {
        actual / predicted
    }
}

/// Choose a step within the trust region and adapt its radius.
///
/// `f_error` is the nonlinear error at the linearization point and
/// `nonlinear_error` evaluates it at the point retracted by a step.
#[allow(clippy::too_many_arguments)]
pub fn iterate<F>(
    delta: f64,
    mode: TrustRegionAdaptationMode,
    dx_u: &VectorValues,
    dx_n: &VectorValues,
    tree: &BayesTree,
    f_error: f64,
    mut nonlinear_error: F,
    verbose: bool,
) -> ApexIsamResult<DoglegIteration>
where
    F: FnMut(&VectorValues) -> ApexIsamResult<f64>,
{
    if mode == TrustRegionAdaptationMode::Fixed {
        let (dx, step_type) = dog_leg_point(dx_u, dx_n, delta);
        return Ok(DoglegIteration {
            delta,
            dx,
            step_type,
            f_error: None,
            rho: None,
        });
    }

    let m_zero = tree.linear_error(&VectorValues::zeros_like(dx_n))?;
    let mut delta = delta;
    let mut last_action = LastAction::None;

    loop {
        let (mut dx, mut step_type) = dog_leg_point(dx_u, dx_n, delta);
        let mut new_f_error = nonlinear_error(&dx)?;
        let m_step = tree.linear_error(&dx)?;
        let rho = step_quality(f_error, new_f_error, m_zero, m_step);

        if verbose {
            info!(
                "dogleg: Δ = {:.3e}, step {} |h| = {:.3e}, f = {:.6e} -> {:.6e}, ρ = {:.3}",
                delta,
                step_type,
                dx.norm(),
                f_error,
                new_f_error,
                rho
            );
        }

        let stay = if rho >= GOOD_STEP_QUALITY {
            // Good step, increase trust region (max(radius, 3*step_norm))
            let new_delta = delta.max(3.0 * dx.norm());
            let stay = match mode {
                TrustRegionAdaptationMode::SearchEachIteration => {
                    new_delta != delta && last_action != LastAction::DecreasedDelta
                }
                _ => false,
            };
            if stay {
                last_action = LastAction::IncreasedDelta;
            }
            delta = new_delta;
            stay
        } else if rho >= POOR_STEP_QUALITY {
            // Moderate step, keep trust region unchanged
            false
        } else if rho >= 0.0 {
            // Poor but still a decrease: shrink and possibly search again
            if delta > MIN_RADIUS {
                delta *= 0.5;
                let stay = mode != TrustRegionAdaptationMode::OneStepPerIteration
                    && last_action != LastAction::IncreasedDelta;
                if stay {
                    last_action = LastAction::DecreasedDelta;
                }
                stay
            } else {
                false
            }
        } else if delta > MIN_RADIUS {
            // The error went up: shrink and retry
            delta *= 0.5;
            last_action = LastAction::DecreasedDelta;
            true
        } else {
            warn!(
                "dogleg: trust region collapsed below {:.1e} without decreasing the error, taking a zero step",
                MIN_RADIUS
            );
            dx = VectorValues::zeros_like(dx_n);
            new_f_error = f_error;
            step_type = StepType::Zero;
            false
        };

        if !stay {
            debug!(
                "dogleg accepted {} step, Δ = {:.3e}, ρ = {:.3}",
                step_type, delta, rho
            );
            return Ok(DoglegIteration {
                delta,
                dx,
                step_type,
                f_error: Some(new_f_error),
                rho: Some(rho),
            });
        }
    }
}
