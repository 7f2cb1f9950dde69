//! Incremental smoothing and mapping on a Bayes tree.
//!
//! [`Isam2`] keeps a nonlinear factor graph, its linearization point `θ`, the
//! Bayes tree of the linearized system and the linear correction `Δ`. Each
//! [`Isam2::update`] only rebuilds the part of the tree above the variables it
//! touches:
//!
//! 1. variables touched by new or removed factors, and variables whose `Δ`
//!    exceeds the relinearization threshold (plus the variables involved with
//!    them), are marked;
//! 2. the cliques of marked variables and all their ancestors form the *top*
//!    of the tree; subtrees hanging below the top are kept as orphans;
//! 3. the factors of the top variables, relinearized where needed and
//!    otherwise taken from the linear factor cache, are eliminated together
//!    with the cached separator factors of the orphans;
//! 4. the new cliques replace the top and the orphans are hung back below
//!    them;
//! 5. `Δ` is refreshed by wildfire back-substitution or a dogleg step.
//!
//! An update either completes or returns an error with the estimator left
//! exactly as it was.
//!
//! # Example
//!
//! ```
//! use apex_isam::core::{factor_graph::NonlinearFactorGraph, values::Values};
//! use apex_isam::factors::{BetweenFactor, NoiseModelFactor, PriorFactor};
//! use apex_isam::isam::{Isam2, Isam2Params};
//! use apex_isam::manifold::se2::SE2;
//! use nalgebra::dvector;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut isam = Isam2::new(Isam2Params::new())?;
//!
//! let mut graph = NonlinearFactorGraph::new();
//! graph.add(NoiseModelFactor::new(
//!     vec![0],
//!     Box::new(PriorFactor::new(SE2::identity())),
//!     dvector![0.1, 0.1, 0.05],
//! )?);
//! graph.add(NoiseModelFactor::new(
//!     vec![0, 1],
//!     Box::new(BetweenFactor::new(SE2::from_xy_angle(1.0, 0.0, 0.0))),
//!     dvector![0.2, 0.2, 0.1],
//! )?);
//! let mut values = Values::new();
//! values.insert(0, SE2::identity())?;
//! values.insert(1, SE2::from_xy_angle(0.9, 0.0, 0.0))?;
//!
//! let result = isam.update(graph, values, &[], None, false)?;
//! assert_eq!(result.new_factor_indices, vec![0, 1]);
//! let estimate = isam.current_estimate()?;
//! assert!((estimate.at(1)?.to_vector()[0] - 1.0).abs() < 1e-6);
//! # Ok(())
//! # }
//! ```

pub mod params;
pub mod relinearization;
pub mod result;

pub use params::{DoglegParams, GaussNewtonParams, Isam2Params, OptimizationParams};
pub use relinearization::RelinearizationThreshold;
pub use result::{DetailedResults, Isam2Result, VariableStatus};

use crate::core::{
    CoreError, CoreResult, Key,
    factor_graph::{NonlinearFactorGraph, SharedFactor, linearize_factors},
    values::{Value, Values},
    variable_index::VariableIndex,
};
use crate::error::{ApexIsamError, ApexIsamResult};
use crate::inference::{
    BayesTree, CliqueId, EliminatedNode, EliminationTree, InferenceError, InferenceResult,
    Ordering,
};
use crate::linalg::{JacobianFactor, VectorValues};
use crate::optimizer::{
    DoglegIteration, OptimizerError, WildfireUpdate, back_substitute,
    dog_leg::{self, steepest_descent_point},
    wildfire,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Incremental nonlinear least-squares estimator.
#[derive(Debug, Clone)]
pub struct Isam2 {
    params: Isam2Params,
    theta: Values,
    factors: NonlinearFactorGraph,
    variable_index: VariableIndex,
    tree: BayesTree,
    delta: VectorValues,
    /// Gauss-Newton point kept alongside the dogleg step.
    delta_newton: VectorValues,
    linear_cache: HashMap<usize, JacobianFactor>,
    update_count: usize,
    /// Trust-region radius carried between dogleg updates.
    dogleg_delta: f64,
}

impl Default for Isam2 {
    fn default() -> Self {
        Self::with_params(Isam2Params::default())
    }
}

/// Everything an update computes before the estimator is touched.
struct UpdatePlan {
    count: usize,
    error_before: Option<f64>,
    new_keys: BTreeSet<Key>,
    observed: BTreeSet<Key>,
    above_threshold: BTreeSet<Key>,
    involved: BTreeSet<Key>,
    relinearized_values: BTreeMap<Key, Value>,
    affected: BTreeSet<Key>,
    top: BTreeSet<CliqueId>,
    attach: Vec<(CliqueId, Key)>,
    nodes: Vec<EliminatedNode>,
    fresh: Vec<(usize, JacobianFactor)>,
    /// `θ` with relinearized and new variables, when errors are evaluated.
    staged_theta: Option<Values>,
}

enum DeltaStep {
    Wildfire(WildfireUpdate),
    Dogleg {
        newton: VectorValues,
        step: DoglegIteration,
    },
}

struct DeltaSolution {
    step: DeltaStep,
    backsubstituted: usize,
    error_after: Option<f64>,
}

impl Isam2 {
    pub fn new(params: Isam2Params) -> ApexIsamResult<Self> {
        params.validate()?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            params.print_configuration();
        }
        Ok(Self::with_params(params))
    }

    fn with_params(params: Isam2Params) -> Self {
        let dogleg_delta = match &params.optimization {
            OptimizationParams::Dogleg(dogleg) => dogleg.initial_delta,
            OptimizationParams::GaussNewton(_) => 0.0,
        };
        Isam2 {
            params,
            theta: Values::new(),
            factors: NonlinearFactorGraph::new(),
            variable_index: VariableIndex::new(),
            tree: BayesTree::new(),
            delta: VectorValues::new(),
            delta_newton: VectorValues::new(),
            linear_cache: HashMap::new(),
            update_count: 0,
            dogleg_delta,
        }
    }

    /// Add factors and variables without removals, constraints or forcing.
    pub fn add(
        &mut self,
        new_factors: NonlinearFactorGraph,
        new_values: Values,
    ) -> ApexIsamResult<Isam2Result> {
        self.update(new_factors, new_values, &[], None, false)
    }

    /// Incorporate new factors and variables, remove factors, and refresh
    /// the estimate.
    ///
    /// Every key of `new_factors` must be known or in `new_values`, and no
    /// key of `new_values` may be known yet. `constrained_keys` puts keys
    /// into ordering groups (higher groups are eliminated later); without it
    /// the observed keys are eliminated last. `force_relinearize` checks the
    /// relinearization thresholds regardless of the skip schedule.
    pub fn update(
        &mut self,
        new_factors: NonlinearFactorGraph,
        new_values: Values,
        remove_factor_indices: &[usize],
        constrained_keys: Option<&HashMap<Key, i32>>,
        force_relinearize: bool,
    ) -> ApexIsamResult<Isam2Result> {
        let new: Vec<SharedFactor> = new_factors.iter().map(|(_, f)| Arc::clone(f)).collect();
        let removed = self.validate_update(&new, &new_values, remove_factor_indices)?;
        let plan = self.plan(
            &new,
            &new_values,
            &removed,
            constrained_keys,
            force_relinearize,
        )?;
        self.apply(plan, new, new_values, remove_factor_indices)
    }

    fn validate_update(
        &self,
        new: &[SharedFactor],
        new_values: &Values,
        remove_factor_indices: &[usize],
    ) -> CoreResult<BTreeSet<usize>> {
        if let Some(key) = new_values.keys().find(|&k| self.theta.contains(k)) {
            return Err(CoreError::DuplicateVariable(key).log());
        }
        let mut removed = BTreeSet::new();
        for &slot in remove_factor_indices {
            if self.factors.get(slot).is_none() || !removed.insert(slot) {
                return Err(CoreError::InvalidFactorIndex(slot).log());
            }
        }
        for factor in new {
            if let Some(&key) = factor
                .keys()
                .iter()
                .find(|&&k| !self.theta.contains(k) && !new_values.contains(k))
            {
                return Err(CoreError::UnknownVariable(key).log());
            }
        }
        Ok(removed)
    }

    /// Error of the graph after the update's additions and removals.
    fn staged_error(
        &self,
        new: &[SharedFactor],
        removed: &BTreeSet<usize>,
        values: &Values,
    ) -> CoreResult<f64> {
        let kept = self
            .factors
            .iter()
            .filter(|(slot, _)| !removed.contains(slot))
            .map(|(_, f)| f.error(values))
            .sum::<CoreResult<f64>>()?;
        let added = new.iter().map(|f| f.error(values)).sum::<CoreResult<f64>>()?;
        Ok(kept + added)
    }

    /// Read-only part of an update: decide what is rebuilt and eliminate it.
    fn plan(
        &self,
        new: &[SharedFactor],
        new_values: &Values,
        removed: &BTreeSet<usize>,
        constrained_keys: Option<&HashMap<Key, i32>>,
        force_relinearize: bool,
    ) -> ApexIsamResult<UpdatePlan> {
        let count = self.update_count + 1;
        let new_keys: BTreeSet<Key> = new_values.keys().collect();

        let error_before = if self.params.evaluate_nonlinear_error {
            let mut estimate = self.theta.retract(&self.delta)?;
            for (key, value) in new_values.iter() {
                estimate.assign(key, value.clone());
            }
            Some(self.staged_error(new, removed, &estimate)?)
        } else {
            None
        };

        let mut observed: BTreeSet<Key> =
            new.iter().flat_map(|f| f.keys().iter().copied()).collect();
        for &slot in removed {
            if let Some(factor) = self.factors.get(slot) {
                observed.extend(factor.keys().iter().copied());
            }
        }

        // Relinearization
        let scheduled = relinearization::is_scheduled(
            count,
            self.params.relinearize_skip,
            self.params.enable_relinearization,
            force_relinearize,
        );
        let above_threshold = if scheduled {
            relinearization::check_relinearization(
                &self.delta,
                &self.theta,
                &self.params.relinearize_threshold,
            )?
        } else {
            BTreeSet::new()
        };
        let mut involved = relinearization::involved_in_tree(&self.tree, &above_threshold);
        for &key in &above_threshold {
            for slot in self.variable_index.factors_touching(key) {
                if let Some(factor) = self.factors.get(slot).filter(|_| !removed.contains(&slot)) {
                    involved.extend(factor.keys().iter().copied());
                }
            }
        }
        for factor in new {
            if factor.keys().iter().any(|k| above_threshold.contains(k)) {
                involved.extend(factor.keys().iter().copied());
            }
        }
        involved.retain(|k| !above_threshold.contains(k));

        let relinearized_values = above_threshold
            .iter()
            .map(|&key| {
                let step = self
                    .delta
                    .get(key)
                    .ok_or_else(|| CoreError::UnknownVariable(key).log())?;
                let value = self
                    .theta
                    .at(key)?
                    .retract(step)
                    .map_err(|e| CoreError::from(e).log())?;
                Ok((key, value))
            })
            .collect::<CoreResult<BTreeMap<Key, Value>>>()?;

        // The top of the tree and the orphans below it
        let marked: BTreeSet<Key> = observed
            .iter()
            .chain(&above_threshold)
            .chain(&involved)
            .copied()
            .collect();
        let top = self.tree.top_of(&marked);
        let orphans = self.tree.orphans_of(&top);
        let mut affected: BTreeSet<Key> = top
            .iter()
            .filter_map(|&id| self.tree.clique(id))
            .map(|c| c.frontal())
            .collect();
        affected.extend(new_keys.iter().copied());

        // Factors living entirely on the affected variables. The others are
        // summarized by the orphans' cached separator factors.
        let mut old_slots = BTreeSet::new();
        for &key in &affected {
            old_slots.extend(
                self.variable_index
                    .factors_touching(key)
                    .filter(|slot| !removed.contains(slot)),
            );
        }
        let first_slot = self.factors.len();
        let mut linear: Vec<JacobianFactor> = Vec::new();
        let mut to_linearize: Vec<(usize, &SharedFactor)> = Vec::new();
        for slot in old_slots {
            let Some(factor) = self.factors.get(slot) else {
                continue;
            };
            if !factor.keys().iter().all(|k| affected.contains(k)) {
                continue;
            }
            let reusable = self.params.cache_linearized_factors
                && !factor.keys().iter().any(|k| above_threshold.contains(k));
            match self.linear_cache.get(&slot).filter(|_| reusable) {
                Some(cached) => linear.push(cached.clone()),
                None => to_linearize.push((slot, factor)),
            }
        }
        to_linearize.extend(new.iter().enumerate().map(|(i, f)| (first_slot + i, f)));

        let mut lin_point = Values::new();
        for (_, factor) in &to_linearize {
            for &key in factor.keys() {
                if lin_point.contains(key) {
                    continue;
                }
                let value = match (new_values.get(key), relinearized_values.get(&key)) {
                    (Some(v), _) | (None, Some(v)) => v.clone(),
                    (None, None) => self.theta.at(key)?.clone(),
                };
                lin_point.assign(key, value);
            }
        }
        let fresh = linearize_factors(&to_linearize, &lin_point)?;
        linear.extend(fresh.iter().map(|(_, f)| f.clone()));
        linear.extend(
            orphans
                .iter()
                .filter_map(|&id| self.tree.clique(id))
                .map(|c| c.cached_factor().clone()),
        );

        let factor_keys: Vec<&[Key]> = linear.iter().map(|f| f.keys()).collect();
        let ordering = match constrained_keys {
            Some(groups) => {
                let constraints: HashMap<Key, i32> = groups
                    .iter()
                    .filter(|(k, _)| affected.contains(k))
                    .map(|(&k, &group)| (k, group))
                    .collect();
                Ordering::minimum_degree(&affected, &factor_keys, Some(&constraints))?
            }
            // Observed variables go last unless the update touches everything.
            None if self.theta.len() + new_keys.len() > observed.len() => {
                let last: BTreeSet<Key> = observed.intersection(&affected).copied().collect();
                Ordering::constrained_last(&affected, &factor_keys, &last)?
            }
            None => Ordering::minimum_degree(&affected, &factor_keys, None)?,
        };

        let etree = EliminationTree::new(linear, ordering)?;
        let attach = orphans
            .iter()
            .map(|&id| self.attachment(id, etree.ordering()))
            .collect::<InferenceResult<Vec<_>>>()?;
        let nodes = etree.eliminate(self.params.factorization)?;

        let needs_theta = self.params.evaluate_nonlinear_error
            || matches!(self.params.optimization, OptimizationParams::Dogleg(_));
        let staged_theta = needs_theta.then(|| {
            let mut theta = self.theta.clone();
            for (&key, value) in &relinearized_values {
                theta.assign(key, value.clone());
            }
            for (key, value) in new_values.iter() {
                theta.assign(key, value.clone());
            }
            theta
        });

        debug!(
            "update {}: {} observed, {} above threshold, {} involved, {} re-eliminated, {} orphans",
            count,
            observed.len(),
            above_threshold.len(),
            involved.len(),
            affected.len(),
            attach.len()
        );

        Ok(UpdatePlan {
            count,
            error_before,
            new_keys,
            observed,
            above_threshold,
            involved,
            relinearized_values,
            affected,
            top,
            attach,
            nodes,
            fresh,
            staged_theta,
        })
    }

    /// The new clique an orphan hangs under: the one of its separator
    /// variable eliminated first.
    fn attachment(&self, id: CliqueId, ordering: &Ordering) -> InferenceResult<(CliqueId, Key)> {
        let separator = self
            .tree
            .clique(id)
            .map(|c| c.separator().to_vec())
            .unwrap_or_default();
        let first = separator
            .iter()
            .filter_map(|&k| ordering.position(k).map(|p| (p, k)))
            .min();
        match first {
            Some((_, key)) => Ok((id, key)),
            None => Err(InferenceError::DetachedOrphan {
                clique: id,
                separator,
            }
            .log()),
        }
    }

    /// Refresh `Δ` on the already rebuilt tree without committing it.
    fn solve_delta(
        &self,
        replaced: &HashSet<Key>,
        new: &[SharedFactor],
        staged_theta: Option<&Values>,
    ) -> ApexIsamResult<DeltaSolution> {
        // The removed factors are already out of the graph at this point.
        let none_removed = BTreeSet::new();
        let error_at = |theta: &Values, step: &VectorValues| -> ApexIsamResult<f64> {
            Ok(self.staged_error(new, &none_removed, &theta.retract(step)?)?)
        };

        match &self.params.optimization {
            OptimizationParams::GaussNewton(gn) => {
                let update = wildfire(&self.tree, replaced, gn.wildfire_threshold, &self.delta)?;
                let theta = staged_theta.filter(|_| self.params.evaluate_nonlinear_error);
                let error_after = match theta {
                    Some(theta) => {
                        let mut delta = self.delta.clone();
                        update.apply_to(&mut delta);
                        Some(error_at(theta, &delta)?)
                    }
                    None => None,
                };
                Ok(DeltaSolution {
                    backsubstituted: update.recalculated,
                    step: DeltaStep::Wildfire(update),
                    error_after,
                })
            }
            OptimizationParams::Dogleg(dogleg) => {
                let theta = staged_theta.ok_or_else(|| {
                    ApexIsamError::from(
                        OptimizerError::InvalidParameters(
                            "dogleg step without a staged linearization point".to_string(),
                        )
                        .log(),
                    )
                })?;
                let update = wildfire(
                    &self.tree,
                    replaced,
                    dogleg.wildfire_threshold,
                    &self.delta_newton,
                )?;
                let mut dx_n = self.delta_newton.clone();
                update.apply_to(&mut dx_n);
                let dx_u = steepest_descent_point(&self.tree)?;
                let f_error = self.staged_error(new, &none_removed, theta)?;

                let step = dog_leg::iterate(
                    self.dogleg_delta,
                    dogleg.adaptation_mode,
                    &dx_u,
                    &dx_n,
                    &self.tree,
                    f_error,
                    |dx| error_at(theta, dx),
                    dogleg.verbose,
                )?;
                let error_after = if self.params.evaluate_nonlinear_error {
                    match step.f_error {
                        Some(error) => Some(error),
                        None => Some(error_at(theta, &step.dx)?),
                    }
                } else {
                    None
                };
                Ok(DeltaSolution {
                    backsubstituted: update.recalculated,
                    step: DeltaStep::Dogleg { newton: dx_n, step },
                    error_after,
                })
            }
        }
    }

    /// Put removed factors back into the graph and the variable index.
    fn restore_factors(&mut self, removed: Vec<(usize, SharedFactor)>) {
        self.variable_index
            .add_factors(removed.iter().map(|(slot, f)| (*slot, f.keys())));
        self.factors.restore(removed);
    }

    /// Mutating part of an update. Every fallible step comes first and is
    /// undone if a later one fails.
    fn apply(
        &mut self,
        plan: UpdatePlan,
        new: Vec<SharedFactor>,
        new_values: Values,
        remove_factor_indices: &[usize],
    ) -> ApexIsamResult<Isam2Result> {
        let removed_factors = self.factors.remove_many(remove_factor_indices)?;
        if let Err(e) = self
            .variable_index
            .remove_factors(removed_factors.iter().map(|(slot, f)| (*slot, f.keys())))
        {
            self.factors.restore(removed_factors);
            return Err(e.into());
        }

        let reeliminated = plan.nodes.len();
        let edit = match self.tree.replace_top(&plan.top, plan.nodes, &plan.attach) {
            Ok(edit) => edit,
            Err(e) => {
                self.restore_factors(removed_factors);
                return Err(e.into());
            }
        };

        let replaced: HashSet<Key> = plan.affected.iter().copied().collect();
        let solution = match self.solve_delta(&replaced, &new, plan.staged_theta.as_ref()) {
            Ok(solution) => solution,
            Err(e) => {
                self.tree.revert(edit);
                self.restore_factors(removed_factors);
                return Err(e);
            }
        };

        let detail = self.params.enable_detailed_results.then(|| {
            let mut detail = DetailedResults::default();
            for &key in &plan.affected {
                detail.entry(key).is_reeliminated = true;
            }
            for &key in &plan.above_threshold {
                let status = detail.entry(key);
                status.is_above_relin_threshold = true;
                status.is_relinearized = true;
            }
            for &key in &plan.involved {
                detail.entry(key).is_relinearize_involved = true;
            }
            for &key in &plan.observed {
                detail.entry(key).is_observed = true;
            }
            for &key in &plan.new_keys {
                detail.entry(key).is_new = true;
            }
            for id in self.tree.root_cliques() {
                if let Some(clique) = self.tree.clique(id) {
                    detail.entry(clique.frontal()).in_root_clique = true;
                }
            }
            detail
        });

        // Commit
        let new_factor_indices: Vec<usize> =
            new.into_iter().map(|f| self.factors.push(f)).collect();
        self.variable_index.add_factors(
            new_factor_indices
                .iter()
                .filter_map(|&slot| self.factors.get(slot).map(|f| (slot, f.keys()))),
        );
        for &key in &plan.new_keys {
            self.variable_index.add_variable(key);
        }
        for (key, value) in plan.relinearized_values {
            self.theta.assign(key, value);
        }
        for (key, value) in new_values.iter() {
            self.theta.assign(key, value.clone());
        }
        for (slot, _) in &removed_factors {
            self.linear_cache.remove(slot);
        }
        if self.params.cache_linearized_factors {
            self.linear_cache.extend(plan.fresh);
        }
        match solution.step {
            DeltaStep::Wildfire(update) => update.apply_to(&mut self.delta),
            DeltaStep::Dogleg { newton, step } => {
                self.delta = step.dx;
                self.delta_newton = newton;
                self.dogleg_delta = step.delta;
            }
        }
        self.update_count = plan.count;

        let result = Isam2Result {
            error_before: plan.error_before,
            error_after: solution.error_after,
            variables_relinearized: plan.above_threshold.len(),
            variables_reeliminated: reeliminated,
            cliques: self.tree.len(),
            cliques_reeliminated: edit.new_cliques().len(),
            orphans: plan.attach.len(),
            variables_backsubstituted: solution.backsubstituted,
            new_factor_indices,
            detail,
        };
        debug!("update {}: {}", self.update_count, result);
        Ok(result)
    }

    pub fn params(&self) -> &Isam2Params {
        &self.params
    }

    /// Linearization point `θ`.
    pub fn linearization_point(&self) -> &Values {
        &self.theta
    }

    pub fn factors(&self) -> &NonlinearFactorGraph {
        &self.factors
    }

    pub fn variable_index(&self) -> &VariableIndex {
        &self.variable_index
    }

    pub fn bayes_tree(&self) -> &BayesTree {
        &self.tree
    }

    /// The possibly incomplete correction kept by wildfire or the last
    /// dogleg step.
    pub fn delta(&self) -> &VectorValues {
        &self.delta
    }

    /// Cached linearization of a factor slot.
    pub fn linearized_factor(&self, slot: usize) -> Option<&JacobianFactor> {
        self.linear_cache.get(&slot)
    }

    /// Number of completed updates.
    pub fn update_count(&self) -> usize {
        self.update_count
    }

    /// Current trust-region radius; zero in Gauss-Newton mode.
    pub fn trust_region_radius(&self) -> f64 {
        self.dogleg_delta
    }

    /// `θ ⊞ Δ` with `Δ` from a full back-substitution through the tree.
    pub fn current_estimate(&self) -> ApexIsamResult<Values> {
        let delta = back_substitute(&self.tree)?;
        Ok(self.theta.retract(&delta)?)
    }

    /// One variable of `θ ⊞ Δ`, using the cached `Δ`.
    pub fn current_estimate_of(&self, key: Key) -> ApexIsamResult<Value> {
        let value = self.theta.at(key)?;
        match self.delta.get(key) {
            Some(step) => Ok(value.retract(step).map_err(CoreError::from)?),
            None => Ok(value.clone()),
        }
    }

    /// `θ ⊞ Δ` for every variable, using the cached `Δ`.
    pub fn calculate_estimate(&self) -> ApexIsamResult<Values> {
        Ok(self.theta.retract(&self.delta)?)
    }

    /// Gradient of the linearized error at `Δ = 0`.
    pub fn gradient_at_zero(&self) -> VectorValues {
        self.tree.gradient_at_zero()
    }

    /// Minimizer of the linearized error along the negative gradient.
    pub fn optimize_gradient_search(&self) -> ApexIsamResult<VectorValues> {
        Ok(steepest_descent_point(&self.tree)?)
    }

    /// Nonlinear error of all factors at [`Self::calculate_estimate`].
    pub fn nonlinear_error(&self) -> ApexIsamResult<f64> {
        Ok(self.factors.error(&self.calculate_estimate()?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::{BetweenFactor, NoiseModelFactor, PriorFactor};
    use crate::inference::InferenceError;
    use crate::linalg::LinAlgError;
    use crate::manifold::rn::Rn;
    use nalgebra::dvector;

    const TOLERANCE: f64 = 1e-9;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    fn prior(key: Key, x: f64) -> CoreResult<NoiseModelFactor> {
        NoiseModelFactor::new(
            vec![key],
            Box::new(PriorFactor::new(Rn::from_vec(vec![x]))),
            dvector![1.0],
        )
    }

    fn odometry(from: Key, to: Key, dx: f64) -> CoreResult<NoiseModelFactor> {
        NoiseModelFactor::new(
            vec![from, to],
            Box::new(BetweenFactor::new(Rn::from_vec(vec![dx]))),
            dvector![1.0],
        )
    }

    fn scalar(x: f64) -> Value {
        Rn::from_vec(vec![x]).into()
    }

    fn estimate_of(isam: &Isam2, key: Key) -> Result<f64, Box<dyn std::error::Error>> {
        Ok(isam.current_estimate()?.at(key)?.to_vector()[0])
    }

    #[test]
    fn test_first_update_solves_linear_chain() -> TestResult {
        let mut isam = Isam2::default();
        let mut graph = NonlinearFactorGraph::new();
        graph.add(prior(0, 1.0)?);
        graph.add(odometry(0, 1, 2.0)?);
        graph.add(odometry(1, 2, 3.0)?);
        let values: Values = (0..3).map(|k| (k, scalar(0.0))).collect();

        let result = isam.add(graph, values)?;
        assert_eq!(result.new_factor_indices, vec![0, 1, 2]);
        assert_eq!(result.variables_reeliminated, 3);
        assert_eq!(result.cliques, 3);
        assert_eq!(result.variables_backsubstituted, 3);
        for (key, expected) in [(0, 1.0), (1, 3.0), (2, 6.0)] {
            assert!((estimate_of(&isam, key)? - expected).abs() < TOLERANCE);
        }
        isam.bayes_tree().check_running_intersection()?;
        assert_eq!(isam.update_count(), 1);
        Ok(())
    }

    #[test]
    fn test_second_update_extends_the_chain() -> TestResult {
        let mut isam = Isam2::default();
        let mut graph = NonlinearFactorGraph::new();
        graph.add(prior(0, 0.0)?);
        isam.add(graph, [(0, scalar(0.5))].into_iter().collect())?;

        let mut graph = NonlinearFactorGraph::new();
        graph.add(odometry(0, 1, 1.0)?);
        let result = isam.add(graph, [(1, scalar(0.0))].into_iter().collect())?;
        assert_eq!(result.new_factor_indices, vec![1]);
        assert!((estimate_of(&isam, 1)? - 1.0).abs() < TOLERANCE);
        assert_eq!(isam.variable_index().num_variables(), 2);
        Ok(())
    }

    #[test]
    fn test_root_summary_factor_has_an_error() -> TestResult {
        let mut isam = Isam2::default();
        let mut graph = NonlinearFactorGraph::new();
        graph.add(prior(0, 0.0)?);
        isam.add(graph, [(0, scalar(0.5))].into_iter().collect())?;

        let root = isam
            .bayes_tree()
            .root_cliques()
            .next()
            .and_then(|id| isam.bayes_tree().clique(id))
            .ok_or("empty tree")?;
        let summary = root.cached_factor();
        assert!(summary.keys().is_empty());
        let error = summary.error(&VectorValues::new())?;
        assert!(error.is_finite() && error >= 0.0);
        Ok(())
    }

    #[test]
    fn test_invalid_input_leaves_state_untouched() -> TestResult {
        let mut isam = Isam2::default();
        let mut graph = NonlinearFactorGraph::new();
        graph.add(prior(0, 0.0)?);
        isam.add(graph, [(0, scalar(0.0))].into_iter().collect())?;
        let theta = isam.linearization_point().clone();
        let index = isam.variable_index().clone();

        let duplicate = isam.add(
            NonlinearFactorGraph::new(),
            [(0, scalar(1.0))].into_iter().collect(),
        );
        assert!(matches!(
            duplicate,
            Err(ApexIsamError::Core(CoreError::DuplicateVariable(0)))
        ));

        let mut graph = NonlinearFactorGraph::new();
        graph.add(odometry(0, 9, 1.0)?);
        assert!(matches!(
            isam.add(graph, Values::new()),
            Err(ApexIsamError::Core(CoreError::UnknownVariable(9)))
        ));

        assert!(matches!(
            isam.update(NonlinearFactorGraph::new(), Values::new(), &[3], None, false),
            Err(ApexIsamError::Core(CoreError::InvalidFactorIndex(3)))
        ));

        assert_eq!(isam.linearization_point(), &theta);
        assert_eq!(isam.variable_index(), &index);
        assert_eq!(isam.update_count(), 1);
        Ok(())
    }

    #[test]
    fn test_unconstrained_new_variable_is_rolled_back() -> TestResult {
        let mut isam = Isam2::default();
        let mut graph = NonlinearFactorGraph::new();
        graph.add(prior(0, 0.0)?);
        isam.add(graph, [(0, scalar(0.0))].into_iter().collect())?;
        let cliques = isam.bayes_tree().len();

        let error = isam
            .add(NonlinearFactorGraph::new(), [(5, scalar(0.0))].into_iter().collect())
            .err()
            .ok_or("expected a failure")?;
        assert!(error.is_numerical());
        assert!(matches!(
            error,
            ApexIsamError::LinearAlgebra(LinAlgError::IndeterminantSystem { key: 5 })
        ));
        assert!(!isam.linearization_point().contains(5));
        assert_eq!(isam.bayes_tree().len(), cliques);
        Ok(())
    }

    #[test]
    fn test_removing_a_factor_updates_the_estimate() -> TestResult {
        let mut isam = Isam2::default();
        let mut graph = NonlinearFactorGraph::new();
        graph.add(prior(0, 0.0)?);
        graph.add(prior(0, 2.0)?);
        isam.add(graph, [(0, scalar(0.0))].into_iter().collect())?;
        assert!((estimate_of(&isam, 0)? - 1.0).abs() < TOLERANCE);

        let result = isam.update(NonlinearFactorGraph::new(), Values::new(), &[1], None, false)?;
        assert!(result.new_factor_indices.is_empty());
        assert!((estimate_of(&isam, 0)? - 0.0).abs() < TOLERANCE);
        assert!(isam.factors().get(1).is_none());
        assert!(isam.linearized_factor(1).is_none());
        assert_eq!(isam.variable_index().num_entries(), 1);
        Ok(())
    }

    #[test]
    fn test_detailed_results_flags() -> TestResult {
        let mut isam = Isam2::new(Isam2Params::new().with_detailed_results(true))?;
        let mut graph = NonlinearFactorGraph::new();
        graph.add(prior(0, 0.0)?);
        graph.add(odometry(0, 1, 1.0)?);
        let result = isam.add(graph, (0..2).map(|k| (k, scalar(0.0))).collect())?;
        let detail = result.detail.ok_or("no detail")?;
        for key in 0..2 {
            let status = detail.status(key).ok_or("missing status")?;
            assert!(status.is_new && status.is_observed && status.is_reeliminated);
            assert!(!status.is_relinearized);
        }
        let roots: usize = detail
            .variable_status
            .values()
            .filter(|s| s.in_root_clique)
            .count();
        assert_eq!(roots, isam.bayes_tree().root_cliques().count());
        Ok(())
    }

    #[test]
    fn test_orphan_without_attachment_is_structural() -> TestResult {
        let isam = Isam2::default();
        let ordering = Ordering::from_keys(vec![])?;
        assert!(matches!(
            isam.attachment(0, &ordering),
            Err(InferenceError::DetachedOrphan { clique: 0, .. })
        ));
        Ok(())
    }
}
