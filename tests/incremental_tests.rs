//! End-to-end behaviour of the incremental estimator on SE(2) pose chains.
//!
//! # Test Coverage
//!
//! - Incremental vs. batch: repeated updates reach the batch Gauss-Newton
//!   optimum
//! - Locality: a new pose or a loop closure only re-eliminates the path from
//!   the touched cliques to the root
//! - No-op updates leave the estimator unchanged
//! - The linear factor cache always matches the linearization point
//! - The Bayes tree satisfies the running intersection property after every
//!   update
//! - Wildfire stops at cliques whose parents did not move
//! - Only variables whose delta crosses the threshold are relinearized

mod common;

use apex_isam::core::{factor_graph::NonlinearFactorGraph, values::Values};
use apex_isam::factors::{BetweenFactor, NoiseModelFactor, PriorFactor};
use apex_isam::isam::{GaussNewtonParams, Isam2, Isam2Params, RelinearizationThreshold};
use apex_isam::linalg::Factorization;
use apex_isam::manifold::{LieGroup, rn::Rn, se2::SE2};
use apex_isam::optimizer::{BatchGaussNewton, GaussNewtonConfig};
use common::{TestResult, between_factor, max_difference, pose_chain, snapshot, tree_snapshot};

const TOLERANCE: f64 = 1e-6;

/// Every update relinearizes and back-substitutes everything, so each update
/// is one full Gauss-Newton iteration.
fn exhaustive_params() -> Isam2Params {
    Isam2Params::new()
        .with_optimization(apex_isam::isam::OptimizationParams::GaussNewton(
            GaussNewtonParams {
                wildfire_threshold: 0.0,
            },
        ))
        .with_relinearize_threshold(RelinearizationThreshold::Uniform(0.0))
        .with_relinearize_skip(1)
}

fn batch_optimum(steps: &[common::Step]) -> Result<Values, Box<dyn std::error::Error>> {
    let (graph, initial) = common::merge(steps)?;
    let solver = BatchGaussNewton::with_config(
        GaussNewtonConfig::new()
            .with_max_iterations(100)
            .with_cost_tolerance(1e-14)
            .with_parameter_tolerance(1e-12)
            .with_gradient_tolerance(1e-12),
    );
    Ok(solver.optimize(&graph, &initial)?.parameters)
}

fn converge(isam: &mut Isam2, updates: usize) -> TestResult {
    for _ in 0..updates {
        isam.update(NonlinearFactorGraph::new(), Values::new(), &[], None, true)?;
    }
    Ok(())
}

#[test]
fn test_incremental_matches_batch_optimum() -> TestResult {
    let steps = pose_chain(25, Some(6))?;
    let mut isam = Isam2::new(exhaustive_params())?;
    for (graph, values) in steps.iter().cloned() {
        isam.add(graph, values)?;
    }
    converge(&mut isam, 10)?;

    let batch = batch_optimum(&steps)?;
    let incremental = isam.current_estimate()?;
    assert_eq!(incremental.len(), 25);
    let difference = max_difference(&batch, &incremental)?;
    assert!(
        difference < TOLERANCE,
        "incremental estimate is {difference:.3e} away from the batch optimum"
    );
    Ok(())
}

#[test]
fn test_incremental_matches_batch_with_qr() -> TestResult {
    let steps = pose_chain(15, Some(5))?;
    let mut isam = Isam2::new(exhaustive_params().with_factorization(Factorization::QR))?;
    for (graph, values) in steps.iter().cloned() {
        isam.add(graph, values)?;
    }
    converge(&mut isam, 10)?;

    let difference = max_difference(&batch_optimum(&steps)?, &isam.current_estimate()?)?;
    assert!(difference < TOLERANCE);
    Ok(())
}

#[test]
fn test_default_params_stay_close_to_batch() -> TestResult {
    let steps = pose_chain(20, Some(7))?;
    let mut isam = Isam2::default();
    for (graph, values) in steps.iter().cloned() {
        isam.add(graph, values)?;
    }
    // Relinearization thresholds and wildfire leave a small residual error.
    let difference = max_difference(&batch_optimum(&steps)?, &isam.current_estimate()?)?;
    assert!(difference < 0.1, "difference {difference:.3e}");
    Ok(())
}

#[test]
fn test_new_pose_reeliminates_only_the_root() -> TestResult {
    let steps = pose_chain(12, None)?;
    let mut isam = Isam2::new(Isam2Params::new().with_relinearization(false))?;
    for (i, (graph, values)) in steps.into_iter().enumerate() {
        let result = isam.add(graph, values)?;
        assert_eq!(result.cliques, i + 1);
        if i >= 1 {
            // The previous pose is the root; it and the new pose are rebuilt.
            assert_eq!(result.variables_reeliminated, 2);
            assert_eq!(result.cliques_reeliminated, 2);
            assert_eq!(result.orphans, usize::from(i >= 2));
        }
    }
    Ok(())
}

#[test]
fn test_loop_closure_leaves_older_subtree_untouched() -> TestResult {
    let steps = pose_chain(21, None)?;
    let mut isam = Isam2::new(
        Isam2Params::new()
            .with_relinearization(false)
            .with_detailed_results(true),
    )?;
    for (graph, values) in steps {
        isam.add(graph, values)?;
    }
    let before = tree_snapshot(isam.bayes_tree());

    let truth = common::ground_truth(21);
    let mut closure = NonlinearFactorGraph::new();
    closure.add(between_factor(
        5,
        20,
        truth[5].inverse().compose(&truth[20]),
    )?);
    let result = isam.add(closure, Values::new())?;

    // Poses 5..=20 lie on the path from the clique of 5 to the root.
    assert_eq!(result.variables_reeliminated, 16);
    assert_eq!(result.orphans, 1);
    let after = tree_snapshot(isam.bayes_tree());
    for key in 0..5 {
        assert_eq!(after.get(&key), before.get(&key), "clique of {key} changed");
    }
    isam.bayes_tree().check_running_intersection()?;

    let detail = result.detail.ok_or("missing detail")?;
    assert!(detail.status(5).is_some_and(|s| s.is_observed && s.is_reeliminated));
    assert!(detail.status(3).is_none());
    Ok(())
}

#[test]
fn test_empty_update_is_a_no_op() -> TestResult {
    let mut isam = Isam2::new(Isam2Params::new().with_relinearization(false))?;
    for (graph, values) in pose_chain(10, Some(4))? {
        isam.add(graph, values)?;
    }
    let before = snapshot(&isam);

    let result = isam.add(NonlinearFactorGraph::new(), Values::new())?;
    assert_eq!(result.variables_reeliminated, 0);
    assert_eq!(result.cliques_reeliminated, 0);
    assert_eq!(result.variables_backsubstituted, 0);
    assert_eq!(result.cliques, 10);

    let after = snapshot(&isam);
    assert_eq!(after.theta, before.theta);
    assert_eq!(after.delta, before.delta);
    assert_eq!(after.tree, before.tree);
    assert_eq!(after.cache, before.cache);
    assert_eq!(after.update_count, before.update_count + 1);
    Ok(())
}

#[test]
fn test_linear_cache_matches_linearization_point() -> TestResult {
    let params = Isam2Params::new()
        .with_relinearize_threshold(RelinearizationThreshold::Uniform(0.01))
        .with_relinearize_skip(2);
    let mut isam = Isam2::new(params)?;
    let mut relinearized = 0;
    for (graph, values) in pose_chain(20, Some(5))? {
        relinearized += isam.add(graph, values)?.variables_relinearized;
        for (slot, factor) in isam.factors().iter() {
            let cached = isam.linearized_factor(slot).ok_or("factor without cache")?;
            let fresh = factor.linearize(isam.linearization_point())?;
            assert_eq!(cached, &fresh, "stale cache for factor {slot}");
        }
    }
    assert!(relinearized > 0, "scenario never relinearized");
    Ok(())
}

#[test]
fn test_running_intersection_after_every_update() -> TestResult {
    let mut isam = Isam2::new(exhaustive_params().with_relinearize_skip(3))?;
    for (graph, values) in pose_chain(30, Some(4))? {
        isam.add(graph, values)?;
        isam.bayes_tree().check_running_intersection()?;
        assert_eq!(isam.bayes_tree().len(), isam.linearization_point().len());
    }
    Ok(())
}

#[test]
fn test_wildfire_stops_at_unmoved_cliques() -> TestResult {
    let params = Isam2Params::new()
        .with_relinearization(false)
        .with_optimization(apex_isam::isam::OptimizationParams::GaussNewton(
            GaussNewtonParams {
                wildfire_threshold: 1e9,
            },
        ));
    let mut isam = Isam2::new(params)?;
    for (graph, values) in pose_chain(20, None)? {
        isam.add(graph, values)?;
    }

    let truth = common::ground_truth(20);
    let mut closure = NonlinearFactorGraph::new();
    let measured = truth[10]
        .inverse()
        .compose(&truth[19])
        .compose(&SE2::from_xy_angle(0.3, 0.2, 0.1));
    closure.add(between_factor(10, 19, measured)?);
    let result = isam.add(closure, Values::new())?;

    // Only the rebuilt cliques are re-solved.
    assert_eq!(result.variables_backsubstituted, result.variables_reeliminated);
    assert!(result.variables_backsubstituted < 20);

    // The full solution differs from the partial delta below the rebuilt part.
    let full = isam.current_estimate()?;
    let partial = isam.calculate_estimate()?;
    assert!(max_difference(&full, &partial)? > 1e-6);
    Ok(())
}

#[test]
fn test_removing_loop_closure_restores_chain_solution() -> TestResult {
    let steps = pose_chain(12, None)?;
    let mut isam = Isam2::new(exhaustive_params())?;
    for (graph, values) in steps.iter().cloned() {
        isam.add(graph, values)?;
    }
    converge(&mut isam, 5)?;
    let without = isam.current_estimate()?;

    let mut closure = NonlinearFactorGraph::new();
    closure.add(between_factor(2, 11, SE2::from_xy_angle(3.0, 2.0, 0.5))?);
    let added = isam.add(closure, Values::new())?;
    converge(&mut isam, 5)?;
    assert!(max_difference(&without, &isam.current_estimate()?)? > 1e-3);

    isam.update(
        NonlinearFactorGraph::new(),
        Values::new(),
        &added.new_factor_indices,
        None,
        false,
    )?;
    converge(&mut isam, 5)?;
    assert!(max_difference(&without, &isam.current_estimate()?)? < TOLERANCE);
    assert_eq!(isam.factors().num_factors(), 12);
    Ok(())
}

#[test]
fn test_constrained_keys_become_roots() -> TestResult {
    let mut isam = Isam2::new(Isam2Params::new().with_relinearization(false))?;
    let steps = pose_chain(6, None)?;
    let (graph, values) = common::merge(&steps)?;
    let constraints = std::collections::HashMap::from([(0, 1)]);
    isam.update(graph, values, &[], Some(&constraints), false)?;

    let root = isam
        .bayes_tree()
        .root_cliques()
        .next()
        .and_then(|id| isam.bayes_tree().clique(id))
        .ok_or("empty tree")?;
    assert_eq!(root.frontal(), 0);
    Ok(())
}

#[test]
fn test_linear_queries_on_the_tree() -> TestResult {
    let mut isam = Isam2::new(exhaustive_params())?;
    for (graph, values) in pose_chain(8, None)? {
        isam.add(graph, values)?;
    }
    let gradient = isam.gradient_at_zero();
    assert_eq!(gradient.len(), 8);

    // The steepest descent point lies along the negative gradient.
    let descent = isam.optimize_gradient_search()?;
    assert!(descent.dot(&gradient) < 0.0);

    let before = isam.nonlinear_error()?;
    converge(&mut isam, 3)?;
    assert!(isam.nonlinear_error()? <= before + TOLERANCE);
    Ok(())
}

#[test]
fn test_only_variables_above_threshold_are_relinearized() -> TestResult {
    let params = Isam2Params::new()
        .with_relinearize_threshold(RelinearizationThreshold::Uniform(0.5))
        .with_relinearize_skip(1)
        .with_detailed_results(true);
    let mut isam = Isam2::new(params)?;

    // x_i = i, with the guesses for keys 2..=4 off by 5.
    let mut graph = NonlinearFactorGraph::new();
    graph.add(NoiseModelFactor::unit(
        vec![0],
        Box::new(PriorFactor::new(Rn::from_vec(vec![0.0]))),
    )?);
    let mut values = Values::new();
    for i in 0..5 {
        if i > 0 {
            graph.add(NoiseModelFactor::unit(
                vec![i - 1, i],
                Box::new(BetweenFactor::new(Rn::from_vec(vec![1.0]))),
            )?);
        }
        let offset = if i >= 2 { 5.0 } else { 0.0 };
        values.insert(i, Rn::from_vec(vec![i as f64 + offset]))?;
    }
    let first = isam.add(graph, values)?;
    assert_eq!(first.variables_relinearized, 0);
    let initial = isam.linearization_point().clone();

    let result = isam.add(NonlinearFactorGraph::new(), Values::new())?;
    assert_eq!(result.variables_relinearized, 3);
    let detail = result.detail.ok_or("missing detail")?;
    for key in 2..5 {
        let status = detail.status(key).ok_or("relinearized key without status")?;
        assert!(status.is_above_relin_threshold && status.is_relinearized);
        assert!(status.is_reeliminated);
    }
    let neighbour = detail.status(1).ok_or("neighbour without status")?;
    assert!(neighbour.is_relinearize_involved);
    assert!(!neighbour.is_relinearized && !neighbour.is_above_relin_threshold);
    assert!(detail.status(0).is_none_or(|s| !s.is_relinearized));

    // The linear chain is solved exactly, so nothing crosses the threshold
    // again and the first two linearization points never move.
    for _ in 0..3 {
        let result = isam.add(NonlinearFactorGraph::new(), Values::new())?;
        assert_eq!(result.variables_relinearized, 0);
    }
    for key in 0..2 {
        assert_eq!(isam.linearization_point().at(key)?, initial.at(key)?);
    }
    for key in 2..5 {
        let x = isam.linearization_point().at(key)?.to_vector()[0];
        assert!((x - key as f64).abs() < TOLERANCE, "x{key} = {x}");
    }
    for (slot, factor) in isam.factors().iter() {
        let cached = isam.linearized_factor(slot).ok_or("factor without cache")?;
        assert_eq!(cached, &factor.linearize(isam.linearization_point())?);
    }
    Ok(())
}
