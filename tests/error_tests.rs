//! Error classification and all-or-nothing updates.
//!
//! Every rejected update must leave the estimator exactly as it was, whether
//! it is rejected while checking its input, while eliminating, or after the
//! tree has already been edited.

mod common;

use apex_isam::core::{
    CoreError, CoreResult, Key, factor_graph::NonlinearFactorGraph, values::Values,
};
use apex_isam::error::ApexIsamError;
use apex_isam::factors::NonlinearFactor;
use apex_isam::isam::{DoglegParams, Isam2, Isam2Params, RelinearizationThreshold};
use apex_isam::linalg::{JacobianFactor, LinAlgError};
use apex_isam::manifold::{ManifoldType, se2::SE2};
use common::{TestResult, between_factor, pose_chain, snapshot};
use nalgebra::{DMatrix, DVector, dvector};
use std::collections::HashMap;

/// Linearizes like a unit prior on an SE(2) pose but cannot evaluate its
/// nonlinear error.
struct UnevaluableFactor {
    keys: Vec<Key>,
}

impl NonlinearFactor for UnevaluableFactor {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        3
    }

    fn linearize(&self, _values: &Values) -> CoreResult<JacobianFactor> {
        JacobianFactor::new(
            vec![(self.keys[0], DMatrix::identity(3, 3))],
            DVector::zeros(3),
        )
        .map_err(|e| CoreError::FactorLinearization(e.to_string()))
    }

    fn error(&self, _values: &Values) -> CoreResult<f64> {
        Err(CoreError::FactorLinearization(
            "error evaluation unavailable".to_string(),
        ))
    }
}

fn built(params: Isam2Params, poses: usize) -> Result<Isam2, Box<dyn std::error::Error>> {
    let mut isam = Isam2::new(params)?;
    for (graph, values) in pose_chain(poses, Some(3))? {
        isam.add(graph, values)?;
    }
    Ok(isam)
}

#[test]
fn test_input_errors_are_classified_and_harmless() -> TestResult {
    let mut isam = built(Isam2Params::new(), 6)?;
    let before = snapshot(&isam);

    let mut duplicate = Values::new();
    duplicate.insert(2, SE2::identity())?;
    let error = isam
        .add(NonlinearFactorGraph::new(), duplicate)
        .err()
        .ok_or("duplicate variable accepted")?;
    assert!(matches!(
        error,
        ApexIsamError::Core(CoreError::DuplicateVariable(2))
    ));
    assert!(error.is_input_error() && !error.is_numerical() && !error.is_structural());

    let mut graph = NonlinearFactorGraph::new();
    graph.add(between_factor(1, 40, SE2::identity())?);
    let error = isam
        .add(graph, Values::new())
        .err()
        .ok_or("unknown variable accepted")?;
    assert!(matches!(
        error,
        ApexIsamError::Core(CoreError::UnknownVariable(40))
    ));

    let error = isam
        .update(NonlinearFactorGraph::new(), Values::new(), &[0, 0], None, false)
        .err()
        .ok_or("duplicate removal accepted")?;
    assert!(matches!(
        error,
        ApexIsamError::Core(CoreError::InvalidFactorIndex(0))
    ));

    assert_eq!(snapshot(&isam), before);
    Ok(())
}

#[test]
fn test_valid_factors_are_not_added_when_a_removal_is_invalid() -> TestResult {
    let mut isam = built(Isam2Params::new(), 5)?;
    let before = snapshot(&isam);

    let mut graph = NonlinearFactorGraph::new();
    graph.add(between_factor(0, 4, SE2::from_xy_angle(4.0, 0.0, 0.0))?);
    let mut values = Values::new();
    values.insert(5, SE2::identity())?;
    let result = isam.update(graph, values, &[1, 99], None, false);
    assert!(matches!(
        result,
        Err(ApexIsamError::Core(CoreError::InvalidFactorIndex(99)))
    ));
    assert_eq!(snapshot(&isam), before);
    assert!(!isam.linearization_point().contains(5));
    Ok(())
}

#[test]
fn test_unconstrained_variable_is_numerical_and_harmless() -> TestResult {
    let mut isam = built(Isam2Params::new(), 4)?;
    let before = snapshot(&isam);

    let mut values = Values::new();
    values.insert(10, SE2::identity())?;
    let error = isam
        .add(NonlinearFactorGraph::new(), values)
        .err()
        .ok_or("unconstrained variable accepted")?;
    assert!(error.is_numerical());
    assert!(matches!(
        error,
        ApexIsamError::LinearAlgebra(LinAlgError::IndeterminantSystem { key: 10 })
    ));
    assert_eq!(snapshot(&isam), before);

    // The estimator keeps working afterwards.
    let mut graph = NonlinearFactorGraph::new();
    graph.add(between_factor(3, 4, SE2::from_xy_angle(1.0, 0.0, 0.0))?);
    let mut values = Values::new();
    values.insert(4, SE2::from_xy_angle(4.0, 0.0, 0.0))?;
    isam.add(graph, values)?;
    isam.bayes_tree().check_running_intersection()?;
    Ok(())
}

#[test]
fn test_error_evaluation_failure_before_editing() -> TestResult {
    let mut isam = built(Isam2Params::new().with_nonlinear_error(true), 4)?;
    let before = snapshot(&isam);

    let mut graph = NonlinearFactorGraph::new();
    graph.add(UnevaluableFactor { keys: vec![2] });
    let error = isam
        .add(graph, Values::new())
        .err()
        .ok_or("error evaluation should fail")?;
    assert!(matches!(
        error,
        ApexIsamError::Core(CoreError::FactorLinearization(_))
    ));
    assert_eq!(snapshot(&isam), before);
    Ok(())
}

#[test]
fn test_failure_after_tree_edit_is_rolled_back() -> TestResult {
    // The dogleg step evaluates the nonlinear error only after factors were
    // removed and the top of the tree was replaced.
    let mut isam = built(Isam2Params::new().with_dogleg(DoglegParams::default()), 6)?;
    let before = snapshot(&isam);
    let cliques = isam.bayes_tree().len();

    let mut graph = NonlinearFactorGraph::new();
    graph.add(UnevaluableFactor { keys: vec![1] });
    let error = isam
        .update(graph, Values::new(), &[2], None, true)
        .err()
        .ok_or("dogleg step should fail")?;
    assert!(matches!(
        error,
        ApexIsamError::Core(CoreError::FactorLinearization(_))
    ));

    let after = snapshot(&isam);
    assert_eq!(after, before);
    assert_eq!(isam.bayes_tree().len(), cliques);
    assert!(isam.factors().get(2).is_some());
    isam.bayes_tree().check_running_intersection()?;

    // A later valid update still succeeds on the restored state.
    isam.update(NonlinearFactorGraph::new(), Values::new(), &[2], None, false)?;
    assert!(isam.factors().get(2).is_none());
    isam.bayes_tree().check_running_intersection()?;
    Ok(())
}

#[test]
fn test_parameter_validation() {
    assert!(matches!(
        Isam2::new(Isam2Params::new().with_relinearize_skip(0)),
        Err(ApexIsamError::Core(CoreError::InvalidInput(_)))
    ));
    assert!(
        Isam2::new(
            Isam2Params::new()
                .with_relinearize_threshold(RelinearizationThreshold::Uniform(f64::NAN))
        )
        .is_err()
    );
}

#[test]
fn test_per_type_threshold_without_the_type_is_rejected() -> TestResult {
    let thresholds = HashMap::from([(ManifoldType::RN, dvector![0.1])]);
    let params = Isam2Params::new()
        .with_relinearize_threshold(RelinearizationThreshold::PerType(thresholds))
        .with_relinearize_skip(1);
    let mut isam = Isam2::new(params)?;

    let steps = pose_chain(3, None)?;
    let mut steps = steps.into_iter();
    let (graph, values) = steps.next().ok_or("empty scenario")?;
    // Nothing to relinearize yet on the first update.
    isam.add(graph, values)?;

    let before = snapshot(&isam);
    let (graph, values) = steps.next().ok_or("short scenario")?;
    let error = isam
        .add(graph, values)
        .err()
        .ok_or("SE2 variables have no threshold")?;
    assert!(error.is_input_error());
    assert_eq!(snapshot(&isam), before);
    Ok(())
}
