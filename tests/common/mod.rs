//! Scenario builders shared by the integration tests.
#![allow(dead_code)]

use apex_isam::core::{Key, factor_graph::NonlinearFactorGraph, values::Values};
use apex_isam::factors::{BetweenFactor, NoiseModelFactor, PriorFactor};
use apex_isam::inference::BayesTree;
use apex_isam::isam::Isam2;
use apex_isam::linalg::GaussianConditional;
use apex_isam::manifold::{LieGroup, se2::SE2};
use nalgebra::dvector;
use std::collections::BTreeMap;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Factors and initial values added by one update.
pub type Step = (NonlinearFactorGraph, Values);

/// Odometry between pose `i - 1` and pose `i`.
pub fn odometry(i: usize) -> SE2 {
    SE2::from_xy_angle(1.0, 0.0, if i % 3 == 0 { 0.2 } else { -0.05 })
}

pub fn ground_truth(poses: usize) -> Vec<SE2> {
    let mut truth = vec![SE2::identity()];
    for i in 1..poses {
        let next = truth[i - 1].compose(&odometry(i));
        truth.push(next);
    }
    truth
}

pub fn prior_factor(key: Key) -> Result<NoiseModelFactor, Box<dyn std::error::Error>> {
    Ok(NoiseModelFactor::new(
        vec![key],
        Box::new(PriorFactor::new(SE2::identity())),
        dvector![0.01, 0.01, 0.01],
    )?)
}

pub fn between_factor(
    from: Key,
    to: Key,
    measurement: SE2,
) -> Result<NoiseModelFactor, Box<dyn std::error::Error>> {
    Ok(NoiseModelFactor::new(
        vec![from, to],
        Box::new(BetweenFactor::new(measurement)),
        dvector![0.1, 0.1, 0.05],
    )?)
}

/// One update per pose. Pose `i` is connected to `i - 1` by odometry and,
/// every `loop_every` poses, to pose `i - loop_every` by a loop closure that
/// disagrees slightly with the odometry. Initial guesses are perturbed.
pub fn pose_chain(
    poses: usize,
    loop_every: Option<usize>,
) -> Result<Vec<Step>, Box<dyn std::error::Error>> {
    let truth = ground_truth(poses);
    let perturbation = SE2::from_xy_angle(0.04, -0.03, 0.02);
    let mut steps = Vec::with_capacity(poses);
    for i in 0..poses {
        let mut graph = NonlinearFactorGraph::new();
        if i == 0 {
            graph.add(prior_factor(0)?);
        } else {
            graph.add(between_factor(i - 1, i, odometry(i))?);
            if let Some(every) = loop_every
                && i >= every
                && i % every == 0
            {
                let j = i - every;
                let relative = truth[j]
                    .inverse()
                    .compose(&truth[i])
                    .compose(&SE2::from_xy_angle(0.02, 0.01, -0.01));
                graph.add(between_factor(j, i, relative)?);
            }
        }
        let mut values = Values::new();
        values.insert(i, truth[i].compose(&perturbation))?;
        steps.push((graph, values));
    }
    Ok(steps)
}

/// All steps as one graph with one set of initial values.
pub fn merge(steps: &[Step]) -> Result<Step, Box<dyn std::error::Error>> {
    let mut graph = NonlinearFactorGraph::new();
    let mut values = Values::new();
    for (factors, initial) in steps {
        for (_, factor) in factors.iter() {
            graph.push(factor.clone());
        }
        for (key, value) in initial.iter() {
            values.insert(key, value.clone())?;
        }
    }
    Ok((graph, values))
}

/// Largest tangent-space component of `b ⊟ a` over the keys of `a`.
pub fn max_difference(a: &Values, b: &Values) -> Result<f64, Box<dyn std::error::Error>> {
    Ok(a.local_coordinates(b)?.max_abs())
}

/// Frontal key → (parent frontal key, conditional), for comparing trees.
pub fn tree_snapshot(tree: &BayesTree) -> BTreeMap<Key, (Option<Key>, GaussianConditional)> {
    tree.iter()
        .map(|(_, clique)| {
            let parent = clique
                .parent()
                .and_then(|p| tree.clique(p))
                .map(|p| p.frontal());
            (clique.frontal(), (parent, clique.conditional().clone()))
        })
        .collect()
}

/// Observable estimator state, for checking that failed updates change
/// nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub theta: Values,
    pub delta: apex_isam::linalg::VectorValues,
    pub index: apex_isam::core::variable_index::VariableIndex,
    pub slots: Vec<(usize, Vec<Key>)>,
    pub tree: BTreeMap<Key, (Option<Key>, GaussianConditional)>,
    pub cache: Vec<Option<apex_isam::linalg::JacobianFactor>>,
    pub update_count: usize,
    pub radius: f64,
}

pub fn snapshot(isam: &Isam2) -> Snapshot {
    let slots: Vec<(usize, Vec<Key>)> = isam
        .factors()
        .iter()
        .map(|(slot, f)| (slot, f.keys().to_vec()))
        .collect();
    let cache = slots
        .iter()
        .map(|(slot, _)| isam.linearized_factor(*slot).cloned())
        .collect();
    Snapshot {
        theta: isam.linearization_point().clone(),
        delta: isam.delta().clone(),
        index: isam.variable_index().clone(),
        slots,
        tree: tree_snapshot(isam.bayes_tree()),
        cache,
        update_count: isam.update_count(),
        radius: isam.trust_region_radius(),
    }
}
