//! Which variables get a new linearization point.
//!
//! Relinearization is considered on a schedule (every `relinearize_skip`-th
//! update) or when forced. On such an update a variable is relinearized when
//! its delta exceeds its threshold. The variables whose factors must then be
//! re-eliminated are the relinearized ones, every variable sharing a factor
//! with one, and every frontal variable of a clique that has a relinearized
//! variable in its separator.

use crate::core::{CoreError, CoreResult, Key, values::Values};
use crate::inference::BayesTree;
use crate::linalg::VectorValues;
use crate::manifold::ManifoldType;
use nalgebra::DVector;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

/// Delta magnitude beyond which a linearization point is stale.
///
/// Magnitudes are compared component-wise, so a delta is above threshold
/// when any of its entries exceeds the threshold in absolute value.
#[derive(Debug, Clone, PartialEq)]
pub enum RelinearizationThreshold {
    /// One threshold for every component of every variable.
    Uniform(f64),
    /// Per-component thresholds for each variable type.
    PerType(HashMap<ManifoldType, DVector<f64>>),
}

impl fmt::Display for RelinearizationThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelinearizationThreshold::Uniform(t) => write!(f, "{t:.2e}"),
            RelinearizationThreshold::PerType(map) => {
                let mut types: Vec<_> = map.iter().collect();
                types.sort_by_key(|(t, _)| **t);
                let parts: Vec<String> = types
                    .iter()
                    .map(|(t, v)| format!("{t}: {:?}", v.as_slice()))
                    .collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

impl RelinearizationThreshold {
    pub fn validate(&self) -> CoreResult<()> {
        let bad = |t: f64| !(t >= 0.0) || !t.is_finite();
        let invalid = match self {
            RelinearizationThreshold::Uniform(t) => bad(*t),
            RelinearizationThreshold::PerType(map) => map.values().flatten().any(|t| bad(*t)),
        };
        if invalid {
            return Err(CoreError::InvalidInput(format!(
                "relinearization thresholds must be finite and non-negative: {self}"
            ))
            .log());
        }
        Ok(())
    }

    /// Whether `delta` of a variable of type `manifold_type` is above threshold.
    pub fn exceeds(&self, manifold_type: ManifoldType, delta: &DVector<f64>) -> CoreResult<bool> {
        match self {
            RelinearizationThreshold::Uniform(t) => Ok(delta.amax() > *t),
            RelinearizationThreshold::PerType(map) => {
                let thresholds = map.get(&manifold_type).ok_or_else(|| {
                    CoreError::InvalidInput(format!(
                        "no relinearization threshold for variable type {manifold_type}"
                    ))
                    .log()
                })?;
                if thresholds.len() != delta.len() {
                    return Err(CoreError::DimensionMismatch(format!(
                        "{} thresholds for {manifold_type} but delta has dimension {}",
                        thresholds.len(),
                        delta.len()
                    ))
                    .log());
                }
                Ok(delta.iter().zip(thresholds.iter()).any(|(d, t)| d.abs() > *t))
            }
        }
    }
}

/// Whether update number `count` (1-based) checks relinearization.
pub fn is_scheduled(count: usize, skip: usize, enabled: bool, force: bool) -> bool {
    force || (enabled && skip > 0 && count % skip == 0)
}

/// Variables of `delta` above threshold. Every key of `delta` must have a
/// value in `theta`.
pub fn check_relinearization(
    delta: &VectorValues,
    theta: &Values,
    threshold: &RelinearizationThreshold,
) -> CoreResult<BTreeSet<Key>> {
    let mut stale = BTreeSet::new();
    for (key, d) in delta.iter() {
        if threshold.exceeds(theta.at(key)?.manifold_type(), d)? {
            stale.insert(key);
        }
    }
    Ok(stale)
}

/// Frontal variables of cliques whose separator holds a relinearized
/// variable. Their conditionals were computed from factors of the
/// relinearized variables, so they are re-eliminated too.
pub fn involved_in_tree(tree: &BayesTree, relinearized: &BTreeSet<Key>) -> BTreeSet<Key> {
    if relinearized.is_empty() {
        return BTreeSet::new();
    }
    let mask: HashSet<Key> = relinearized.iter().copied().collect();
    tree.find_all(&mask)
}
