//! Back-substitution through the Bayes tree.
//!
//! Full back-substitution solves every clique from the roots down. Wildfire
//! back-substitution only re-solves cliques whose frontal variable was
//! replaced by re-elimination, or whose separator contains a variable that
//! moved by at least `threshold` in this pass. A clique that is not
//! re-solved stops the descent into its subtree.

use crate::core::Key;
use crate::inference::BayesTree;
use crate::linalg::{LinAlgError, LinAlgResult, VectorValues};
use std::collections::HashSet;
use tracing::debug;

/// Deltas re-solved by one wildfire pass.
#[derive(Debug, Clone, Default)]
pub struct WildfireUpdate {
    /// New deltas of the re-solved variables only.
    pub values: VectorValues,
    /// Number of variables that were re-solved.
    pub recalculated: usize,
}

impl WildfireUpdate {
    /// Write the re-solved deltas into `delta`.
    pub fn apply_to(&self, delta: &mut VectorValues) {
        for (key, value) in self.values.iter() {
            delta.insert(key, value.clone());
        }
    }
}

/// Solve the whole tree for the Gauss-Newton step.
pub fn back_substitute(tree: &BayesTree) -> LinAlgResult<VectorValues> {
    let mut x = VectorValues::new();
    for id in tree.top_down() {
        let clique = tree
            .clique(id)
            .ok_or_else(|| LinAlgError::FactorizationFailed(format!("missing clique {id}")))?;
        let value = clique.conditional().solve(&x)?;
        x.insert(clique.frontal(), value);
    }
    Ok(x)
}

/// Wildfire back-substitution against the current `delta`.
///
/// `delta` is not modified; the re-solved values are returned so the caller
/// decides when to commit them. Variables missing from `delta` are always
/// re-solved.
pub fn wildfire(
    tree: &BayesTree,
    replaced: &HashSet<Key>,
    threshold: f64,
    delta: &VectorValues,
) -> LinAlgResult<WildfireUpdate> {
    let mut update = WildfireUpdate::default();
    let mut changed: HashSet<Key> = HashSet::new();
    let mut stack: Vec<_> = tree.root_cliques().collect();

    while let Some(id) = stack.pop() {
        let Some(clique) = tree.clique(id) else {
            continue;
        };
        let frontal = clique.frontal();
        let previous = delta.get(frontal);
        let recalculate = replaced.contains(&frontal)
            || previous.is_none()
            || clique.separator().iter().any(|k| changed.contains(k));
        if !recalculate {
            continue;
        }

        let mut parents = VectorValues::new();
        for &key in clique.separator() {
            let value = update
                .values
                .get(key)
                .or_else(|| delta.get(key))
                .ok_or(LinAlgError::MissingSolution(key))?;
            parents.insert(key, value.clone());
        }
        let value = clique.conditional().solve(&parents)?;

        let moved = match previous {
            Some(old) if old.len() == value.len() => (&value - old).amax() >= threshold,
            _ => true,
        };
        if moved {
            changed.insert(frontal);
        }
        update.values.insert(frontal, value);
        update.recalculated += 1;
        stack.extend(clique.children());
    }

    debug!(
        "wildfire re-solved {} of {} variables",
        update.recalculated,
        tree.len()
    );
    Ok(update)
}
