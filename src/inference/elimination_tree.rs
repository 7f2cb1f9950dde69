//! Elimination tree over a linear factor graph.
//!
//! Node `j` of the tree is the variable at position `j` of the ordering; its
//! parent is the earliest-ordered variable that shares a factor with it after
//! all variables before it have been eliminated. Every factor hangs on the
//! node of its earliest-ordered key.
//!
//! Parents are found with the column elimination tree algorithm: walking the
//! ordering once and, for every factor touching the current column, linking
//! the root of the subtree that last saw that factor to the current column.

use crate::core::Key;
use crate::inference::{InferenceError, InferenceResult, Ordering};
use crate::linalg::{Factorization, GaussianConditional, JacobianFactor, LinAlgError, LinAlgResult};
use std::collections::BTreeMap;
use tracing::debug;

/// Result of eliminating one node.
#[derive(Debug, Clone)]
pub struct EliminatedNode {
    pub conditional: GaussianConditional,
    /// Factor on the separator, passed to the parent.
    pub separator_factor: JacobianFactor,
}

impl EliminatedNode {
    pub fn key(&self) -> Key {
        self.conditional.frontal()
    }
}

#[derive(Debug, Clone)]
pub struct EliminationTree {
    ordering: Ordering,
    parents: Vec<Option<usize>>,
    node_factors: Vec<Vec<usize>>,
    factors: Vec<JacobianFactor>,
}

impl EliminationTree {
    /// Build the tree for `factors` under `ordering`.
    ///
    /// Every key of every factor must be in the ordering. Factors without
    /// keys carry only a constant error and are dropped.
    pub fn new(factors: Vec<JacobianFactor>, ordering: Ordering) -> InferenceResult<Self> {
        let factors: Vec<JacobianFactor> =
            factors.into_iter().filter(|f| !f.keys().is_empty()).collect();
        let n = ordering.len();

        // Factors touching each column, and the column each factor hangs on.
        let mut columns: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut node_factors: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (f, factor) in factors.iter().enumerate() {
            let mut earliest = usize::MAX;
            for &key in factor.keys() {
                let position = ordering.position(key).ok_or_else(|| {
                    InferenceError::InvalidOrdering(format!(
                        "factor key {key} is missing from the ordering"
                    ))
                    .log()
                })?;
                columns[position].push(f);
                earliest = earliest.min(position);
            }
            node_factors[earliest].push(f);
        }

        let mut parents: Vec<Option<usize>> = vec![None; n];
        let mut prev_col: Vec<Option<usize>> = vec![None; factors.len()];
        for j in 0..n {
            for &f in &columns[j] {
                if let Some(mut root) = prev_col[f] {
                    while let Some(p) = parents[root] {
                        root = p;
                    }
                    if root != j {
                        parents[root] = Some(j);
                    }
                }
                prev_col[f] = Some(j);
            }
        }

        Ok(EliminationTree {
            ordering,
            parents,
            node_factors,
            factors,
        })
    }

    pub fn ordering(&self) -> &Ordering {
        &self.ordering
    }

    /// Parent position of every position.
    pub fn parents(&self) -> &[Option<usize>] {
        &self.parents
    }

    /// Keys of the nodes without a parent.
    pub fn roots(&self) -> Vec<Key> {
        self.parents
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_none())
            .map(|(j, _)| self.ordering.keys()[j])
            .collect()
    }

    /// Number of factors hanging on the node of `key`.
    pub fn factors_on(&self, key: Key) -> usize {
        self.ordering
            .position(key)
            .map_or(0, |j| self.node_factors[j].len())
    }

    /// Eliminate every node, children before parents.
    ///
    /// Nodes are returned in elimination order. A variable with no rows in
    /// its joint factor is under-constrained and reported as an
    /// indeterminant system.
    pub fn eliminate(self, method: Factorization) -> LinAlgResult<Vec<EliminatedNode>> {
        let EliminationTree {
            ordering,
            parents,
            node_factors,
            factors,
        } = self;
        let positions = ordering.positions();
        let mut pending: BTreeMap<usize, Vec<JacobianFactor>> = BTreeMap::new();
        let mut eliminated = Vec::with_capacity(ordering.len());

        for (j, &key) in ordering.keys().iter().enumerate() {
            let from_children = pending.remove(&j).unwrap_or_default();
            let gathered: Vec<&JacobianFactor> = node_factors[j]
                .iter()
                .map(|&f| &factors[f])
                .chain(from_children.iter())
                .collect();
            if gathered.is_empty() {
                return Err(LinAlgError::IndeterminantSystem { key }.log());
            }
            let joint = JacobianFactor::combine(&gathered, positions)?;
            if joint.keys().first() != Some(&key) {
                return Err(LinAlgError::IndeterminantSystem { key }.log());
            }
            let (conditional, separator_factor) = joint.eliminate_first(method)?;

            if let Some(&next) = separator_factor.keys().first() {
                let parent = positions[&next];
                debug_assert_eq!(parents[j], Some(parent));
                pending.entry(parent).or_default().push(separator_factor.clone());
            }
            eliminated.push(EliminatedNode {
                conditional,
                separator_factor,
            });
        }
        debug!("eliminated {} variables", eliminated.len());
        Ok(eliminated)
    }
}
