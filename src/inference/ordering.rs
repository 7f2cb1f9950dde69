//! Elimination orderings.
//!
//! The ordering heuristic is greedy minimum degree on the elimination graph:
//! repeatedly eliminate the variable with the fewest neighbours, connecting its
//! neighbours into a clique. Constraint groups are honoured first, so keys in a
//! higher group are always eliminated after every key in a lower group. Ties
//! are broken by ascending key, which makes the result deterministic.

use crate::core::{Key, factor_graph::NonlinearFactorGraph, variable_index::VariableIndex};
use crate::inference::{InferenceError, InferenceResult};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// A total order over variable keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ordering {
    keys: Vec<Key>,
    position: HashMap<Key, usize>,
}

impl Ordering {
    /// Wrap an explicit order; repeated keys are rejected.
    pub fn from_keys(keys: Vec<Key>) -> InferenceResult<Self> {
        let mut position = HashMap::with_capacity(keys.len());
        for (i, &key) in keys.iter().enumerate() {
            if position.insert(key, i).is_some() {
                return Err(
                    InferenceError::InvalidOrdering(format!("key {key} appears twice")).log(),
                );
            }
        }
        Ok(Ordering { keys, position })
    }

    /// Minimum-degree ordering of `keys` given the key sets of the factors
    /// among them.
    ///
    /// `constraints` assigns keys to groups; unlisted keys are group 0 and
    /// higher groups are eliminated later. Keys without any factor are still
    /// ordered (with degree zero).
    pub fn minimum_degree(
        keys: &BTreeSet<Key>,
        factors: &[&[Key]],
        constraints: Option<&HashMap<Key, i32>>,
    ) -> InferenceResult<Self> {
        let mut adjacency: BTreeMap<Key, BTreeSet<Key>> =
            keys.iter().map(|&k| (k, BTreeSet::new())).collect();
        for factor in factors {
            for &a in factor.iter() {
                let Some(neighbours) = adjacency.get_mut(&a) else {
                    return Err(InferenceError::InvalidOrdering(format!(
                        "factor key {a} is not among the keys to order"
                    ))
                    .log());
                };
                neighbours.extend(factor.iter().copied().filter(|&b| b != a));
            }
        }

        let group = |k: Key| constraints.and_then(|c| c.get(&k).copied()).unwrap_or(0);
        let mut queue: BTreeSet<(i32, usize, Key)> = adjacency
            .iter()
            .map(|(&k, n)| (group(k), n.len(), k))
            .collect();

        let mut order = Vec::with_capacity(adjacency.len());
        while let Some(entry) = queue.pop_first() {
            let (_, _, key) = entry;
            let neighbours = adjacency.remove(&key).unwrap_or_default();
            for &n in &neighbours {
                let Some(adj) = adjacency.get_mut(&n) else {
                    continue;
                };
                queue.remove(&(group(n), adj.len(), n));
                adj.remove(&key);
                adj.extend(neighbours.iter().copied().filter(|&m| m != n));
                queue.insert((group(n), adj.len(), n));
            }
            order.push(key);
        }
        Self::from_keys(order)
    }

    /// Order every variable of a graph.
    pub fn from_graph(
        graph: &NonlinearFactorGraph,
        index: &VariableIndex,
        constraints: Option<&HashMap<Key, i32>>,
    ) -> InferenceResult<Self> {
        let keys: BTreeSet<Key> = index.keys().collect();
        let factors: Vec<&[Key]> = graph.iter().map(|(_, f)| f.keys()).collect();
        Self::minimum_degree(&keys, &factors, constraints)
    }

    /// Ordering with `last` constrained to the end, the rest by minimum degree.
    pub fn constrained_last(
        keys: &BTreeSet<Key>,
        factors: &[&[Key]],
        last: &BTreeSet<Key>,
    ) -> InferenceResult<Self> {
        let constraints: HashMap<Key, i32> = last.iter().map(|&k| (k, 1)).collect();
        Self::minimum_degree(keys, factors, Some(&constraints))
    }

    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    pub fn position(&self, key: Key) -> Option<usize> {
        self.position.get(&key).copied()
    }

    pub fn positions(&self) -> &HashMap<Key, usize> {
        &self.position
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
