//! Variable index: for every variable, the set of factor slots touching it.

use crate::core::{CoreError, CoreResult, Key, factor_graph::NonlinearFactorGraph};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableIndex {
    index: HashMap<Key, BTreeSet<usize>>,
    num_entries: usize,
}

impl VariableIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every present factor of a graph.
    pub fn from_graph(graph: &NonlinearFactorGraph) -> Self {
        let mut index = VariableIndex::new();
        index.add_factors(graph.iter().map(|(i, f)| (i, f.keys())));
        index
    }

    /// Record `(slot, keys)` pairs.
    pub fn add_factors<'a>(&mut self, factors: impl IntoIterator<Item = (usize, &'a [Key])>) {
        for (slot, keys) in factors {
            for &key in keys {
                if self.index.entry(key).or_default().insert(slot) {
                    self.num_entries += 1;
                }
            }
        }
    }

    /// Make sure `key` has an entry even if no factor touches it yet.
    pub fn add_variable(&mut self, key: Key) {
        self.index.entry(key).or_default();
    }

    /// Forget `(slot, keys)` pairs.
    ///
    /// Every pair is checked before anything is removed, so a failing call
    /// leaves the index unchanged.
    pub fn remove_factors<'a>(
        &mut self,
        factors: impl IntoIterator<Item = (usize, &'a [Key])> + Clone,
    ) -> CoreResult<()> {
        for (slot, keys) in factors.clone() {
            let present = keys
                .iter()
                .all(|k| self.index.get(k).is_some_and(|s| s.contains(&slot)));
            if !present {
                return Err(CoreError::InvalidFactorIndex(slot).log());
            }
        }
        for (slot, keys) in factors {
            for key in keys {
                if let Some(set) = self.index.get_mut(key)
                    && set.remove(&slot)
                {
                    self.num_entries -= 1;
                }
            }
        }
        Ok(())
    }

    /// Factor slots touching `key`; empty for unknown keys.
    pub fn factors_touching(&self, key: Key) -> impl Iterator<Item = usize> + '_ {
        self.index.get(&key).into_iter().flatten().copied()
    }

    pub fn contains(&self, key: Key) -> bool {
        self.index.contains_key(&key)
    }

    /// Number of variables with an entry.
    pub fn num_variables(&self) -> usize {
        self.index.len()
    }

    /// Total number of (variable, factor) incidences.
    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.index.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_add_and_query() {
        let mut index = VariableIndex::new();
        index.add_factors([(0, &[1, 2][..]), (1, &[2, 3][..])]);
        let touching: Vec<usize> = index.factors_touching(2).collect();
        assert_eq!(touching, vec![0, 1]);
        assert_eq!(index.num_entries(), 4);
        assert_eq!(index.factors_touching(9).count(), 0);
    }

    #[test]
    fn test_remove_is_all_or_nothing() -> TestResult {
        let mut index = VariableIndex::new();
        index.add_factors([(0, &[1, 2][..]), (1, &[2, 3][..])]);
        let before = index.clone();

        let result = index.remove_factors([(0, &[1, 2][..]), (5, &[3][..])]);
        assert!(matches!(result, Err(CoreError::InvalidFactorIndex(5))));
        assert_eq!(index, before);

        index.remove_factors([(0, &[1, 2][..])])?;
        assert_eq!(index.factors_touching(1).count(), 0);
        assert_eq!(index.factors_touching(2).collect::<Vec<_>>(), vec![1]);
        assert!(index.contains(1));
        Ok(())
    }
}
