//! Nonlinear factor graph with stable factor slots.
//!
//! Factor indices handed out by [`NonlinearFactorGraph::add`] never move:
//! removing a factor empties its slot instead of compacting the vector, so
//! indices stored in the variable index and in update results stay valid.

#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::{CoreError, CoreResult, Key, values::Values};
use crate::factors::NonlinearFactor;
use crate::linalg::JacobianFactor;

pub type SharedFactor = Arc<dyn NonlinearFactor>;

#[derive(Clone, Default)]
pub struct NonlinearFactorGraph {
    factors: Vec<Option<SharedFactor>>,
}

impl std::fmt::Debug for NonlinearFactorGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonlinearFactorGraph")
            .field("slots", &self.factors.len())
            .field("active", &self.num_factors())
            .finish()
    }
}

impl NonlinearFactorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a factor, returning its slot index.
    pub fn add(&mut self, factor: impl NonlinearFactor + 'static) -> usize {
        self.push(Arc::new(factor))
    }

    pub fn push(&mut self, factor: SharedFactor) -> usize {
        self.factors.push(Some(factor));
        self.factors.len() - 1
    }

    /// Empty a slot. Removing an unknown or already removed index is an error.
    pub fn remove(&mut self, index: usize) -> CoreResult<SharedFactor> {
        self.factors
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| CoreError::InvalidFactorIndex(index).log())
    }

    /// Empty several slots at once. All indices are checked first, so a
    /// failing call removes nothing.
    pub fn remove_many(&mut self, indices: &[usize]) -> CoreResult<Vec<(usize, SharedFactor)>> {
        let mut seen = BTreeSet::new();
        for &index in indices {
            if self.get(index).is_none() || !seen.insert(index) {
                return Err(CoreError::InvalidFactorIndex(index).log());
            }
        }
        Ok(indices
            .iter()
            .filter_map(|&index| {
                self.factors
                    .get_mut(index)
                    .and_then(Option::take)
                    .map(|f| (index, f))
            })
            .collect())
    }

    /// Put back factors taken out by [`Self::remove_many`].
    pub fn restore(&mut self, removed: Vec<(usize, SharedFactor)>) {
        for (index, factor) in removed {
            if let Some(slot) = self.factors.get_mut(index) {
                *slot = Some(factor);
            }
        }
    }

    pub fn get(&self, index: usize) -> Option<&SharedFactor> {
        self.factors.get(index).and_then(Option::as_ref)
    }

    /// Number of slots, including emptied ones.
    pub fn len(&self) -> usize {
        self.factors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factors.is_empty()
    }

    /// Number of factors still present.
    pub fn num_factors(&self) -> usize {
        self.factors.iter().filter(|f| f.is_some()).count()
    }

    /// Present factors with their slot index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &SharedFactor)> {
        self.factors
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (i, f)))
    }

    /// Every key touched by a present factor.
    pub fn keys(&self) -> BTreeSet<Key> {
        self.iter()
            .flat_map(|(_, f)| f.keys().iter().copied())
            .collect()
    }

    /// Total nonlinear error `Σ 0.5 ||W r||²`.
    pub fn error(&self, values: &Values) -> CoreResult<f64> {
        self.iter().map(|(_, f)| f.error(values)).sum()
    }
}

/// Linearize `(slot, factor)` pairs around `values`, keeping the slots.
pub fn linearize_factors(
    factors: &[(usize, &SharedFactor)],
    values: &Values,
) -> CoreResult<Vec<(usize, JacobianFactor)>> {
    let linearize_one =
        |(index, factor): &(usize, &SharedFactor)| -> CoreResult<(usize, JacobianFactor)> {
            Ok((*index, factor.linearize(values)?))
        };

    #[cfg(feature = "parallel")]
    let linearized: CoreResult<Vec<(usize, JacobianFactor)>> =
        factors.par_iter().map(linearize_one).collect();

    #[cfg(not(feature = "parallel"))]
    let linearized: CoreResult<Vec<(usize, JacobianFactor)>> =
        factors.iter().map(linearize_one).collect();

    linearized
}
