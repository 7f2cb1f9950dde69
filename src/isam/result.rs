//! What an update did.

use crate::core::Key;
use std::collections::BTreeMap;
use std::fmt;

/// Per-variable flags of one update.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableStatus {
    /// Its clique was removed and rebuilt.
    pub is_reeliminated: bool,
    /// Its delta exceeded the relinearization threshold.
    pub is_above_relin_threshold: bool,
    /// Shares a factor or a clique separator with a relinearized variable.
    pub is_relinearize_involved: bool,
    /// Its linearization point moved.
    pub is_relinearized: bool,
    /// Touched by a new or removed factor.
    pub is_observed: bool,
    /// Introduced by this update.
    pub is_new: bool,
    /// Frontal variable of a root clique after the update.
    pub in_root_clique: bool,
}

/// Status of every variable that the update touched in any way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailedResults {
    pub variable_status: BTreeMap<Key, VariableStatus>,
}

impl DetailedResults {
    pub fn status(&self, key: Key) -> Option<&VariableStatus> {
        self.variable_status.get(&key)
    }

    pub(crate) fn entry(&mut self, key: Key) -> &mut VariableStatus {
        self.variable_status.entry(key).or_default()
    }
}

/// Summary returned by [`crate::isam::Isam2::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Isam2Result {
    /// Nonlinear error before the update, when error evaluation is enabled.
    pub error_before: Option<f64>,
    /// Nonlinear error after the update, when error evaluation is enabled.
    pub error_after: Option<f64>,
    /// Variables whose linearization point moved.
    pub variables_relinearized: usize,
    /// Variables removed from the tree and eliminated again.
    pub variables_reeliminated: usize,
    /// Cliques in the tree after the update.
    pub cliques: usize,
    /// Cliques built by this update.
    pub cliques_reeliminated: usize,
    /// Subtrees kept and reattached below the rebuilt cliques.
    pub orphans: usize,
    /// Variables re-solved by back-substitution.
    pub variables_backsubstituted: usize,
    /// Slots assigned to the new factors, in input order.
    pub new_factor_indices: Vec<usize>,
    pub detail: Option<DetailedResults>,
}

impl fmt::Display for Isam2Result {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "relinearized {}, re-eliminated {} ({} orphans), back-substituted {}, {} cliques",
            self.variables_relinearized,
            self.variables_reeliminated,
            self.orphans,
            self.variables_backsubstituted,
            self.cliques
        )?;
        if let (Some(before), Some(after)) = (self.error_before, self.error_after) {
            write!(f, ", error {before:.6e} -> {after:.6e}")?;
        }
        Ok(())
    }
}
