//! Bayes tree: the clique tree produced by eliminating a factor graph.
//!
//! Every clique owns the conditional of one frontal variable given its
//! separator (the conditional's parents), the separator factor left over
//! when it was eliminated, and its contribution to the gradient at zero.
//! The separator factor summarizes the whole subtree below the clique, so
//! when the clique's ancestors are re-eliminated the subtree can be kept as
//! an orphan and represented by that one small factor.
//!
//! Cliques live in an arena indexed by [`CliqueId`]. Ids of removed cliques
//! are recycled.

use crate::core::Key;
use crate::inference::elimination_tree::EliminatedNode;
use crate::inference::{InferenceError, InferenceResult};
use crate::linalg::{GaussianConditional, JacobianFactor, LinAlgResult, VectorValues};
use std::collections::{BTreeSet, HashMap, HashSet};

pub type CliqueId = usize;

#[derive(Debug, Clone)]
pub struct Clique {
    conditional: GaussianConditional,
    cached_factor: JacobianFactor,
    gradient_contribution: VectorValues,
    parent: Option<CliqueId>,
    children: BTreeSet<CliqueId>,
}

impl Clique {
    fn from_node(node: EliminatedNode) -> Self {
        let gradient_contribution = node.conditional.gradient_at_zero();
        Clique {
            conditional: node.conditional,
            cached_factor: node.separator_factor,
            gradient_contribution,
            parent: None,
            children: BTreeSet::new(),
        }
    }

    pub fn conditional(&self) -> &GaussianConditional {
        &self.conditional
    }

    pub fn frontal(&self) -> Key {
        self.conditional.frontal()
    }

    pub fn separator(&self) -> &[Key] {
        self.conditional.parents()
    }

    /// Factor on the separator summarizing this clique and its subtree.
    pub fn cached_factor(&self) -> &JacobianFactor {
        &self.cached_factor
    }

    /// `-[R S]ᵀ d` of this clique's conditional.
    pub fn gradient_contribution(&self) -> &VectorValues {
        &self.gradient_contribution
    }

    pub fn parent(&self) -> Option<CliqueId> {
        self.parent
    }

    pub fn children(&self) -> impl Iterator<Item = CliqueId> + '_ {
        self.children.iter().copied()
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Record of one [`BayesTree::replace_top`] call.
#[derive(Debug)]
pub struct TreeEdit {
    new_cliques: Vec<CliqueId>,
    removed: Vec<(CliqueId, Clique)>,
    orphan_parents: Vec<(CliqueId, Option<CliqueId>)>,
    roots: BTreeSet<CliqueId>,
    free: Vec<CliqueId>,
    arena_len: usize,
}

impl TreeEdit {
    /// Ids of the cliques created by the edit, in elimination order.
    pub fn new_cliques(&self) -> &[CliqueId] {
        &self.new_cliques
    }

    /// Number of cliques the edit removed.
    pub fn removed(&self) -> usize {
        self.removed.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BayesTree {
    cliques: Vec<Option<Clique>>,
    free: Vec<CliqueId>,
    roots: BTreeSet<CliqueId>,
    nodes: HashMap<Key, CliqueId>,
}

impl BayesTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cliques.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clique(&self, id: CliqueId) -> Option<&Clique> {
        self.cliques.get(id).and_then(Option::as_ref)
    }

    /// Clique whose frontal variable is `key`.
    pub fn clique_of(&self, key: Key) -> Option<CliqueId> {
        self.nodes.get(&key).copied()
    }

    pub fn conditional_of(&self, key: Key) -> Option<&GaussianConditional> {
        self.clique_of(key)
            .and_then(|id| self.clique(id))
            .map(Clique::conditional)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.nodes.contains_key(&key)
    }

    pub fn root_cliques(&self) -> impl Iterator<Item = CliqueId> + '_ {
        self.roots.iter().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (CliqueId, &Clique)> {
        self.cliques
            .iter()
            .enumerate()
            .filter_map(|(id, c)| c.as_ref().map(|c| (id, c)))
    }

    /// Cliques in pre-order: every clique appears after its parent.
    pub fn top_down(&self) -> Vec<CliqueId> {
        let mut order = Vec::with_capacity(self.len());
        let mut stack: Vec<CliqueId> = self.roots.iter().rev().copied().collect();
        while let Some(id) = stack.pop() {
            order.push(id);
            if let Some(clique) = self.clique(id) {
                stack.extend(clique.children.iter().rev().copied());
            }
        }
        order
    }

    /// The cliques of `keys` together with all their ancestors. Keys not in
    /// the tree are ignored.
    pub fn top_of<'a>(&self, keys: impl IntoIterator<Item = &'a Key>) -> BTreeSet<CliqueId> {
        let mut top = BTreeSet::new();
        for key in keys {
            let mut current = self.clique_of(*key);
            while let Some(id) = current {
                if !top.insert(id) {
                    break;
                }
                current = self.clique(id).and_then(|c| c.parent);
            }
        }
        top
    }

    /// Children of `top` cliques that are not themselves in `top`.
    pub fn orphans_of(&self, top: &BTreeSet<CliqueId>) -> Vec<CliqueId> {
        top.iter()
            .filter_map(|&id| self.clique(id))
            .flat_map(|c| c.children.iter().copied())
            .filter(|child| !top.contains(child))
            .collect()
    }

    /// Frontal variables of every clique whose separator contains a key of
    /// `mask`.
    pub fn find_all(&self, mask: &HashSet<Key>) -> BTreeSet<Key> {
        self.iter()
            .filter(|(_, c)| c.separator().iter().any(|k| mask.contains(k)))
            .map(|(_, c)| c.frontal())
            .collect()
    }

    /// Replace the `top` cliques by freshly eliminated ones and hang every
    /// orphan under the new clique of its given attachment key.
    ///
    /// Everything is checked before the tree is touched, so an error leaves
    /// the tree unchanged. The returned edit lists the new cliques in the
    /// order of `nodes` and can be handed to [`Self::revert`].
    pub fn replace_top(
        &mut self,
        top: &BTreeSet<CliqueId>,
        nodes: Vec<EliminatedNode>,
        orphans: &[(CliqueId, Key)],
    ) -> InferenceResult<TreeEdit> {
        let new_keys: HashSet<Key> = nodes.iter().map(EliminatedNode::key).collect();
        for node in &nodes {
            let key = node.key();
            if let Some(&owner) = self.nodes.get(&key)
                && !top.contains(&owner)
            {
                return Err(InferenceError::RunningIntersection(format!(
                    "variable {key} is eliminated again outside the re-eliminated region"
                ))
                .log());
            }
            if let Some(parent_key) = node.conditional.parents().first()
                && !new_keys.contains(parent_key)
            {
                return Err(InferenceError::RunningIntersection(format!(
                    "separator of {key} starts at {parent_key}, which was not re-eliminated"
                ))
                .log());
            }
        }
        for &(orphan, key) in orphans {
            let Some(clique) = self.clique(orphan) else {
                return Err(InferenceError::RunningIntersection(format!(
                    "orphan clique {orphan} does not exist"
                ))
                .log());
            };
            if !new_keys.contains(&key) {
                return Err(InferenceError::DetachedOrphan {
                    clique: orphan,
                    separator: clique.separator().to_vec(),
                }
                .log());
            }
        }

        let mut edit = TreeEdit {
            new_cliques: vec![0; nodes.len()],
            removed: Vec::with_capacity(top.len()),
            orphan_parents: Vec::with_capacity(orphans.len()),
            roots: self.roots.clone(),
            free: self.free.clone(),
            arena_len: self.cliques.len(),
        };

        for &id in top {
            if let Some(clique) = self.cliques.get_mut(id).and_then(Option::take) {
                self.nodes.remove(&clique.frontal());
                self.roots.remove(&id);
                self.free.push(id);
                edit.removed.push((id, clique));
            }
        }

        // Parents come after their children in elimination order, so
        // allocate in reverse and link each clique to an existing parent.
        for (i, node) in nodes.into_iter().enumerate().rev() {
            let parent = node
                .conditional
                .parents()
                .first()
                .and_then(|k| self.nodes.get(k).copied());
            let id = self.allocate(Clique::from_node(node));
            self.link(id, parent);
            edit.new_cliques[i] = id;
        }

        for &(orphan, key) in orphans {
            let parent = self.nodes.get(&key).copied();
            if let Some(clique) = self.cliques.get_mut(orphan).and_then(Option::as_mut) {
                edit.orphan_parents.push((orphan, clique.parent.take()));
            }
            self.link(orphan, parent);
        }
        Ok(edit)
    }

    /// Undo a [`Self::replace_top`], restoring the tree exactly as it was.
    pub fn revert(&mut self, edit: TreeEdit) {
        for &id in &edit.new_cliques {
            if let Some(clique) = self.cliques.get_mut(id).and_then(Option::take) {
                self.nodes.remove(&clique.frontal());
            }
        }
        self.cliques.truncate(edit.arena_len);
        for (id, clique) in edit.removed {
            self.nodes.insert(clique.frontal(), id);
            self.cliques[id] = Some(clique);
        }
        for (orphan, parent) in edit.orphan_parents {
            if let Some(clique) = self.cliques.get_mut(orphan).and_then(Option::as_mut) {
                clique.parent = parent;
            }
        }
        self.roots = edit.roots;
        self.free = edit.free;
    }

    fn allocate(&mut self, clique: Clique) -> CliqueId {
        let key = clique.frontal();
        let id = match self.free.pop() {
            Some(id) => {
                self.cliques[id] = Some(clique);
                id
            }
            None => {
                self.cliques.push(Some(clique));
                self.cliques.len() - 1
            }
        };
        self.nodes.insert(key, id);
        id
    }

    fn link(&mut self, id: CliqueId, parent: Option<CliqueId>) {
        if let Some(clique) = self.cliques.get_mut(id).and_then(Option::as_mut) {
            clique.parent = parent;
        }
        match parent.and_then(|p| self.cliques.get_mut(p).and_then(Option::as_mut)) {
            Some(parent_clique) => {
                parent_clique.children.insert(id);
                self.roots.remove(&id);
            }
            None => {
                self.roots.insert(id);
            }
        }
    }

    /// Verify parent/child links and that every separator is contained in
    /// the parent's frontal and separator variables.
    pub fn check_running_intersection(&self) -> InferenceResult<()> {
        for (id, clique) in self.iter() {
            if self.nodes.get(&clique.frontal()) != Some(&id) {
                return Err(InferenceError::RunningIntersection(format!(
                    "clique {id} is not indexed by its frontal {}",
                    clique.frontal()
                )));
            }
            for child in clique.children() {
                if self.clique(child).and_then(|c| c.parent) != Some(id) {
                    return Err(InferenceError::RunningIntersection(format!(
                        "clique {child} is listed under {id} but does not point back"
                    )));
                }
            }
            let Some(parent_id) = clique.parent else {
                if !self.roots.contains(&id) {
                    return Err(InferenceError::RunningIntersection(format!(
                        "parentless clique {id} is not a root"
                    )));
                }
                if !clique.separator().is_empty() {
                    return Err(InferenceError::RunningIntersection(format!(
                        "root clique of {} has separator {:?}",
                        clique.frontal(),
                        clique.separator()
                    )));
                }
                continue;
            };
            let parent = self.clique(parent_id).ok_or_else(|| {
                InferenceError::RunningIntersection(format!(
                    "clique {id} points to missing parent {parent_id}"
                ))
            })?;
            if !parent.children.contains(&id) {
                return Err(InferenceError::RunningIntersection(format!(
                    "clique {id} is missing from the children of {parent_id}"
                )));
            }
            let covered = |k: &Key| *k == parent.frontal() || parent.separator().contains(k);
            if let Some(k) = clique.separator().iter().find(|k| !covered(k)) {
                return Err(InferenceError::RunningIntersection(format!(
                    "separator variable {k} of clique {} is not in parent clique {}",
                    clique.frontal(),
                    parent.frontal()
                )));
            }
        }
        Ok(())
    }

    /// Stored entries over all conditionals.
    pub fn calculate_nnz(&self) -> usize {
        self.iter().map(|(_, c)| c.conditional.nnz()).sum()
    }

    /// `Σ 0.5 ||R x_f + S x_s - d||²` over all cliques.
    pub fn linear_error(&self, x: &VectorValues) -> LinAlgResult<f64> {
        self.iter().map(|(_, c)| c.conditional.error(x)).sum()
    }

    /// Gradient of [`Self::linear_error`] at zero, summed from the cached
    /// clique contributions.
    pub fn gradient_at_zero(&self) -> VectorValues {
        let mut g = VectorValues::new();
        for (_, clique) in self.iter() {
            for (key, value) in clique.gradient_contribution.iter() {
                g.add_in_place(key, value);
            }
        }
        g
    }

    /// `||R x||²` for the whole upper triangular system.
    pub fn r_norm_squared(&self, x: &VectorValues) -> LinAlgResult<f64> {
        self.iter()
            .map(|(_, c)| c.conditional.apply(x).map(|v| v.norm_squared()))
            .sum()
    }
}
