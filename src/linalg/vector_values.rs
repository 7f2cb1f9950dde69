//! Per-variable vectors in tangent space.

use crate::core::Key;
use nalgebra::DVector;
use std::collections::BTreeMap;

/// A block vector indexed by variable key: the linear delta, gradients and
/// steps all use this shape.
///
/// Keys are kept sorted so that iteration and the assembled flat vector are
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorValues {
    values: BTreeMap<Key, DVector<f64>>,
}

impl VectorValues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero vectors with the same keys and block sizes as `other`.
    pub fn zeros_like(other: &VectorValues) -> Self {
        VectorValues {
            values: other
                .values
                .iter()
                .map(|(&k, v)| (k, DVector::zeros(v.len())))
                .collect(),
        }
    }

    pub fn insert(&mut self, key: Key, value: DVector<f64>) -> Option<DVector<f64>> {
        self.values.insert(key, value)
    }

    pub fn remove(&mut self, key: Key) -> Option<DVector<f64>> {
        self.values.remove(&key)
    }

    pub fn get(&self, key: Key) -> Option<&DVector<f64>> {
        self.values.get(&key)
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut DVector<f64>> {
        self.values.get_mut(&key)
    }

    pub fn contains(&self, key: Key) -> bool {
        self.values.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = Key> + '_ {
        self.values.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &DVector<f64>)> {
        self.values.iter().map(|(&k, v)| (k, v))
    }

    /// Total scalar dimension.
    pub fn dim(&self) -> usize {
        self.values.values().map(|v| v.len()).sum()
    }

    /// Add `value` into the block at `key`, creating it when absent.
    pub fn add_in_place(&mut self, key: Key, value: &DVector<f64>) {
        match self.values.get_mut(&key) {
            Some(existing) => *existing += value,
            None => {
                self.values.insert(key, value.clone());
            }
        }
    }

    /// Inner product over the shared keys; absent blocks count as zero.
    pub fn dot(&self, other: &VectorValues) -> f64 {
        self.values
            .iter()
            .filter_map(|(k, v)| other.values.get(k).map(|w| v.dot(w)))
            .sum()
    }

    pub fn squared_norm(&self) -> f64 {
        self.values.values().map(|v| v.norm_squared()).sum()
    }

    pub fn norm(&self) -> f64 {
        self.squared_norm().sqrt()
    }

    /// Largest absolute component over all blocks.
    pub fn max_abs(&self) -> f64 {
        self.values.values().map(|v| v.amax()).fold(0.0, f64::max)
    }

    pub fn scaled(&self, alpha: f64) -> VectorValues {
        VectorValues {
            values: self.values.iter().map(|(&k, v)| (k, v * alpha)).collect(),
        }
    }

    /// `self + alpha * other` over the union of keys.
    pub fn axpy(&self, alpha: f64, other: &VectorValues) -> VectorValues {
        let mut result = self.clone();
        for (&k, v) in &other.values {
            result.add_in_place(k, &(v * alpha));
        }
        result
    }

    /// Concatenate the blocks of `keys` into one flat vector.
    pub fn stack(&self, keys: &[Key]) -> Option<DVector<f64>> {
        let blocks: Vec<&DVector<f64>> = keys
            .iter()
            .map(|k| self.values.get(k))
            .collect::<Option<_>>()?;
        let total = blocks.iter().map(|b| b.len()).sum();
        let mut out = DVector::zeros(total);
        let mut offset = 0;
        for block in blocks {
            out.rows_mut(offset, block.len()).copy_from(block);
            offset += block.len();
        }
        Some(out)
    }
}

impl FromIterator<(Key, DVector<f64>)> for VectorValues {
    fn from_iter<I: IntoIterator<Item = (Key, DVector<f64>)>>(iter: I) -> Self {
        VectorValues {
            values: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    const TOLERANCE: f64 = 1e-12;

    #[test]
    fn test_dot_and_norm_over_blocks() {
        let a: VectorValues = [(1, dvector![1.0, 2.0]), (2, dvector![3.0])]
            .into_iter()
            .collect();
        let b: VectorValues = [(1, dvector![1.0, 1.0]), (3, dvector![5.0])]
            .into_iter()
            .collect();
        assert!((a.dot(&b) - 3.0).abs() < TOLERANCE);
        assert!((a.squared_norm() - 14.0).abs() < TOLERANCE);
        assert!((a.max_abs() - 3.0).abs() < TOLERANCE);
    }

    #[test]
    fn test_axpy_unions_keys() {
        let a: VectorValues = [(1, dvector![1.0])].into_iter().collect();
        let b: VectorValues = [(1, dvector![2.0]), (4, dvector![1.0, -1.0])]
            .into_iter()
            .collect();
        let c = a.axpy(0.5, &b);
        assert_eq!(c.get(1), Some(&dvector![2.0]));
        assert_eq!(c.get(4), Some(&dvector![0.5, -0.5]));
        assert_eq!(c.dim(), 3);
    }

    #[test]
    fn test_stack_requires_every_key() {
        let a: VectorValues = [(1, dvector![1.0]), (2, dvector![2.0, 3.0])]
            .into_iter()
            .collect();
        assert_eq!(a.stack(&[2, 1]), Some(dvector![2.0, 3.0, 1.0]));
        assert!(a.stack(&[1, 9]).is_none());
    }
}
