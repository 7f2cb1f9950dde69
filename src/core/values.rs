//! Nonlinear variable values.
//!
//! A [`Value`] is a closed set of the manifold types the estimator can hold; a
//! [`Values`] maps keys to values. Both expose the two manifold capabilities the
//! incremental engine relies on: `retract` (apply a tangent delta) and
//! `local_coordinates` (tangent difference between two values).

use crate::core::{CoreError, CoreResult, Key};
use crate::linalg::VectorValues;
use crate::manifold::{LieGroup, ManifoldError, ManifoldResult, ManifoldType, rn::Rn, se2::SE2};
use nalgebra::DVector;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Rn(Rn),
    SE2(SE2),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Rn(v) => write!(f, "{v}"),
            Value::SE2(v) => write!(f, "{v}"),
        }
    }
}

impl From<Rn> for Value {
    fn from(value: Rn) -> Self {
        Value::Rn(value)
    }
}

impl From<SE2> for Value {
    fn from(value: SE2) -> Self {
        Value::SE2(value)
    }
}

impl Value {
    pub fn manifold_type(&self) -> ManifoldType {
        match self {
            Value::Rn(_) => ManifoldType::RN,
            Value::SE2(_) => ManifoldType::SE2,
        }
    }

    /// Tangent-space dimension.
    pub fn dim(&self) -> usize {
        match self {
            Value::Rn(v) => v.tangent_dim(),
            Value::SE2(v) => v.tangent_dim(),
        }
    }

    /// Parameter vector handed to [`crate::factors::Factor::linearize`]:
    /// the raw vector for Rⁿ, `[x, y, theta]` for SE(2).
    pub fn to_vector(&self) -> DVector<f64> {
        match self {
            Value::Rn(v) => v.data().clone(),
            Value::SE2(v) => v.clone().into(),
        }
    }

    /// `self ⊞ delta`
    pub fn retract(&self, delta: &DVector<f64>) -> ManifoldResult<Value> {
        if delta.len() != self.dim() {
            return Err(ManifoldError::InvalidTangentDimension {
                expected: self.dim(),
                actual: delta.len(),
            });
        }
        if delta.iter().any(|v| !v.is_finite()) {
            return Err(ManifoldError::InvalidNumber);
        }
        Ok(match self {
            Value::Rn(v) => Value::Rn(v.plus(delta)),
            Value::SE2(v) => Value::SE2(v.plus(delta)),
        })
    }

    /// `other ⊟ self`, so that `self.retract(self.local_coordinates(other)) == other`.
    pub fn local_coordinates(&self, other: &Value) -> ManifoldResult<DVector<f64>> {
        match (self, other) {
            (Value::Rn(a), Value::Rn(b)) if a.dim() == b.dim() => Ok(b.minus(a)),
            (Value::Rn(a), Value::Rn(b)) => Err(ManifoldError::DimensionMismatch {
                expected: a.dim(),
                actual: b.dim(),
            }),
            (Value::SE2(a), Value::SE2(b)) => Ok(b.minus(a)),
            _ => Err(ManifoldError::TypeMismatch {
                expected: self.manifold_type(),
                actual: other.manifold_type(),
            }),
        }
    }
}

/// Key-ordered collection of nonlinear values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Values {
    values: BTreeMap<Key, Value>,
}

impl Values {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new variable; inserting a known key is rejected.
    pub fn insert(&mut self, key: Key, value: impl Into<Value>) -> CoreResult<()> {
        if self.values.contains_key(&key) {
            return Err(CoreError::DuplicateVariable(key).log());
        }
        self.values.insert(key, value.into());
        Ok(())
    }

    /// Replace the value of a known variable.
    pub fn update(&mut self, key: Key, value: impl Into<Value>) -> CoreResult<()> {
        match self.values.get_mut(&key) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(CoreError::UnknownVariable(key).log()),
        }
    }

    /// Insert or overwrite without checks.
    pub(crate) fn assign(&mut self, key: Key, value: Value) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: Key) -> Option<&Value> {
        self.values.get(&key)
    }

    /// Like [`Self::get`] but an unknown key is an error.
    pub fn at(&self, key: Key) -> CoreResult<&Value> {
        self.values
            .get(&key)
            .ok_or_else(|| CoreError::UnknownVariable(key).log())
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

    pub fn iter(&self) -> impl Iterator<Item = (Key, &Value)> {
        self.values.iter().map(|(&k, v)| (k, v))
    }

    /// Tangent dimension of every variable as zero vectors.
    pub fn zero_vectors(&self) -> VectorValues {
        self.values
            .iter()
            .map(|(&k, v)| (k, DVector::zeros(v.dim())))
            .collect()
    }

    /// Retract every variable that has a block in `delta`; others are copied.
    pub fn retract(&self, delta: &VectorValues) -> CoreResult<Values> {
        let mut out = self.clone();
        for (key, d) in delta.iter() {
            let value = out
                .values
                .get_mut(&key)
                .ok_or_else(|| CoreError::UnknownVariable(key).log())?;
            *value = value.retract(d).map_err(|e| CoreError::from(e).log())?;
        }
        Ok(out)
    }

    /// Tangent differences `other ⊟ self` over the keys of `self`.
    pub fn local_coordinates(&self, other: &Values) -> CoreResult<VectorValues> {
        self.values
            .iter()
            .map(|(&key, value)| {
                let target = other.at(key)?;
                let d = value
                    .local_coordinates(target)
                    .map_err(|e| CoreError::from(e).log())?;
                Ok((key, d))
            })
            .collect()
    }
}

impl FromIterator<(Key, Value)> for Values {
    fn from_iter<I: IntoIterator<Item = (Key, Value)>>(iter: I) -> Self {
        Values {
            values: iter.into_iter().collect(),
        }
    }
}
