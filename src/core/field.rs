//! Field data attached to a mesh.
//!
//! A [`Field`] pairs a [`BasisOrder`] with a flat value buffer. Each value has
//! 1 (scalar), 3 (vector), or 6 (symmetric tensor) components, stored
//! contiguously. The field does not own its mesh; it is validated against one
//! with [`Field::validate_against`] before use.

use crate::core::mesh::{BasisOrder, Mesh};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// TYPES
// =============================================================================

/// Shape of a single field value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// One component.
    Scalar,
    /// Three components.
    Vector,
    /// Six independent components of a symmetric 3×3 tensor.
    Tensor,
}

impl ValueKind {
    /// Number of `f64` components per value.
    #[must_use]
    pub const fn components(self) -> usize {
        match self {
            Self::Scalar => 1,
            Self::Vector => 3,
            Self::Tensor => 6,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scalar => "scalar",
            Self::Vector => "vector",
            Self::Tensor => "tensor",
        })
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised by field construction and validation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FieldError {
    /// The flat buffer length is not a multiple of the component count.
    #[error("Field buffer of {len} entries is not a whole number of {kind} values")]
    RaggedData {
        /// Buffer length.
        len: usize,
        /// Value kind.
        kind: ValueKind,
    },
    /// The field has a different number of values than its mesh requires.
    #[error("Field has {actual} values but the mesh needs {expected} for basis order {basis:?}")]
    ValueCountMismatch {
        /// Basis order of the field.
        basis: BasisOrder,
        /// Values required by the mesh.
        expected: usize,
        /// Values present.
        actual: usize,
    },
    /// Element-based data on a mesh without elements.
    #[error("Field with basis order {basis:?} cannot live on a point cloud")]
    PointCloudBasis {
        /// Basis order of the field.
        basis: BasisOrder,
    },
    /// Two fields that must agree have different value kinds.
    #[error("Value kind mismatch: expected {expected}, found {actual}")]
    KindMismatch {
        /// Required kind.
        expected: ValueKind,
        /// Kind found.
        actual: ValueKind,
    },
}

// =============================================================================
// FIELD
// =============================================================================

/// Values attached to a mesh at the granularity of a basis order.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::field::{Field, ValueKind};
/// use meshfield::core::mesh::BasisOrder;
///
/// let f = Field::vector(BasisOrder::Linear, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
/// assert_eq!(f.kind(), ValueKind::Vector);
/// assert_eq!(f.len(), 2);
/// assert_eq!(f.value(1), &[4.0, 5.0, 6.0]);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawField")]
pub struct Field {
    basis: BasisOrder,
    kind: ValueKind,
    data: Vec<f64>,
}

#[derive(Deserialize)]
struct RawField {
    basis: BasisOrder,
    kind: ValueKind,
    data: Vec<f64>,
}

impl TryFrom<RawField> for Field {
    type Error = FieldError;

    fn try_from(raw: RawField) -> Result<Self, Self::Error> {
        Self::from_components(raw.basis, raw.kind, raw.data)
    }
}

impl Field {
    /// Builds a field from a flat component buffer.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::RaggedData`] if `data.len()` is not a multiple of
    /// `kind.components()`.
    pub fn from_components(
        basis: BasisOrder,
        kind: ValueKind,
        data: Vec<f64>,
    ) -> Result<Self, FieldError> {
        if data.len() % kind.components() != 0 {
            return Err(FieldError::RaggedData {
                len: data.len(),
                kind,
            });
        }
        Ok(Self { basis, kind, data })
    }

    /// Scalar field.
    #[must_use]
    pub const fn scalar(basis: BasisOrder, values: Vec<f64>) -> Self {
        Self {
            basis,
            kind: ValueKind::Scalar,
            data: values,
        }
    }

    /// Vector field.
    #[must_use]
    pub fn vector(basis: BasisOrder, values: Vec<[f64; 3]>) -> Self {
        Self {
            basis,
            kind: ValueKind::Vector,
            data: values.into_iter().flatten().collect(),
        }
    }

    /// Symmetric tensor field (`xx, xy, xz, yy, yz, zz`).
    #[must_use]
    pub fn tensor(basis: BasisOrder, values: Vec<[f64; 6]>) -> Self {
        Self {
            basis,
            kind: ValueKind::Tensor,
            data: values.into_iter().flatten().collect(),
        }
    }

    /// A field of `count` values with every component set to `fill`.
    #[must_use]
    pub fn filled(basis: BasisOrder, kind: ValueKind, count: usize, fill: f64) -> Self {
        Self {
            basis,
            kind,
            data: vec![fill; count * kind.components()],
        }
    }

    /// Basis order.
    #[must_use]
    pub const fn basis(&self) -> BasisOrder {
        self.basis
    }

    /// Value kind.
    #[must_use]
    pub const fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Number of values.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len() / self.kind.components()
    }

    /// Returns `true` if the field holds no values.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Components of value `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn value(&self, index: usize) -> &[f64] {
        let n = self.kind.components();
        &self.data[index * n..(index + 1) * n]
    }

    /// Scalar value `index`, or `None` for non-scalar fields.
    #[must_use]
    pub fn scalar_value(&self, index: usize) -> Option<f64> {
        (self.kind == ValueKind::Scalar)
            .then(|| self.data.get(index).copied())
            .flatten()
    }

    /// The flat component buffer.
    #[must_use]
    pub fn components(&self) -> &[f64] {
        &self.data
    }

    /// Mutable flat component buffer.
    pub fn components_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Consumes the field, returning its flat component buffer.
    #[must_use]
    pub fn into_components(self) -> Vec<f64> {
        self.data
    }

    /// Checks that the field has exactly the values `mesh` needs for its basis.
    ///
    /// # Errors
    ///
    /// Returns [`FieldError::PointCloudBasis`] for non-linear data on a point
    /// cloud and [`FieldError::ValueCountMismatch`] for a wrong value count.
    pub fn validate_against(&self, mesh: &Mesh) -> Result<(), FieldError> {
        if mesh.is_point_cloud() && self.basis != BasisOrder::Linear {
            return Err(FieldError::PointCloudBasis { basis: self.basis });
        }
        let expected = mesh.num_values(self.basis);
        if self.len() != expected {
            return Err(FieldError::ValueCountMismatch {
                basis: self.basis,
                expected,
                actual: self.len(),
            });
        }
        Ok(())
    }
}

/// Copy one value's components from `src` into `dst`.
#[inline]
pub(crate) fn copy_value(dst: &mut [f64], src: &[f64]) {
    dst.copy_from_slice(src);
}

/// Write `Σ wᵢ · source[idxᵢ]` into `dst`.
#[inline]
pub(crate) fn weighted_sum_into(dst: &mut [f64], source: &Field, weights: &[(usize, f64)]) {
    dst.fill(0.0);
    for &(idx, w) in weights {
        for (d, s) in dst.iter_mut().zip(source.value(idx)) {
            *d = w.mul_add(*s, *d);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mesh::MeshTopology;
    use crate::geometry::point::Point;

    #[test]
    fn test_from_components_rejects_ragged() {
        assert_eq!(
            Field::from_components(BasisOrder::Linear, ValueKind::Vector, vec![0.0; 4]),
            Err(FieldError::RaggedData {
                len: 4,
                kind: ValueKind::Vector
            })
        );
        let t = Field::from_components(BasisOrder::Linear, ValueKind::Tensor, vec![0.0; 12]).unwrap();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn test_validate_against_mesh() {
        let mesh = Mesh::new(
            MeshTopology::Curve,
            vec![Point::origin(), Point::new([1.0, 0.0, 0.0]), Point::new([2.0, 0.0, 0.0])],
            vec![0, 1, 1, 2],
        )
        .unwrap();
        assert!(Field::scalar(BasisOrder::Linear, vec![0.0; 3]).validate_against(&mesh).is_ok());
        assert!(Field::scalar(BasisOrder::Constant, vec![0.0; 2]).validate_against(&mesh).is_ok());
        assert!(Field::scalar(BasisOrder::Quadratic, vec![0.0; 5]).validate_against(&mesh).is_ok());
        assert_eq!(
            Field::scalar(BasisOrder::Constant, vec![0.0; 3]).validate_against(&mesh),
            Err(FieldError::ValueCountMismatch {
                basis: BasisOrder::Constant,
                expected: 2,
                actual: 3
            })
        );

        let cloud = Mesh::point_cloud(vec![Point::origin()]).unwrap();
        assert_eq!(
            Field::scalar(BasisOrder::Constant, vec![]).validate_against(&cloud),
            Err(FieldError::PointCloudBasis {
                basis: BasisOrder::Constant
            })
        );
    }

    #[test]
    fn test_weighted_sum_into() {
        let f = Field::vector(BasisOrder::Linear, vec![[1.0, 0.0, 2.0], [3.0, 4.0, 0.0]]);
        let mut out = [9.0; 3];
        weighted_sum_into(&mut out, &f, &[(0, 0.5), (1, 0.5)]);
        assert_eq!(out, [2.0, 2.0, 1.0]);
    }

    #[test]
    fn test_scalar_value_only_for_scalars() {
        let s = Field::scalar(BasisOrder::Linear, vec![1.5]);
        assert_eq!(s.scalar_value(0), Some(1.5));
        assert_eq!(s.scalar_value(3), None);
        let v = Field::vector(BasisOrder::Linear, vec![[1.0; 3]]);
        assert_eq!(v.scalar_value(0), None);
    }
}
