//! Applying a precomputed mapping matrix to field data.

use crate::core::collections::WeightBuffer;
use crate::core::error::MappingError;
use crate::core::field::{Field, FieldError, weighted_sum_into};
use crate::core::mesh::{BasisOrder, Mesh};
use crate::core::sparse::SparseRowMatrix;

/// Evaluates `matrix · source_field` into a field of `dest_basis` on `dest_mesh`.
///
/// Each output value is the weighted sum of the source values named by its
/// row; rows without entries produce zero.
///
/// # Errors
///
/// Returns [`MappingError::ElementCountMismatch`] when the matrix columns do
/// not match the source value count or the rows do not match the destination
/// value count, and [`FieldError::PointCloudBasis`] for non-linear data on a
/// point cloud.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::apply_mapping::apply_mapping_matrix;
/// use meshfield::core::field::Field;
/// use meshfield::core::mesh::{BasisOrder, Mesh};
/// use meshfield::core::sparse::SparseRowMatrix;
/// use meshfield::geometry::point::Point;
///
/// let dest = Mesh::point_cloud(vec![Point::origin(), Point::new([1.0, 0.0, 0.0])]).unwrap();
/// let matrix = SparseRowMatrix::new(2, 2, vec![0, 2, 2], vec![0, 1], vec![0.5, 0.5]).unwrap();
/// let source = Field::scalar(BasisOrder::Linear, vec![2.0, 4.0]);
///
/// let out = apply_mapping_matrix(&source, &dest, BasisOrder::Linear, &matrix).unwrap();
/// assert_eq!(out.components(), &[3.0, 0.0]);
/// ```
pub fn apply_mapping_matrix(
    source_field: &Field,
    dest_mesh: &Mesh,
    dest_basis: BasisOrder,
    matrix: &SparseRowMatrix,
) -> Result<Field, MappingError> {
    if matrix.cols() != source_field.len() {
        return Err(MappingError::ElementCountMismatch {
            what: "mapping matrix columns vs source values",
            expected: source_field.len(),
            actual: matrix.cols(),
        });
    }
    if dest_mesh.is_point_cloud() && dest_basis != BasisOrder::Linear {
        return Err(FieldError::PointCloudBasis { basis: dest_basis }.into());
    }
    let expected_rows = dest_mesh.num_values(dest_basis);
    if matrix.rows() != expected_rows {
        return Err(MappingError::ElementCountMismatch {
            what: "mapping matrix rows vs destination values",
            expected: expected_rows,
            actual: matrix.rows(),
        });
    }

    let kind = source_field.kind();
    let width = kind.components();
    let mut data = vec![0.0; matrix.rows() * width];
    for (row, out) in data.chunks_exact_mut(width).enumerate() {
        if matrix.row_len(row) > 0 {
            let weights: WeightBuffer = matrix.row(row).collect();
            weighted_sum_into(out, source_field, &weights);
        }
    }
    Ok(Field::from_components(dest_basis, kind, data)?)
}
