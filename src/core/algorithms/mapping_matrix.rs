//! Sparse mapping matrix construction.
//!
//! [`build_mapping_matrix`] turns a source field's layout and a destination
//! mesh into a reusable `destination values × source values` matrix. The
//! per-row work runs on a [`ParallelMap`](crate::core::parallel::ParallelMap);
//! the reductions in this module then compact the candidates on one thread.

use crate::core::algorithms::correspondence::{
    CollisionPolicy, CorrespondenceInput, MappingOptions,
};
use crate::core::error::MappingError;
use crate::core::field::{Field, FieldError};
use crate::core::locator::MeshLocator;
use crate::core::mesh::{BasisOrder, Mesh};
use crate::core::parallel::{CandidateArray, SequentialReduce};
use crate::core::report::ExecutionContext;
use crate::core::sparse::{CsrBuilder, SparseRowMatrix};
use crate::core::traits::mesh_query::MeshQuery;

// =============================================================================
// REDUCTIONS
// =============================================================================

/// Compacts per-row candidate slots into CSR, keeping slot order.
///
/// Empty slots are skipped; a row whose slots are all empty has no entries.
#[derive(Clone, Copy, Debug)]
pub struct CompactRows {
    /// Column count of the resulting matrix.
    pub cols: usize,
}

impl SequentialReduce<Option<(usize, f64)>> for CompactRows {
    type Output = SparseRowMatrix;

    fn reduce(
        self,
        candidates: CandidateArray<Option<(usize, f64)>>,
        _ctx: &ExecutionContext,
    ) -> Result<SparseRowMatrix, MappingError> {
        let rows = candidates.len();
        let nnz = candidates.items().flatten().filter(|c| c.is_some()).count();
        let mut builder = CsrBuilder::with_capacity(rows, self.cols, nnz);
        for item in candidates.items() {
            for &(column, weight) in item.iter().flatten() {
                builder.push(column, weight);
            }
            builder.finish_row();
        }
        Ok(builder.build()?)
    }
}

/// Inverts source → destination assignments into destination rows.
///
/// Each destination row receives at most one source column with weight `1.0`;
/// contested rows are resolved by the [`CollisionPolicy`].
#[derive(Clone, Copy, Debug)]
pub struct InvertAssignments {
    /// Number of destination samples (matrix rows).
    pub rows: usize,
    /// Resolution for destinations claimed by several sources.
    pub policy: CollisionPolicy,
}

impl SequentialReduce<Option<usize>> for InvertAssignments {
    type Output = SparseRowMatrix;

    fn reduce(
        self,
        candidates: CandidateArray<Option<usize>>,
        _ctx: &ExecutionContext,
    ) -> Result<SparseRowMatrix, MappingError> {
        let cols = candidates.len();
        let mut owner: Vec<Option<usize>> = vec![None; self.rows];
        for (source, item) in candidates.items().enumerate() {
            let Some(destination) = item[0] else {
                continue;
            };
            let slot = owner.get_mut(destination).ok_or_else(|| {
                MappingError::internal(format!(
                    "source {source} assigned to destination {destination} of {}",
                    self.rows
                ))
            })?;
            match (*slot, self.policy) {
                (None, _) | (Some(_), CollisionPolicy::LastWins) => *slot = Some(source),
                (Some(_), CollisionPolicy::FirstWins) => {}
                (Some(first), CollisionPolicy::Error) => {
                    return Err(MappingError::DestinationCollision {
                        destination,
                        first,
                        second: source,
                    });
                }
            }
        }

        let assigned = owner.iter().flatten().count();
        let mut builder = CsrBuilder::with_capacity(self.rows, cols, assigned);
        for source in owner {
            if let Some(column) = source {
                builder.push(column, 1.0);
            }
            builder.finish_row();
        }
        Ok(builder.build()?)
    }
}

// =============================================================================
// ENTRY POINTS
// =============================================================================

/// Checks that `source_field` lives on `source_mesh` and that a field of
/// `dest_basis` can exist on `dest_mesh`.
pub(crate) fn validate_transfer(
    source_mesh: &Mesh,
    source_field: &Field,
    dest_mesh: &Mesh,
    dest_basis: BasisOrder,
) -> Result<(), MappingError> {
    if source_mesh.num_nodes() == 0 {
        return Err(MappingError::EmptyInput {
            what: "source mesh".to_owned(),
        });
    }
    source_field.validate_against(source_mesh)?;
    if dest_mesh.is_point_cloud() && dest_basis != BasisOrder::Linear {
        return Err(FieldError::PointCloudBasis { basis: dest_basis }.into());
    }
    Ok(())
}

/// Builds the matrix relating `source_field`'s values to destination values.
///
/// Rows are destination values of [`MappingOptions::destination_basis`]
/// (element centers for constant data, nodes for linear data, nodes then edge
/// midpoints for quadratic data); columns are source values. Any source basis
/// may map onto any destination basis, so element data can be sampled at
/// destination nodes and node data at destination element centers.
///
/// # Errors
///
/// Returns [`MappingError::PointCloudInterpolation`] for interpolation from a
/// point cloud, [`MappingError::DestinationCollision`] under
/// [`CollisionPolicy::Error`], a field/mesh mismatch error, or
/// [`MappingError::Cancelled`].
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::correspondence::{MappingMethod, MappingOptions};
/// use meshfield::core::algorithms::mapping_matrix::build_mapping_matrix;
/// use meshfield::core::field::Field;
/// use meshfield::core::mesh::{BasisOrder, Mesh};
/// use meshfield::core::report::ExecutionContext;
/// use meshfield::geometry::point::Point;
///
/// let source = Mesh::point_cloud(vec![Point::new([0.0, 0.0, 0.0]), Point::new([1.0, 0.0, 0.0])]).unwrap();
/// let dest = Mesh::point_cloud(vec![Point::new([0.9, 0.1, 0.0])]).unwrap();
/// let field = Field::scalar(BasisOrder::Linear, vec![10.0, 20.0]);
///
/// let options = MappingOptions::default().with_method(MappingMethod::ClosestData);
/// let matrix = build_mapping_matrix(&source, &field, &dest, &options, &ExecutionContext::default()).unwrap();
/// assert_eq!((matrix.rows(), matrix.cols()), (1, 2));
/// assert_eq!(matrix.get(0, 1), 1.0);
/// ```
pub fn build_mapping_matrix(
    source_mesh: &Mesh,
    source_field: &Field,
    dest_mesh: &Mesh,
    options: &MappingOptions,
    ctx: &ExecutionContext,
) -> Result<SparseRowMatrix, MappingError> {
    validate_transfer(
        source_mesh,
        source_field,
        dest_mesh,
        options.destination_basis(source_field.basis()),
    )?;
    let source = MeshLocator::new(source_mesh)?;
    let destination = MeshLocator::new(dest_mesh)?;
    build_mapping_matrix_with(&source, source_field.basis(), &destination, options, ctx)
}

/// [`build_mapping_matrix`] over arbitrary [`MeshQuery`] implementations.
///
/// # Errors
///
/// See [`build_mapping_matrix`].
pub fn build_mapping_matrix_with(
    source: &dyn MeshQuery,
    basis: BasisOrder,
    destination: &dyn MeshQuery,
    options: &MappingOptions,
    ctx: &ExecutionContext,
) -> Result<SparseRowMatrix, MappingError> {
    ctx.check_cancelled()?;
    let input = CorrespondenceInput {
        source,
        basis,
        destination,
        dest_basis: options.destination_basis(basis),
    };
    tracing::debug!(
        method = %options.method,
        ?basis,
        dest_basis = ?input.dest_basis,
        rows = input.destination_values(),
        cols = input.source_values(),
        "building mapping matrix"
    );
    let matrix = options.method.strategy().correspond(&input, options, ctx)?;
    tracing::debug!(nnz = matrix.nnz(), "mapping matrix built");
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::algorithms::correspondence::MappingMethod;
    use crate::core::mesh::MeshTopology;
    use crate::core::parallel::ParallelMap;
    use crate::geometry::point::Point;
    use approx::assert_relative_eq;

    fn strip(offset: f64) -> Mesh {
        let nodes = (0..4)
            .flat_map(|i| {
                let x = f64::from(i) + offset;
                [Point::new([x, 0.0, 0.0]), Point::new([x, 1.0, 0.0])]
            })
            .collect();
        let mut connectivity = Vec::new();
        for i in 0..3 {
            let (a, b, c, d) = (2 * i, 2 * i + 1, 2 * i + 2, 2 * i + 3);
            connectivity.extend([a, c, b, c, d, b]);
        }
        Mesh::new(MeshTopology::TriSurf, nodes, connectivity).unwrap()
    }

    fn options(method: MappingMethod) -> MappingOptions {
        MappingOptions::default().with_method(method).with_num_workers(2)
    }

    #[test]
    fn test_closest_data_rows_have_single_unit_entry() {
        let source = strip(0.0);
        let dest = strip(0.25);
        let field = Field::scalar(BasisOrder::Linear, (0..8).map(f64::from).collect());
        let matrix = build_mapping_matrix(
            &source,
            &field,
            &dest,
            &options(MappingMethod::ClosestData),
            &ExecutionContext::default(),
        )
        .unwrap();
        assert_eq!(matrix.rows(), 8);
        assert_eq!(matrix.cols(), 8);
        for row in 0..matrix.rows() {
            assert_eq!(matrix.row_len(row), 1);
            assert_relative_eq!(matrix.row_sum(row), 1.0);
        }
        assert_eq!(matrix.row_columns(0), &[0]);
    }

    #[test]
    fn test_max_distance_empties_far_rows() {
        let source = strip(0.0);
        let dest = strip(0.25);
        let field = Field::scalar(BasisOrder::Linear, vec![0.0; 8]);
        let matrix = build_mapping_matrix(
            &source,
            &field,
            &dest,
            &options(MappingMethod::ClosestData).with_max_distance(0.2),
            &ExecutionContext::default(),
        )
        .unwrap();
        // Every shifted node sits 0.25 from its nearest source node.
        assert_eq!(matrix.nnz(), 0);
    }

    #[test]
    fn test_interpolated_rows_sum_to_one() {
        let source = strip(0.0);
        let dest = strip(0.25);
        let field = Field::scalar(BasisOrder::Linear, vec![0.0; 8]);
        let matrix = build_mapping_matrix(
            &source,
            &field,
            &dest,
            &options(MappingMethod::InterpolatedData),
            &ExecutionContext::default(),
        )
        .unwrap();
        for row in 0..matrix.rows() {
            assert_eq!(matrix.row_len(row), 3);
            assert_relative_eq!(matrix.row_sum(row), 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_constant_basis_rows_are_elements() {
        let source = strip(0.0);
        let field = Field::scalar(BasisOrder::Constant, vec![1.0; 6]);
        let matrix = build_mapping_matrix(
            &source,
            &field,
            &source,
            &options(MappingMethod::InterpolatedData),
            &ExecutionContext::default(),
        )
        .unwrap();
        assert_eq!((matrix.rows(), matrix.cols()), (6, 6));
        for row in 0..6 {
            assert_eq!(matrix.row_columns(row), &[row]);
        }
    }

    #[test]
    fn test_element_data_onto_destination_nodes() {
        let source = strip(0.0);
        let field = Field::scalar(BasisOrder::Constant, (0..6).map(f64::from).collect());
        let dest = Mesh::point_cloud(vec![
            Point::new([0.2, 0.2, 0.0]),
            Point::new([2.8, 0.9, 0.0]),
        ])
        .unwrap();
        let ctx = ExecutionContext::default();
        for method in [MappingMethod::ClosestData, MappingMethod::InterpolatedData] {
            let matrix = build_mapping_matrix(
                &source,
                &field,
                &dest,
                &options(method).with_dest_basis(BasisOrder::Linear),
                &ctx,
            )
            .unwrap();
            assert_eq!((matrix.rows(), matrix.cols()), (2, 6));
            assert_eq!(matrix.row_columns(0), &[0], "{method}");
            assert_eq!(matrix.row_columns(1), &[5], "{method}");
        }
    }

    #[test]
    fn test_node_data_onto_destination_elements() {
        let source = strip(0.0);
        let field = Field::scalar(BasisOrder::Linear, vec![0.0; 8]);
        let matrix = build_mapping_matrix(
            &source,
            &field,
            &source,
            &options(MappingMethod::InterpolatedData).with_dest_basis(BasisOrder::Constant),
            &ExecutionContext::default(),
        )
        .unwrap();
        assert_eq!((matrix.rows(), matrix.cols()), (6, 8));
        for row in 0..6 {
            assert_eq!(matrix.row_len(row), 3);
            assert_relative_eq!(matrix.row_sum(row), 1.0, epsilon = 1e-12);
            // The centroid weighs each corner equally.
            assert!(matrix.row(row).all(|(_, w)| (w - 1.0 / 3.0).abs() < 1e-12));
        }
    }

    #[test]
    fn test_point_cloud_destination_needs_node_basis() {
        let source = strip(0.0);
        let field = Field::scalar(BasisOrder::Linear, vec![0.0; 8]);
        let dest = Mesh::point_cloud(vec![Point::origin()]).unwrap();
        let err = build_mapping_matrix(
            &source,
            &field,
            &dest,
            &options(MappingMethod::ClosestData).with_dest_basis(BasisOrder::Constant),
            &ExecutionContext::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            MappingError::Field(FieldError::PointCloudBasis {
                basis: BasisOrder::Constant
            })
        );
    }

    #[test]
    fn test_point_cloud_interpolation_is_rejected() {
        let cloud = Mesh::point_cloud(vec![Point::origin()]).unwrap();
        let field = Field::scalar(BasisOrder::Linear, vec![1.0]);
        let err = build_mapping_matrix(
            &cloud,
            &field,
            &strip(0.0),
            &MappingOptions::default(),
            &ExecutionContext::default(),
        )
        .unwrap_err();
        assert_eq!(err, MappingError::PointCloudInterpolation);
    }

    #[test]
    fn test_collision_policies() {
        let source = Mesh::point_cloud(vec![
            Point::new([0.0, 0.0, 0.0]),
            Point::new([0.1, 0.0, 0.0]),
            Point::new([5.0, 0.0, 0.0]),
        ])
        .unwrap();
        let dest = Mesh::point_cloud(vec![Point::origin(), Point::new([5.0, 0.0, 0.0])]).unwrap();
        let field = Field::scalar(BasisOrder::Linear, vec![1.0, 2.0, 3.0]);
        let ctx = ExecutionContext::default();
        let base = options(MappingMethod::SingleDestination);

        let last = build_mapping_matrix(&source, &field, &dest, &base, &ctx).unwrap();
        assert_eq!(last.row_columns(0), &[1]);
        assert_eq!(last.row_columns(1), &[2]);

        let first = build_mapping_matrix(
            &source,
            &field,
            &dest,
            &base.clone().with_collision_policy(CollisionPolicy::FirstWins),
            &ctx,
        )
        .unwrap();
        assert_eq!(first.row_columns(0), &[0]);

        let err = build_mapping_matrix(
            &source,
            &field,
            &dest,
            &base.with_collision_policy(CollisionPolicy::Error),
            &ctx,
        )
        .unwrap_err();
        assert_eq!(
            err,
            MappingError::DestinationCollision {
                destination: 0,
                first: 0,
                second: 1
            }
        );
    }

    #[test]
    fn test_compact_rows_skips_empty_slots() {
        let ctx = ExecutionContext::default();
        let candidates = ParallelMap::new(1, &ctx)
            .run(3, 2, None, |row, slots: &mut [Option<(usize, f64)>]| {
                if row != 1 {
                    slots[1] = Some((row, 0.5));
                }
                Ok(())
            })
            .unwrap();
        let matrix = CompactRows { cols: 3 }.reduce(candidates, &ctx).unwrap();
        assert_eq!(matrix.row_offsets(), &[0, 1, 1, 2]);
        assert_eq!(matrix.column_indices(), &[0, 2]);
    }
}
