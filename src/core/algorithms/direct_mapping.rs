//! Direct field transfer without keeping the mapping matrix.

use crate::core::algorithms::correspondence::{MappingMethod, MappingOptions};
use crate::core::algorithms::mapping_matrix::{build_mapping_matrix_with, validate_transfer};
use crate::core::collections::WeightBuffer;
use crate::core::error::MappingError;
use crate::core::field::{Field, weighted_sum_into};
use crate::core::locator::MeshLocator;
use crate::core::mesh::{BasisOrder, Mesh};
use crate::core::parallel::ParallelMap;
use crate::core::report::ExecutionContext;
use crate::core::sparse::SparseRowMatrix;

/// Maps `source_field` onto `dest_mesh`.
///
/// The result has the source's value kind and the basis chosen by
/// [`MappingOptions::destination_basis`] (the source basis unless
/// [`MappingOptions::dest_basis`] is set). Destination values that
/// nothing maps to hold `options.default_value` in every component. Copy
/// methods reproduce the source value exactly; interpolation writes the
/// weighted combination of the containing element's values.
///
/// Interpolating from a point cloud is not possible; the mapping falls back to
/// nearest-node copying and reports a warning instead of failing.
///
/// # Errors
///
/// Returns a field/mesh mismatch error, [`MappingError::DestinationCollision`]
/// under the error collision policy, or [`MappingError::Cancelled`].
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::correspondence::MappingOptions;
/// use meshfield::core::algorithms::direct_mapping::map_field;
/// use meshfield::core::field::Field;
/// use meshfield::core::mesh::{BasisOrder, Mesh, MeshTopology};
/// use meshfield::core::report::ExecutionContext;
/// use meshfield::geometry::point::Point;
///
/// let line = Mesh::new(
///     MeshTopology::Curve,
///     vec![Point::new([0.0, 0.0, 0.0]), Point::new([2.0, 0.0, 0.0])],
///     vec![0, 1],
/// )
/// .unwrap();
/// let target = Mesh::point_cloud(vec![Point::new([0.5, 0.0, 0.0])]).unwrap();
/// let field = Field::scalar(BasisOrder::Linear, vec![0.0, 4.0]);
///
/// let mapped = map_field(&line, &field, &target, &MappingOptions::default(), &ExecutionContext::default()).unwrap();
/// assert_eq!(mapped.scalar_value(0), Some(1.0));
/// ```
pub fn map_field(
    source_mesh: &Mesh,
    source_field: &Field,
    dest_mesh: &Mesh,
    options: &MappingOptions,
    ctx: &ExecutionContext,
) -> Result<Field, MappingError> {
    let dest_basis = options.destination_basis(source_field.basis());
    validate_transfer(source_mesh, source_field, dest_mesh, dest_basis)?;

    let mut effective = options.clone();
    if source_mesh.is_point_cloud() && options.method == MappingMethod::InterpolatedData {
        ctx.reporter().warning(
            "Source does not have any elements; using closest node data instead of interpolation",
        );
        effective.method = MappingMethod::ClosestData;
    }

    let source = MeshLocator::new(source_mesh)?;
    let destination = MeshLocator::new(dest_mesh)?;
    let matrix = build_mapping_matrix_with(
        &source,
        source_field.basis(),
        &destination,
        &effective,
        ctx,
    )?;
    transfer_values(source_field, dest_basis, &matrix, &effective, ctx)
}

/// Evaluates every row of `matrix` against `source_field`, leaving
/// `options.default_value` in rows without entries.
fn transfer_values(
    source_field: &Field,
    dest_basis: BasisOrder,
    matrix: &SparseRowMatrix,
    options: &MappingOptions,
    ctx: &ExecutionContext,
) -> Result<Field, MappingError> {
    let kind = source_field.kind();
    let values = ParallelMap::new(options.workers(), ctx).run(
        matrix.rows(),
        kind.components(),
        options.default_value,
        |row, out: &mut [f64]| {
            if matrix.row_len(row) > 0 {
                let weights: WeightBuffer = matrix.row(row).collect();
                weighted_sum_into(out, source_field, &weights);
            }
            Ok(())
        },
    )?;
    tracing::debug!(
        values = matrix.rows(),
        mapped = (0..matrix.rows()).filter(|&r| matrix.row_len(r) > 0).count(),
        "field mapped"
    );
    Ok(Field::from_components(dest_basis, kind, values.into_slots())?)
}
