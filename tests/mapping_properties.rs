//! Integration tests for mapping matrices and direct field mapping.
//!
//! Covers the row structure of every mapping method, exact reproduction of
//! linear and quadratic data by interpolation, agreement between
//! `map_field` and applying a stored matrix, and exact gradients from sampling.

#![forbid(unsafe_code)]

use approx::assert_relative_eq;
use meshfield::prelude::*;

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

fn unit_box(cells: usize) -> Mesh {
    structured_tet_box(
        [cells; 3],
        Point::origin(),
        Point::new([1.0, 1.0, 1.0]),
    )
    .unwrap()
}

fn sample(mesh: &Mesh, basis: BasisOrder, f: impl Fn(&Point) -> f64) -> Field {
    Field::scalar(
        basis,
        (0..mesh.num_values(basis))
            .map(|i| f(&mesh.value_location(basis, i)))
            .collect(),
    )
}

fn affine(p: &Point) -> f64 {
    3.0 * p.x() - 2.0 * p.y() + 0.5 * p.z() + 1.0
}

fn quadratic(p: &Point) -> f64 {
    p.x() * p.x() - 2.0 * p.x() * p.y() + 0.5 * p.z() * p.z() + p.y() - 4.0
}

// =============================================================================
// ROW STRUCTURE
// =============================================================================

#[test]
fn test_closest_data_rows_hold_single_unit_weight() {
    init_tracing();
    let source = unit_box(2);
    let field = sample(&source, BasisOrder::Linear, affine);
    let dest = structured_tri_grid([4, 4], Point::new([-0.2, -0.2, 0.3]), Point::new([1.2, 1.2, 0.3]))
        .unwrap();
    let options = MappingOptions::default().with_method(MappingMethod::ClosestData);

    let matrix =
        build_mapping_matrix(&source, &field, &dest, &options, &ExecutionContext::default()).unwrap();
    assert_eq!(matrix.rows(), dest.num_nodes());
    assert_eq!(matrix.cols(), source.num_nodes());
    for row in 0..matrix.rows() {
        let entries: Vec<_> = matrix.row(row).collect();
        assert_eq!(entries.len(), 1, "row {row}");
        assert_eq!(entries[0].1, 1.0);

        let p = dest.node(row);
        let chosen = source.node(entries[0].0).distance_squared(&p);
        let best = source
            .nodes()
            .iter()
            .map(|n| n.distance_squared(&p))
            .fold(f64::INFINITY, f64::min);
        assert_relative_eq!(chosen, best);
    }
}

#[test]
fn test_interpolated_rows_sum_to_one() {
    init_tracing();
    let source = unit_box(3);
    let field = sample(&source, BasisOrder::Linear, affine);
    let dest = unit_box(2);

    let matrix = build_mapping_matrix(
        &source,
        &field,
        &dest,
        &MappingOptions::default(),
        &ExecutionContext::default(),
    )
    .unwrap();
    for row in 0..matrix.rows() {
        assert_eq!(matrix.row_len(row), 4);
        assert_relative_eq!(matrix.row_sum(row), 1.0, epsilon = 1e-12);
        assert!(matrix.row(row).all(|(_, w)| w >= -1e-12));
    }
}

#[test]
fn test_single_destination_uses_each_source_once() {
    init_tracing();
    let source = unit_box(3);
    let field = sample(&source, BasisOrder::Constant, affine);
    let dest = unit_box(1);

    for policy in [CollisionPolicy::LastWins, CollisionPolicy::FirstWins] {
        let options = MappingOptions::default()
            .with_method(MappingMethod::SingleDestination)
            .with_collision_policy(policy);
        let matrix =
            build_mapping_matrix(&source, &field, &dest, &options, &ExecutionContext::default())
                .unwrap();
        let mut seen = vec![false; matrix.cols()];
        for &col in matrix.column_indices() {
            assert!(!seen[col], "source {col} used twice under {policy:?}");
            seen[col] = true;
        }
        assert!(matrix.nnz() <= dest.num_elements());
    }

    let strict = MappingOptions::default()
        .with_method(MappingMethod::SingleDestination)
        .with_collision_policy(CollisionPolicy::Error);
    let err = build_mapping_matrix(&source, &field, &dest, &strict, &ExecutionContext::default())
        .unwrap_err();
    assert!(matches!(err, MappingError::DestinationCollision { .. }));
    assert_eq!(err.category(), ErrorCategory::Input);
}

// =============================================================================
// EXACTNESS
// =============================================================================

#[test]
fn test_quadratic_interpolation_reproduces_quadratics() {
    init_tracing();
    let source = unit_box(2);
    let field = sample(&source, BasisOrder::Quadratic, quadratic);
    let dest = structured_tet_box(
        [2, 1, 3],
        Point::new([0.1, 0.2, 0.05]),
        Point::new([0.9, 0.7, 0.95]),
    )
    .unwrap();

    let mapped = map_field(
        &source,
        &field,
        &dest,
        &MappingOptions::default(),
        &ExecutionContext::default(),
    )
    .unwrap();
    assert_eq!(mapped.basis(), BasisOrder::Quadratic);
    assert_eq!(mapped.len(), dest.num_values(BasisOrder::Quadratic));
    for i in 0..mapped.len() {
        let expected = quadratic(&dest.value_location(BasisOrder::Quadratic, i));
        assert_relative_eq!(mapped.scalar_value(i).unwrap(), expected, epsilon = 1e-9);
    }
}

#[test]
fn test_constant_data_closest_element_copy() {
    init_tracing();
    let source = unit_box(2);
    let field = sample(&source, BasisOrder::Constant, affine);
    let mapped = map_field(
        &source,
        &field,
        &source,
        &MappingOptions::default().with_method(MappingMethod::ClosestData),
        &ExecutionContext::default(),
    )
    .unwrap();
    assert_eq!(mapped, field);
}

#[test]
fn test_quadratic_data_closest_copy_onto_itself() {
    init_tracing();
    let source = unit_box(2);
    let field = sample(&source, BasisOrder::Quadratic, quadratic);
    let options = MappingOptions::default().with_method(MappingMethod::ClosestData);
    let ctx = ExecutionContext::default();

    // Edge midpoint values copy from themselves, not from the nearest node.
    let matrix = build_mapping_matrix(&source, &field, &source, &options, &ctx).unwrap();
    assert_eq!(matrix.rows(), source.num_values(BasisOrder::Quadratic));
    for row in 0..matrix.rows() {
        assert_eq!(matrix.row(row).collect::<Vec<_>>(), vec![(row, 1.0)], "row {row}");
    }

    let mapped = map_field(&source, &field, &source, &options, &ctx).unwrap();
    assert_eq!(mapped, field);

    let segment = Mesh::new(
        MeshTopology::Curve,
        vec![Point::origin(), Point::new([2.0, 0.0, 0.0])],
        vec![0, 1],
    )
    .unwrap();
    let values = Field::scalar(BasisOrder::Quadratic, vec![1.0, 2.0, 3.0]);
    let mapped = map_field(&segment, &values, &segment, &options, &ctx).unwrap();
    assert_eq!(mapped.components(), &[1.0, 2.0, 3.0]);
}

// =============================================================================
// MATRIX APPLICATION
// =============================================================================

#[test]
fn test_applying_matrix_matches_direct_mapping() {
    init_tracing();
    let source = unit_box(2);
    let dest = structured_tri_grid([5, 3], Point::new([-0.1, 0.0, 0.45]), Point::new([1.3, 1.0, 0.45]))
        .unwrap();
    let ctx = ExecutionContext::default();

    for basis in [BasisOrder::Constant, BasisOrder::Linear] {
        let field = sample(&source, basis, affine);
        for method in [
            MappingMethod::ClosestData,
            MappingMethod::SingleDestination,
            MappingMethod::InterpolatedData,
        ] {
            let options = MappingOptions::default()
                .with_method(method)
                .with_max_distance(0.25)
                .with_num_workers(3);
            let matrix = build_mapping_matrix(&source, &field, &dest, &options, &ctx).unwrap();
            let applied = apply_mapping_matrix(&field, &dest, basis, &matrix).unwrap();
            let direct = map_field(&source, &field, &dest, &options, &ctx).unwrap();
            assert_eq!(applied.len(), direct.len(), "{method} {basis:?}");
            for (a, d) in applied.components().iter().zip(direct.components()) {
                assert_relative_eq!(*a, *d, epsilon = 1e-12);
            }
        }
    }
}

#[test]
fn test_worker_count_does_not_change_result() {
    init_tracing();
    let source = unit_box(3);
    let field = sample(&source, BasisOrder::Linear, affine);
    let dest = Mesh::point_cloud(generate_random_points_seeded(257, (-0.2, 1.2), 11).unwrap())
        .unwrap();
    let ctx = ExecutionContext::default();

    let serial = build_mapping_matrix(
        &source,
        &field,
        &dest,
        &MappingOptions::default().with_num_workers(1),
        &ctx,
    )
    .unwrap();
    for workers in [2, 5, 16] {
        let parallel = build_mapping_matrix(
            &source,
            &field,
            &dest,
            &MappingOptions::default().with_num_workers(workers),
            &ctx,
        )
        .unwrap();
        assert_eq!(parallel, serial, "{workers} workers");
    }
}

#[test]
fn test_cancelled_mapping_returns_no_output() {
    init_tracing();
    let source = unit_box(2);
    let field = sample(&source, BasisOrder::Linear, affine);
    let token = CancellationToken::new();
    token.cancel();
    let ctx = ExecutionContext::default().with_cancellation(token);

    let err = map_field(&source, &field, &source, &MappingOptions::default(), &ctx).unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(err.category(), ErrorCategory::Cancelled);
}

// =============================================================================
// SAMPLING
// =============================================================================

#[test]
fn test_sampled_gradient_of_affine_data_is_exact() {
    init_tracing();
    let source = unit_box(2);
    let field = sample(&source, BasisOrder::Linear, affine);
    let dest = structured_tri_grid([4, 4], Point::new([0.1, 0.1, 0.45]), Point::new([0.9, 0.9, 0.45]))
        .unwrap();
    let ctx = ExecutionContext::default();

    let options = SampleOptions::default()
        .with_quantity(SampledQuantity::Gradient)
        .with_num_workers(3);
    let gradients = sample_field(&source, &field, &dest, SampleTarget::Nodes, &options, &ctx).unwrap();
    assert_eq!(gradients.len(), dest.num_nodes());
    for node in 0..dest.num_nodes() {
        let g = gradients.value(node);
        assert_relative_eq!(g[0], 3.0, epsilon = 1e-9);
        assert_relative_eq!(g[1], -2.0, epsilon = 1e-9);
        assert_relative_eq!(g[2], 0.5, epsilon = 1e-9);
    }

    // Integrating affine data over the grid gives area times the center value.
    let integrate = SampleOptions::default().with_reduction(ElementReduction::Integrate);
    let per_element =
        sample_field(&source, &field, &dest, SampleTarget::Elements, &integrate, &ctx).unwrap();
    let total: f64 = per_element.components().iter().sum();
    assert_relative_eq!(total, 0.64 * affine(&Point::new([0.5, 0.5, 0.45])), epsilon = 1e-9);
}
