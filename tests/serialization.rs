//! JSON round-trips for meshes, fields, matrices, and option structs.

use meshfield::prelude::*;

#[test]
fn test_mapping_options_from_partial_json() -> anyhow::Result<()> {
    let options: MappingOptions =
        serde_json::from_str(r#"{ "method": "closestdata", "max_distance": 0.5 }"#)?;
    assert_eq!(options.method, MappingMethod::ClosestData);
    assert_eq!(options.search_limit(), Some(0.5));
    assert_eq!(options.default_value, 0.0);
    assert_eq!(options.collision_policy, CollisionPolicy::LastWins);

    let text = serde_json::to_string(&options)?;
    let back: MappingOptions = serde_json::from_str(&text)?;
    assert_eq!(back, options);
    Ok(())
}

#[test]
fn test_legacy_method_names_parse() {
    for (name, method) in [
        ("closestdata", MappingMethod::ClosestData),
        ("singledestination", MappingMethod::SingleDestination),
        ("interpolateddata", MappingMethod::InterpolatedData),
        ("Interpolated_Data", MappingMethod::InterpolatedData),
    ] {
        assert_eq!(name.parse::<MappingMethod>(), Ok(method));
        assert_eq!(method.to_string().parse::<MappingMethod>(), Ok(method));
    }
    assert!("nearest".parse::<MappingMethod>().is_err());
}

#[test]
fn test_join_and_periodic_options_defaults() -> anyhow::Result<()> {
    let join: JoinOptions = serde_json::from_str(r#"{ "merge_elements": true }"#)?;
    assert_eq!(join, JoinOptions::default().with_merge_elements(true));

    let periodic: PeriodicOptions = serde_json::from_str(r#"{ "link_z": false }"#)?;
    assert_eq!(periodic, PeriodicOptions::default().with_axes(true, true, false));
    Ok(())
}

#[test]
fn test_mesh_field_and_matrix_round_trip() -> anyhow::Result<()> {
    let mesh = structured_tri_grid([2, 1], Point::origin(), Point::new([2.0, 1.0, 0.0]))?;
    let field = Field::vector(BasisOrder::Linear, vec![[1.0, -2.0, 0.5]; mesh.num_nodes()]);
    let matrix = build_mapping_matrix(
        &mesh,
        &field,
        &mesh,
        &MappingOptions::default(),
        &ExecutionContext::default(),
    )?;

    let mesh_back: Mesh = serde_json::from_str(&serde_json::to_string(&mesh)?)?;
    let field_back: Field = serde_json::from_str(&serde_json::to_string(&field)?)?;
    let matrix_back: SparseRowMatrix = serde_json::from_str(&serde_json::to_string(&matrix)?)?;
    assert_eq!(mesh_back, mesh);
    assert_eq!(field_back, field);
    assert_eq!(matrix_back, matrix);
    Ok(())
}

#[test]
fn test_invalid_serialized_data_is_rejected() {
    let ragged = r#"{ "basis": 1, "kind": "vector", "data": [1.0, 2.0] }"#;
    assert!(serde_json::from_str::<Field>(ragged).is_err());

    let cubic = r#"{ "basis": 3, "kind": "scalar", "data": [] }"#;
    assert!(serde_json::from_str::<Field>(cubic).is_err());

    let dangling = r#"{ "rows": 1, "cols": 1, "row_offsets": [0, 1], "column_indices": [4], "values": [1.0] }"#;
    assert!(serde_json::from_str::<SparseRowMatrix>(dangling).is_err());
}
