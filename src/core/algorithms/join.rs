//! Joining several meshes (and their fields) into one.
//!
//! Inputs are processed in order, element by element. Each node is mapped the
//! first time an element of its input references it, so output nodes follow
//! element order and nodes no element uses are dropped. Point clouds have no
//! elements; every node of a point cloud is visited on its own.
//!
//! With node merging on, an incoming node is compared against the nodes
//! already emitted through a [`SearchGrid`] sized for the total node count; a
//! node closer than the tolerance is reused instead of duplicated, and the
//! later input's value overwrites the stored one. With element merging on,
//! elements whose merged node sets coincide are emitted once, and the first
//! occurrence keeps its data.

use crate::core::collections::{NodeBuffer, SearchGrid};
use crate::core::error::MappingError;
use crate::core::field::{Field, FieldError, ValueKind};
use crate::core::mesh::{BasisOrder, MESH_EPSILON_FACTOR, Mesh, MeshTopology};
use crate::core::report::{ExecutionContext, PROGRESS_INTERVAL};
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::point::Point;
use serde::{Deserialize, Serialize};

/// Default node merge tolerance.
pub const DEFAULT_JOIN_TOLERANCE: f64 = 1.0e-6;

/// Options for [`join_fields`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinOptions {
    /// Reuse nodes closer than [`JoinOptions::tolerance`].
    pub merge_nodes: bool,
    /// Drop elements whose merged node set was already emitted. Implies `merge_nodes`.
    pub merge_elements: bool,
    /// Node merge distance.
    pub tolerance: f64,
    /// Only merge nodes whose linear scalar values round to the same integer.
    pub match_node_values: bool,
    /// Produce a mesh only, ignoring field data.
    pub make_no_data: bool,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            merge_nodes: true,
            merge_elements: false,
            tolerance: DEFAULT_JOIN_TOLERANCE,
            match_node_values: false,
            make_no_data: false,
        }
    }
}

impl JoinOptions {
    /// Sets [`JoinOptions::merge_nodes`].
    #[must_use]
    pub const fn with_merge_nodes(mut self, merge: bool) -> Self {
        self.merge_nodes = merge;
        self
    }

    /// Sets [`JoinOptions::merge_elements`].
    #[must_use]
    pub const fn with_merge_elements(mut self, merge: bool) -> Self {
        self.merge_elements = merge;
        self
    }

    /// Sets [`JoinOptions::tolerance`].
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Sets [`JoinOptions::match_node_values`].
    #[must_use]
    pub const fn with_match_node_values(mut self, matching: bool) -> Self {
        self.match_node_values = matching;
        self
    }

    /// Sets [`JoinOptions::make_no_data`].
    #[must_use]
    pub const fn with_make_no_data(mut self, no_data: bool) -> Self {
        self.make_no_data = no_data;
        self
    }
}

/// Result of [`join_fields`].
#[derive(Clone, Debug, PartialEq)]
pub struct JoinOutput {
    /// The joined mesh.
    pub mesh: Mesh,
    /// The joined field; `None` when [`JoinOptions::make_no_data`] is set.
    pub field: Option<Field>,
    /// For each input, the output node of every input node, or `None` for a
    /// node no element references.
    pub node_maps: Vec<Vec<Option<usize>>>,
    /// For each input, the output element of every input element.
    pub element_maps: Vec<Vec<usize>>,
}

/// Layout shared by all input fields.
#[derive(Clone, Copy, Debug)]
struct DataLayout {
    basis: BasisOrder,
    kind: ValueKind,
}

fn check_inputs(
    inputs: &[(&Mesh, &Field)],
    options: &JoinOptions,
) -> Result<(MeshTopology, Option<DataLayout>), MappingError> {
    let Some(&(first_mesh, first_field)) = inputs.first() else {
        return Err(MappingError::EmptyInput {
            what: "join input list".to_owned(),
        });
    };
    if options.tolerance.is_nan() || options.tolerance < 0.0 {
        return Err(MappingError::InvalidOption {
            name: "tolerance",
            reason: format!("must be a non-negative number, got {}", options.tolerance),
        });
    }

    let topology = first_mesh.topology();
    for (input, &(mesh, _)) in inputs.iter().enumerate() {
        if mesh.topology() != topology {
            return Err(MappingError::TopologyMismatch {
                input,
                expected: topology,
                actual: mesh.topology(),
            });
        }
    }

    if options.make_no_data {
        return Ok((topology, None));
    }

    let layout = DataLayout {
        basis: first_field.basis(),
        kind: first_field.kind(),
    };
    if layout.basis == BasisOrder::Quadratic {
        return Err(MappingError::UnsupportedBasis {
            operation: "join_fields",
            basis: layout.basis,
        });
    }
    for (input, &(mesh, field)) in inputs.iter().enumerate() {
        if field.basis() != layout.basis {
            return Err(MappingError::BasisMismatch {
                input,
                expected: layout.basis,
                actual: field.basis(),
            });
        }
        if field.kind() != layout.kind {
            return Err(FieldError::KindMismatch {
                expected: layout.kind,
                actual: field.kind(),
            }
            .into());
        }
        field.validate_against(mesh)?;
    }
    if options.match_node_values
        && (layout.basis != BasisOrder::Linear || layout.kind != ValueKind::Scalar)
    {
        return Err(MappingError::InvalidOption {
            name: "match_node_values",
            reason: "node values can only be matched for linear scalar data".to_owned(),
        });
    }
    Ok((topology, Some(layout)))
}

/// Joins `inputs` into a single mesh and field.
///
/// Cancellation is checked before every input and element; progress is
/// reported once per input.
///
/// # Errors
///
/// Returns an input error for an empty list, mismatched topologies, basis
/// orders or value kinds, quadratic data, or an invalid option,
/// [`MappingError::InvalidBoundingBox`] when node merging is requested but the
/// inputs have no finite extent, and [`MappingError::Cancelled`] when `ctx` is
/// cancelled.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::join::{JoinOptions, join_fields};
/// use meshfield::core::field::Field;
/// use meshfield::core::mesh::{BasisOrder, Mesh, MeshTopology};
/// use meshfield::core::report::ExecutionContext;
/// use meshfield::geometry::point::Point;
///
/// let left = Mesh::new(
///     MeshTopology::Curve,
///     vec![Point::new([0.0, 0.0, 0.0]), Point::new([1.0, 0.0, 0.0])],
///     vec![0, 1],
/// )
/// .unwrap();
/// let right = Mesh::new(
///     MeshTopology::Curve,
///     vec![Point::new([1.0, 0.0, 0.0]), Point::new([2.0, 0.0, 0.0])],
///     vec![0, 1],
/// )
/// .unwrap();
/// let a = Field::scalar(BasisOrder::Linear, vec![0.0, 1.0]);
/// let b = Field::scalar(BasisOrder::Linear, vec![5.0, 2.0]);
///
/// let ctx = ExecutionContext::default();
/// let joined = join_fields(&[(&left, &a), (&right, &b)], &JoinOptions::default(), &ctx).unwrap();
/// assert_eq!(joined.mesh.num_nodes(), 3);
/// assert_eq!(joined.mesh.num_elements(), 2);
/// // The shared node takes the later input's value.
/// assert_eq!(joined.field.unwrap().components(), &[0.0, 5.0, 2.0]);
/// ```
pub fn join_fields(
    inputs: &[(&Mesh, &Field)],
    options: &JoinOptions,
    ctx: &ExecutionContext,
) -> Result<JoinOutput, MappingError> {
    let (topology, layout) = check_inputs(inputs, options)?;
    let merge_elements = options.merge_elements && topology != MeshTopology::PointCloud;
    let merge_nodes = options.merge_nodes || options.merge_elements;
    let match_values = options.match_node_values && layout.is_some();

    let total_nodes: usize = inputs.iter().map(|(m, _)| m.num_nodes()).sum();
    let total_elements: usize = inputs.iter().map(|(m, _)| m.num_elements()).sum();

    let mut bbox = BoundingBox::empty();
    for (mesh, _) in inputs {
        bbox.extend_box(&mesh.bounding_box());
    }
    let node_grid = if merge_nodes {
        if !bbox.is_valid() {
            return Err(MappingError::InvalidBoundingBox);
        }
        Some(SearchGrid::with_expected_points(&bbox, total_nodes)?)
    } else {
        None
    };
    let element_grid = if merge_elements && total_elements > 0 {
        Some(SearchGrid::with_expected_points(&bbox, total_elements)?)
    } else {
        None
    };

    tracing::debug!(
        inputs = inputs.len(),
        %topology,
        total_nodes,
        total_elements,
        merge_nodes,
        merge_elements,
        tolerance = options.tolerance,
        "joining meshes"
    );

    let mut state = JoinState {
        nodes: Vec::with_capacity(total_nodes),
        node_labels: Vec::new(),
        connectivity: Vec::with_capacity(total_elements * topology.nodes_per_element()),
        element_keys: Vec::new(),
        data: Vec::new(),
        layout,
        match_values,
        merge_elements,
        node_grid,
        element_grid,
        tolerance_squared: options.tolerance * options.tolerance,
        element_radius: options
            .tolerance
            .max(MESH_EPSILON_FACTOR * bbox.diagonal().length()),
    };

    let mut node_maps = Vec::with_capacity(inputs.len());
    let mut element_maps = Vec::with_capacity(inputs.len());
    for (input, &(mesh, field)) in inputs.iter().enumerate() {
        ctx.check_cancelled()?;
        let mut node_map = vec![None; mesh.num_nodes()];
        let element_map = if mesh.is_point_cloud() {
            for local in 0..mesh.num_nodes() {
                if local % PROGRESS_INTERVAL == 0 {
                    ctx.check_cancelled()?;
                }
                state.map_node(mesh, field, local, &mut node_map);
            }
            Vec::new()
        } else {
            state.add_elements(mesh, field, &mut node_map, ctx)?
        };

        let orphans = node_map.iter().filter(|g| g.is_none()).count();
        if orphans > 0 {
            ctx.reporter().remark(&format!(
                "Dropped {orphans} node(s) of input {input} that no element references"
            ));
        }
        node_maps.push(node_map);
        element_maps.push(element_map);
        ctx.reporter().progress(input + 1, inputs.len());
    }

    let field = layout
        .map(|l| Field::from_components(l.basis, l.kind, state.data))
        .transpose()?;
    let mesh = Mesh::new(topology, state.nodes, state.connectivity)?;
    tracing::debug!(
        nodes = mesh.num_nodes(),
        elements = mesh.num_elements(),
        "join complete"
    );
    Ok(JoinOutput {
        mesh,
        field,
        node_maps,
        element_maps,
    })
}

struct JoinState {
    nodes: Vec<Point>,
    node_labels: Vec<f64>,
    connectivity: Vec<usize>,
    element_keys: Vec<NodeBuffer>,
    data: Vec<f64>,
    layout: Option<DataLayout>,
    match_values: bool,
    merge_elements: bool,
    node_grid: Option<SearchGrid>,
    element_grid: Option<SearchGrid>,
    tolerance_squared: f64,
    element_radius: f64,
}

impl JoinState {
    /// Output node of input node `local`, merging or appending it on first use.
    fn map_node(
        &mut self,
        mesh: &Mesh,
        field: &Field,
        local: usize,
        node_map: &mut [Option<usize>],
    ) -> usize {
        if let Some(global) = node_map[local] {
            return global;
        }
        let linear = self.layout.is_some_and(|l| l.basis == BasisOrder::Linear);
        let point = mesh.node(local);
        let label = if self.match_values {
            field.value(local)[0].round()
        } else {
            0.0
        };

        let existing = self.node_grid.as_ref().and_then(|grid| {
            let nodes = &self.nodes;
            let labels = &self.node_labels;
            grid.search_nearest(&point, self.tolerance_squared, |g| {
                if self.match_values && labels[g] != label {
                    None
                } else {
                    Some(nodes[g].distance_squared(&point))
                }
            })
        });

        let global = if let Some((global, _)) = existing {
            if linear {
                let value = field.value(local);
                let start = global * value.len();
                self.data[start..start + value.len()].copy_from_slice(value);
            }
            global
        } else {
            let global = self.nodes.len();
            self.nodes.push(point);
            if self.match_values {
                self.node_labels.push(label);
            }
            if let Some(grid) = &mut self.node_grid {
                grid.insert(global, &point);
            }
            if linear {
                self.data.extend_from_slice(field.value(local));
            }
            global
        };
        node_map[local] = Some(global);
        global
    }

    fn add_elements(
        &mut self,
        mesh: &Mesh,
        field: &Field,
        node_map: &mut [Option<usize>],
        ctx: &ExecutionContext,
    ) -> Result<Vec<usize>, MappingError> {
        let constant = self.layout.is_some_and(|l| l.basis == BasisOrder::Constant);
        let mut map = Vec::with_capacity(mesh.num_elements());
        for (local, element) in mesh.elements().enumerate() {
            ctx.check_cancelled()?;
            let global_nodes: NodeBuffer = element
                .iter()
                .map(|&n| self.map_node(mesh, field, n, node_map))
                .collect();

            let mut key = NodeBuffer::new();
            let mut center = Point::origin();
            if self.merge_elements {
                key = global_nodes.clone();
                key.sort_unstable();
                center = Point::centroid(global_nodes.iter().map(|&n| &self.nodes[n]))
                    .unwrap_or_default();
                if let Some(existing) = self.find_element(&center, &key) {
                    map.push(existing);
                    continue;
                }
            }

            let global = self.connectivity.len() / element.len().max(1);
            self.connectivity.extend_from_slice(&global_nodes);
            if self.merge_elements {
                self.element_keys.push(key);
                if let Some(grid) = &mut self.element_grid {
                    grid.insert(global, &center);
                }
            }
            if constant {
                self.data.extend_from_slice(field.value(local));
            }
            map.push(global);
        }
        Ok(map)
    }

    fn find_element(&self, center: &Point, key: &NodeBuffer) -> Option<usize> {
        let grid = self.element_grid.as_ref()?;
        grid.candidates_within(center, self.element_radius)
            .into_iter()
            .filter(|&e| self.element_keys[e] == *key)
            .min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::{CancellationToken, CollectingReporter};
    use std::sync::Arc;

    fn quad(offset: f64) -> Mesh {
        Mesh::new(
            MeshTopology::TriSurf,
            vec![
                Point::new([offset, 0.0, 0.0]),
                Point::new([offset + 1.0, 0.0, 0.0]),
                Point::new([offset, 1.0, 0.0]),
                Point::new([offset + 1.0, 1.0, 0.0]),
            ],
            vec![0, 1, 2, 1, 3, 2],
        )
        .unwrap()
    }

    fn join(inputs: &[(&Mesh, &Field)], options: &JoinOptions) -> Result<JoinOutput, MappingError> {
        join_fields(inputs, options, &ExecutionContext::default())
    }

    #[test]
    fn test_self_join_is_idempotent() {
        let mesh = quad(0.0);
        let field = Field::scalar(BasisOrder::Constant, vec![1.0, 2.0]);
        let options = JoinOptions::default().with_merge_elements(true);
        let joined = join(&[(&mesh, &field), (&mesh, &field)], &options).unwrap();
        assert_eq!(joined.mesh.num_nodes(), 4);
        assert_eq!(joined.mesh.num_elements(), 2);
        assert_eq!(joined.element_maps[1], vec![0, 1]);
        assert_eq!(joined.field.unwrap().components(), &[1.0, 2.0]);
    }

    #[test]
    fn test_adjacent_quads_share_an_edge() {
        let (a, b) = (quad(0.0), quad(1.0));
        let fa = Field::scalar(BasisOrder::Linear, vec![1.0; 4]);
        let fb = Field::scalar(BasisOrder::Linear, vec![2.0; 4]);
        let joined = join(&[(&a, &fa), (&b, &fb)], &JoinOptions::default()).unwrap();
        assert_eq!(joined.mesh.num_nodes(), 6);
        assert_eq!(joined.mesh.num_elements(), 4);
        assert_eq!(joined.node_maps[1], vec![Some(1), Some(4), Some(3), Some(5)]);
        // The shared edge carries the second input's values.
        let values = joined.field.unwrap();
        assert_eq!(values.components(), &[1.0, 2.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_later_input_wins_merged_node_values() {
        let segment = Mesh::new(
            MeshTopology::Curve,
            vec![Point::origin(), Point::new([1.0, 0.0, 0.0])],
            vec![0, 1],
        )
        .unwrap();
        let first = Field::scalar(BasisOrder::Linear, vec![5.0, 5.0]);
        let second = Field::scalar(BasisOrder::Linear, vec![9.0, 9.0]);
        let options = JoinOptions::default();

        let joined = join(&[(&segment, &first), (&segment, &second)], &options).unwrap();
        assert_eq!(joined.mesh.num_nodes(), 2);
        assert_eq!(joined.field.unwrap().components(), &[9.0, 9.0]);

        let joined = join(&[(&segment, &second), (&segment, &first)], &options).unwrap();
        assert_eq!(joined.field.unwrap().components(), &[5.0, 5.0]);
    }

    #[test]
    fn test_unreferenced_nodes_are_dropped() {
        // Node 1 is not used by the single element, and node 2 is listed first.
        let mesh = Mesh::new(
            MeshTopology::Curve,
            vec![
                Point::new([0.0, 0.0, 0.0]),
                Point::new([7.0, 7.0, 7.0]),
                Point::new([1.0, 0.0, 0.0]),
            ],
            vec![2, 0],
        )
        .unwrap();
        let field = Field::scalar(BasisOrder::Linear, vec![10.0, 11.0, 12.0]);
        let reporter = Arc::new(CollectingReporter::default());
        let ctx = ExecutionContext::new(reporter.clone());
        let joined = join_fields(&[(&mesh, &field)], &JoinOptions::default(), &ctx).unwrap();

        assert_eq!(joined.mesh.num_nodes(), 2);
        assert_eq!(joined.node_maps[0], vec![Some(1), None, Some(0)]);
        assert_eq!(joined.mesh.element_nodes(0), &[0, 1]);
        assert_eq!(joined.mesh.node(0), Point::new([1.0, 0.0, 0.0]));
        assert_eq!(joined.field.unwrap().components(), &[12.0, 10.0]);
        assert_eq!(reporter.remarks().len(), 1);
        assert_eq!(reporter.progress_calls(), 1);
    }

    #[test]
    fn test_cancelled_join_returns_no_output() {
        let mesh = quad(0.0);
        let field = Field::scalar(BasisOrder::Linear, vec![0.0; 4]);
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::default().with_cancellation(token);
        let result = join_fields(&[(&mesh, &field), (&mesh, &field)], &JoinOptions::default(), &ctx);
        assert!(matches!(result, Err(MappingError::Cancelled)));
    }

    #[test]
    fn test_progress_is_reported_per_input() {
        let mesh = quad(0.0);
        let field = Field::scalar(BasisOrder::Linear, vec![0.0; 4]);
        let reporter = Arc::new(CollectingReporter::default());
        let ctx = ExecutionContext::new(reporter.clone());
        join_fields(
            &[(&mesh, &field), (&mesh, &field), (&mesh, &field)],
            &JoinOptions::default(),
            &ctx,
        )
        .unwrap();
        assert_eq!(reporter.progress_calls(), 3);
        assert!(reporter.remarks().is_empty());
    }

    #[test]
    fn test_no_merge_keeps_everything() {
        let mesh = quad(0.0);
        let field = Field::scalar(BasisOrder::Linear, vec![0.0; 4]);
        let joined = join(
            &[(&mesh, &field), (&mesh, &field)],
            &JoinOptions::default().with_merge_nodes(false),
        )
        .unwrap();
        assert_eq!(joined.mesh.num_nodes(), 8);
        assert_eq!(joined.mesh.element_nodes(2), &[4, 5, 6]);
    }

    #[test]
    fn test_match_node_values_separates_labels() {
        let mesh = quad(0.0);
        let a = Field::scalar(BasisOrder::Linear, vec![1.0, 1.0, 1.0, 1.0]);
        let b = Field::scalar(BasisOrder::Linear, vec![1.2, 2.0, 0.9, 3.0]);
        let joined = join(
            &[(&mesh, &a), (&mesh, &b)],
            &JoinOptions::default().with_match_node_values(true),
        )
        .unwrap();
        // Nodes 0 and 2 round to the same label and merge; 1 and 3 do not.
        assert_eq!(joined.node_maps[1], vec![Some(0), Some(4), Some(2), Some(5)]);
        assert_eq!(
            joined.field.unwrap().components(),
            &[1.2, 1.0, 0.9, 1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_input_errors() {
        let tri = quad(0.0);
        let line = Mesh::new(
            MeshTopology::Curve,
            vec![Point::origin(), Point::new([1.0, 0.0, 0.0])],
            vec![0, 1],
        )
        .unwrap();
        let f4 = Field::scalar(BasisOrder::Linear, vec![0.0; 4]);
        let f2 = Field::scalar(BasisOrder::Linear, vec![0.0; 2]);
        let opts = JoinOptions::default();

        assert!(matches!(
            join(&[], &opts),
            Err(MappingError::EmptyInput { .. })
        ));
        assert!(matches!(
            join(&[(&tri, &f4), (&line, &f2)], &opts),
            Err(MappingError::TopologyMismatch { input: 1, .. })
        ));

        let constant = Field::scalar(BasisOrder::Constant, vec![0.0; 2]);
        assert!(matches!(
            join(&[(&tri, &f4), (&tri, &constant)], &opts),
            Err(MappingError::BasisMismatch { input: 1, .. })
        ));
        let vectors = Field::vector(BasisOrder::Linear, vec![[0.0; 3]; 4]);
        assert!(matches!(
            join(&[(&tri, &f4), (&tri, &vectors)], &opts),
            Err(MappingError::Field(FieldError::KindMismatch { .. }))
        ));
        assert!(
            join(&[(&tri, &f4), (&tri, &vectors)], &opts.clone().with_make_no_data(true))
                .unwrap()
                .field
                .is_none()
        );
        assert!(matches!(
            join(&[(&tri, &constant)], &opts.clone().with_match_node_values(true)),
            Err(MappingError::InvalidOption { name: "match_node_values", .. })
        ));
        assert!(matches!(
            join(&[(&tri, &f4)], &opts.with_tolerance(f64::NAN)),
            Err(MappingError::InvalidOption { name: "tolerance", .. })
        ));
    }

    #[test]
    fn test_point_clouds_merge_nodes_only() {
        let a = Mesh::point_cloud(vec![Point::origin(), Point::new([1.0, 0.0, 0.0])]).unwrap();
        let b = Mesh::point_cloud(vec![Point::new([1.0, 0.0, 0.0 + 1e-9])]).unwrap();
        let fa = Field::scalar(BasisOrder::Linear, vec![1.0, 2.0]);
        let fb = Field::scalar(BasisOrder::Linear, vec![3.0]);
        let joined = join(
            &[(&a, &fa), (&b, &fb)],
            &JoinOptions::default().with_merge_elements(true),
        )
        .unwrap();
        assert_eq!(joined.mesh.num_nodes(), 2);
        assert!(joined.mesh.is_point_cloud());
        assert_eq!(joined.node_maps[1], vec![Some(1)]);
        assert_eq!(joined.field.unwrap().components(), &[1.0, 3.0]);
    }
}
