//! Unstructured simplicial meshes.
//!
//! A [`Mesh`] stores node positions and a flat connectivity array whose stride
//! is fixed by its [`MeshTopology`]. Derived data (unique edges, facet
//! incidence) is computed on demand; edges are cached because quadratic
//! fields address them by index.
//!
//! Meshes are immutable once built. Operations that produce new geometry
//! (for example [`join_fields`](crate::core::algorithms::join::join_fields))
//! return a fresh mesh.

#![forbid(unsafe_code)]

use crate::core::collections::{
    Entry, FacetToElementsMap, FastHashMap, NodeBuffer, SmallBuffer, facet_key,
    fast_hash_map_with_capacity,
};
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::point::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Relative factor applied to the bounding-box diagonal to derive a mesh epsilon.
pub const MESH_EPSILON_FACTOR: f64 = 1.0e-8;

// =============================================================================
// TYPES
// =============================================================================

/// Element type of a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshTopology {
    /// Nodes only; no elements.
    PointCloud,
    /// Two-node line segments.
    Curve,
    /// Three-node triangles.
    TriSurf,
    /// Four-node tetrahedra.
    TetVol,
}

impl MeshTopology {
    /// Number of corner nodes per element (zero for point clouds).
    #[must_use]
    pub const fn nodes_per_element(self) -> usize {
        match self {
            Self::PointCloud => 0,
            Self::Curve => 2,
            Self::TriSurf => 3,
            Self::TetVol => 4,
        }
    }

    /// Topological dimension of the elements.
    #[must_use]
    pub const fn dimension(self) -> usize {
        match self {
            Self::PointCloud => 0,
            Self::Curve => 1,
            Self::TriSurf => 2,
            Self::TetVol => 3,
        }
    }

    /// Local edges in canonical order, as pairs of local node indices.
    #[must_use]
    pub const fn local_edges(self) -> &'static [[usize; 2]] {
        match self {
            Self::PointCloud => &[],
            Self::Curve => &[[0, 1]],
            Self::TriSurf => &[[0, 1], [1, 2], [2, 0]],
            Self::TetVol => &[[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]],
        }
    }

    /// Local facets (codimension-one faces), facet `i` opposite node `i` for simplices.
    #[must_use]
    pub const fn local_facets(self) -> &'static [&'static [usize]] {
        match self {
            Self::PointCloud => &[],
            Self::Curve => &[&[1], &[0]],
            Self::TriSurf => &[&[1, 2], &[2, 0], &[0, 1]],
            Self::TetVol => &[&[1, 2, 3], &[0, 2, 3], &[0, 1, 3], &[0, 1, 2]],
        }
    }
}

impl fmt::Display for MeshTopology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PointCloud => "point cloud",
            Self::Curve => "curve",
            Self::TriSurf => "triangle surface",
            Self::TetVol => "tetrahedral volume",
        };
        f.write_str(name)
    }
}

/// Granularity at which field values attach to a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum BasisOrder {
    /// One value per element.
    Constant,
    /// One value per node.
    Linear,
    /// One value per node followed by one per edge.
    Quadratic,
}

impl BasisOrder {
    /// Numeric order (0, 1, or 2).
    #[must_use]
    pub const fn order(self) -> u8 {
        match self {
            Self::Constant => 0,
            Self::Linear => 1,
            Self::Quadratic => 2,
        }
    }
}

impl TryFrom<u8> for BasisOrder {
    type Error = MeshError;

    fn try_from(order: u8) -> Result<Self, Self::Error> {
        match order {
            0 => Ok(Self::Constant),
            1 => Ok(Self::Linear),
            2 => Ok(Self::Quadratic),
            _ => Err(MeshError::UnsupportedBasisOrder { order }),
        }
    }
}

impl From<BasisOrder> for u8 {
    fn from(basis: BasisOrder) -> Self {
        basis.order()
    }
}

/// One boundary facet: a facet of `element` with no neighbor across it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BoundaryFacet {
    /// Owning element.
    pub element: usize,
    /// Local facet index within the element.
    pub local_facet: u8,
    /// Global node indices of the facet, in element order.
    pub nodes: NodeBuffer,
}

/// Unique edges of a mesh and the element-to-edge table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MeshEdges {
    edges: Vec<[usize; 2]>,
    element_edges: Vec<usize>,
    stride: usize,
}

impl MeshEdges {
    /// Edges as sorted global node pairs, numbered by first appearance.
    #[must_use]
    pub fn edges(&self) -> &[[usize; 2]] {
        &self.edges
    }

    /// Global edge indices of `element`, in the topology's local edge order.
    #[must_use]
    pub fn element_edges(&self, element: usize) -> &[usize] {
        &self.element_edges[element * self.stride..(element + 1) * self.stride]
    }

    /// Number of unique edges.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.edges.len()
    }

    /// Returns `true` when the mesh has no edges.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised while constructing or validating a mesh.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum MeshError {
    /// Connectivity length is not a multiple of the element stride.
    #[error("Connectivity length {len} is not a multiple of {stride} nodes per {topology} element")]
    InvalidConnectivityLength {
        /// Mesh topology.
        topology: MeshTopology,
        /// Connectivity array length.
        len: usize,
        /// Expected nodes per element.
        stride: usize,
    },
    /// An element references a node that does not exist.
    #[error("Element {element} references node {node}, but the mesh has {num_nodes} nodes")]
    NodeIndexOutOfRange {
        /// Offending element.
        element: usize,
        /// Offending node index.
        node: usize,
        /// Number of nodes in the mesh.
        num_nodes: usize,
    },
    /// A node has a NaN or infinite coordinate.
    #[error("Node {index} has a non-finite coordinate")]
    NonFiniteNode {
        /// Offending node index.
        index: usize,
    },
    /// A basis order above two was requested.
    #[error("Unsupported basis order {order}; expected 0 (constant), 1 (linear), or 2 (quadratic)")]
    UnsupportedBasisOrder {
        /// Requested order.
        order: u8,
    },
    /// A point cloud was given a constant-basis quantity.
    #[error("A point cloud has no elements and cannot carry {basis:?} data")]
    PointCloudBasis {
        /// Requested basis.
        basis: BasisOrder,
    },
}

// =============================================================================
// MESH
// =============================================================================

#[derive(Deserialize)]
struct RawMesh {
    topology: MeshTopology,
    nodes: Vec<Point>,
    connectivity: Vec<usize>,
}

/// An unstructured simplicial mesh.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::mesh::{Mesh, MeshTopology};
/// use meshfield::geometry::point::Point;
///
/// let mesh = Mesh::new(
///     MeshTopology::TriSurf,
///     vec![
///         Point::new([0.0, 0.0, 0.0]),
///         Point::new([1.0, 0.0, 0.0]),
///         Point::new([0.0, 1.0, 0.0]),
///         Point::new([1.0, 1.0, 0.0]),
///     ],
///     vec![0, 1, 2, 1, 3, 2],
/// )
/// .unwrap();
///
/// assert_eq!(mesh.num_elements(), 2);
/// assert_eq!(mesh.num_edges(), 5);
/// assert_eq!(mesh.boundary_facets().len(), 4);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "RawMesh")]
pub struct Mesh {
    topology: MeshTopology,
    nodes: Vec<Point>,
    connectivity: Vec<usize>,
    #[serde(skip)]
    edges: OnceLock<MeshEdges>,
}

impl TryFrom<RawMesh> for Mesh {
    type Error = MeshError;

    fn try_from(raw: RawMesh) -> Result<Self, Self::Error> {
        Self::new(raw.topology, raw.nodes, raw.connectivity)
    }
}

impl PartialEq for Mesh {
    fn eq(&self, other: &Self) -> bool {
        self.topology == other.topology
            && self.nodes == other.nodes
            && self.connectivity == other.connectivity
    }
}

impl Mesh {
    /// Builds a mesh after validating connectivity and coordinates.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidConnectivityLength`] when the connectivity is
    /// not a whole number of elements (or is non-empty for a point cloud),
    /// [`MeshError::NodeIndexOutOfRange`] for dangling node references, and
    /// [`MeshError::NonFiniteNode`] for NaN/infinite coordinates.
    pub fn new(
        topology: MeshTopology,
        nodes: Vec<Point>,
        connectivity: Vec<usize>,
    ) -> Result<Self, MeshError> {
        let stride = topology.nodes_per_element();
        let bad_len = if stride == 0 {
            !connectivity.is_empty()
        } else {
            connectivity.len() % stride != 0
        };
        if bad_len {
            return Err(MeshError::InvalidConnectivityLength {
                topology,
                len: connectivity.len(),
                stride,
            });
        }
        if let Some(index) = nodes.iter().position(|p| !p.is_finite()) {
            return Err(MeshError::NonFiniteNode { index });
        }
        if let Some(pos) = connectivity.iter().position(|&n| n >= nodes.len()) {
            return Err(MeshError::NodeIndexOutOfRange {
                element: pos / stride,
                node: connectivity[pos],
                num_nodes: nodes.len(),
            });
        }
        Ok(Self {
            topology,
            nodes,
            connectivity,
            edges: OnceLock::new(),
        })
    }

    /// Builds a point cloud.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::NonFiniteNode`] for NaN/infinite coordinates.
    pub fn point_cloud(nodes: Vec<Point>) -> Result<Self, MeshError> {
        Self::new(MeshTopology::PointCloud, nodes, Vec::new())
    }

    /// Element topology.
    #[must_use]
    pub const fn topology(&self) -> MeshTopology {
        self.topology
    }

    /// Returns `true` for meshes without elements.
    #[must_use]
    pub fn is_point_cloud(&self) -> bool {
        self.topology == MeshTopology::PointCloud
    }

    /// Number of nodes.
    #[must_use]
    pub const fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Number of elements.
    #[must_use]
    pub const fn num_elements(&self) -> usize {
        match self.topology.nodes_per_element() {
            0 => 0,
            stride => self.connectivity.len() / stride,
        }
    }

    /// Number of unique edges.
    #[must_use]
    pub fn num_edges(&self) -> usize {
        self.edges().len()
    }

    /// All node positions.
    #[must_use]
    pub fn nodes(&self) -> &[Point] {
        &self.nodes
    }

    /// Position of node `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[must_use]
    pub fn node(&self, index: usize) -> Point {
        self.nodes[index]
    }

    /// The flat connectivity array.
    #[must_use]
    pub fn connectivity(&self) -> &[usize] {
        &self.connectivity
    }

    /// Global node indices of `element`.
    ///
    /// # Panics
    ///
    /// Panics if `element` is out of range.
    #[must_use]
    pub fn element_nodes(&self, element: usize) -> &[usize] {
        let stride = self.topology.nodes_per_element();
        &self.connectivity[element * stride..(element + 1) * stride]
    }

    /// Iterate element node lists in order.
    pub fn elements(&self) -> impl ExactSizeIterator<Item = &[usize]> + '_ {
        let stride = self.topology.nodes_per_element().max(1);
        let take = self.num_elements();
        self.connectivity.chunks_exact(stride).take(take)
    }

    /// Corner positions of `element`.
    #[must_use]
    pub fn element_points(&self, element: usize) -> SmallBuffer<Point, 4> {
        self.element_nodes(element)
            .iter()
            .map(|&n| self.nodes[n])
            .collect()
    }

    /// Centroid of `element`.
    #[must_use]
    pub fn element_center(&self, element: usize) -> Point {
        Point::centroid(&self.element_points(element)).unwrap_or_default()
    }

    /// Bounding box of `element`.
    #[must_use]
    pub fn element_bounding_box(&self, element: usize) -> BoundingBox {
        BoundingBox::from_points(&self.element_points(element))
    }

    /// Bounding box of all nodes.
    #[must_use]
    pub fn bounding_box(&self) -> BoundingBox {
        BoundingBox::from_points(&self.nodes)
    }

    /// Geometric tolerance scaled to the mesh size.
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        MESH_EPSILON_FACTOR * self.bounding_box().diagonal().length()
    }

    /// Unique edges, computed once on first use.
    pub fn edges(&self) -> &MeshEdges {
        self.edges.get_or_init(|| self.compute_edges())
    }

    fn compute_edges(&self) -> MeshEdges {
        let local = self.topology.local_edges();
        let mut lookup: FastHashMap<[usize; 2], usize> =
            fast_hash_map_with_capacity(self.num_elements() * local.len());
        let mut edges = Vec::new();
        let mut element_edges = Vec::with_capacity(self.num_elements() * local.len());

        for nodes in self.elements() {
            for &[a, b] in local {
                let key = if nodes[a] <= nodes[b] {
                    [nodes[a], nodes[b]]
                } else {
                    [nodes[b], nodes[a]]
                };
                let next = edges.len();
                let id = match lookup.entry(key) {
                    Entry::Occupied(e) => *e.get(),
                    Entry::Vacant(e) => {
                        e.insert(next);
                        edges.push(key);
                        next
                    }
                };
                element_edges.push(id);
            }
        }

        MeshEdges {
            edges,
            element_edges,
            stride: local.len(),
        }
    }

    /// Midpoint of edge `edge`.
    #[must_use]
    pub fn edge_center(&self, edge: usize) -> Point {
        let [a, b] = self.edges().edges()[edge];
        (self.nodes[a] + self.nodes[b]) * 0.5
    }

    /// Number of field values a field of `basis` carries on this mesh.
    #[must_use]
    pub fn num_values(&self, basis: BasisOrder) -> usize {
        match basis {
            BasisOrder::Constant => self.num_elements(),
            BasisOrder::Linear => self.num_nodes(),
            BasisOrder::Quadratic => self.num_nodes() + self.num_edges(),
        }
    }

    /// Location of value `index` for a field of `basis`.
    ///
    /// Constant values sit at element centers, linear values at nodes, and
    /// quadratic values at nodes followed by edge midpoints.
    #[must_use]
    pub fn value_location(&self, basis: BasisOrder, index: usize) -> Point {
        match basis {
            BasisOrder::Constant => self.element_center(index),
            BasisOrder::Linear => self.nodes[index],
            BasisOrder::Quadratic if index < self.num_nodes() => self.nodes[index],
            BasisOrder::Quadratic => self.edge_center(index - self.num_nodes()),
        }
    }

    /// Map from each facet's sorted node set to its incident elements.
    #[must_use]
    pub fn facet_map(&self) -> FacetToElementsMap {
        let local = self.topology.local_facets();
        let mut map: FacetToElementsMap =
            fast_hash_map_with_capacity(self.num_elements() * local.len());
        for (element, nodes) in self.elements().enumerate() {
            for (f, facet) in local.iter().enumerate() {
                let global: NodeBuffer = facet.iter().map(|&l| nodes[l]).collect();
                let Ok(local_facet) = u8::try_from(f) else {
                    continue;
                };
                map.entry(facet_key(&global))
                    .or_default()
                    .push((element, local_facet));
            }
        }
        map
    }

    /// Facets with no neighboring element, ordered by `(element, local_facet)`.
    #[must_use]
    pub fn boundary_facets(&self) -> Vec<BoundaryFacet> {
        let local = self.topology.local_facets();
        let mut facets: Vec<BoundaryFacet> = self
            .facet_map()
            .into_values()
            .filter(|incident| incident.len() == 1)
            .map(|incident| {
                let (element, local_facet) = incident[0];
                let nodes = self.element_nodes(element);
                BoundaryFacet {
                    element,
                    local_facet,
                    nodes: local[usize::from(local_facet)]
                        .iter()
                        .map(|&l| nodes[l])
                        .collect(),
                }
            })
            .collect();
        facets.sort_unstable_by_key(|f| (f.element, f.local_facet));
        facets
    }
}

// =============================================================================
// TESTS
// =============================================================================
