//! Grid-accelerated point location on a [`Mesh`].
//!
//! [`MeshLocator`] borrows a mesh and builds two [`SearchGrid`]s: one over
//! nodes and one over element bounding boxes (each element is registered in
//! every voxel its box overlaps). Element queries project the query point
//! onto candidate simplices, so a point inside an element locates it with
//! distance zero and a point outside snaps to the nearest element surface.
//! A third grid over edge midpoints is built on the first quadratic query.

use crate::core::collections::{GridError, SearchGrid, WeightBuffer};
use crate::core::mesh::{BasisOrder, Mesh, MeshTopology};
use crate::core::traits::mesh_query::{ClosestHit, LocatedPoint, MeshQuery};
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::point::Point;
use crate::geometry::simplex::{
    Projection, barycentric_from_local, linear_weights, project_onto_segment,
    project_onto_tetrahedron, project_onto_triangle, quadratic_weights,
};
use std::sync::OnceLock;

/// Barycentric slack accepted when testing whether a point is inside a tetrahedron.
const INSIDE_TOLERANCE: f64 = 1.0e-10;

/// Spatial query accelerator for one mesh.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::locator::MeshLocator;
/// use meshfield::core::mesh::{Mesh, MeshTopology};
/// use meshfield::core::traits::mesh_query::MeshQuery;
/// use meshfield::geometry::point::Point;
///
/// let mesh = Mesh::new(
///     MeshTopology::TetVol,
///     vec![
///         Point::new([0.0, 0.0, 0.0]),
///         Point::new([1.0, 0.0, 0.0]),
///         Point::new([0.0, 1.0, 0.0]),
///         Point::new([0.0, 0.0, 1.0]),
///     ],
///     vec![0, 1, 2, 3],
/// )
/// .unwrap();
/// let locator = MeshLocator::new(&mesh).unwrap();
///
/// let hit = locator.locate(&Point::new([0.1, 0.1, 0.1]), None).unwrap();
/// assert_eq!(hit.element, 0);
/// assert_eq!(hit.distance, 0.0);
///
/// let node = locator.find_closest_node(&Point::new([0.9, 0.0, 0.1]), None).unwrap();
/// assert_eq!(node.index, 1);
/// ```
#[derive(Clone, Debug)]
pub struct MeshLocator<'m> {
    mesh: &'m Mesh,
    node_grid: Option<SearchGrid>,
    element_grid: Option<SearchGrid>,
    edge_grid: OnceLock<Option<SearchGrid>>,
}

impl<'m> MeshLocator<'m> {
    /// Builds the node and element grids for `mesh`.
    ///
    /// Empty meshes get no grids; every query on them returns `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`GridError`] if a grid cannot be allocated.
    pub fn new(mesh: &'m Mesh) -> Result<Self, GridError> {
        let bbox = mesh.bounding_box();
        if !bbox.is_valid() {
            return Ok(Self {
                mesh,
                node_grid: None,
                element_grid: None,
                edge_grid: OnceLock::new(),
            });
        }

        let mut node_grid = SearchGrid::with_expected_points(&bbox, mesh.num_nodes())?;
        for (i, p) in mesh.nodes().iter().enumerate() {
            node_grid.insert(i, p);
        }

        let element_grid = if mesh.num_elements() > 0 {
            let mut grid = SearchGrid::with_expected_points(&bbox, mesh.num_elements())?;
            for e in 0..mesh.num_elements() {
                grid.insert_box(e, &mesh.element_bounding_box(e));
            }
            Some(grid)
        } else {
            None
        };

        tracing::debug!(
            nodes = mesh.num_nodes(),
            elements = mesh.num_elements(),
            node_dims = ?node_grid.dims(),
            "built mesh locator"
        );

        Ok(Self {
            mesh,
            node_grid: Some(node_grid),
            element_grid,
            edge_grid: OnceLock::new(),
        })
    }

    /// The borrowed mesh.
    #[must_use]
    pub const fn mesh(&self) -> &'m Mesh {
        self.mesh
    }

    fn edge_grid(&self) -> Option<&SearchGrid> {
        self.edge_grid
            .get_or_init(|| {
                let edges = self.mesh.num_edges();
                if edges == 0 {
                    return None;
                }
                let mut grid =
                    SearchGrid::with_expected_points(&self.mesh.bounding_box(), edges).ok()?;
                for e in 0..edges {
                    grid.insert(e, &self.mesh.edge_center(e));
                }
                Some(grid)
            })
            .as_ref()
    }

    /// Projects `point` onto element `element`.
    #[must_use]
    pub fn project(&self, element: usize, point: &Point) -> Option<Projection> {
        let pts = self.mesh.element_points(element);
        match self.mesh.topology() {
            MeshTopology::PointCloud => None,
            MeshTopology::Curve => Some(project_onto_segment(point, &pts[0], &pts[1])),
            MeshTopology::TriSurf => Some(project_onto_triangle(point, &pts[0], &pts[1], &pts[2])),
            MeshTopology::TetVol => Some(project_onto_tetrahedron(
                point,
                [&pts[0], &pts[1], &pts[2], &pts[3]],
                INSIDE_TOLERANCE,
            )),
        }
    }
}

fn bound_squared(max_distance: Option<f64>) -> f64 {
    max_distance.map_or(f64::INFINITY, |d| if d < 0.0 { f64::INFINITY } else { d * d })
}

impl MeshQuery for MeshLocator<'_> {
    fn topology(&self) -> MeshTopology {
        self.mesh.topology()
    }

    fn bounding_box(&self) -> BoundingBox {
        self.mesh.bounding_box()
    }

    fn num_nodes(&self) -> usize {
        self.mesh.num_nodes()
    }

    fn num_elements(&self) -> usize {
        self.mesh.num_elements()
    }

    fn num_values(&self, basis: BasisOrder) -> usize {
        self.mesh.num_values(basis)
    }

    fn node(&self, index: usize) -> Point {
        self.mesh.node(index)
    }

    fn element_center(&self, index: usize) -> Point {
        self.mesh.element_center(index)
    }

    fn value_location(&self, basis: BasisOrder, index: usize) -> Point {
        self.mesh.value_location(basis, index)
    }

    fn find_closest_node(&self, point: &Point, max_distance: Option<f64>) -> Option<ClosestHit> {
        let grid = self.node_grid.as_ref()?;
        let nodes = self.mesh.nodes();
        grid.search_nearest(point, bound_squared(max_distance), |i| {
            Some(nodes[i].distance_squared(point))
        })
        .map(|(index, d2)| ClosestHit {
            index,
            point: nodes[index],
            distance: d2.sqrt(),
        })
    }

    fn find_closest_edge_center(
        &self,
        point: &Point,
        max_distance: Option<f64>,
    ) -> Option<ClosestHit> {
        let bound = bound_squared(max_distance);
        let distance = |e: usize| self.mesh.edge_center(e).distance_squared(point);
        let best = match self.edge_grid() {
            Some(grid) => grid.search_nearest(point, bound, |e| Some(distance(e))),
            // Degenerate extent: no grid, scan every edge.
            None => (0..self.mesh.num_edges())
                .map(|e| (e, distance(e)))
                .filter(|&(_, d2)| d2 < bound)
                .min_by(|a, b| a.1.total_cmp(&b.1)),
        };
        best.map(|(index, d2)| ClosestHit {
            index,
            point: self.mesh.edge_center(index),
            distance: d2.sqrt(),
        })
    }

    fn locate(&self, point: &Point, max_distance: Option<f64>) -> Option<LocatedPoint> {
        let grid = self.element_grid.as_ref()?;
        let (element, _) = grid.search_nearest(point, bound_squared(max_distance), |e| {
            self.project(e, point).map(|p| p.distance_squared)
        })?;
        let projection = self.project(element, point)?;
        Some(LocatedPoint {
            element,
            local: projection.local_coords(),
            point: projection.point,
            distance: projection.distance_squared.sqrt(),
        })
    }

    fn interpolation_weights(
        &self,
        element: usize,
        local: &[f64; 3],
        basis: BasisOrder,
    ) -> WeightBuffer {
        let nodes = self.mesh.element_nodes(element);
        let bary = barycentric_from_local(local, nodes.len());
        match basis {
            BasisOrder::Constant => WeightBuffer::from_slice(&[(element, 1.0)]),
            BasisOrder::Linear => nodes
                .iter()
                .copied()
                .zip(linear_weights(&bary))
                .collect(),
            BasisOrder::Quadratic => {
                let weights = quadratic_weights(&bary, self.mesh.topology().local_edges());
                let num_nodes = self.mesh.num_nodes();
                let edge_values = self
                    .mesh
                    .edges()
                    .element_edges(element)
                    .iter()
                    .map(|&edge| num_nodes + edge);
                nodes
                    .iter()
                    .copied()
                    .chain(edge_values)
                    .zip(weights)
                    .collect()
            }
        }
    }
}
