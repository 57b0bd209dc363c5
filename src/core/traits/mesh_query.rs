//! The mesh capability consumed by the mapping algorithms.
//!
//! Mapping, direct field transfer, and matrix application only ever ask a mesh
//! for geometry (counts, centers, bounding box), nearest-sample queries, and
//! interpolation weights. [`MeshQuery`] captures exactly that surface so that
//! alternative mesh back ends can drive the same algorithms.
//! [`MeshLocator`](crate::core::locator::MeshLocator) is the in-crate
//! implementation.

use crate::core::collections::WeightBuffer;
use crate::core::mesh::{BasisOrder, MeshTopology};
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::point::Point;

/// Result of a nearest node or element query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClosestHit {
    /// Index of the node or element found.
    pub index: usize,
    /// Closest location on that node or element.
    pub point: Point,
    /// Distance from the query point.
    pub distance: f64,
}

/// Result of locating a point in an element.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LocatedPoint {
    /// Containing (or nearest) element.
    pub element: usize,
    /// Local coordinates of [`LocatedPoint::point`] inside the element.
    pub local: [f64; 3],
    /// The query projected onto the element (the query itself when inside).
    pub point: Point,
    /// Distance from the query to the element; zero when inside.
    pub distance: f64,
}

/// Geometry and interpolation queries on a mesh.
///
/// `max_distance` arguments bound the search: `None` is unbounded, and
/// `Some(d)` accepts only hits strictly closer than `d`. Ties resolve to the
/// lower index.
pub trait MeshQuery: Sync {
    /// Element type of the mesh.
    fn topology(&self) -> MeshTopology;

    /// Bounding box of all nodes.
    fn bounding_box(&self) -> BoundingBox;

    /// Number of nodes.
    fn num_nodes(&self) -> usize;

    /// Number of elements.
    fn num_elements(&self) -> usize;

    /// Number of values a field of `basis` carries on this mesh.
    fn num_values(&self, basis: BasisOrder) -> usize;

    /// Position of a node.
    fn node(&self, index: usize) -> Point;

    /// Centroid of an element.
    fn element_center(&self, index: usize) -> Point;

    /// Location of value `index` for a field of `basis`.
    fn value_location(&self, basis: BasisOrder, index: usize) -> Point;

    /// Nearest node to `point`.
    fn find_closest_node(&self, point: &Point, max_distance: Option<f64>) -> Option<ClosestHit>;

    /// Element containing `point`, or the element nearest to it.
    fn locate(&self, point: &Point, max_distance: Option<f64>) -> Option<LocatedPoint>;

    /// Nearest element to `point` by geometric distance (zero inside an element).
    fn find_closest_element(
        &self,
        point: &Point,
        max_distance: Option<f64>,
    ) -> Option<ClosestHit> {
        self.locate(point, max_distance).map(|hit| ClosestHit {
            index: hit.element,
            point: hit.point,
            distance: hit.distance,
        })
    }

    /// Nearest edge midpoint to `point`; the hit's index is the edge index.
    fn find_closest_edge_center(
        &self,
        point: &Point,
        max_distance: Option<f64>,
    ) -> Option<ClosestHit>;

    /// Nearest value location of the given basis, indexed as a field value.
    ///
    /// Constant data searches elements and linear data searches nodes.
    /// Quadratic data searches nodes and edge midpoints together; an edge hit
    /// is returned as value `num_nodes() + edge`, and a node wins a tie.
    fn find_closest_sample(
        &self,
        basis: BasisOrder,
        point: &Point,
        max_distance: Option<f64>,
    ) -> Option<ClosestHit> {
        match basis {
            BasisOrder::Constant => self.find_closest_element(point, max_distance),
            BasisOrder::Linear => self.find_closest_node(point, max_distance),
            BasisOrder::Quadratic => {
                let node = self.find_closest_node(point, max_distance);
                let edge = self
                    .find_closest_edge_center(point, max_distance)
                    .map(|hit| ClosestHit {
                        index: self.num_nodes() + hit.index,
                        ..hit
                    });
                match (node, edge) {
                    (Some(n), Some(e)) => Some(if e.distance < n.distance { e } else { n }),
                    (n, e) => n.or(e),
                }
            }
        }
    }

    /// `(value index, weight)` pairs interpolating a field of `basis` at
    /// local coordinates `local` inside `element`.
    fn interpolation_weights(
        &self,
        element: usize,
        local: &[f64; 3],
        basis: BasisOrder,
    ) -> WeightBuffer;
}
