//! Periodic boundary detection.
//!
//! A mesh is periodic along an axis when its boundary recurs at a fixed
//! translation along that axis. [`find_periodic_boundaries`] measures that
//! translation per axis, folds every boundary node back into one period, and
//! pairs boundary facets whose folded nodes coincide. The pairs become sparse
//! link matrices over nodes and over boundary facets.
//!
//! Candidate facets are found through a coarse spatial key: each folded
//! coordinate is quantized into [`KEY_BINS`] bins and the three bin indices
//! are packed into one integer. A facet is looked up under the key of its
//! first node and the 26 neighboring keys.
//!
//! A mesh only one element wide along a periodic axis folds both of its faces
//! across that axis onto the same coordinate, so the nodes of a facet spanning
//! that axis share one folded position there. Each node of such a facet links
//! to the first coincident node of its partner, and the direct links also
//! join diagonal images (on a single square, every corner links to the other
//! three). The transitive closure is unaffected, since those images form one
//! class anyway.

use crate::core::collections::{FastHashMap, NodeBuffer, SmallBuffer, sort_dedup_pairs};
use crate::core::error::MappingError;
use crate::core::mesh::{BoundaryFacet, Mesh, MeshTopology};
use crate::core::report::ExecutionContext;
use crate::core::sparse::SparseRowMatrix;
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::point::Point;
use num_traits::cast;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Quantization bins per axis for the facet lookup key.
pub const KEY_BINS: u32 = 250;

const AXIS_NAMES: [&str; 3] = ["x", "y", "z"];

/// Options for [`find_periodic_boundaries`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicOptions {
    /// Look for periodicity along x.
    pub link_x: bool,
    /// Look for periodicity along y.
    pub link_y: bool,
    /// Look for periodicity along z.
    pub link_z: bool,
    /// Coincidence distance; negative selects the mesh epsilon.
    pub tolerance: f64,
    /// Build the node link matrices.
    pub build_node_links: bool,
    /// Build the boundary facet link matrix.
    pub build_facet_links: bool,
}

impl Default for PeriodicOptions {
    fn default() -> Self {
        Self {
            link_x: true,
            link_y: true,
            link_z: true,
            tolerance: -1.0,
            build_node_links: true,
            build_facet_links: true,
        }
    }
}

impl PeriodicOptions {
    /// Enables or disables each axis.
    #[must_use]
    pub const fn with_axes(mut self, x: bool, y: bool, z: bool) -> Self {
        self.link_x = x;
        self.link_y = y;
        self.link_z = z;
        self
    }

    /// Sets [`PeriodicOptions::tolerance`].
    #[must_use]
    pub const fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Selects which link matrices are built.
    #[must_use]
    pub const fn with_outputs(mut self, node_links: bool, facet_links: bool) -> Self {
        self.build_node_links = node_links;
        self.build_facet_links = facet_links;
        self
    }

    const fn axes(&self) -> [bool; 3] {
        [self.link_x, self.link_y, self.link_z]
    }
}

/// Result of [`find_periodic_boundaries`].
#[derive(Clone, Debug, PartialEq)]
pub struct PeriodicLinks {
    /// Boundary facets in the order used by [`PeriodicLinks::facet_links`].
    pub boundary_facets: Vec<BoundaryFacet>,
    /// Detected period per axis; `None` for axes that were disabled or not periodic.
    pub shifts: [Option<f64>; 3],
    /// Direct node-to-node links, `num_nodes × num_nodes`.
    pub node_links: Option<SparseRowMatrix>,
    /// Transitive closure of [`PeriodicLinks::node_links`]; every row contains its own node.
    pub node_closure: Option<SparseRowMatrix>,
    /// Facet-to-facet links over [`PeriodicLinks::boundary_facets`].
    pub facet_links: Option<SparseRowMatrix>,
}

/// Per-axis folding and quantization.
#[derive(Clone, Copy, Debug)]
struct Folding {
    origin: [f64; 3],
    shift: [Option<f64>; 3],
    range_min: [f64; 3],
    scale: [f64; 3],
    tolerance: f64,
}

impl Folding {
    fn fold(&self, p: &Point) -> Point {
        Point::new(std::array::from_fn(|a| match self.shift[a] {
            Some(shift) => {
                let folded = (p[a] - self.origin[a]).rem_euclid(shift);
                if shift - folded <= self.tolerance {
                    folded - shift
                } else {
                    folded
                }
            }
            None => p[a],
        }))
    }

    fn bins(&self, folded: &Point) -> [u32; 3] {
        std::array::from_fn(|a| {
            let offset = if self.shift[a].is_some() {
                folded[a]
            } else {
                folded[a] - self.range_min[a]
            };
            let bin: u32 = cast((offset * self.scale[a]).floor().max(0.0)).unwrap_or(0);
            bin.min(KEY_BINS - 1)
        })
    }
}

const fn pack_key([x, y, z]: [u32; 3]) -> u32 {
    x | (y << 8) | (z << 16)
}

/// Bin triples of `bins` and its 26 neighbors that stay inside the key range.
fn neighbor_keys(bins: [u32; 3]) -> impl Iterator<Item = u32> {
    let offsets = [-1_i64, 0, 1];
    offsets.into_iter().flat_map(move |dx| {
        offsets.into_iter().flat_map(move |dy| {
            offsets.into_iter().filter_map(move |dz| {
                let shifted: [i64; 3] = [
                    i64::from(bins[0]) + dx,
                    i64::from(bins[1]) + dy,
                    i64::from(bins[2]) + dz,
                ];
                let mut out = [0_u32; 3];
                for (slot, v) in out.iter_mut().zip(shifted) {
                    *slot = u32::try_from(v).ok().filter(|&b| b < KEY_BINS)?;
                }
                Some(pack_key(out))
            })
        })
    })
}

/// Per-axis period of `points`, measured from the lowest point along that axis.
///
/// The period is the largest offset along the axis among points whose offsets
/// across the axis are within `tolerance`. Returns `0.0` when nothing lines up.
fn measure_shifts(points: &[Point], tolerance: f64) -> ([f64; 3], [f64; 3]) {
    let tol2 = tolerance * tolerance;
    let mut shifts = [0.0; 3];
    let mut origins = [0.0; 3];
    for axis in 0..3 {
        let Some(base) = points
            .iter()
            .copied()
            .reduce(|lo, p| if p[axis] < lo[axis] { p } else { lo })
        else {
            continue;
        };
        origins[axis] = base[axis];
        for p in points {
            let d = *p - base;
            let across = d.length_squared() - d[axis] * d[axis];
            if d[axis] > shifts[axis] && across < tol2 {
                shifts[axis] = d[axis];
            }
        }
    }
    (shifts, origins)
}

/// Detects periodic boundaries of `mesh`.
///
/// # Errors
///
/// Returns [`MappingError::EmptyInput`] for a mesh without nodes,
/// [`MappingError::UnsupportedTopology`] for point clouds, and
/// [`MappingError::Cancelled`].
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::periodic::{PeriodicOptions, find_periodic_boundaries};
/// use meshfield::core::mesh::{Mesh, MeshTopology};
/// use meshfield::core::report::ExecutionContext;
/// use meshfield::geometry::point::Point;
///
/// // Two segments along x: the free end nodes 0 and 2 are one period apart.
/// let line = Mesh::new(
///     MeshTopology::Curve,
///     vec![Point::new([0.0, 0.0, 0.0]), Point::new([1.0, 0.0, 0.0]), Point::new([2.0, 0.0, 0.0])],
///     vec![0, 1, 1, 2],
/// )
/// .unwrap();
/// let links = find_periodic_boundaries(&line, &PeriodicOptions::default(), &ExecutionContext::default()).unwrap();
/// assert_eq!(links.shifts[0], Some(2.0));
/// let closure = links.node_closure.unwrap();
/// assert_eq!(closure.row_columns(0), &[0, 2]);
/// assert_eq!(closure.row_columns(1), &[1]);
/// ```
pub fn find_periodic_boundaries(
    mesh: &Mesh,
    options: &PeriodicOptions,
    ctx: &ExecutionContext,
) -> Result<PeriodicLinks, MappingError> {
    if mesh.num_nodes() == 0 {
        return Err(MappingError::EmptyInput {
            what: "mesh".to_owned(),
        });
    }
    if mesh.topology() == MeshTopology::PointCloud {
        return Err(MappingError::UnsupportedTopology {
            operation: "find_periodic_boundaries",
            topology: mesh.topology(),
        });
    }
    let tolerance = if options.tolerance.is_nan() || options.tolerance < 0.0 {
        mesh.epsilon()
    } else {
        options.tolerance
    };

    let facets = mesh.boundary_facets();
    let mut boundary_nodes: Vec<usize> = facets.iter().flat_map(|f| f.nodes.clone()).collect();
    boundary_nodes.sort_unstable();
    boundary_nodes.dedup();
    let points: Vec<Point> = boundary_nodes.iter().map(|&n| mesh.node(n)).collect();

    let (measured, origin) = measure_shifts(&points, tolerance);
    let range = BoundingBox::from_points(&points);
    let mut shift = [None; 3];
    let mut scale = [0.0; 3];
    for (axis, enabled) in options.axes().into_iter().enumerate() {
        let extent = range.max()[axis] - range.min()[axis];
        if enabled && measured[axis] > tolerance {
            shift[axis] = Some(measured[axis]);
            scale[axis] = f64::from(KEY_BINS) / measured[axis];
        } else {
            if enabled {
                ctx.reporter().remark(&format!(
                    "No periodicity found along the {} axis",
                    AXIS_NAMES[axis]
                ));
            }
            if extent > 0.0 {
                scale[axis] = f64::from(KEY_BINS) / extent;
            }
        }
    }
    let folding = Folding {
        origin,
        shift,
        range_min: *range.min().coords(),
        scale,
        tolerance,
    };

    tracing::debug!(
        boundary_facets = facets.len(),
        boundary_nodes = boundary_nodes.len(),
        ?shift,
        tolerance,
        "detecting periodic boundaries"
    );

    let folded: FastHashMap<usize, Point> = boundary_nodes
        .iter()
        .map(|&n| (n, folding.fold(&mesh.node(n))))
        .collect();

    let mut buckets: FastHashMap<u32, SmallBuffer<usize, 4>> = FastHashMap::default();
    for (index, facet) in facets.iter().enumerate() {
        for node in &facet.nodes {
            let bucket = buckets
                .entry(pack_key(folding.bins(&folded[node])))
                .or_default();
            if bucket.last() != Some(&index) {
                bucket.push(index);
            }
        }
    }

    let tol2 = tolerance * tolerance;
    let mut node_pairs = Vec::new();
    let mut facet_pairs = Vec::new();
    for (index, facet) in facets.iter().enumerate() {
        ctx.check_cancelled()?;
        let Some(first) = facet.nodes.first() else {
            continue;
        };
        let candidates = neighbor_keys(folding.bins(&folded[first]))
            .filter_map(|key| buckets.get(&key))
            .flat_map(|bucket| bucket.iter().copied());
        for other in candidates {
            if other == index {
                continue;
            }
            let Some(pairing) = match_facets(mesh, &folded, facet, &facets[other], tol2) else {
                continue;
            };
            for (a, b) in facet.nodes.iter().zip(pairing) {
                node_pairs.push((*a, b));
                node_pairs.push((b, *a));
            }
            facet_pairs.push((index, other));
            facet_pairs.push((other, index));
            break;
        }
    }
    sort_dedup_pairs(&mut node_pairs);

    let node_links = if options.build_node_links {
        Some(SparseRowMatrix::from_pairs(mesh.num_nodes(), node_pairs)?)
    } else {
        None
    };
    let node_closure = node_links.as_ref().map(transitive_closure).transpose()?;
    let facet_links = if options.build_facet_links {
        Some(SparseRowMatrix::from_pairs(facets.len(), facet_pairs)?)
    } else {
        None
    };

    tracing::debug!(
        node_links = node_links.as_ref().map_or(0, SparseRowMatrix::nnz),
        facet_links = facet_links.as_ref().map_or(0, SparseRowMatrix::nnz),
        "periodic boundaries detected"
    );
    Ok(PeriodicLinks {
        boundary_facets: facets,
        shifts: shift,
        node_links,
        node_closure,
        facet_links,
    })
}

/// Matches `facet` against `candidate`.
///
/// The candidate must not touch the facet in unfolded space, and every folded
/// facet node must coincide with a folded candidate node. Returns the partner
/// node of each facet node.
fn match_facets(
    mesh: &Mesh,
    folded: &FastHashMap<usize, Point>,
    facet: &BoundaryFacet,
    candidate: &BoundaryFacet,
    tol2: f64,
) -> Option<NodeBuffer> {
    let touches = candidate.nodes.iter().any(|&c| {
        facet
            .nodes
            .iter()
            .any(|&f| mesh.node(c).distance_squared(&mesh.node(f)) <= tol2)
    });
    if touches {
        return None;
    }
    facet
        .nodes
        .iter()
        .map(|f| {
            candidate
                .nodes
                .iter()
                .copied()
                .find(|c| folded[f].distance_squared(&folded[c]) <= tol2)
        })
        .collect()
}

/// Rows of `links` extended to everything reachable from them, including the row itself.
fn transitive_closure(links: &SparseRowMatrix) -> Result<SparseRowMatrix, MappingError> {
    let n = links.rows();
    let mut pairs = Vec::with_capacity(links.nnz() + n);
    let mut seen = vec![usize::MAX; n];
    let mut queue = VecDeque::new();
    for start in 0..n {
        seen[start] = start;
        queue.push_back(start);
        while let Some(node) = queue.pop_front() {
            pairs.push((start, node));
            for &next in links.row_columns(node) {
                if seen[next] != start {
                    seen[next] = start;
                    queue.push_back(next);
                }
            }
        }
    }
    Ok(SparseRowMatrix::from_pairs(n, pairs)?)
}
