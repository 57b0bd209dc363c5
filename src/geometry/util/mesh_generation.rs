//! Structured meshes over axis-aligned boxes.

use super::GenerationError;
use crate::core::mesh::{Mesh, MeshTopology};
use crate::geometry::point::Point;
use num_traits::cast;

/// Axis orders of the six tetrahedra in a hexahedron. Each tetrahedron walks
/// from the low corner to the high corner one axis at a time, so neighbouring
/// hexahedra share their face diagonals.
const KUHN_ORDERS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

fn check_cells(cells: &[usize]) -> Result<(), GenerationError> {
    match cells.iter().position(|&n| n == 0) {
        Some(axis) => Err(GenerationError::InvalidCellCount { axis }),
        None => Ok(()),
    }
}

fn check_extent(min: &Point, max: &Point, axes: usize) -> Result<(), GenerationError> {
    for a in 0..axes {
        if !(min[a].is_finite() && max[a].is_finite() && min[a] < max[a]) {
            return Err(GenerationError::InvalidRange {
                min: min[a],
                max: max[a],
            });
        }
    }
    Ok(())
}

fn lerp(min: f64, max: f64, index: usize, cells: usize) -> f64 {
    let t = cast::<usize, f64>(index).unwrap_or_default() / cast::<usize, f64>(cells).unwrap_or(1.0);
    (max - min).mul_add(t, min)
}

/// A straight chain of `segments` curve elements from `start` to `end`.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidCellCount`] for zero segments.
///
/// # Examples
///
/// ```
/// use meshfield::geometry::point::Point;
/// use meshfield::geometry::util::structured_curve;
///
/// let curve = structured_curve(4, Point::origin(), Point::new([2.0, 0.0, 0.0])).unwrap();
/// assert_eq!(curve.num_elements(), 4);
/// assert_eq!(curve.node(2), Point::new([1.0, 0.0, 0.0]));
/// ```
pub fn structured_curve(segments: usize, start: Point, end: Point) -> Result<Mesh, GenerationError> {
    check_cells(&[segments])?;
    let nodes = (0..=segments)
        .map(|i| Point::new(std::array::from_fn(|a| lerp(start[a], end[a], i, segments))))
        .collect();
    let connectivity = (0..segments).flat_map(|i| [i, i + 1]).collect();
    Ok(Mesh::new(MeshTopology::Curve, nodes, connectivity)?)
}

/// A triangle grid in the plane `z = min.z()`, two triangles per quad.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidCellCount`] for an axis without cells and
/// [`GenerationError::InvalidRange`] when the x or y extent is empty.
pub fn structured_tri_grid(
    cells: [usize; 2],
    min: Point,
    max: Point,
) -> Result<Mesh, GenerationError> {
    check_cells(&cells)?;
    check_extent(&min, &max, 2)?;
    let [nx, ny] = cells;
    let total = (nx + 1)
        .checked_mul(ny + 1)
        .ok_or(GenerationError::Overflow {
            cells: [nx, ny, 0],
        })?;

    let mut nodes = Vec::with_capacity(total);
    for j in 0..=ny {
        for i in 0..=nx {
            nodes.push(Point::new([
                lerp(min.x(), max.x(), i, nx),
                lerp(min.y(), max.y(), j, ny),
                min.z(),
            ]));
        }
    }
    let node = |i: usize, j: usize| i + (nx + 1) * j;
    let mut connectivity = Vec::with_capacity(nx * ny * 6);
    for j in 0..ny {
        for i in 0..nx {
            let (a, b, c, d) = (node(i, j), node(i + 1, j), node(i + 1, j + 1), node(i, j + 1));
            connectivity.extend_from_slice(&[a, b, c, a, c, d]);
        }
    }
    Ok(Mesh::new(MeshTopology::TriSurf, nodes, connectivity)?)
}

/// A tetrahedral box with six tetrahedra per hexahedral cell.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidCellCount`] for an axis without cells,
/// [`GenerationError::InvalidRange`] for an empty extent, and
/// [`GenerationError::Overflow`] when the node count does not fit in `usize`.
///
/// # Examples
///
/// ```
/// use meshfield::geometry::point::Point;
/// use meshfield::geometry::util::structured_tet_box;
///
/// let mesh = structured_tet_box([2, 1, 1], Point::origin(), Point::new([2.0, 1.0, 1.0])).unwrap();
/// assert_eq!(mesh.num_nodes(), 12);
/// assert_eq!(mesh.num_elements(), 12);
/// ```
pub fn structured_tet_box(
    cells: [usize; 3],
    min: Point,
    max: Point,
) -> Result<Mesh, GenerationError> {
    check_cells(&cells)?;
    check_extent(&min, &max, 3)?;
    let [nx, ny, nz] = cells;
    let total = (nx + 1)
        .checked_mul(ny + 1)
        .and_then(|n| n.checked_mul(nz + 1))
        .ok_or(GenerationError::Overflow { cells })?;

    let mut nodes = Vec::with_capacity(total);
    for k in 0..=nz {
        for j in 0..=ny {
            for i in 0..=nx {
                nodes.push(Point::new([
                    lerp(min.x(), max.x(), i, nx),
                    lerp(min.y(), max.y(), j, ny),
                    lerp(min.z(), max.z(), k, nz),
                ]));
            }
        }
    }

    let node = |ijk: [usize; 3]| ijk[0] + (nx + 1) * (ijk[1] + (ny + 1) * ijk[2]);
    let mut connectivity = Vec::with_capacity(nx * ny * nz * 24);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                for order in KUHN_ORDERS {
                    let mut corner = [i, j, k];
                    connectivity.push(node(corner));
                    for axis in order {
                        corner[axis] += 1;
                        connectivity.push(node(corner));
                    }
                }
            }
        }
    }
    Ok(Mesh::new(MeshTopology::TetVol, nodes, connectivity)?)
}
