//! Uniform voxel search grid with expanding-shell nearest queries.
//!
//! The grid covers a fixed bounding box split into `(nx, ny, nz)` voxels.
//! Each voxel owns an unordered bucket of caller-supplied indices. Indices
//! are placed by the position they had at insertion time; the grid never
//! re-indexes.
//!
//! Nearest queries start at the query's own voxel and grow the search shell
//! one voxel at a time. Voxels whose box is already farther away than the best
//! candidate are pruned, and the search stops once a whole shell is pruned or
//! the shell covers the grid. For roughly uniform data this is O(1) per query;
//! for pathological data it degrades to a full scan but stays exact.

use super::{FastHashSet, SmallBuffer};
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::point::Point;
use num_traits::cast;
use thiserror::Error;

const BUCKET_INLINE_CAPACITY: usize = 8;

/// Default ceiling on the number of voxels a grid may allocate.
pub const MAX_GRID_CELLS_DEFAULT: usize = 1 << 24;

/// Relative padding applied to a box before sizing a grid over it.
pub const GRID_PADDING_FRACTION: f64 = 1.0e-5;

/// Absolute padding floor so that single-point boxes still have extent.
const MIN_GRID_PADDING: f64 = 1.0e-12;

/// Get the voxel cap, allowing an override through `MESHFIELD_MAX_GRID_CELLS`.
fn max_grid_cells() -> usize {
    if let Ok(v) = std::env::var("MESHFIELD_MAX_GRID_CELLS")
        && let Ok(n) = v.parse::<usize>()
        && n > 0
    {
        return n;
    }
    MAX_GRID_CELLS_DEFAULT
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors raised while constructing a [`SearchGrid`].
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum GridError {
    /// A voxel count was zero.
    #[error("Invalid grid dimensions {dims:?}; every axis needs at least one voxel")]
    InvalidDimensions {
        /// Requested voxel counts.
        dims: [usize; 3],
    },
    /// The bounding box was empty or non-finite.
    #[error("Cannot build a search grid over an empty or non-finite bounding box")]
    InvalidBoundingBox,
    /// The requested grid exceeds the voxel cap.
    #[error("Search grid of {cells} voxels exceeds the cap of {cap}; set MESHFIELD_MAX_GRID_CELLS to raise it")]
    TooManyCells {
        /// Requested voxel count (saturating).
        cells: usize,
        /// Active cap.
        cap: usize,
    },
}

// =============================================================================
// SEARCH GRID
// =============================================================================

/// Dense uniform voxel grid mapping voxels to index buckets.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::collections::SearchGrid;
/// use meshfield::geometry::{bounding_box::BoundingBox, point::Point};
///
/// let pts = [Point::new([0.0, 0.0, 0.0]), Point::new([1.0, 1.0, 1.0])];
/// let mut grid = SearchGrid::new([2, 2, 2], BoundingBox::from_points(&pts)).unwrap();
/// for (i, p) in pts.iter().enumerate() {
///     grid.insert(i, p);
/// }
/// assert_eq!(grid.unsafe_locate(&Point::new([0.9, 0.9, 0.9])), [1, 1, 1]);
/// assert_eq!(grid.lookup(0, 0, 0), &[0]);
///
/// let nearest = grid.search_nearest(&Point::new([0.8, 0.7, 0.9]), f64::INFINITY, |i| {
///     Some(pts[i].distance_squared(&Point::new([0.8, 0.7, 0.9])))
/// });
/// assert_eq!(nearest.map(|(i, _)| i), Some(1));
/// ```
#[derive(Clone, Debug)]
pub struct SearchGrid {
    dims: [usize; 3],
    bbox: BoundingBox,
    cell_size: [f64; 3],
    inv_cell_size: [f64; 3],
    buckets: Vec<SmallBuffer<usize, BUCKET_INLINE_CAPACITY>>,
}

impl SearchGrid {
    /// Creates an empty grid with the given voxel counts over `bbox`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidDimensions`] if any count is zero,
    /// [`GridError::InvalidBoundingBox`] if the box is empty or non-finite, and
    /// [`GridError::TooManyCells`] if the voxel total exceeds the cap.
    pub fn new(dims: [usize; 3], bbox: BoundingBox) -> Result<Self, GridError> {
        if dims.contains(&0) {
            return Err(GridError::InvalidDimensions { dims });
        }
        if !bbox.is_valid() || !bbox.min().is_finite() || !bbox.max().is_finite() {
            return Err(GridError::InvalidBoundingBox);
        }
        let cap = max_grid_cells();
        let cells = dims
            .iter()
            .try_fold(1_usize, |acc, &n| acc.checked_mul(n))
            .unwrap_or(usize::MAX);
        if cells > cap {
            return Err(GridError::TooManyCells { cells, cap });
        }

        let diag = bbox.diagonal();
        let mut cell_size = [0.0; 3];
        let mut inv_cell_size = [0.0; 3];
        for axis in 0..3 {
            let n: f64 = cast(dims[axis]).unwrap_or(1.0);
            cell_size[axis] = diag[axis] / n;
            inv_cell_size[axis] = if cell_size[axis] > 0.0 {
                1.0 / cell_size[axis]
            } else {
                0.0
            };
        }

        Ok(Self {
            dims,
            bbox,
            cell_size,
            inv_cell_size,
            buckets: vec![SmallBuffer::new(); cells],
        })
    }

    /// Creates a grid sized so that about `expected_points` points land O(1) per voxel.
    ///
    /// The box is padded by [`GRID_PADDING_FRACTION`] of its diagonal. The
    /// voxel budget `s = 3·(⌈∛n⌉/2 + 1)` is split across axes in proportion to
    /// the box's side lengths, with at least one voxel per axis. Grids that
    /// would exceed the cap are scaled down uniformly.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidBoundingBox`] for an empty or non-finite box.
    pub fn with_expected_points(
        bbox: &BoundingBox,
        expected_points: usize,
    ) -> Result<Self, GridError> {
        if !bbox.is_valid() {
            return Err(GridError::InvalidBoundingBox);
        }
        let mut padded = *bbox;
        padded.pad((GRID_PADDING_FRACTION * bbox.diagonal().length()).max(MIN_GRID_PADDING));

        let dims = Self::voxel_dims_for(&padded, expected_points);
        Self::new(dims, padded)
    }

    fn voxel_dims_for(bbox: &BoundingBox, expected_points: usize) -> [usize; 3] {
        let n: f64 = cast(expected_points.max(1)).unwrap_or(1.0);
        let root: usize = cast(n.cbrt().ceil()).unwrap_or(1);
        let budget: f64 = cast(3 * (root / 2 + 1)).unwrap_or(3.0);

        let diag = bbox.diagonal();
        let trace = diag.x() + diag.y() + diag.z();
        let mut dims = [1_usize; 3];
        if trace > 0.0 {
            for (axis, slot) in dims.iter_mut().enumerate() {
                let voxels = (diag[axis] / trace * budget).ceil();
                *slot = cast::<f64, usize>(voxels).unwrap_or(1).max(1);
            }
        }

        let cap: f64 = cast(max_grid_cells()).unwrap_or(f64::MAX);
        let total: f64 = dims.iter().map(|&d| cast::<usize, f64>(d).unwrap_or(1.0)).product();
        if total > cap {
            let shrink = (cap / total).cbrt();
            for slot in &mut dims {
                let scaled = (cast::<usize, f64>(*slot).unwrap_or(1.0) * shrink).floor();
                *slot = cast::<f64, usize>(scaled).unwrap_or(1).max(1);
            }
        }
        dims
    }

    /// Voxel counts per axis.
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// The box covered by the grid.
    #[must_use]
    pub const fn bounding_box(&self) -> &BoundingBox {
        &self.bbox
    }

    /// Removes every index while keeping the allocation.
    pub fn clear(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
    }

    #[inline]
    const fn flat(&self, [i, j, k]: [usize; 3]) -> usize {
        i + self.dims[0] * (j + self.dims[1] * k)
    }

    /// Places `index` in the voxel containing `point` (clamped into the grid).
    pub fn insert(&mut self, index: usize, point: &Point) {
        let cell = self.unsafe_locate(point);
        let flat = self.flat(cell);
        self.buckets[flat].push(index);
    }

    /// Places `index` in every voxel overlapped by `extent`.
    pub fn insert_box(&mut self, index: usize, extent: &BoundingBox) {
        if !extent.is_valid() {
            return;
        }
        let lo = self.unsafe_locate(&extent.min());
        let hi = self.unsafe_locate(&extent.max());
        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    let flat = self.flat([i, j, k]);
                    self.buckets[flat].push(index);
                }
            }
        }
    }

    /// The bucket of voxel `(i, j, k)`; empty for out-of-range voxels.
    #[must_use]
    pub fn lookup(&self, i: usize, j: usize, k: usize) -> &[usize] {
        if i >= self.dims[0] || j >= self.dims[1] || k >= self.dims[2] {
            return &[];
        }
        &self.buckets[self.flat([i, j, k])]
    }

    /// Voxel coordinates of `point`, clamped to `[0, n-1]` per axis.
    ///
    /// Never fails; points outside the box map to the nearest boundary voxel.
    #[must_use]
    pub fn unsafe_locate(&self, point: &Point) -> [usize; 3] {
        std::array::from_fn(|axis| {
            let rel = ((point[axis] - self.bbox.min()[axis]) * self.inv_cell_size[axis]).floor();
            // NaN and negatives clamp to zero.
            if rel.is_nan() || rel <= 0.0 {
                0
            } else {
                cast::<f64, usize>(rel)
                    .unwrap_or(usize::MAX)
                    .min(self.dims[axis] - 1)
            }
        })
    }

    /// Squared distance from `point` to the box of voxel `(i, j, k)`.
    #[must_use]
    pub fn min_distance_squared(&self, point: &Point, [i, j, k]: [usize; 3]) -> f64 {
        let cell = [i, j, k];
        (0..3)
            .map(|axis| {
                let idx: f64 = cast(cell[axis]).unwrap_or(0.0);
                let lo = idx.mul_add(self.cell_size[axis], self.bbox.min()[axis]);
                let hi = lo + self.cell_size[axis];
                let d = if point[axis] < lo {
                    lo - point[axis]
                } else if point[axis] > hi {
                    point[axis] - hi
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }

    /// Visit every voxel at Chebyshev distance exactly `radius` from `center`.
    ///
    /// Returns `false` when the shell lies entirely outside the grid.
    fn for_each_shell_voxel<F>(&self, center: [usize; 3], radius: usize, mut f: F) -> bool
    where
        F: FnMut([usize; 3]),
    {
        let lo: [usize; 3] = std::array::from_fn(|a| center[a].saturating_sub(radius));
        let hi: [usize; 3] = std::array::from_fn(|a| (center[a] + radius).min(self.dims[a] - 1));
        let mut any = false;
        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    let cell = [i, j, k];
                    let on_shell = (0..3).any(|a| cell[a].abs_diff(center[a]) == radius);
                    if on_shell {
                        any = true;
                        f(cell);
                    }
                }
            }
        }
        any
    }

    /// Expanding-shell nearest search.
    ///
    /// `distance_squared` maps a candidate index to its squared distance, or
    /// `None` to reject it. Only candidates strictly closer than
    /// `initial_best_squared` are accepted; pass `f64::INFINITY` for an
    /// unbounded search. Equal distances resolve to the lower index so the
    /// result does not depend on bucket order.
    ///
    /// Returns the best `(index, distance²)`, or `None` if nothing qualified.
    pub fn search_nearest<F>(
        &self,
        point: &Point,
        initial_best_squared: f64,
        mut distance_squared: F,
    ) -> Option<(usize, f64)>
    where
        F: FnMut(usize) -> Option<f64>,
    {
        let center = self.unsafe_locate(point);
        let max_radius = self.dims.iter().copied().max().unwrap_or(1);
        let mut best: Option<(usize, f64)> = None;
        let mut dmin = initial_best_squared;

        for radius in 0..=max_radius {
            let mut considered = false;
            let in_grid = self.for_each_shell_voxel(center, radius, |cell| {
                let reach = self.min_distance_squared(point, cell);
                if reach > dmin || (best.is_none() && reach >= dmin) {
                    return;
                }
                considered = true;
                for &idx in &self.buckets[self.flat(cell)] {
                    let Some(d) = distance_squared(idx) else {
                        continue;
                    };
                    let better = match best {
                        None => d < dmin,
                        Some((b, bd)) => d < bd || (d == bd && idx < b),
                    };
                    if better {
                        best = Some((idx, d));
                        dmin = d;
                    }
                }
            });
            if !in_grid || !considered {
                break;
            }
        }
        best
    }

    /// Collects every index stored in voxels within `radius` of `point`.
    ///
    /// Candidates are deduplicated; exact distance filtering is left to the caller.
    #[must_use]
    pub fn candidates_within(&self, point: &Point, radius: f64) -> Vec<usize> {
        let mut extent = BoundingBox::from_points(&[*point]);
        extent.pad(radius.max(0.0));
        let lo = self.unsafe_locate(&extent.min());
        let hi = self.unsafe_locate(&extent.max());
        let mut seen = FastHashSet::default();
        let mut out = Vec::new();
        for k in lo[2]..=hi[2] {
            for j in lo[1]..=hi[1] {
                for i in lo[0]..=hi[0] {
                    for &idx in self.lookup(i, j, k) {
                        if seen.insert(idx) {
                            out.push(idx);
                        }
                    }
                }
            }
        }
        out
    }
}
