//! Random and lattice point generation.

use rand::{Rng, SeedableRng};

use super::GenerationError;
use crate::geometry::point::Point;

fn check_range(range: (f64, f64)) -> Result<(), GenerationError> {
    if range.0.is_finite() && range.1.is_finite() && range.0 < range.1 {
        Ok(())
    } else {
        Err(GenerationError::InvalidRange {
            min: range.0,
            max: range.1,
        })
    }
}

fn sample_points<R: Rng>(rng: &mut R, n_points: usize, range: (f64, f64)) -> Vec<Point> {
    (0..n_points)
        .map(|_| Point::new([0.0; 3].map(|_| rng.random_range(range.0..range.1))))
        .collect()
}

/// Generates `n_points` points uniformly distributed in the cube `range³`.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidRange`] if `range.0 >= range.1` or either
/// bound is not finite.
///
/// # Examples
///
/// ```
/// use meshfield::geometry::util::generate_random_points;
///
/// let points = generate_random_points(100, (-10.0, 10.0)).unwrap();
/// assert_eq!(points.len(), 100);
/// assert!(generate_random_points(10, (1.0, -1.0)).is_err());
/// ```
pub fn generate_random_points(
    n_points: usize,
    range: (f64, f64),
) -> Result<Vec<Point>, GenerationError> {
    check_range(range)?;
    Ok(sample_points(&mut rand::rng(), n_points, range))
}

/// Same as [`generate_random_points`] with a seeded RNG for reproducible runs.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidRange`] for an empty or non-finite range.
///
/// # Examples
///
/// ```
/// use meshfield::geometry::util::generate_random_points_seeded;
///
/// let a = generate_random_points_seeded(50, (0.0, 1.0), 42).unwrap();
/// let b = generate_random_points_seeded(50, (0.0, 1.0), 42).unwrap();
/// assert_eq!(a, b);
/// ```
pub fn generate_random_points_seeded(
    n_points: usize,
    range: (f64, f64),
    seed: u64,
) -> Result<Vec<Point>, GenerationError> {
    check_range(range)?;
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    Ok(sample_points(&mut rng, n_points, range))
}

/// Regular lattice with `points_per_axis[a]` samples along axis `a`, spaced by
/// `spacing` and shifted by `offset`. The x index varies fastest.
///
/// # Errors
///
/// Returns [`GenerationError::InvalidCellCount`] if any axis has no samples
/// and [`GenerationError::Overflow`] if the total does not fit in `usize`.
pub fn generate_grid_points(
    points_per_axis: [usize; 3],
    spacing: f64,
    offset: [f64; 3],
) -> Result<Vec<Point>, GenerationError> {
    if let Some(axis) = points_per_axis.iter().position(|&n| n == 0) {
        return Err(GenerationError::InvalidCellCount { axis });
    }
    let [nx, ny, nz] = points_per_axis;
    let total = nx
        .checked_mul(ny)
        .and_then(|n| n.checked_mul(nz))
        .ok_or(GenerationError::Overflow {
            cells: points_per_axis,
        })?;

    let mut points = Vec::with_capacity(total);
    for k in 0..nz {
        for j in 0..ny {
            for i in 0..nx {
                let index = [i, j, k];
                points.push(Point::new(std::array::from_fn(|a| {
                    offset[a] + spacing * lattice_coordinate(index[a])
                })));
            }
        }
    }
    Ok(points)
}

/// Lattice indices stay far below 2^53, so the conversion is exact.
#[expect(clippy::cast_precision_loss)]
const fn lattice_coordinate(index: usize) -> f64 {
    index as f64
}
