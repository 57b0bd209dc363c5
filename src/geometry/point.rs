//! Three-dimensional points and displacement arithmetic.
//!
//! Mesh nodes, element centers, and query locations are all [`Point`]s. The
//! same type doubles as a displacement vector: subtracting two points yields
//! the vector between them, which can be scaled, dotted, and crossed.

#![forbid(unsafe_code)]

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Index, Mul, Neg, Sub};

// =============================================================================
// POINT STRUCT DEFINITION
// =============================================================================

/// A point (or displacement) in 3D Euclidean space.
///
/// Coordinates are private; use [`Point::coords`] or the axis accessors to
/// read them. Points are `Copy` and compare with IEEE 754 semantics.
///
/// # Examples
///
/// ```rust
/// use meshfield::geometry::point::Point;
///
/// let a = Point::new([1.0, 2.0, 3.0]);
/// let b = Point::new([1.0, 2.0, 5.0]);
/// assert_eq!(a.distance_squared(&b), 4.0);
/// assert_eq!((b - a).coords(), &[0.0, 0.0, 2.0]);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Point {
    coords: [f64; 3],
}

// =============================================================================
// PUBLIC API
// =============================================================================

impl Point {
    /// Creates a point from its three coordinates.
    #[inline]
    #[must_use]
    pub const fn new(coords: [f64; 3]) -> Self {
        Self { coords }
    }

    /// The origin `(0, 0, 0)`.
    #[inline]
    #[must_use]
    pub const fn origin() -> Self {
        Self {
            coords: [0.0; 3],
        }
    }

    /// Borrow the coordinate array.
    #[inline]
    #[must_use]
    pub const fn coords(&self) -> &[f64; 3] {
        &self.coords
    }

    /// X coordinate.
    #[inline]
    #[must_use]
    pub const fn x(&self) -> f64 {
        self.coords[0]
    }

    /// Y coordinate.
    #[inline]
    #[must_use]
    pub const fn y(&self) -> f64 {
        self.coords[1]
    }

    /// Z coordinate.
    #[inline]
    #[must_use]
    pub const fn z(&self) -> f64 {
        self.coords[2]
    }

    /// Returns `true` when every coordinate is finite.
    #[inline]
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    /// Dot product, treating both points as vectors.
    #[inline]
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.coords[0].mul_add(
            other.coords[0],
            self.coords[1].mul_add(other.coords[1], self.coords[2] * other.coords[2]),
        )
    }

    /// Cross product, treating both points as vectors.
    #[inline]
    #[must_use]
    pub fn cross(&self, other: &Self) -> Self {
        let [ax, ay, az] = self.coords;
        let [bx, by, bz] = other.coords;
        Self::new([
            ay.mul_add(bz, -(az * by)),
            az.mul_add(bx, -(ax * bz)),
            ax.mul_add(by, -(ay * bx)),
        ])
    }

    /// Squared Euclidean length of the vector.
    #[inline]
    #[must_use]
    pub fn length_squared(&self) -> f64 {
        self.dot(self)
    }

    /// Euclidean length of the vector.
    #[inline]
    #[must_use]
    pub fn length(&self) -> f64 {
        self.length_squared().sqrt()
    }

    /// Squared distance to another point.
    #[inline]
    #[must_use]
    pub fn distance_squared(&self, other: &Self) -> f64 {
        (*self - *other).length_squared()
    }

    /// Euclidean distance to another point.
    #[inline]
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Arithmetic mean of a non-empty set of points.
    ///
    /// Returns `None` for an empty iterator.
    #[must_use]
    pub fn centroid<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut sum = Self::origin();
        let mut count = 0_u32;
        for p in points {
            sum += *p;
            count += 1;
        }
        (count > 0).then(|| sum * (1.0 / f64::from(count)))
    }

    /// Converts to an `nalgebra` column vector.
    #[inline]
    #[must_use]
    pub const fn to_vector(&self) -> Vector3<f64> {
        Vector3::new(self.coords[0], self.coords[1], self.coords[2])
    }
}

// =============================================================================
// OPERATORS AND CONVERSIONS
// =============================================================================

impl Add for Point {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new([
            self.coords[0] + rhs.coords[0],
            self.coords[1] + rhs.coords[1],
            self.coords[2] + rhs.coords[2],
        ])
    }
}

impl AddAssign for Point {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sub for Point {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new([
            self.coords[0] - rhs.coords[0],
            self.coords[1] - rhs.coords[1],
            self.coords[2] - rhs.coords[2],
        ])
    }
}

impl Mul<f64> for Point {
    type Output = Self;

    #[inline]
    fn mul(self, rhs: f64) -> Self {
        Self::new(self.coords.map(|c| c * rhs))
    }
}

impl Neg for Point {
    type Output = Self;

    #[inline]
    fn neg(self) -> Self {
        Self::new(self.coords.map(|c| -c))
    }
}

impl Index<usize> for Point {
    type Output = f64;

    #[inline]
    fn index(&self, axis: usize) -> &f64 {
        &self.coords[axis]
    }
}

impl From<[f64; 3]> for Point {
    #[inline]
    fn from(coords: [f64; 3]) -> Self {
        Self::new(coords)
    }
}

impl From<Point> for [f64; 3] {
    #[inline]
    fn from(point: Point) -> Self {
        point.coords
    }
}

impl From<Vector3<f64>> for Point {
    #[inline]
    fn from(v: Vector3<f64>) -> Self {
        Self::new([v.x, v.y, v.z])
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.coords[0], self.coords[1], self.coords[2])
    }
}

// =============================================================================
// TESTS
// =============================================================================
