//! Axis-aligned bounding boxes.

use crate::geometry::point::Point;
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box that starts empty and grows by extension.
///
/// An empty box is *invalid*: [`BoundingBox::is_valid`] returns `false` until
/// at least one finite point has been added.
///
/// # Examples
///
/// ```rust
/// use meshfield::geometry::{bounding_box::BoundingBox, point::Point};
///
/// let mut bbox = BoundingBox::empty();
/// assert!(!bbox.is_valid());
/// bbox.extend(&Point::new([0.0, 0.0, 0.0]));
/// bbox.extend(&Point::new([1.0, 2.0, 3.0]));
/// assert!(bbox.is_valid());
/// assert_eq!(bbox.diagonal().coords(), &[1.0, 2.0, 3.0]);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    min: Point,
    max: Point,
    valid: bool,
}

impl Default for BoundingBox {
    fn default() -> Self {
        Self::empty()
    }
}

impl BoundingBox {
    /// An empty, invalid box.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            min: Point::new([f64::INFINITY; 3]),
            max: Point::new([f64::NEG_INFINITY; 3]),
            valid: false,
        }
    }

    /// The tightest box around `points`. Invalid if `points` is empty.
    #[must_use]
    pub fn from_points<'a, I>(points: I) -> Self
    where
        I: IntoIterator<Item = &'a Point>,
    {
        let mut bbox = Self::empty();
        for p in points {
            bbox.extend(p);
        }
        bbox
    }

    /// Grows the box to include `point`. Non-finite points are ignored.
    pub fn extend(&mut self, point: &Point) {
        if !point.is_finite() {
            return;
        }
        let lo = std::array::from_fn(|axis| self.min[axis].min(point[axis]));
        let hi = std::array::from_fn(|axis| self.max[axis].max(point[axis]));
        self.min = Point::new(lo);
        self.max = Point::new(hi);
        self.valid = true;
    }

    /// Grows the box to include another box.
    pub fn extend_box(&mut self, other: &Self) {
        if other.valid {
            self.extend(&other.min);
            self.extend(&other.max);
        }
    }

    /// Pads every face outward by `amount`.
    pub fn pad(&mut self, amount: f64) {
        if self.valid {
            self.min = self.min - Point::new([amount; 3]);
            self.max = self.max + Point::new([amount; 3]);
        }
    }

    /// Returns `true` once the box contains at least one point.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.valid
    }

    /// Lower corner.
    #[must_use]
    pub const fn min(&self) -> Point {
        self.min
    }

    /// Upper corner.
    #[must_use]
    pub const fn max(&self) -> Point {
        self.max
    }

    /// `max - min`, or the zero vector for an invalid box.
    #[must_use]
    pub fn diagonal(&self) -> Point {
        if self.valid {
            self.max - self.min
        } else {
            Point::origin()
        }
    }

    /// Center of the box.
    #[must_use]
    pub fn center(&self) -> Point {
        (self.min + self.max) * 0.5
    }

    /// Returns `true` when `point` lies inside or on the boundary.
    #[must_use]
    pub fn contains(&self, point: &Point) -> bool {
        self.valid && (0..3).all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }

    /// Squared distance from `point` to the box (zero inside).
    #[must_use]
    pub fn distance_squared(&self, point: &Point) -> f64 {
        (0..3)
            .map(|axis| {
                let d = if point[axis] < self.min[axis] {
                    self.min[axis] - point[axis]
                } else if point[axis] > self.max[axis] {
                    point[axis] - self.max[axis]
                } else {
                    0.0
                };
                d * d
            })
            .sum()
    }
}
