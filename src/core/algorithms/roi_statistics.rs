//! Per-label statistics over an atlas, optionally restricted to a sphere.
//!
//! Every element of the data field is paired with the element of the same
//! index in the atlas field, whose value (rounded to an integer) names the
//! element's label. A single pass accumulates count, sum, sum of squares,
//! minimum, and maximum per label; the rows are then finalized in ascending
//! label order.

use crate::core::error::MappingError;
use crate::core::field::{Field, FieldError, ValueKind};
use crate::core::mesh::{BasisOrder, Mesh};
use crate::core::report::ExecutionContext;
use crate::geometry::point::Point;
use num_traits::cast;
use std::collections::BTreeMap;
use std::fmt;

/// Column names of [`RoiStatistics::matrix`].
pub const COLUMN_LABELS: [&str; 5] = ["Average", "Stddev", "Min", "Max", "Count"];

/// Label given to the single row of an explicit spherical ROI.
pub const ROI_LABEL: &str = "ROI";

/// Largest accepted distance between the ROI center and the nearest coordinate-space sample.
pub const MAX_ROI_CENTER_DISTANCE: f64 = 1.0;

/// `target_material` value that disables the material restriction.
pub const ANY_MATERIAL: f64 = -1.0;

/// A sphere of atlas elements, optionally limited to one material.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SphericalRoi {
    /// Sphere center in coordinate space.
    pub center: Point,
    /// Label the selection is restricted to; `None` accepts every label.
    pub target_material: Option<i64>,
    /// Sphere radius; non-positive disables the selection.
    pub radius: f64,
}

impl From<[f64; 5]> for SphericalRoi {
    /// `[x, y, z, target_material, radius]`, with [`ANY_MATERIAL`] as the wildcard.
    fn from([x, y, z, material, radius]: [f64; 5]) -> Self {
        let target_material = if material == ANY_MATERIAL {
            None
        } else {
            cast(material.round())
        };
        Self {
            center: Point::new([x, y, z]),
            target_material,
            radius,
        }
    }
}

/// Options for [`compute_roi_statistics`].
#[derive(Clone, Copy, Debug, Default)]
pub struct RoiOptions<'a> {
    /// Semicolon-separated row names, one per distinct atlas label.
    pub labels: Option<&'a str>,
    /// Mesh and per-element 3-vector field giving each atlas element a coordinate.
    pub coordinate_space: Option<(&'a Mesh, &'a Field)>,
    /// Spherical selection; only applied together with a coordinate space.
    pub roi: Option<SphericalRoi>,
    /// Unit of the data values, carried into the result.
    pub physical_unit: Option<&'a str>,
}

impl<'a> RoiOptions<'a> {
    /// Sets [`RoiOptions::labels`].
    #[must_use]
    pub const fn with_labels(mut self, labels: &'a str) -> Self {
        self.labels = Some(labels);
        self
    }

    /// Sets [`RoiOptions::coordinate_space`].
    #[must_use]
    pub const fn with_coordinate_space(mut self, mesh: &'a Mesh, field: &'a Field) -> Self {
        self.coordinate_space = Some((mesh, field));
        self
    }

    /// Sets [`RoiOptions::roi`].
    #[must_use]
    pub fn with_roi(mut self, roi: impl Into<SphericalRoi>) -> Self {
        self.roi = Some(roi.into());
        self
    }

    /// Sets [`RoiOptions::physical_unit`].
    #[must_use]
    pub const fn with_physical_unit(mut self, unit: &'a str) -> Self {
        self.physical_unit = Some(unit);
        self
    }
}

/// Statistics of one label.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StatisticsRow {
    /// Rounded atlas value.
    pub label: i64,
    /// Mean of the selected values.
    pub mean: f64,
    /// Sample standard deviation; `NaN` for fewer than two values.
    pub stddev: f64,
    /// Smallest selected value.
    pub min: f64,
    /// Largest selected value.
    pub max: f64,
    /// Number of selected elements.
    pub count: usize,
}

impl StatisticsRow {
    /// `[mean, stddev, min, max, count]`.
    #[must_use]
    pub fn to_array(&self) -> [f64; 5] {
        [
            self.mean,
            self.stddev,
            self.min,
            self.max,
            cast(self.count).unwrap_or(f64::NAN),
        ]
    }
}

/// Result of [`compute_roi_statistics`].
#[derive(Clone, Debug, PartialEq)]
pub struct RoiStatistics {
    /// One row per label with selected elements, ascending by label.
    pub rows: Vec<StatisticsRow>,
    /// Row names, parallel to [`RoiStatistics::rows`].
    pub labels: Vec<String>,
    /// Names of the matrix columns.
    pub column_labels: [&'static str; 5],
    /// Unit of the data values.
    pub physical_unit: Option<String>,
}

impl RoiStatistics {
    /// Numeric table: `[mean, stddev, min, max, count]` per row.
    #[must_use]
    pub fn matrix(&self) -> Vec<[f64; 5]> {
        self.rows.iter().map(StatisticsRow::to_array).collect()
    }

    /// Row named `label`, if present.
    #[must_use]
    pub fn row(&self, label: &str) -> Option<&StatisticsRow> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(|i| &self.rows[i])
    }
}

impl fmt::Display for RoiStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<12}", "Label")?;
        for column in self.column_labels {
            write!(f, " {column:>12}")?;
        }
        if let Some(unit) = &self.physical_unit {
            write!(f, "  [{unit}]")?;
        }
        writeln!(f)?;
        for (label, row) in self.labels.iter().zip(&self.rows) {
            write!(f, "{label:<12}")?;
            for (i, value) in row.to_array().iter().enumerate() {
                if i == 4 {
                    write!(f, " {:>12}", row.count)?;
                } else {
                    write!(f, " {value:>12.6}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct Accumulator {
    count: usize,
    sum: f64,
    sum_squares: f64,
    min: f64,
    max: f64,
}

impl Accumulator {
    const fn new(first: f64) -> Self {
        Self {
            count: 1,
            sum: first,
            sum_squares: first * first,
            min: first,
            max: first,
        }
    }

    fn add(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.sum_squares = value.mul_add(value, self.sum_squares);
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    fn finish(&self, label: i64) -> StatisticsRow {
        let n: f64 = cast(self.count).unwrap_or(f64::NAN);
        let mean = self.sum / n;
        let stddev = if self.count <= 1 {
            f64::NAN
        } else {
            let variance =
                (n * mean).mul_add(mean, (-2.0 * mean).mul_add(self.sum, self.sum_squares))
                    / (n - 1.0);
            variance.max(0.0).sqrt()
        };
        StatisticsRow {
            label,
            mean,
            stddev,
            min: self.min,
            max: self.max,
            count: self.count,
        }
    }
}

fn check_element_scalars(
    field: &Field,
    mesh: &Mesh,
    what: &str,
) -> Result<(), MappingError> {
    if field.is_empty() {
        return Err(MappingError::EmptyInput {
            what: what.to_owned(),
        });
    }
    if field.basis() != BasisOrder::Constant {
        return Err(MappingError::UnsupportedBasis {
            operation: "compute_roi_statistics",
            basis: field.basis(),
        });
    }
    if field.kind() != ValueKind::Scalar {
        return Err(FieldError::KindMismatch {
            expected: ValueKind::Scalar,
            actual: field.kind(),
        }
        .into());
    }
    field.validate_against(mesh)?;
    Ok(())
}

fn label_of(atlas: &Field, element: usize) -> Result<i64, MappingError> {
    atlas
        .scalar_value(element)
        .and_then(|v| cast(v.round()))
        .ok_or_else(|| MappingError::InvalidOption {
            name: "atlas_field",
            reason: format!("label at element {element} is not a finite integer"),
        })
}

/// Elements selected by `roi`, or `None` when every element counts.
fn select_elements(
    atlas_mesh: &Mesh,
    atlas_field: &Field,
    options: &RoiOptions<'_>,
    ctx: &ExecutionContext,
) -> Result<Option<Vec<bool>>, MappingError> {
    let Some(roi) = options.roi else {
        return Ok(None);
    };
    let Some((coord_mesh, coord_field)) = options.coordinate_space else {
        ctx.reporter()
            .remark("A ROI was given without a coordinate space; considering all labels");
        return Ok(None);
    };
    if !(roi.radius > 0.0) {
        ctx.reporter()
            .remark("ROI radius is not positive; considering all labels");
        return Ok(None);
    }

    if coord_field.basis() != BasisOrder::Constant {
        return Err(MappingError::UnsupportedBasis {
            operation: "compute_roi_statistics",
            basis: coord_field.basis(),
        });
    }
    if coord_field.kind() != ValueKind::Vector {
        return Err(FieldError::KindMismatch {
            expected: ValueKind::Vector,
            actual: coord_field.kind(),
        }
        .into());
    }
    coord_field.validate_against(coord_mesh)?;
    if coord_field.len() != atlas_mesh.num_elements() {
        return Err(MappingError::ElementCountMismatch {
            what: "coordinate space vs atlas",
            expected: atlas_mesh.num_elements(),
            actual: coord_field.len(),
        });
    }

    let mut nearest: Option<(usize, f64)> = None;
    for element in 0..coord_field.len() {
        let v = coord_field.value(element);
        let d = Point::new([v[0], v[1], v[2]]).distance_squared(&roi.center);
        if nearest.is_none_or(|(_, best)| d < best) {
            nearest = Some((element, d));
        }
    }
    let Some((reference, d2)) = nearest else {
        return Err(MappingError::EmptyInput {
            what: "coordinate space".to_owned(),
        });
    };
    let distance = d2.sqrt();
    if distance > MAX_ROI_CENTER_DISTANCE {
        return Err(MappingError::RoiOutsideDomain { distance });
    }

    let location = atlas_mesh.element_center(reference);
    let r2 = roi.radius * roi.radius;
    let mut mask = vec![false; atlas_mesh.num_elements()];
    for (element, selected) in mask.iter_mut().enumerate() {
        ctx.check_cancelled()?;
        let inside = atlas_mesh.element_center(element).distance_squared(&location) <= r2;
        let material_ok = match roi.target_material {
            Some(target) => label_of(atlas_field, element)? == target,
            None => true,
        };
        *selected = inside && material_ok;
    }
    tracing::debug!(
        reference,
        distance,
        selected = mask.iter().filter(|&&s| s).count(),
        "spherical ROI applied"
    );
    Ok(Some(mask))
}

/// Parses a `;`-separated label list, ignoring leading and trailing separators.
fn parse_labels(labels: &str) -> Vec<String> {
    labels
        .trim_matches(';')
        .split(';')
        .map(str::to_owned)
        .collect()
}

/// Per-label statistics of `data_field` over the labels of `atlas_field`.
///
/// # Errors
///
/// Returns an input error when either field is empty, not per-element, or not
/// scalar, when the element counts differ, when the label string does not
/// name every label (outside the single-ROI case), or when the ROI center is
/// farther than [`MAX_ROI_CENTER_DISTANCE`] from every coordinate-space
/// sample. A selection mask of the wrong length is an internal error.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::roi_statistics::{RoiOptions, compute_roi_statistics};
/// use meshfield::core::field::Field;
/// use meshfield::core::mesh::{BasisOrder, Mesh, MeshTopology};
/// use meshfield::core::report::ExecutionContext;
/// use meshfield::geometry::point::Point;
///
/// let nodes = (0..5).map(|i| Point::new([f64::from(i), 0.0, 0.0])).collect();
/// let mesh = Mesh::new(MeshTopology::Curve, nodes, vec![0, 1, 1, 2, 2, 3, 3, 4]).unwrap();
/// let data = Field::scalar(BasisOrder::Constant, vec![1.0, 3.0, 10.0, 10.0]);
/// let atlas = Field::scalar(BasisOrder::Constant, vec![1.0, 1.0, 2.0, 2.0]);
///
/// let stats = compute_roi_statistics(
///     &mesh, &data, &mesh, &atlas,
///     &RoiOptions::default().with_labels("white;grey;"),
///     &ExecutionContext::default(),
/// )
/// .unwrap();
/// assert_eq!(stats.labels, vec!["white", "grey"]);
/// assert_eq!(stats.matrix()[0], [2.0, 2.0_f64.sqrt(), 1.0, 3.0, 2.0]);
/// ```
pub fn compute_roi_statistics(
    data_mesh: &Mesh,
    data_field: &Field,
    atlas_mesh: &Mesh,
    atlas_field: &Field,
    options: &RoiOptions<'_>,
    ctx: &ExecutionContext,
) -> Result<RoiStatistics, MappingError> {
    check_element_scalars(data_field, data_mesh, "data field")?;
    check_element_scalars(atlas_field, atlas_mesh, "atlas field")?;
    if data_mesh.num_elements() != atlas_mesh.num_elements() {
        return Err(MappingError::ElementCountMismatch {
            what: "data mesh vs atlas mesh",
            expected: atlas_mesh.num_elements(),
            actual: data_mesh.num_elements(),
        });
    }

    let mask = select_elements(atlas_mesh, atlas_field, options, ctx)?;
    if let Some(mask) = &mask
        && mask.len() != data_field.len()
    {
        return Err(MappingError::internal(format!(
            "selection mask has {} entries for {} elements",
            mask.len(),
            data_field.len()
        )));
    }

    let mut label_values = Vec::with_capacity(atlas_field.len());
    for element in 0..atlas_field.len() {
        label_values.push(label_of(atlas_field, element)?);
    }
    let mut distinct = label_values.clone();
    distinct.sort_unstable();
    distinct.dedup();

    let mut accumulators: BTreeMap<i64, Accumulator> = BTreeMap::new();
    for (element, &label) in label_values.iter().enumerate() {
        if mask.as_ref().is_some_and(|m| !m[element]) {
            continue;
        }
        let Some(value) = data_field.scalar_value(element) else {
            continue;
        };
        accumulators
            .entry(label)
            .and_modify(|acc| acc.add(value))
            .or_insert_with(|| Accumulator::new(value));
    }
    let rows: Vec<StatisticsRow> = accumulators
        .iter()
        .map(|(&label, acc)| acc.finish(label))
        .collect();

    let single_roi = mask.is_some() && rows.len() == 1;
    let names = options.labels.map(parse_labels);
    let labels = match names {
        Some(names) if names.len() == distinct.len() => rows
            .iter()
            .map(|row| {
                let position = distinct.binary_search(&row.label).unwrap_or_default();
                names[position].clone()
            })
            .collect(),
        _ if single_roi => vec![ROI_LABEL.to_owned()],
        Some(names) => {
            return Err(MappingError::LabelCountMismatch {
                provided: names.len(),
                found: distinct.len(),
            });
        }
        None => rows
            .iter()
            .map(|row| {
                let position = distinct.binary_search(&row.label).unwrap_or_default();
                (position + 1).to_string()
            })
            .collect(),
    };

    tracing::debug!(
        labels = distinct.len(),
        rows = rows.len(),
        restricted = mask.is_some(),
        "ROI statistics computed"
    );
    Ok(RoiStatistics {
        rows,
        labels,
        column_labels: COLUMN_LABELS,
        physical_unit: options.physical_unit.map(str::to_owned),
    })
}
