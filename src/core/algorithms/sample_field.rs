//! Sampling a field and its derivatives at the nodes or elements of another mesh.
//!
//! Unlike [`map_field`](crate::core::algorithms::direct_mapping::map_field),
//! sampling evaluates a derived quantity at every location instead of
//! building a mapping matrix: the value itself, the spatial gradient of
//! scalar data, the gradient norm, or the flux of the gradient through a
//! destination surface.
//!
//! Node targets evaluate once per destination node. Element targets evaluate
//! at the points of a regular sample scheme inside each destination element
//! and reduce them with an [`ElementReduction`]. Locations the lookup cannot
//! reach keep [`SampleOptions::outside_value`].

use crate::core::collections::{SmallBuffer, WeightBuffer};
use crate::core::error::MappingError;
use crate::core::field::{Field, FieldError, ValueKind, weighted_sum_into};
use crate::core::locator::MeshLocator;
use crate::core::mesh::{BasisOrder, Mesh, MeshTopology};
use crate::core::parallel::{ParallelMap, resolve_num_workers};
use crate::core::report::ExecutionContext;
use crate::core::traits::mesh_query::MeshQuery;
use crate::geometry::point::Point;
use crate::geometry::simplex::{
    Barycentric, barycentric_from_local, barycentric_gradients, regular_scheme, simplex_measure,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Highest accepted [`SampleOptions::sample_order`].
pub const MAX_SAMPLE_ORDER: usize = 5;

/// One evaluated sample: up to six components.
type SampleValue = SmallBuffer<f64, 6>;

// =============================================================================
// OPTION ENUMS
// =============================================================================

/// Quantity evaluated at each sample location.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampledQuantity {
    /// The field value.
    #[default]
    Value,
    /// Gradient of scalar data, as a vector.
    Gradient,
    /// Length of the gradient of scalar data.
    GradientNorm,
    /// Gradient of scalar data dotted with the destination surface normal.
    Flux,
}

impl SampledQuantity {
    /// The lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Gradient => "gradient",
            Self::GradientNorm => "gradientnorm",
            Self::Flux => "flux",
        }
    }

    /// Value kind of the sampled output for input data of `kind`.
    #[must_use]
    pub const fn output_kind(self, kind: ValueKind) -> ValueKind {
        match self {
            Self::Value => kind,
            Self::Gradient => ValueKind::Vector,
            Self::GradientNorm | Self::Flux => ValueKind::Scalar,
        }
    }
}

impl fmt::Display for SampledQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A sampling option name that is not recognized.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Unknown {option} '{name}'; expected one of {expected}")]
pub struct UnknownSampleOption {
    /// Which option was being parsed.
    pub option: &'static str,
    /// The rejected name.
    pub name: String,
    /// Accepted names.
    pub expected: &'static str,
}

fn normalized(s: &str) -> String {
    s.trim().to_ascii_lowercase().replace(['_', '-', ' '], "")
}

impl FromStr for SampledQuantity {
    type Err = UnknownSampleOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalized(s).as_str() {
            "value" => Ok(Self::Value),
            "gradient" => Ok(Self::Gradient),
            "gradientnorm" => Ok(Self::GradientNorm),
            "flux" => Ok(Self::Flux),
            _ => Err(UnknownSampleOption {
                option: "quantity",
                name: s.to_owned(),
                expected: "value, gradient, gradientnorm, flux",
            }),
        }
    }
}

/// How a sample location finds its source data.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleLookup {
    /// Interpolate inside the containing source element; locations outside
    /// the source keep the outside value.
    #[default]
    InterpolatedData,
    /// Interpolate at the closest point of the nearest source element.
    ClosestInterpolatedData,
    /// Copy the value of the nearest source node. Linear data only.
    ClosestNodeData,
}

impl FromStr for SampleLookup {
    type Err = UnknownSampleOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalized(s).as_str() {
            "interpolateddata" => Ok(Self::InterpolatedData),
            "closestinterpolateddata" => Ok(Self::ClosestInterpolatedData),
            "closestnodedata" => Ok(Self::ClosestNodeData),
            _ => Err(UnknownSampleOption {
                option: "lookup",
                name: s.to_owned(),
                expected: "interpolateddata, closestinterpolateddata, closestnodedata",
            }),
        }
    }
}

/// Where the sampled field lives on the destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleTarget {
    /// One value per destination node (linear output).
    Nodes,
    /// One value per destination element (constant output).
    Elements,
}

impl SampleTarget {
    /// Basis of the sampled field.
    #[must_use]
    pub const fn basis(self) -> BasisOrder {
        match self {
            Self::Nodes => BasisOrder::Linear,
            Self::Elements => BasisOrder::Constant,
        }
    }
}

/// How the samples inside one destination element are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementReduction {
    /// Mean of the samples that found data.
    #[default]
    Average,
    /// Weighted sum of the samples times the element measure.
    Integrate,
    /// Smallest sample. Scalar output only.
    Min,
    /// Largest sample. Scalar output only.
    Max,
}

impl FromStr for ElementReduction {
    type Err = UnknownSampleOption;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalized(s).as_str() {
            "average" => Ok(Self::Average),
            "integrate" => Ok(Self::Integrate),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            _ => Err(UnknownSampleOption {
                option: "reduction",
                name: s.to_owned(),
                expected: "average, integrate, min, max",
            }),
        }
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Options for [`sample_field`].
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::sample_field::{
///     SampleLookup, SampleOptions, SampleOptionsBuilder, SampledQuantity,
/// };
///
/// let a = SampleOptions::default()
///     .with_quantity(SampledQuantity::GradientNorm)
///     .with_lookup(SampleLookup::ClosestInterpolatedData);
/// let b = SampleOptionsBuilder::default()
///     .quantity("gradientnorm".parse().unwrap())
///     .lookup(SampleLookup::ClosestInterpolatedData)
///     .build()
///     .unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.sample_order, 1);
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default)]
#[serde(default)]
pub struct SampleOptions {
    /// Quantity to evaluate.
    pub quantity: SampledQuantity,
    /// How each location finds its source data.
    pub lookup: SampleLookup,
    /// Value of locations the lookup cannot reach.
    pub outside_value: f64,
    /// Search radius of the closest lookups; negative means unlimited.
    pub max_distance: f64,
    /// Order of the regular sample scheme inside destination elements, `1..=5`.
    pub sample_order: usize,
    /// Combination of the samples inside a destination element.
    pub reduction: ElementReduction,
    /// Worker count; `None` defers to [`resolve_num_workers`].
    #[builder(setter(strip_option))]
    pub num_workers: Option<usize>,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            quantity: SampledQuantity::default(),
            lookup: SampleLookup::default(),
            outside_value: 0.0,
            max_distance: -1.0,
            sample_order: 1,
            reduction: ElementReduction::default(),
            num_workers: None,
        }
    }
}

impl SampleOptions {
    /// Sets [`SampleOptions::quantity`].
    #[must_use]
    pub const fn with_quantity(mut self, quantity: SampledQuantity) -> Self {
        self.quantity = quantity;
        self
    }

    /// Sets [`SampleOptions::lookup`].
    #[must_use]
    pub const fn with_lookup(mut self, lookup: SampleLookup) -> Self {
        self.lookup = lookup;
        self
    }

    /// Sets [`SampleOptions::outside_value`].
    #[must_use]
    pub const fn with_outside_value(mut self, value: f64) -> Self {
        self.outside_value = value;
        self
    }

    /// Sets [`SampleOptions::max_distance`].
    #[must_use]
    pub const fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Sets [`SampleOptions::sample_order`].
    #[must_use]
    pub const fn with_sample_order(mut self, order: usize) -> Self {
        self.sample_order = order;
        self
    }

    /// Sets [`SampleOptions::reduction`].
    #[must_use]
    pub const fn with_reduction(mut self, reduction: ElementReduction) -> Self {
        self.reduction = reduction;
        self
    }

    /// Sets [`SampleOptions::num_workers`].
    #[must_use]
    pub const fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = Some(workers);
        self
    }

    /// `max_distance` as a search bound: `None` when negative or NaN.
    #[must_use]
    pub fn search_limit(&self) -> Option<f64> {
        (self.max_distance >= 0.0).then_some(self.max_distance)
    }
}

// =============================================================================
// VALIDATION
// =============================================================================

fn check_request(
    source_mesh: &Mesh,
    source_field: &Field,
    dest_mesh: &Mesh,
    target: SampleTarget,
    options: &SampleOptions,
) -> Result<(), MappingError> {
    source_field.validate_against(source_mesh)?;
    if source_mesh.num_nodes() == 0 {
        return Err(MappingError::EmptyInput {
            what: "source mesh".to_owned(),
        });
    }
    if !(1..=MAX_SAMPLE_ORDER).contains(&options.sample_order) {
        return Err(MappingError::InvalidOption {
            name: "sample_order",
            reason: format!(
                "must be between 1 and {MAX_SAMPLE_ORDER}, got {}",
                options.sample_order
            ),
        });
    }

    let quantity = options.quantity;
    if quantity != SampledQuantity::Value && source_field.kind() != ValueKind::Scalar {
        return Err(FieldError::KindMismatch {
            expected: ValueKind::Scalar,
            actual: source_field.kind(),
        }
        .into());
    }
    if quantity == SampledQuantity::Flux && dest_mesh.topology() != MeshTopology::TriSurf {
        return Err(MappingError::UnsupportedTopology {
            operation: "flux sampling",
            topology: dest_mesh.topology(),
        });
    }
    if target == SampleTarget::Elements && dest_mesh.is_point_cloud() {
        return Err(FieldError::PointCloudBasis {
            basis: BasisOrder::Constant,
        }
        .into());
    }

    match options.lookup {
        SampleLookup::ClosestNodeData => {
            if source_field.basis() != BasisOrder::Linear {
                return Err(MappingError::UnsupportedBasis {
                    operation: "closest node sampling",
                    basis: source_field.basis(),
                });
            }
            if quantity != SampledQuantity::Value {
                return Err(MappingError::InvalidOption {
                    name: "lookup",
                    reason: format!("closestnodedata can only sample values, not {quantity}"),
                });
            }
        }
        SampleLookup::InterpolatedData | SampleLookup::ClosestInterpolatedData => {
            if source_mesh.is_point_cloud() {
                return Err(MappingError::PointCloudInterpolation);
            }
        }
    }

    let output = quantity.output_kind(source_field.kind());
    if target == SampleTarget::Elements
        && matches!(options.reduction, ElementReduction::Min | ElementReduction::Max)
        && output != ValueKind::Scalar
    {
        return Err(MappingError::InvalidOption {
            name: "reduction",
            reason: format!("min and max need scalar samples, got {output} samples"),
        });
    }
    Ok(())
}

// =============================================================================
// SAMPLING
// =============================================================================

/// Evaluates `options.quantity` of `source_field` at the nodes or elements of
/// `dest_mesh`.
///
/// The result has basis [`SampleTarget::basis`] and value kind
/// [`SampledQuantity::output_kind`]. Every component of an unreachable
/// location holds `options.outside_value`.
///
/// # Errors
///
/// Returns an input error when the field does not fit its mesh, derivative
/// quantities are requested for non-scalar data, flux is requested onto a
/// mesh that is not a triangle surface, elements are requested on a point
/// cloud, the lookup does not fit the source, or an option is out of range.
/// Returns [`MappingError::Cancelled`] when `ctx` is cancelled.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::sample_field::{
///     SampleOptions, SampleTarget, SampledQuantity, sample_field,
/// };
/// use meshfield::core::field::Field;
/// use meshfield::core::mesh::{BasisOrder, Mesh, MeshTopology};
/// use meshfield::core::report::ExecutionContext;
/// use meshfield::geometry::point::Point;
///
/// let line = Mesh::new(
///     MeshTopology::Curve,
///     vec![Point::new([0.0, 0.0, 0.0]), Point::new([2.0, 0.0, 0.0])],
///     vec![0, 1],
/// )
/// .unwrap();
/// let field = Field::scalar(BasisOrder::Linear, vec![0.0, 4.0]);
/// let targets = Mesh::point_cloud(vec![Point::new([0.5, 0.0, 0.0])]).unwrap();
///
/// let options = SampleOptions::default().with_quantity(SampledQuantity::GradientNorm);
/// let sampled = sample_field(
///     &line,
///     &field,
///     &targets,
///     SampleTarget::Nodes,
///     &options,
///     &ExecutionContext::default(),
/// )
/// .unwrap();
/// assert!((sampled.scalar_value(0).unwrap() - 2.0).abs() < 1e-12);
/// ```
pub fn sample_field(
    source_mesh: &Mesh,
    source_field: &Field,
    dest_mesh: &Mesh,
    target: SampleTarget,
    options: &SampleOptions,
    ctx: &ExecutionContext,
) -> Result<Field, MappingError> {
    check_request(source_mesh, source_field, dest_mesh, target, options)?;

    let locator = MeshLocator::new(source_mesh)?;
    let sampler = Sampler {
        mesh: source_mesh,
        locator: &locator,
        field: source_field,
        quantity: options.quantity,
        lookup: options.lookup,
        limit: options.search_limit(),
        inside_tolerance: source_mesh.epsilon(),
    };
    let kind = options.quantity.output_kind(source_field.kind());
    let stride = kind.components();
    let len = dest_mesh.num_values(target.basis());

    tracing::debug!(
        quantity = %options.quantity,
        lookup = ?options.lookup,
        ?target,
        len,
        source_topology = %source_mesh.topology(),
        dest_topology = %dest_mesh.topology(),
        "sampling field"
    );

    let workers = resolve_num_workers(options.num_workers);
    let values = match target {
        SampleTarget::Nodes => {
            let normals = (options.quantity == SampledQuantity::Flux)
                .then(|| node_normals(dest_mesh))
                .unwrap_or_default();
            ParallelMap::new(workers, ctx).run(len, stride, options.outside_value, |node, out| {
                let normal = normals.get(node).copied().unwrap_or_default();
                if let Some(sample) = sampler.evaluate(&dest_mesh.node(node), &normal) {
                    out.copy_from_slice(&sample);
                }
                Ok(())
            })?
        }
        SampleTarget::Elements => {
            let scheme = regular_scheme(dest_mesh.topology().dimension(), options.sample_order);
            ParallelMap::new(workers, ctx).run(
                len,
                stride,
                options.outside_value,
                |element, out| {
                    let corners = dest_mesh.element_points(element);
                    let normal = if options.quantity == SampledQuantity::Flux {
                        triangle_normal(&corners).unwrap_or_default()
                    } else {
                        Point::origin()
                    };
                    let samples: Vec<SampleValue> = scheme
                        .iter()
                        .filter_map(|bary| sampler.evaluate(&at_barycentric(&corners, bary), &normal))
                        .collect();
                    let weight = 1.0 / count_as_f64(scheme.len());
                    reduce_samples(out, &samples, options.reduction, weight, || {
                        simplex_measure(&corners)
                    });
                    Ok(())
                },
            )?
        }
    };

    Ok(Field::from_components(target.basis(), kind, values.into_slots())?)
}

/// Read-only evaluation state shared by every worker.
struct Sampler<'a> {
    mesh: &'a Mesh,
    locator: &'a MeshLocator<'a>,
    field: &'a Field,
    quantity: SampledQuantity,
    lookup: SampleLookup,
    limit: Option<f64>,
    inside_tolerance: f64,
}

impl Sampler<'_> {
    /// The sampled quantity at `point`, or `None` when the lookup finds nothing.
    fn evaluate(&self, point: &Point, normal: &Point) -> Option<SampleValue> {
        if self.lookup == SampleLookup::ClosestNodeData {
            let hit = self.locator.find_closest_node(point, self.limit)?;
            return Some(self.field.value(hit.index).iter().copied().collect());
        }

        let limit = match self.lookup {
            SampleLookup::InterpolatedData => None,
            _ => self.limit,
        };
        let hit = self.locator.locate(point, limit)?;
        if self.lookup == SampleLookup::InterpolatedData && hit.distance > self.inside_tolerance {
            return None;
        }

        if self.quantity == SampledQuantity::Value {
            let weights: WeightBuffer =
                self.locator
                    .interpolation_weights(hit.element, &hit.local, self.field.basis());
            let mut value: SampleValue = SmallBuffer::from_elem(0.0, self.field.kind().components());
            weighted_sum_into(&mut value, self.field, &weights);
            return Some(value);
        }

        let gradient = self.gradient(hit.element, &hit.local)?;
        Some(match self.quantity {
            SampledQuantity::Gradient => gradient.coords().iter().copied().collect(),
            SampledQuantity::GradientNorm => SmallBuffer::from_elem(gradient.length(), 1),
            SampledQuantity::Flux => SmallBuffer::from_elem(gradient.dot(normal), 1),
            SampledQuantity::Value => SmallBuffer::new(),
        })
    }

    /// Gradient of scalar data inside `element` at local coordinates `local`.
    fn gradient(&self, element: usize, local: &[f64; 3]) -> Option<Point> {
        let nodes = self.mesh.element_nodes(element);
        let scalar = |index: usize| self.field.value(index)[0];
        match self.field.basis() {
            BasisOrder::Constant => Some(Point::origin()),
            BasisOrder::Linear => {
                let grads = barycentric_gradients(&self.mesh.element_points(element))?;
                let mut g = Point::origin();
                for (grad, &node) in grads.iter().zip(nodes) {
                    g += *grad * scalar(node);
                }
                Some(g)
            }
            BasisOrder::Quadratic => {
                let grads = barycentric_gradients(&self.mesh.element_points(element))?;
                let bary = barycentric_from_local(local, nodes.len());
                let mut g = Point::origin();
                for ((grad, &l), &node) in grads.iter().zip(&bary).zip(nodes) {
                    g += *grad * (4.0_f64.mul_add(l, -1.0) * scalar(node));
                }
                let num_nodes = self.mesh.num_nodes();
                let local_edges = self.mesh.topology().local_edges();
                let edges = self.mesh.edges().element_edges(element);
                for (&[a, b], &edge) in local_edges.iter().zip(edges) {
                    let d = (grads[a] * bary[b] + grads[b] * bary[a]) * 4.0;
                    g += d * scalar(num_nodes + edge);
                }
                Some(g)
            }
        }
    }
}

/// Combines the samples of one element into `out`; leaves `out` untouched when
/// no sample found data.
fn reduce_samples(
    out: &mut [f64],
    samples: &[SampleValue],
    reduction: ElementReduction,
    weight: f64,
    measure: impl FnOnce() -> f64,
) {
    if samples.is_empty() {
        return;
    }
    match reduction {
        ElementReduction::Average => {
            let scale = 1.0 / count_as_f64(samples.len());
            out.fill(0.0);
            for sample in samples {
                for (o, s) in out.iter_mut().zip(sample) {
                    *o = s.mul_add(scale, *o);
                }
            }
        }
        ElementReduction::Integrate => {
            let scale = weight * measure();
            out.fill(0.0);
            for sample in samples {
                for (o, s) in out.iter_mut().zip(sample) {
                    *o = s.mul_add(scale, *o);
                }
            }
        }
        ElementReduction::Min | ElementReduction::Max => {
            let pick = |a: f64, b: f64| {
                if reduction == ElementReduction::Min {
                    a.min(b)
                } else {
                    a.max(b)
                }
            };
            for (c, o) in out.iter_mut().enumerate() {
                *o = samples
                    .iter()
                    .map(|s| s[c])
                    .reduce(pick)
                    .unwrap_or(*o);
            }
        }
    }
}

fn count_as_f64(n: usize) -> f64 {
    f64::from(u32::try_from(n).unwrap_or(u32::MAX))
}

fn at_barycentric(corners: &[Point], bary: &Barycentric) -> Point {
    let mut p = Point::origin();
    for (corner, &w) in corners.iter().zip(bary) {
        p += *corner * w;
    }
    p
}

/// Unit normal of a triangle, or `None` when it is degenerate.
fn triangle_normal(corners: &[Point]) -> Option<Point> {
    let [a, b, c] = corners else {
        return None;
    };
    let n = (*b - *a).cross(&(*c - *a));
    let len = n.length();
    (len > 0.0).then(|| n * (1.0 / len))
}

/// Area-weighted unit normals at the nodes of a triangle surface.
fn node_normals(mesh: &Mesh) -> Vec<Point> {
    let mut normals = vec![Point::origin(); mesh.num_nodes()];
    for (element, nodes) in mesh.elements().enumerate() {
        let corners = mesh.element_points(element);
        if let [a, b, c] = corners.as_slice() {
            let n = (*b - *a).cross(&(*c - *a));
            for &node in nodes {
                normals[node] += n;
            }
        }
    }
    for n in &mut normals {
        let len = n.length();
        if len > 0.0 {
            *n = *n * (1.0 / len);
        }
    }
    normals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::report::CancellationToken;
    use approx::assert_relative_eq;

    fn unit_tet() -> Mesh {
        Mesh::new(
            MeshTopology::TetVol,
            vec![
                Point::new([0.0, 0.0, 0.0]),
                Point::new([1.0, 0.0, 0.0]),
                Point::new([0.0, 1.0, 0.0]),
                Point::new([0.0, 0.0, 1.0]),
            ],
            vec![0, 1, 2, 3],
        )
        .unwrap()
    }

    /// Unit square in the z = 0 plane, split along its diagonal.
    fn square() -> Mesh {
        Mesh::new(
            MeshTopology::TriSurf,
            vec![
                Point::new([0.0, 0.0, 0.0]),
                Point::new([1.0, 0.0, 0.0]),
                Point::new([0.0, 1.0, 0.0]),
                Point::new([1.0, 1.0, 0.0]),
            ],
            vec![0, 1, 2, 1, 3, 2],
        )
        .unwrap()
    }

    fn linear_on(mesh: &Mesh, f: impl Fn(&Point) -> f64) -> Field {
        Field::scalar(BasisOrder::Linear, mesh.nodes().iter().map(f).collect())
    }

    fn sample(
        source: &Mesh,
        field: &Field,
        dest: &Mesh,
        target: SampleTarget,
        options: &SampleOptions,
    ) -> Result<Field, MappingError> {
        sample_field(source, field, dest, target, options, &ExecutionContext::default())
    }

    #[test]
    fn test_gradient_of_linear_data_is_constant() {
        let tet = unit_tet();
        let field = linear_on(&tet, |p| 3.0 * p.x() - 2.0 * p.y() + 0.5 * p.z());
        let targets = Mesh::point_cloud(vec![
            Point::new([0.1, 0.1, 0.1]),
            Point::new([0.5, 0.2, 0.1]),
        ])
        .unwrap();
        let options = SampleOptions::default().with_quantity(SampledQuantity::Gradient);
        let gradients = sample(&tet, &field, &targets, SampleTarget::Nodes, &options).unwrap();
        assert_eq!(gradients.kind(), ValueKind::Vector);
        for i in 0..2 {
            let g = gradients.value(i);
            assert_relative_eq!(g[0], 3.0, epsilon = 1e-12);
            assert_relative_eq!(g[1], -2.0, epsilon = 1e-12);
            assert_relative_eq!(g[2], 0.5, epsilon = 1e-12);
        }

        let options = SampleOptions::default().with_quantity(SampledQuantity::GradientNorm);
        let norms = sample(&tet, &field, &targets, SampleTarget::Nodes, &options).unwrap();
        assert_relative_eq!(norms.scalar_value(1).unwrap(), 13.25_f64.sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_quadratic_gradient_follows_the_parabola() {
        // f(x) = x² on [0, 2]: nodes 0 and 2 carry 0 and 4, the midpoint 1.
        let line = Mesh::new(
            MeshTopology::Curve,
            vec![Point::new([0.0, 0.0, 0.0]), Point::new([2.0, 0.0, 0.0])],
            vec![0, 1],
        )
        .unwrap();
        let field = Field::scalar(BasisOrder::Quadratic, vec![0.0, 4.0, 1.0]);
        let targets = Mesh::point_cloud(vec![
            Point::new([0.5, 0.0, 0.0]),
            Point::new([1.5, 0.0, 0.0]),
        ])
        .unwrap();
        let options = SampleOptions::default().with_quantity(SampledQuantity::Gradient);
        let g = sample(&line, &field, &targets, SampleTarget::Nodes, &options).unwrap();
        assert_relative_eq!(g.value(0)[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(g.value(1)[0], 3.0, epsilon = 1e-12);

        let values = sample(&line, &field, &targets, SampleTarget::Nodes, &SampleOptions::default())
            .unwrap();
        assert_relative_eq!(values.scalar_value(1).unwrap(), 2.25, epsilon = 1e-12);
    }

    #[test]
    fn test_flux_through_surface_nodes_and_elements() {
        let tet = unit_tet();
        let field = linear_on(&tet, |p| 2.0 * p.z());
        // A small patch of the plane z = 0.2 inside the tetrahedron.
        let patch = Mesh::new(
            MeshTopology::TriSurf,
            vec![
                Point::new([0.1, 0.1, 0.2]),
                Point::new([0.3, 0.1, 0.2]),
                Point::new([0.1, 0.3, 0.2]),
            ],
            vec![0, 1, 2],
        )
        .unwrap();
        let options = SampleOptions::default().with_quantity(SampledQuantity::Flux);

        let at_nodes = sample(&tet, &field, &patch, SampleTarget::Nodes, &options).unwrap();
        for v in at_nodes.components() {
            assert_relative_eq!(*v, 2.0, epsilon = 1e-12);
        }
        let at_elements = sample(&tet, &field, &patch, SampleTarget::Elements, &options).unwrap();
        assert_relative_eq!(at_elements.scalar_value(0).unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_outside_locations_keep_outside_value() {
        let tet = unit_tet();
        let field = linear_on(&tet, Point::x);
        let targets = Mesh::point_cloud(vec![
            Point::new([0.2, 0.2, 0.2]),
            Point::new([2.0, 2.0, 2.0]),
        ])
        .unwrap();

        let inside_only = SampleOptions::default().with_outside_value(-7.0);
        let sampled = sample(&tet, &field, &targets, SampleTarget::Nodes, &inside_only).unwrap();
        assert_relative_eq!(sampled.scalar_value(0).unwrap(), 0.2, epsilon = 1e-12);
        assert_eq!(sampled.scalar_value(1), Some(-7.0));

        let closest = inside_only
            .clone()
            .with_lookup(SampleLookup::ClosestInterpolatedData);
        let sampled = sample(&tet, &field, &targets, SampleTarget::Nodes, &closest).unwrap();
        assert!(sampled.scalar_value(1).unwrap() >= 0.0);

        let bounded = closest.with_max_distance(0.5);
        let sampled = sample(&tet, &field, &targets, SampleTarget::Nodes, &bounded).unwrap();
        assert_eq!(sampled.scalar_value(1), Some(-7.0));
    }

    #[test]
    fn test_closest_node_data_copies_values() {
        let cloud = Mesh::point_cloud(vec![Point::origin(), Point::new([1.0, 0.0, 0.0])]).unwrap();
        let field = Field::vector(BasisOrder::Linear, vec![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let targets = Mesh::point_cloud(vec![Point::new([0.9, 0.1, 0.0])]).unwrap();
        let options = SampleOptions::default().with_lookup(SampleLookup::ClosestNodeData);
        let sampled = sample(&cloud, &field, &targets, SampleTarget::Nodes, &options).unwrap();
        assert_eq!(sampled.value(0), &[4.0, 5.0, 6.0]);
    }

    #[test]
    fn test_element_reductions() {
        let source = square();
        let field = linear_on(&source, |p| p.x() + p.y());
        let dest = square();
        let order_two = SampleOptions::default().with_sample_order(2);

        // The mean of a linear function over a triangle is its centroid value.
        let average = sample(&source, &field, &dest, SampleTarget::Elements, &order_two).unwrap();
        assert_relative_eq!(average.scalar_value(0).unwrap(), 2.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(average.scalar_value(1).unwrap(), 4.0 / 3.0, epsilon = 1e-12);

        let integrate = order_two.clone().with_reduction(ElementReduction::Integrate);
        let total = sample(&source, &field, &dest, SampleTarget::Elements, &integrate).unwrap();
        assert_relative_eq!(total.scalar_value(0).unwrap(), 1.0 / 3.0, epsilon = 1e-12);
        assert_relative_eq!(
            total.components().iter().sum::<f64>(),
            1.0,
            epsilon = 1e-12
        );

        let min = order_two.clone().with_reduction(ElementReduction::Min);
        let max = order_two.with_reduction(ElementReduction::Max);
        let lo = sample(&source, &field, &dest, SampleTarget::Elements, &min).unwrap();
        let hi = sample(&source, &field, &dest, SampleTarget::Elements, &max).unwrap();
        assert!(lo.scalar_value(0).unwrap() < 2.0 / 3.0);
        assert!(hi.scalar_value(0).unwrap() > 2.0 / 3.0);
    }

    #[test]
    fn test_invalid_requests() {
        let tet = unit_tet();
        let scalar = linear_on(&tet, Point::x);
        let vectors = Field::vector(BasisOrder::Linear, vec![[0.0; 3]; 4]);
        let cloud = Mesh::point_cloud(vec![Point::new([0.1, 0.1, 0.1])]).unwrap();
        let gradient = SampleOptions::default().with_quantity(SampledQuantity::Gradient);

        assert!(matches!(
            sample(&tet, &vectors, &cloud, SampleTarget::Nodes, &gradient),
            Err(MappingError::Field(FieldError::KindMismatch { .. }))
        ));
        assert!(matches!(
            sample(
                &tet,
                &scalar,
                &cloud,
                SampleTarget::Nodes,
                &SampleOptions::default().with_quantity(SampledQuantity::Flux)
            ),
            Err(MappingError::UnsupportedTopology { .. })
        ));
        assert!(matches!(
            sample(&tet, &scalar, &cloud, SampleTarget::Elements, &SampleOptions::default()),
            Err(MappingError::Field(FieldError::PointCloudBasis { .. }))
        ));
        assert!(matches!(
            sample(
                &tet,
                &scalar,
                &cloud,
                SampleTarget::Nodes,
                &gradient.clone().with_lookup(SampleLookup::ClosestNodeData)
            ),
            Err(MappingError::InvalidOption { name: "lookup", .. })
        ));
        let constant = Field::scalar(BasisOrder::Constant, vec![1.0]);
        assert!(matches!(
            sample(
                &tet,
                &constant,
                &cloud,
                SampleTarget::Nodes,
                &SampleOptions::default().with_lookup(SampleLookup::ClosestNodeData)
            ),
            Err(MappingError::UnsupportedBasis { .. })
        ));
        let points = Mesh::point_cloud(vec![Point::origin()]).unwrap();
        let point_values = Field::scalar(BasisOrder::Linear, vec![1.0]);
        assert!(matches!(
            sample(&points, &point_values, &cloud, SampleTarget::Nodes, &SampleOptions::default()),
            Err(MappingError::PointCloudInterpolation)
        ));
        assert!(matches!(
            sample(
                &tet,
                &scalar,
                &tet,
                SampleTarget::Elements,
                &SampleOptions::default().with_sample_order(6)
            ),
            Err(MappingError::InvalidOption { name: "sample_order", .. })
        ));
        assert!(matches!(
            sample(
                &tet,
                &scalar,
                &tet,
                SampleTarget::Elements,
                &gradient.with_reduction(ElementReduction::Max)
            ),
            Err(MappingError::InvalidOption { name: "reduction", .. })
        ));
    }

    #[test]
    fn test_option_names_parse() {
        assert_eq!("Gradient_Norm".parse(), Ok(SampledQuantity::GradientNorm));
        assert_eq!("closestnodedata".parse(), Ok(SampleLookup::ClosestNodeData));
        assert_eq!("integrate".parse(), Ok(ElementReduction::Integrate));
        let err = "divergence".parse::<SampledQuantity>().unwrap_err();
        assert_eq!(err.option, "quantity");

        let json = serde_json::to_string(&SampleOptions::default()).unwrap();
        let back: SampleOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SampleOptions::default());
        let partial: SampleOptions = serde_json::from_str(r#"{"quantity":"flux"}"#).unwrap();
        assert_eq!(partial.quantity, SampledQuantity::Flux);
        assert_eq!(partial.sample_order, 1);
    }

    #[test]
    fn test_cancelled_sampling_returns_no_output() {
        let tet = unit_tet();
        let field = linear_on(&tet, Point::x);
        let token = CancellationToken::new();
        token.cancel();
        let ctx = ExecutionContext::default().with_cancellation(token);
        let result = sample_field(
            &tet,
            &field,
            &tet,
            SampleTarget::Nodes,
            &SampleOptions::default(),
            &ctx,
        );
        assert!(matches!(result, Err(MappingError::Cancelled)));
    }
}
