//! Correspondence strategies between a source and a destination mesh.
//!
//! A strategy decides which source values contribute to each destination
//! value and with what weight. The result is always a [`SparseRowMatrix`]
//! with one row per destination value and one column per source value, so
//! matrix construction, direct field transfer, and matrix application share a
//! single definition of each method.
//!
//! | method | stage one (parallel) | stage two (sequential) |
//! |---|---|---|
//! | [`MappingMethod::ClosestData`] | nearest source sample per destination sample | CSR compaction |
//! | [`MappingMethod::SingleDestination`] | nearest destination sample per source sample | inversion under a [`CollisionPolicy`] |
//! | [`MappingMethod::InterpolatedData`] | interpolation weights per destination sample | CSR compaction |

use crate::core::algorithms::mapping_matrix::{CompactRows, InvertAssignments};
use crate::core::error::MappingError;
use crate::core::mesh::{BasisOrder, MeshTopology};
use crate::core::parallel::{ParallelMap, map_then_reduce, resolve_num_workers};
use crate::core::report::ExecutionContext;
use crate::core::sparse::SparseRowMatrix;
use crate::core::traits::mesh_query::MeshQuery;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// =============================================================================
// METHOD AND POLICY
// =============================================================================

/// How destination values are related to source values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingMethod {
    /// Each destination sample copies the nearest source sample.
    ClosestData,
    /// Each source sample is sent to its nearest destination sample.
    SingleDestination,
    /// Each destination sample interpolates the source element that contains it.
    #[default]
    InterpolatedData,
}

impl MappingMethod {
    /// The legacy lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClosestData => "closestdata",
            Self::SingleDestination => "singledestination",
            Self::InterpolatedData => "interpolateddata",
        }
    }

    /// The strategy implementing this method.
    #[must_use]
    pub fn strategy(self) -> &'static dyn CorrespondenceStrategy {
        match self {
            Self::ClosestData => &ClosestData,
            Self::SingleDestination => &SingleDestination,
            Self::InterpolatedData => &InterpolatedData,
        }
    }
}

impl fmt::Display for MappingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A method name that is not recognized.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("Unknown mapping method '{name}'; expected closestdata, singledestination, or interpolateddata")]
pub struct UnknownMappingMethod {
    /// The rejected name.
    pub name: String,
}

impl FromStr for MappingMethod {
    type Err = UnknownMappingMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace(['_', '-'], "").as_str() {
            "closestdata" => Ok(Self::ClosestData),
            "singledestination" => Ok(Self::SingleDestination),
            "interpolateddata" => Ok(Self::InterpolatedData),
            _ => Err(UnknownMappingMethod { name: s.to_owned() }),
        }
    }
}

/// What [`MappingMethod::SingleDestination`] does when several source
/// samples pick the same destination sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CollisionPolicy {
    /// The highest source index wins.
    #[default]
    LastWins,
    /// The lowest source index wins.
    FirstWins,
    /// Any collision is an error.
    Error,
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Options shared by matrix construction and direct field mapping.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::algorithms::correspondence::{
///     MappingMethod, MappingOptions, MappingOptionsBuilder,
/// };
///
/// let a = MappingOptions::default()
///     .with_method(MappingMethod::ClosestData)
///     .with_max_distance(0.5);
/// let b = MappingOptionsBuilder::default()
///     .method(MappingMethod::ClosestData)
///     .max_distance(0.5)
///     .build()
///     .unwrap();
/// assert_eq!(a, b);
/// assert_eq!(a.search_limit(), Some(0.5));
/// assert_eq!(MappingOptions::default().search_limit(), None);
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default)]
#[serde(default)]
pub struct MappingOptions {
    /// Correspondence method.
    pub method: MappingMethod,
    /// Search radius; negative means unlimited.
    pub max_distance: f64,
    /// Value written to destination samples nothing maps to.
    pub default_value: f64,
    /// Collision handling for [`MappingMethod::SingleDestination`].
    pub collision_policy: CollisionPolicy,
    /// Basis of the destination values; `None` keeps the source basis.
    #[builder(setter(strip_option))]
    pub dest_basis: Option<BasisOrder>,
    /// Worker count; `None` defers to [`resolve_num_workers`].
    #[builder(setter(strip_option))]
    pub num_workers: Option<usize>,
}

impl Default for MappingOptions {
    fn default() -> Self {
        Self {
            method: MappingMethod::default(),
            max_distance: -1.0,
            default_value: 0.0,
            collision_policy: CollisionPolicy::default(),
            dest_basis: None,
            num_workers: None,
        }
    }
}

impl MappingOptions {
    /// Sets [`MappingOptions::method`].
    #[must_use]
    pub const fn with_method(mut self, method: MappingMethod) -> Self {
        self.method = method;
        self
    }

    /// Sets [`MappingOptions::max_distance`].
    #[must_use]
    pub const fn with_max_distance(mut self, max_distance: f64) -> Self {
        self.max_distance = max_distance;
        self
    }

    /// Sets [`MappingOptions::default_value`].
    #[must_use]
    pub const fn with_default_value(mut self, default_value: f64) -> Self {
        self.default_value = default_value;
        self
    }

    /// Sets [`MappingOptions::collision_policy`].
    #[must_use]
    pub const fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Sets [`MappingOptions::dest_basis`].
    #[must_use]
    pub const fn with_dest_basis(mut self, basis: BasisOrder) -> Self {
        self.dest_basis = Some(basis);
        self
    }

    /// Destination basis for source data of `source_basis`.
    #[must_use]
    pub fn destination_basis(&self, source_basis: BasisOrder) -> BasisOrder {
        self.dest_basis.unwrap_or(source_basis)
    }

    /// Sets [`MappingOptions::num_workers`].
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

    /// Resolved worker count.
    #[must_use]
    pub fn workers(&self) -> usize {
        resolve_num_workers(self.num_workers)
    }
}

// =============================================================================
// STRATEGIES
// =============================================================================

/// Source and destination of one correspondence computation.
#[derive(Clone, Copy)]
pub struct CorrespondenceInput<'a> {
    /// Mesh the data lives on.
    pub source: &'a dyn MeshQuery,
    /// Basis order of the source data.
    pub basis: BasisOrder,
    /// Mesh the data is transferred to.
    pub destination: &'a dyn MeshQuery,
    /// Basis order of the destination values.
    pub dest_basis: BasisOrder,
}

impl fmt::Debug for CorrespondenceInput<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrespondenceInput")
            .field("source_topology", &self.source.topology())
            .field("basis", &self.basis)
            .field("destination_topology", &self.destination.topology())
            .field("dest_basis", &self.dest_basis)
            .finish()
    }
}

impl CorrespondenceInput<'_> {
    /// Number of source values (matrix columns).
    #[must_use]
    pub fn source_values(&self) -> usize {
        self.source.num_values(self.basis)
    }

    /// Number of destination values (matrix rows).
    #[must_use]
    pub fn destination_values(&self) -> usize {
        self.destination.num_values(self.dest_basis)
    }
}

/// One of the three correspondence methods.
pub trait CorrespondenceStrategy: Sync {
    /// The method this strategy implements.
    fn method(&self) -> MappingMethod;

    /// Builds the `destination values × source values` weight matrix.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] if the inputs are unsuitable for this
    /// method, on cancellation, or when a reduction rule is violated.
    fn correspond(
        &self,
        input: &CorrespondenceInput<'_>,
        options: &MappingOptions,
        ctx: &ExecutionContext,
    ) -> Result<SparseRowMatrix, MappingError>;
}

/// Destination samples copy the nearest source sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct ClosestData;

impl CorrespondenceStrategy for ClosestData {
    fn method(&self) -> MappingMethod {
        MappingMethod::ClosestData
    }

    fn correspond(
        &self,
        input: &CorrespondenceInput<'_>,
        options: &MappingOptions,
        ctx: &ExecutionContext,
    ) -> Result<SparseRowMatrix, MappingError> {
        let limit = options.search_limit();
        let rows = input.destination_values();
        map_then_reduce(
            &ParallelMap::new(options.workers(), ctx),
            rows,
            1,
            None,
            |row, slot: &mut [Option<(usize, f64)>]| {
                let location = input.destination.value_location(input.dest_basis, row);
                slot[0] = input
                    .source
                    .find_closest_sample(input.basis, &location, limit)
                    .map(|hit| (hit.index, 1.0));
                Ok(())
            },
            CompactRows {
                cols: input.source_values(),
            },
        )
    }
}

/// Source samples are pushed to their nearest destination sample.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleDestination;

impl CorrespondenceStrategy for SingleDestination {
    fn method(&self) -> MappingMethod {
        MappingMethod::SingleDestination
    }

    fn correspond(
        &self,
        input: &CorrespondenceInput<'_>,
        options: &MappingOptions,
        ctx: &ExecutionContext,
    ) -> Result<SparseRowMatrix, MappingError> {
        let limit = options.search_limit();
        map_then_reduce(
            &ParallelMap::new(options.workers(), ctx),
            input.source_values(),
            1,
            None,
            |sample, slot: &mut [Option<usize>]| {
                let location = input.source.value_location(input.basis, sample);
                slot[0] = input
                    .destination
                    .find_closest_sample(input.dest_basis, &location, limit)
                    .map(|hit| hit.index);
                Ok(())
            },
            InvertAssignments {
                rows: input.destination_values(),
                policy: options.collision_policy,
            },
        )
    }
}

/// Destination samples interpolate the source element containing them.
#[derive(Clone, Copy, Debug, Default)]
pub struct InterpolatedData;

impl InterpolatedData {
    /// Weights per destination row for a source of `topology` and `basis`.
    #[must_use]
    pub const fn weights_per_row(topology: MeshTopology, basis: BasisOrder) -> usize {
        match basis {
            BasisOrder::Constant => 1,
            BasisOrder::Linear => topology.nodes_per_element(),
            BasisOrder::Quadratic => {
                topology.nodes_per_element() + topology.local_edges().len()
            }
        }
    }
}

impl CorrespondenceStrategy for InterpolatedData {
    fn method(&self) -> MappingMethod {
        MappingMethod::InterpolatedData
    }

    fn correspond(
        &self,
        input: &CorrespondenceInput<'_>,
        options: &MappingOptions,
        ctx: &ExecutionContext,
    ) -> Result<SparseRowMatrix, MappingError> {
        if input.source.topology() == MeshTopology::PointCloud {
            return Err(MappingError::PointCloudInterpolation);
        }
        let limit = options.search_limit();
        let stride = Self::weights_per_row(input.source.topology(), input.basis);
        map_then_reduce(
            &ParallelMap::new(options.workers(), ctx),
            input.destination_values(),
            stride,
            None,
            |row, slots: &mut [Option<(usize, f64)>]| {
                let location = input.destination.value_location(input.dest_basis, row);
                let Some(hit) = input.source.locate(&location, limit) else {
                    return Ok(());
                };
                let weights = input
                    .source
                    .interpolation_weights(hit.element, &hit.local, input.basis);
                if weights.len() > slots.len() {
                    return Err(MappingError::internal(format!(
                        "element {} produced {} weights, expected at most {}",
                        hit.element,
                        weights.len(),
                        slots.len()
                    )));
                }
                for (slot, weight) in slots.iter_mut().zip(weights) {
                    *slot = Some(weight);
                }
                Ok(())
            },
            CompactRows {
                cols: input.source_values(),
            },
        )
    }
}
