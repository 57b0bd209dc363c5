//! # meshfield
//!
//! Field transfer and mesh utilities for unstructured 3D meshes built from
//! point clouds, curves, triangle surfaces, and tetrahedral volumes.
//!
//! # Features
//!
//! - Mapping matrices between meshes: closest data, single destination, and
//!   linear/quadratic interpolation, stored as compressed sparse rows
//! - Direct field mapping with configurable default values and search limits
//! - Sampling of values, gradients, gradient norms, and surface fluxes at the
//!   nodes or elements of another mesh
//! - Merging of several meshes and their fields with tolerance-based node
//!   and element deduplication
//! - Periodic boundary detection along the coordinate axes
//! - Per-label statistics of element data over an atlas, optionally within
//!   a spherical region of interest
//! - Serialization/Deserialization of meshes, fields, and options with
//!   [serde](https://serde.rs)
//!
//! # Basic Usage
//!
//! ```rust
//! use meshfield::prelude::*;
//!
//! // Linear data on a single tetrahedron.
//! let source = Mesh::new(
//!     MeshTopology::TetVol,
//!     vec![
//!         Point::new([0.0, 0.0, 0.0]),
//!         Point::new([1.0, 0.0, 0.0]),
//!         Point::new([0.0, 1.0, 0.0]),
//!         Point::new([0.0, 0.0, 1.0]),
//!     ],
//!     vec![0, 1, 2, 3],
//! )
//! .unwrap();
//! let field = Field::scalar(BasisOrder::Linear, vec![0.0, 1.0, 2.0, 3.0]);
//!
//! // Sample it at two query points; the second lies outside the search limit.
//! let targets = Mesh::point_cloud(vec![
//!     Point::new([0.25, 0.25, 0.25]),
//!     Point::new([5.0, 5.0, 5.0]),
//! ])
//! .unwrap();
//! let options = MappingOptions::default()
//!     .with_max_distance(1.0)
//!     .with_default_value(-1.0);
//!
//! let mapped = map_field(&source, &field, &targets, &options, &ExecutionContext::default()).unwrap();
//! assert!((mapped.scalar_value(0).unwrap() - 1.5).abs() < 1e-12);
//! assert_eq!(mapped.scalar_value(1), Some(-1.0));
//! ```
//!
//! # Mapping Matrices
//!
//! Every mapping method produces a sparse matrix with one row per destination
//! value and one column per source value. Keeping the matrix lets the same
//! transfer be applied to many fields:
//!
//! ```rust
//! use meshfield::prelude::*;
//!
//! let source = Mesh::new(
//!     MeshTopology::Curve,
//!     vec![Point::new([0.0, 0.0, 0.0]), Point::new([1.0, 0.0, 0.0])],
//!     vec![0, 1],
//! )
//! .unwrap();
//! let dest = Mesh::point_cloud(vec![Point::new([0.25, 0.0, 0.0])]).unwrap();
//! let field = Field::scalar(BasisOrder::Linear, vec![4.0, 8.0]);
//!
//! let matrix = build_mapping_matrix(
//!     &source,
//!     &field,
//!     &dest,
//!     &MappingOptions::default(),
//!     &ExecutionContext::default(),
//! )
//! .unwrap();
//! assert_eq!((matrix.rows(), matrix.cols()), (1, 2));
//!
//! let out = apply_mapping_matrix(&field, &dest, BasisOrder::Linear, &matrix).unwrap();
//! assert!((out.scalar_value(0).unwrap() - 5.0).abs() < 1e-12);
//! ```
//!
//! # Invariants
//!
//! - Interpolation rows hold non-negative weights summing to 1 for points
//!   inside (or projected onto) an element.
//! - Copy rows hold exactly one weight of 1.
//! - Rows of unmatched destination values are empty, and mapping writes the
//!   configured default value there.
//! - Periodic node links are symmetric and their closure is transitive.
//!
//! # Execution
//!
//! Long-running operations take an [`ExecutionContext`](core::report::ExecutionContext)
//! carrying a [`Reporter`](core::report::Reporter) for remarks, warnings, and
//! progress, plus a cancellation token checked between work items. The
//! default reporter forwards to [`tracing`](https://docs.rs/tracing).
//! Parallel stages use a scoped `rayon` pool; the worker count comes from the
//! options, the `MESHFIELD_NUM_WORKERS` environment variable, or the number
//! of available cores.

// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// Meshes, fields, spatial search, sparse matrices, and the mapping algorithms built on them.
pub mod core {
    /// Field transfer, mesh merging, periodic detection, and ROI statistics.
    pub mod algorithms {
        /// Applying a stored mapping matrix to field data.
        pub mod apply_mapping;
        /// Mapping methods and their correspondence strategies.
        pub mod correspondence;
        /// Direct field mapping.
        pub mod direct_mapping;
        /// Merging meshes and fields.
        pub mod join;
        /// Mapping matrix construction.
        pub mod mapping_matrix;
        /// Periodic boundary detection.
        pub mod periodic;
        /// Per-label statistics over an atlas.
        pub mod roi_statistics;
        /// Sampling values, gradients, and fluxes at destination nodes or elements.
        pub mod sample_field;
        pub use apply_mapping::*;
        pub use correspondence::*;
        pub use direct_mapping::*;
        pub use join::*;
        pub use mapping_matrix::*;
        pub use periodic::*;
        pub use roi_statistics::*;
        pub use sample_field::*;
    }
    /// Hash maps, small buffers, and the uniform search grid.
    pub mod collections;
    pub mod error;
    pub mod field;
    pub mod locator;
    pub mod mesh;
    pub mod parallel;
    pub mod report;
    pub mod sparse;
    /// Traits at the seams between meshes and mapping algorithms.
    pub mod traits {
        pub mod mesh_query;
        pub use mesh_query::*;
    }
    // Re-export the `core` modules.
    pub use error::*;
    pub use field::*;
    pub use locator::*;
    pub use mesh::*;
    pub use report::*;
    pub use sparse::*;
    pub use traits::*;
    // Note: collections module not re-exported here to avoid namespace pollution
    // Import specific types via prelude or use crate::core::collections::
}

/// Points, bounding boxes, simplex projection, and generators.
pub mod geometry {
    pub mod bounding_box;
    pub mod point;
    /// Projection onto simplices and Lagrange weights.
    pub mod simplex;
    /// Random point and structured mesh generation.
    pub mod util;
    pub use bounding_box::*;
    pub use point::*;
    pub use simplex::*;
}

/// A prelude module that re-exports commonly used types.
/// This makes it easier to import the most commonly used items from the crate.
pub mod prelude {
    pub use crate::core::{
        algorithms::*, error::*, field::*, locator::*, mesh::*, report::*, sparse::*,
        traits::mesh_query::*,
    };

    // Collection types used in downstream code that walks mapping results
    pub use crate::core::collections::{
        FastHashMap, FastHashSet, NodeBuffer, SearchGrid, SmallBuffer, WeightBuffer,
        fast_hash_map_with_capacity,
    };

    pub use crate::geometry::{bounding_box::*, point::*, util::*};
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================
