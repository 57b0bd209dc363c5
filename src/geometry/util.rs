//! Point and mesh generators for tests, benchmarks, and demos.
//!
//! Random points come from `rand`, optionally seeded for reproducibility.
//! Structured meshes cover every element topology: segment chains, triangle
//! grids, and tetrahedral boxes built by splitting each hexahedron into six
//! tetrahedra along its main diagonal.

use crate::core::mesh::MeshError;
use thiserror::Error;

mod mesh_generation;
mod point_generation;

pub use mesh_generation::*;
pub use point_generation::*;

/// Errors from the point and mesh generators.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum GenerationError {
    /// The coordinate range is empty or not finite.
    #[error("Invalid coordinate range: min {min} must be finite and below max {max}")]
    InvalidRange {
        /// Lower bound.
        min: f64,
        /// Upper bound.
        max: f64,
    },

    /// A structured mesh needs at least one cell along every axis.
    #[error("Cell count along axis {axis} must be at least 1")]
    InvalidCellCount {
        /// Offending axis.
        axis: usize,
    },

    /// The requested mesh does not fit in memory addressing.
    #[error("Requested mesh with {cells:?} cells overflows usize")]
    Overflow {
        /// Requested cells per axis.
        cells: [usize; 3],
    },

    /// The generated mesh failed validation.
    #[error(transparent)]
    Mesh(#[from] MeshError),
}
