//! Error taxonomy shared by the mapping, merge, periodic, and statistics operations.
//!
//! Every failure is one of four [`ErrorCategory`] classes:
//!
//! - **Input**: the caller passed something the operation cannot work with.
//! - **Processing**: the inputs were acceptable but a resource step failed.
//! - **Cancelled**: the caller's cancellation token fired; no output exists.
//! - **Internal**: an invariant the crate itself maintains was violated.
//!
//! Non-fatal conditions (fallbacks, skipped axes) are never errors; they go
//! through [`Reporter`](crate::core::report::Reporter).

use crate::core::collections::GridError;
use crate::core::field::FieldError;
use crate::core::mesh::{BasisOrder, MeshError, MeshTopology};
use crate::core::sparse::SparseMatrixError;
use thiserror::Error;

/// Coarse classification of a [`MappingError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid or inconsistent caller input.
    Input,
    /// A resource or processing step failed.
    Processing,
    /// Cooperative cancellation.
    Cancelled,
    /// Internal invariant violation.
    Internal,
}

/// Errors returned by the top-level operations of this crate.
#[derive(Clone, Debug, Error, PartialEq)]
#[non_exhaustive]
pub enum MappingError {
    /// A required mesh or field has nothing in it.
    #[error("{what} is empty")]
    EmptyInput {
        /// Description of the empty input.
        what: String,
    },

    /// Interpolation was requested from a mesh without elements.
    #[error(
        "Source does not have any elements, so interpolation is impossible; use a closest-data mapping instead"
    )]
    PointCloudInterpolation,

    /// An operation does not support the given basis order.
    #[error("{operation} does not support basis order {basis:?}")]
    UnsupportedBasis {
        /// Operation name.
        operation: &'static str,
        /// Offending basis.
        basis: BasisOrder,
    },

    /// An operation does not support the given topology.
    #[error("{operation} does not support {topology} meshes")]
    UnsupportedTopology {
        /// Operation name.
        operation: &'static str,
        /// Offending topology.
        topology: MeshTopology,
    },

    /// Inputs that must share a topology do not.
    #[error("Input {input} has topology {actual}, expected {expected}")]
    TopologyMismatch {
        /// Index of the offending input.
        input: usize,
        /// Topology of the first input.
        expected: MeshTopology,
        /// Topology of the offending input.
        actual: MeshTopology,
    },

    /// Inputs that must share a basis order do not.
    #[error("Input {input} has basis order {actual:?}, expected {expected:?}")]
    BasisMismatch {
        /// Index of the offending input.
        input: usize,
        /// Basis of the first input.
        expected: BasisOrder,
        /// Basis of the offending input.
        actual: BasisOrder,
    },

    /// Paired quantities have different element counts.
    #[error("{what}: expected {expected} elements, found {actual}")]
    ElementCountMismatch {
        /// Which pairing failed.
        what: &'static str,
        /// Required count.
        expected: usize,
        /// Found count.
        actual: usize,
    },

    /// The number of supplied labels does not match the number of label values found.
    #[error("{provided} labels were provided but the atlas contains {found} distinct labels")]
    LabelCountMismatch {
        /// Labels supplied by the caller.
        provided: usize,
        /// Distinct labels discovered.
        found: usize,
    },

    /// The ROI center lies too far from every coordinate-space sample.
    #[error("ROI center is {distance} from the nearest coordinate-space sample; it is not within the domain")]
    RoiOutsideDomain {
        /// Distance to the nearest sample.
        distance: f64,
    },

    /// Two sources mapped onto the same destination under the error collision policy.
    #[error("Sources {first} and {second} both map to destination {destination}")]
    DestinationCollision {
        /// Contested destination sample.
        destination: usize,
        /// Source already assigned.
        first: usize,
        /// Source that collided.
        second: usize,
    },

    /// An option value is invalid.
    #[error("Invalid option {name}: {reason}")]
    InvalidOption {
        /// Option name.
        name: &'static str,
        /// Why the value is rejected.
        reason: String,
    },

    /// A merge produced an empty or non-finite bounding box.
    #[error("Merged bounding box is empty or invalid")]
    InvalidBoundingBox,

    /// The worker pool could not be created.
    #[error("Failed to start worker pool: {message}")]
    WorkerPool {
        /// Underlying error text.
        message: String,
    },

    /// The operation was cancelled by the caller.
    #[error("Operation was cancelled")]
    Cancelled,

    /// Internal invariant violation.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// Mesh construction or validation error.
    #[error(transparent)]
    Mesh(#[from] MeshError),

    /// Field validation error.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Sparse matrix validation error.
    #[error(transparent)]
    Matrix(#[from] SparseMatrixError),

    /// Search grid construction error.
    #[error(transparent)]
    Grid(#[from] GridError),
}

impl MappingError {
    /// Classifies the error.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidBoundingBox | Self::WorkerPool { .. } | Self::Grid(_) => {
                ErrorCategory::Processing
            }
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::Internal { .. } => ErrorCategory::Internal,
            _ => ErrorCategory::Input,
        }
    }

    /// Returns `true` for [`MappingError::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            MappingError::PointCloudInterpolation.category(),
            ErrorCategory::Input
        );
        assert_eq!(
            MappingError::InvalidBoundingBox.category(),
            ErrorCategory::Processing
        );
        assert_eq!(
            MappingError::Grid(GridError::InvalidBoundingBox).category(),
            ErrorCategory::Processing
        );
        assert_eq!(
            MappingError::from(MeshError::UnsupportedBasisOrder { order: 3 }).category(),
            ErrorCategory::Input
        );
        assert!(MappingError::Cancelled.is_cancelled());
        assert_eq!(
            MappingError::internal("mask").category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn test_messages_mention_fallback() {
        let msg = MappingError::PointCloudInterpolation.to_string();
        assert!(msg.contains("closest-data"));
    }
}
