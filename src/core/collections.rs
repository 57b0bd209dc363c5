//! High-performance collection types for mesh queries.
//!
//! Fast non-cryptographic hash maps and sets (`rustc-hash`), inline small
//! buffers (`smallvec`), mesh-specific aliases, and the uniform
//! [`SearchGrid`] used by every nearest-sample query in the crate.

mod aliases;
mod helpers;
mod search_grid;

pub use aliases::*;
pub use helpers::*;
pub use search_grid::*;
