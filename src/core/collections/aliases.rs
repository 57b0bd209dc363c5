use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

// =============================================================================
// CORE OPTIMIZED TYPES
// =============================================================================

/// Optimized `HashMap` type for performance-critical operations.
/// Uses `rustc_hash::FxHasher` for faster hashing in non-cryptographic contexts.
///
/// # Security Warning
///
/// ⚠️ **Not DoS-resistant**: Do not use with attacker-controlled keys.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u64, usize> = FastHashMap::default();
/// map.insert(123, 456);
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// Re-export the Entry enum for `FastHashMap`.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::collections::{Entry, FastHashMap};
///
/// let mut map: FastHashMap<u32, Vec<usize>> = FastHashMap::default();
/// match map.entry(7) {
///     Entry::Occupied(mut e) => e.get_mut().push(1),
///     Entry::Vacant(e) => {
///         e.insert(vec![0]);
///     }
/// }
/// ```
pub use std::collections::hash_map::Entry;

/// Optimized `HashSet` type for membership tests on trusted keys.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::collections::FastHashSet;
///
/// let mut set: FastHashSet<usize> = FastHashSet::default();
/// set.insert(3);
/// assert!(set.contains(&3));
/// ```
pub type FastHashSet<T> = FxHashSet<T>;

/// Small-optimized Vec that stays on the stack for up to `N` elements.
///
/// # Size Guidelines
///
/// - **N=2**: facet sharing (one or two elements per facet)
/// - **N=4**: node lists of linear elements
/// - **N=8**: grid buckets
/// - **N=10**: weights of quadratic tetrahedra
///
/// # Examples
///
/// ```rust
/// use meshfield::core::collections::SmallBuffer;
///
/// let mut buffer: SmallBuffer<usize, 4> = SmallBuffer::new();
/// buffer.extend([3, 1, 2]);
/// assert!(!buffer.spilled());
/// ```
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

// =============================================================================
// SEMANTIC SIZE CONSTANTS AND TYPE ALIASES
// =============================================================================

/// Maximum number of corner nodes of any supported element (tetrahedron).
pub const MAX_ELEMENT_NODES: usize = 4;

/// Maximum number of interpolation weights of any supported element (quadratic tetrahedron).
pub const MAX_ELEMENT_WEIGHTS: usize = 10;

/// Node indices of one element or facet, inline up to a tetrahedron.
pub type NodeBuffer = SmallBuffer<usize, MAX_ELEMENT_NODES>;

/// Sorted node indices identifying a facet independent of orientation.
pub type FacetKey = SmallBuffer<usize, 3>;

/// `(element index, local facet index)` pairs sharing one facet.
pub type FacetIncidence = SmallBuffer<(usize, u8), 2>;

/// Map from a facet's sorted node set to the elements that contain it.
///
/// Boundary facets are exactly the entries with a single incidence.
pub type FacetToElementsMap = FastHashMap<FacetKey, FacetIncidence>;

/// `(value index, weight)` pairs produced by element interpolation.
pub type WeightBuffer = SmallBuffer<(usize, f64), MAX_ELEMENT_WEIGHTS>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_collections_basic_operations() {
        let mut map: FastHashMap<u64, usize> = FastHashMap::default();
        assert!(map.is_empty());
        map.insert(123, 456);
        assert_eq!(map.get(&123), Some(&456));

        let mut set: FastHashSet<u64> = FastHashSet::default();
        set.insert(789);
        assert!(set.contains(&789));
        assert!(!set.contains(&999));
    }

    #[test]
    fn test_small_buffer_spills_past_inline_capacity() {
        let mut buffer: NodeBuffer = NodeBuffer::new();
        for i in 0..MAX_ELEMENT_NODES {
            buffer.push(i);
        }
        assert!(!buffer.spilled());
        buffer.push(MAX_ELEMENT_NODES);
        assert!(buffer.spilled());
    }

    #[test]
    fn test_facet_map_groups_shared_facets() {
        let mut map = FacetToElementsMap::default();
        let key: FacetKey = SmallBuffer::from_slice(&[1, 2, 3]);
        map.entry(key.clone()).or_default().push((0, 3));
        map.entry(key.clone()).or_default().push((5, 0));
        assert_eq!(map[&key].len(), 2);
        assert!(!map[&key].spilled());
    }
}
