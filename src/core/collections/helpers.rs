use super::{FacetKey, FastHashMap};

// =============================================================================
// UTILITY FUNCTIONS
// =============================================================================

/// Creates a `FastHashMap` with pre-allocated capacity using the optimal hasher.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::collections::fast_hash_map_with_capacity;
///
/// let map = fast_hash_map_with_capacity::<u64, usize>(1000);
/// assert!(map.capacity() >= 1000);
/// ```
#[inline]
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, Default::default())
}

/// Builds an orientation-independent facet key by sorting node indices.
///
/// # Examples
///
/// ```rust
/// use meshfield::core::collections::facet_key;
///
/// assert_eq!(facet_key(&[7, 2, 5]).as_slice(), &[2, 5, 7]);
/// ```
#[must_use]
pub fn facet_key(nodes: &[usize]) -> FacetKey {
    let mut key: FacetKey = nodes.iter().copied().collect();
    key.sort_unstable();
    key
}

/// Sorts and deduplicates `(a, b)` pairs in place.
pub fn sort_dedup_pairs(pairs: &mut Vec<(usize, usize)>) {
    pairs.sort_unstable();
    pairs.dedup();
}
