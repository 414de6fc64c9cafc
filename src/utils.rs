//! Utility types and functions for the library.
use ahash::AHashMap;
use fixedbitset_stack::on_stack::{get_nblock, FixedBitSet};

/// A 256-bit on-stack set indexed by byte value.
pub type ByteSet = FixedBitSet<{ get_nblock(u8::MAX as usize) }>;

/// Collect a byte set into a sorted list of its members, for display.
pub(crate) fn get_display_form_from_byte_set(set: &ByteSet) -> Vec<usize> {
    set.ones().collect()
}

/// Sort a hash map through a projection so debug output is deterministic.
pub(crate) fn get_deterministic_display_form_from_hash_map<K, V, U: Ord + Clone, Y>(
    map: &AHashMap<K, V>,
    process: impl FnMut((&K, &V)) -> (U, Y),
) -> Vec<(U, Y)> {
    let mut a: Vec<_> = map.iter().map(process).collect();
    a.sort_by_cached_key(|(k, _)| k.clone());
    a
}
