//! Indexed object storage with stable handles, in two tiers.
//!
//! [`ObjectArena`] is the direct tier: every handle maps bijectively to one
//! storage slot, vacated slots are reused LIFO. [`AliasArena`] wraps it for
//! objects that can be merged: external handles are never reused and many of
//! them may resolve to one slot after merges, so references held across a
//! merge stay valid.
use ahash::AHashMap;

macro_rules! arena_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name<T> {
            index: ::nonmax::NonMaxU32,
            _marker: ::std::marker::PhantomData<fn() -> T>,
        }

        impl<T> $name<T> {
            #[inline]
            pub(crate) fn from_index(index: usize) -> Self {
                let index = u32::try_from(index)
                    .ok()
                    .and_then(::nonmax::NonMaxU32::new)
                    .expect("arena id space exhausted");
                Self {
                    index,
                    _marker: ::std::marker::PhantomData,
                }
            }

            /// Get the id as a plain index.
            #[inline]
            pub fn as_usize(self) -> usize {
                self.index.get() as usize
            }
        }

        impl<T> Clone for $name<T> {
            #[inline]
            fn clone(&self) -> Self {
                *self
            }
        }

        impl<T> Copy for $name<T> {}

        impl<T> PartialEq for $name<T> {
            #[inline]
            fn eq(&self, other: &Self) -> bool {
                self.index == other.index
            }
        }

        impl<T> Eq for $name<T> {}

        impl<T> PartialOrd for $name<T> {
            #[inline]
            fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
                Some(self.cmp(other))
            }
        }

        impl<T> Ord for $name<T> {
            #[inline]
            fn cmp(&self, other: &Self) -> std::cmp::Ordering {
                self.index.cmp(&other.index)
            }
        }

        impl<T> std::hash::Hash for $name<T> {
            #[inline]
            fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
                self.index.hash(state);
            }
        }

        impl<T> std::fmt::Debug for $name<T> {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_tuple(stringify!($name)).field(&self.index.get()).finish()
            }
        }
    };
}

arena_id! {
    /// A handle into an [`ObjectArena`], bijective with its storage slot.
    ObjectId
}
arena_id! {
    /// An external handle into an [`AliasArena`]; several may share one slot.
    AliasId
}
pub(crate) use arena_id;

/// The direct arena tier.
#[derive(Debug, Clone)]
pub struct ObjectArena<T> {
    slots: Vec<Option<T>>,
    free: Vec<ObjectId<T>>,
    mergeable: Vec<bool>,
    live: usize,
}

impl<T> Default for ObjectArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectArena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        ObjectArena {
            slots: Vec::new(),
            free: Vec::new(),
            mergeable: Vec::new(),
            live: 0,
        }
    }

    /// Store an object, reusing the most recently vacated slot if any.
    pub fn insert(&mut self, value: T) -> ObjectId<T> {
        self.live += 1;
        match self.free.pop() {
            Some(id) => {
                self.slots[id.as_usize()] = Some(value);
                self.mergeable[id.as_usize()] = false;
                id
            }
            None => {
                let id = ObjectId::from_index(self.slots.len());
                self.slots.push(Some(value));
                self.mergeable.push(false);
                id
            }
        }
    }

    /// Remove an object, vacating its slot for reuse.
    pub fn remove(&mut self, id: ObjectId<T>) -> Option<T> {
        let value = self.slots.get_mut(id.as_usize()).and_then(Option::take)?;
        self.mergeable[id.as_usize()] = false;
        self.free.push(id);
        self.live -= 1;
        Some(value)
    }

    /// Resolve a handle. Stale or out-of-range handles resolve to [`None`].
    pub fn get(&self, id: ObjectId<T>) -> Option<&T> {
        self.slots.get(id.as_usize()).and_then(Option::as_ref)
    }

    /// Resolve a handle mutably.
    pub fn get_mut(&mut self, id: ObjectId<T>) -> Option<&mut T> {
        self.slots.get_mut(id.as_usize()).and_then(Option::as_mut)
    }

    /// Whether the handle resolves to a live object.
    pub fn contains(&self, id: ObjectId<T>) -> bool {
        self.get(id).is_some()
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.live
    }

    /// Whether the arena holds no live object.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Total number of slots ever allocated, including vacated ones.
    pub fn slot_bound(&self) -> usize {
        self.slots.len()
    }

    /// Mark every live object as a merge candidate.
    pub fn set_all_merge_allowed(&mut self) {
        for (slot, flag) in self.slots.iter().zip(self.mergeable.iter_mut()) {
            *flag = slot.is_some();
        }
    }

    /// Mark one object as no longer a merge candidate.
    pub fn refuse_merge(&mut self, id: ObjectId<T>) {
        if let Some(flag) = self.mergeable.get_mut(id.as_usize()) {
            *flag = false;
        }
    }

    /// Whether the object is currently a merge candidate.
    pub fn can_merge(&self, id: ObjectId<T>) -> bool {
        self.contains(id) && self.mergeable.get(id.as_usize()).copied().unwrap_or(false)
    }

    /// Merge `src` into `dst` through the user combiner.
    ///
    /// The combiner receives the destination and the extracted source and
    /// reports whether the merge holds; on `false` the source is restored
    /// untouched. Only pairs with both merge bits set are eligible. Returns
    /// whether the source slot was consumed.
    pub fn merge(
        &mut self,
        dst: ObjectId<T>,
        src: ObjectId<T>,
        combine: impl FnOnce(&mut T, &mut T) -> bool,
    ) -> bool {
        if dst == src || !self.can_merge(dst) || !self.can_merge(src) {
            return false;
        }
        let mut src_value = match self.slots[src.as_usize()].take() {
            Some(value) => value,
            None => return false,
        };
        let dst_value = match self.slots[dst.as_usize()].as_mut() {
            Some(value) => value,
            None => {
                self.slots[src.as_usize()] = Some(src_value);
                return false;
            }
        };
        if combine(dst_value, &mut src_value) {
            self.mergeable[src.as_usize()] = false;
            self.free.push(src);
            self.live -= 1;
            true
        } else {
            self.slots[src.as_usize()] = Some(src_value);
            false
        }
    }

    /// Iterate live objects in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (ObjectId::from_index(index), value)))
    }
}

/// The alias arena tier.
///
/// External [`AliasId`]s are dense, never reused, and survive merges: merging
/// retargets every alias of the source onto the destination slot. A slot with
/// an emptied alias set is collapsed. Invariant: every external handle either
/// resolves or reports itself stale; no silent dereference of a dead slot.
#[derive(Debug, Clone)]
pub struct AliasArena<T> {
    inner: ObjectArena<T>,
    to_slot: Vec<Option<ObjectId<T>>>,
    aliases: AHashMap<ObjectId<T>, Vec<AliasId<T>>>,
}

impl<T> Default for AliasArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> AliasArena<T> {
    /// Create an empty arena.
    pub fn new() -> Self {
        AliasArena {
            inner: ObjectArena::new(),
            to_slot: Vec::new(),
            aliases: AHashMap::new(),
        }
    }

    /// Store an object under a fresh external handle.
    pub fn insert(&mut self, value: T) -> AliasId<T> {
        let slot = self.inner.insert(value);
        let alias = AliasId::from_index(self.to_slot.len());
        self.to_slot.push(Some(slot));
        self.aliases.insert(slot, vec![alias]);
        alias
    }

    /// Resolve an external handle to its current slot.
    pub fn slot_of(&self, alias: AliasId<T>) -> Option<ObjectId<T>> {
        self.to_slot.get(alias.as_usize()).copied().flatten()
    }

    /// Resolve an external handle.
    pub fn get(&self, alias: AliasId<T>) -> Option<&T> {
        self.inner.get(self.slot_of(alias)?)
    }

    /// Resolve an external handle mutably.
    pub fn get_mut(&mut self, alias: AliasId<T>) -> Option<&mut T> {
        let slot = self.slot_of(alias)?;
        self.inner.get_mut(slot)
    }

    /// Every external handle currently resolving to the same slot as `alias`.
    pub fn aliases_of(&self, alias: AliasId<T>) -> &[AliasId<T>] {
        self.slot_of(alias)
            .and_then(|slot| self.aliases.get(&slot))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of external handles ever created.
    pub fn alias_bound(&self) -> usize {
        self.to_slot.len()
    }

    /// Number of live slots.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the arena holds no live slot.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Drop one external handle; the slot collapses once its alias set empties.
    pub fn remove(&mut self, alias: AliasId<T>) -> Option<T> {
        let slot = self.to_slot.get_mut(alias.as_usize())?.take()?;
        let remaining = self.aliases.get_mut(&slot)?;
        remaining.retain(|a| *a != alias);
        if remaining.is_empty() {
            self.aliases.remove(&slot);
            self.inner.remove(slot)
        } else {
            None
        }
    }

    /// Mark every live slot as a merge candidate.
    pub fn set_all_merge_allowed(&mut self) {
        self.inner.set_all_merge_allowed();
    }

    /// Mark the slot behind `alias` as no longer a merge candidate.
    pub fn refuse_merge(&mut self, alias: AliasId<T>) {
        if let Some(slot) = self.slot_of(alias) {
            self.inner.refuse_merge(slot);
        }
    }

    /// Whether the slot behind `alias` is currently a merge candidate.
    pub fn can_merge(&self, alias: AliasId<T>) -> bool {
        self.slot_of(alias).is_some_and(|slot| self.inner.can_merge(slot))
    }

    /// Merge the slot behind `src` into the slot behind `dst`.
    ///
    /// On success every alias of the source is retargeted to the destination
    /// slot and the source slot is removed. Two handles already sharing a slot
    /// do not merge (there is nothing to combine).
    pub fn merge(
        &mut self,
        dst: AliasId<T>,
        src: AliasId<T>,
        combine: impl FnOnce(&mut T, &mut T) -> bool,
    ) -> bool {
        let (Some(dst_slot), Some(src_slot)) = (self.slot_of(dst), self.slot_of(src)) else {
            return false;
        };
        if dst_slot == src_slot {
            return false;
        }
        if !self.inner.merge(dst_slot, src_slot, combine) {
            return false;
        }
        let moved = self.aliases.remove(&src_slot).unwrap_or_default();
        for alias in &moved {
            self.to_slot[alias.as_usize()] = Some(dst_slot);
        }
        self.aliases
            .entry(dst_slot)
            .or_default()
            .extend(moved);
        true
    }

    /// Iterate live slots in slot order.
    pub fn iter_slots(&self) -> impl Iterator<Item = (ObjectId<T>, &T)> {
        self.inner.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_arena_reuses_slots_lifo() {
        let mut arena = ObjectArena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.remove(b), Some("b"));
        assert_eq!(arena.remove(a), Some("a"));
        let c = arena.insert("c");
        // last vacated slot first
        assert_eq!(c, a);
        assert_eq!(arena.get(c), Some(&"c"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn direct_merge_respects_merge_bits() {
        let mut arena = ObjectArena::new();
        let a = arena.insert(vec![1]);
        let b = arena.insert(vec![2]);
        assert!(!arena.merge(a, b, |_, _| true), "merge bits unset");
        arena.set_all_merge_allowed();
        assert!(arena.merge(a, b, |dst, src| {
            dst.append(src);
            true
        }));
        assert_eq!(arena.get(a), Some(&vec![1, 2]));
        assert!(arena.get(b).is_none());
    }

    #[test]
    fn failed_merge_restores_source() {
        let mut arena = ObjectArena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        arena.set_all_merge_allowed();
        assert!(!arena.merge(a, b, |_, _| false));
        assert_eq!(arena.get(b), Some(&2));
    }

    #[test]
    fn alias_merge_retargets_handles() {
        let mut arena = AliasArena::new();
        let a = arena.insert(10);
        let b = arena.insert(20);
        arena.set_all_merge_allowed();
        assert!(arena.merge(a, b, |dst, src| {
            *dst += *src;
            true
        }));
        assert_eq!(arena.get(a), Some(&30));
        assert_eq!(arena.get(b), Some(&30));
        assert_eq!(arena.slot_of(a), arena.slot_of(b));
        assert_eq!(arena.aliases_of(a).len(), 2);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn alias_remove_collapses_emptied_slot() {
        let mut arena = AliasArena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        arena.set_all_merge_allowed();
        assert!(arena.merge(a, b, |_, _| true));
        assert_eq!(arena.remove(a), None, "slot still aliased by b");
        assert_eq!(arena.remove(b), Some(1));
        assert!(arena.is_empty());
        assert!(arena.get(b).is_none());
    }
}
