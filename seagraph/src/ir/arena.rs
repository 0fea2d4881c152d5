//! Slot storage for IR nodes.
//!
//! - **Append-only ids**: a slot index is handed out once; removing the item
//!   leaves an empty slot that is never refilled
//! - **Side tables**: [`SecondaryMap`] hangs extra per-node data off the same
//!   ids without touching the node payload
//! - **Marking**: [`BitSet`] for reachability and worklist membership
//!
//! Because ids are never recycled, a stale `NodeId` held by a worklist or a
//! statistics table can always be detected with [`Arena::contains`].

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

// =============================================================================
// Typed ID
// =============================================================================

/// Index of an item in an [`Arena<T>`].
///
/// The phantom parameter keeps ids of different arenas apart. All traits are
/// implemented by hand so that they hold for every `T`.
pub struct Id<T> {
    raw: u32,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self {
            raw,
            _kind: PhantomData,
        }
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.raw
    }

    #[inline]
    pub const fn as_usize(self) -> usize {
        self.raw as usize
    }
}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Id<T> {}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}
impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Id<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T> Hash for Id<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.raw);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.raw)
    }
}

// =============================================================================
// Arena
// =============================================================================

/// Append-only item store with tombstoned removal.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Option<T>>,
    live: usize,
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            live: 0,
        }
    }

    /// Store `item` in a fresh slot.
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let id = Id::new(self.slots.len() as u32);
        self.slots.push(Some(item));
        self.live += 1;
        id
    }

    /// Empty the slot of `id`, returning its item if it was live.
    pub fn remove(&mut self, id: Id<T>) -> Option<T> {
        let taken = self.slots.get_mut(id.as_usize()).and_then(Option::take);
        self.live -= taken.is_some() as usize;
        taken
    }

    #[inline]
    pub fn contains(&self, id: Id<T>) -> bool {
        self.get(id).is_some()
    }

    #[inline]
    pub fn get(&self, id: Id<T>) -> Option<&T> {
        self.slots.get(id.as_usize())?.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, id: Id<T>) -> Option<&mut T> {
        self.slots.get_mut(id.as_usize())?.as_mut()
    }

    /// Live items.
    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// One past the highest id ever allocated.
    #[inline]
    pub fn id_bound(&self) -> usize {
        self.slots.len()
    }

    /// Live items in allocation order.
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.slots
            .iter()
            .zip(0u32..)
            .filter_map(|(slot, raw)| Some((Id::new(raw), slot.as_ref()?)))
    }

    /// Live ids in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> + '_ {
        self.iter().map(|(id, _)| id)
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    /// Panics if `id` was removed.
    fn index(&self, id: Id<T>) -> &T {
        self.get(id)
            .unwrap_or_else(|| panic!("{id} refers to a removed node"))
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    fn index_mut(&mut self, id: Id<T>) -> &mut T {
        self.get_mut(id)
            .unwrap_or_else(|| panic!("{id} refers to a removed node"))
    }
}

// =============================================================================
// Secondary Map
// =============================================================================

/// Dense per-id side table; ids without an entry read as `V::default()`.
#[derive(Debug, Clone)]
pub struct SecondaryMap<K, V> {
    values: Vec<V>,
    _key: PhantomData<fn() -> K>,
}

impl<K, V: Default> SecondaryMap<K, V> {
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            _key: PhantomData,
        }
    }

    pub fn get(&self, id: Id<K>) -> Option<&V> {
        self.values.get(id.as_usize())
    }

    pub fn get_mut(&mut self, id: Id<K>) -> Option<&mut V> {
        self.values.get_mut(id.as_usize())
    }

    /// Value for `id`, created on first access.
    pub fn entry(&mut self, id: Id<K>) -> &mut V {
        let at = id.as_usize();
        if at >= self.values.len() {
            self.values.resize_with(at + 1, V::default);
        }
        &mut self.values[at]
    }

    /// Put the value for `id` back to its default.
    pub fn reset(&mut self, id: Id<K>) {
        if let Some(value) = self.values.get_mut(id.as_usize()) {
            *value = V::default();
        }
    }
}

impl<K, V: Default> Default for SecondaryMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Bit Set
// =============================================================================

/// Growable set of small integers, one bit each.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BitSet {
    words: Vec<u64>,
}

#[inline]
fn locate(index: usize) -> (usize, u64) {
    (index / 64, 1 << (index % 64))
}

impl BitSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set that holds `0..n` without reallocating.
    pub fn with_capacity(n: usize) -> Self {
        Self {
            words: vec![0; n.div_ceil(64)],
        }
    }

    /// Add `index`. Returns `true` if it was not present.
    #[inline]
    pub fn insert(&mut self, index: usize) -> bool {
        let (word, mask) = locate(index);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let fresh = self.words[word] & mask == 0;
        self.words[word] |= mask;
        fresh
    }

    #[inline]
    pub fn remove(&mut self, index: usize) {
        let (word, mask) = locate(index);
        if let Some(w) = self.words.get_mut(word) {
            *w &= !mask;
        }
    }

    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        let (word, mask) = locate(index);
        self.words.get(word).is_some_and(|w| w & mask != 0)
    }
}
