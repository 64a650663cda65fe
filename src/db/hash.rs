// src/db/hash.rs

//! Content-keyed hash index and typed arenas
//!
//! Entities (names, packages, directories, files) live in [`Arena`]s and are
//! referred to by small copyable ids. A [`HashIndex`] maps the entity's key
//! bytes (a name, a path, a checksum) to its id. Keys are hashed with the
//! blob MurmurHash3 and chained per bucket.

use crate::blob::Blob;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

const DEFAULT_BUCKETS: usize = 64;

/// Average chain length that triggers a resize
const MAX_LOAD: usize = 2;

struct Slot<V> {
    hash: u32,
    key: Box<[u8]>,
    value: V,
}

/// Chained hash table from owned byte keys to copyable values
pub struct HashIndex<V> {
    buckets: Vec<Vec<Slot<V>>>,
    len: usize,
}

impl<V: Copy> HashIndex<V> {
    pub fn new() -> Self {
        Self::with_buckets(DEFAULT_BUCKETS)
    }

    /// Create an index sized for roughly `hint` entries
    pub fn with_buckets(hint: usize) -> Self {
        let count = hint.max(1).next_power_of_two();
        Self {
            buckets: (0..count).map(|_| Vec::new()).collect(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn bucket_of(&self, hash: u32) -> usize {
        hash as usize & (self.buckets.len() - 1)
    }

    pub fn get(&self, key: &[u8]) -> Option<V> {
        let hash = Blob::new(key).hash();
        self.buckets[self.bucket_of(hash)]
            .iter()
            .find(|slot| slot.hash == hash && &*slot.key == key)
            .map(|slot| slot.value)
    }

    pub fn contains_key(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Look up `key`, inserting the value produced by `create` if absent
    ///
    /// Returns the value and whether it was newly inserted.
    pub fn get_or_insert_with(&mut self, key: &[u8], create: impl FnOnce() -> V) -> (V, bool) {
        if let Some(value) = self.get(key) {
            return (value, false);
        }
        let value = create();
        self.insert(key, value);
        (value, true)
    }

    /// Insert or replace, returning the previous value
    pub fn insert(&mut self, key: &[u8], value: V) -> Option<V> {
        let hash = Blob::new(key).hash();
        let bucket = self.bucket_of(hash);
        if let Some(slot) = self.buckets[bucket]
            .iter_mut()
            .find(|slot| slot.hash == hash && &*slot.key == key)
        {
            return Some(std::mem::replace(&mut slot.value, value));
        }

        self.buckets[bucket].push(Slot {
            hash,
            key: key.into(),
            value,
        });
        self.len += 1;
        if self.len > self.buckets.len() * MAX_LOAD {
            self.grow();
        }
        None
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<V> {
        let hash = Blob::new(key).hash();
        let bucket = self.bucket_of(hash);
        let chain = &mut self.buckets[bucket];
        let pos = chain
            .iter()
            .position(|slot| slot.hash == hash && &*slot.key == key)?;
        self.len -= 1;
        Some(chain.swap_remove(pos).value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&[u8], V)> + '_ {
        self.buckets
            .iter()
            .flatten()
            .map(|slot| (&*slot.key, slot.value))
    }

    pub fn values(&self) -> impl Iterator<Item = V> + '_ {
        self.buckets.iter().flatten().map(|slot| slot.value)
    }

    fn grow(&mut self) {
        let count = self.buckets.len() * 2;
        let old = std::mem::replace(
            &mut self.buckets,
            (0..count).map(|_| Vec::new()).collect(),
        );
        for slot in old.into_iter().flatten() {
            let bucket = self.bucket_of(slot.hash);
            self.buckets[bucket].push(slot);
        }
    }
}

impl<V: Copy> Default for HashIndex<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Small integer handle into an [`Arena`]
pub trait ArenaId: Copy + Eq + fmt::Debug {
    fn from_index(index: usize) -> Self;
    fn index(self) -> usize;
}

/// Declare a `u32` newtype id usable with [`Arena`]
macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u32);

        impl $crate::db::hash::ArenaId for $name {
            fn from_index(index: usize) -> Self {
                Self(index as u32)
            }

            fn index(self) -> usize {
                self.0 as usize
            }
        }
    };
}

pub(crate) use arena_id;

/// Slot storage with id reuse
pub struct Arena<I, T> {
    slots: Vec<Option<T>>,
    free: Vec<usize>,
    live: usize,
    _id: PhantomData<I>,
}

impl<I: ArenaId, T> Arena<I, T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            live: 0,
            _id: PhantomData,
        }
    }

    pub fn insert(&mut self, value: T) -> I {
        self.live += 1;
        match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(value);
                I::from_index(index)
            }
            None => {
                self.slots.push(Some(value));
                I::from_index(self.slots.len() - 1)
            }
        }
    }

    pub fn remove(&mut self, id: I) -> Option<T> {
        let value = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id.index());
        self.live -= 1;
        Some(value)
    }

    pub fn get(&self, id: I) -> Option<&T> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    pub fn ids(&self) -> impl Iterator<Item = I> + '_ {
        self.iter().map(|(id, _)| id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|value| (I::from_index(index), value)))
    }
}

impl<I: ArenaId, T> Default for Arena<I, T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Indexing with a stale id is a bug in the caller and panics like `Vec`
impl<I: ArenaId, T> Index<I> for Arena<I, T> {
    type Output = T;

    fn index(&self, id: I) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("stale arena id {:?}", id),
        }
    }
}

impl<I: ArenaId, T> IndexMut<I> for Arena<I, T> {
    fn index_mut(&mut self, id: I) -> &mut T {
        match self.get_mut(id) {
            Some(value) => value,
            None => panic!("stale arena id {:?}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    arena_id!(TestId);

    #[test]
    fn test_insert_get_remove() {
        let mut index: HashIndex<u32> = HashIndex::new();
        assert_eq!(index.insert(b"usr/bin", 1), None);
        assert_eq!(index.insert(b"usr/lib", 2), None);
        assert_eq!(index.get(b"usr/bin"), Some(1));
        assert_eq!(index.insert(b"usr/bin", 3), Some(1));
        assert_eq!(index.len(), 2);
        assert_eq!(index.remove(b"usr/bin"), Some(3));
        assert_eq!(index.get(b"usr/bin"), None);
        assert_eq!(index.remove(b"usr/bin"), None);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_get_or_insert_with() {
        let mut index: HashIndex<u32> = HashIndex::new();
        assert_eq!(index.get_or_insert_with(b"musl", || 7), (7, true));
        assert_eq!(index.get_or_insert_with(b"musl", || 9), (7, false));
    }

    #[test]
    fn test_growth_keeps_entries() {
        let mut index: HashIndex<usize> = HashIndex::with_buckets(2);
        for i in 0..1000 {
            index.insert(format!("file-{i}").as_bytes(), i);
        }
        assert_eq!(index.len(), 1000);
        for i in 0..1000 {
            assert_eq!(index.get(format!("file-{i}").as_bytes()), Some(i));
        }
        assert_eq!(index.iter().count(), 1000);
    }

    #[test]
    fn test_empty_key() {
        let mut index: HashIndex<u8> = HashIndex::new();
        index.insert(b"", 1);
        assert_eq!(index.get(b""), Some(1));
    }

    #[test]
    fn test_arena_reuses_ids() {
        let mut arena: Arena<TestId, &str> = Arena::new();
        let a = arena.insert("a");
        let b = arena.insert("b");
        assert_eq!(arena.len(), 2);
        assert_eq!(arena.remove(a), Some("a"));
        assert_eq!(arena.remove(a), None);
        assert!(!arena.contains(a));
        let c = arena.insert("c");
        assert_eq!(c, a);
        assert_eq!(arena[b], "b");
        assert_eq!(arena.iter().count(), 2);
    }
}
