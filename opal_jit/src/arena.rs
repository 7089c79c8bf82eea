//! Arena storage for IR nodes.
//!
//! All three IRs store their nodes in arenas and refer to them through
//! typed `u32` indices. CIR variables are never structurally compared:
//! two variables are equal exactly when their `Id`s are equal, which
//! reduces reference-identity semantics to index equality.

use std::marker::PhantomData;
use std::ops::{Index, IndexMut};

/// A type-safe index into an [`Arena<T>`].
///
/// The phantom parameter keeps ids from different arenas apart. Traits are
/// implemented manually so `Id<T>` is `Copy`/`Eq`/`Hash` regardless of `T`.
pub struct Id<T> {
    index: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Copy for Id<T> {}

impl<T> Clone for Id<T> {
    #[inline]
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Id<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl<T> Eq for Id<T> {}

impl<T> std::hash::Hash for Id<T> {
    #[inline]
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.index.hash(state);
    }
}

impl<T> Id<T> {
    /// Create an id from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Id {
            index,
            _marker: PhantomData,
        }
    }

    /// The raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// The index as `usize`.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.index as usize
    }
}

impl<T> std::fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.index)
    }
}

/// Append-only arena of homogeneous nodes.
///
/// Nodes are never freed individually; the whole arena is dropped when the
/// per-method compilation finishes.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    items: Vec<T>,
}

// Manual impl: an empty arena needs no `T: Default`.
impl<T> Default for Arena<T> {
    fn default() -> Self {
        Arena::new()
    }
}

impl<T> Arena<T> {
    /// Create an empty arena.
    #[inline]
    pub fn new() -> Self {
        Arena { items: Vec::new() }
    }

    /// Allocate a node and return its id.
    #[inline]
    pub fn alloc(&mut self, item: T) -> Id<T> {
        let id = Id::new(self.items.len() as u32);
        self.items.push(item);
        id
    }

    /// Number of nodes allocated.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the arena holds no nodes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate over all nodes with their ids.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (Id<T>, &T)> {
        self.items
            .iter()
            .enumerate()
            .map(|(i, item)| (Id::new(i as u32), item))
    }

    /// Iterate over all ids.
    #[inline]
    pub fn ids(&self) -> impl Iterator<Item = Id<T>> {
        (0..self.items.len() as u32).map(Id::new)
    }
}

impl<T> Index<Id<T>> for Arena<T> {
    type Output = T;

    #[inline]
    fn index(&self, id: Id<T>) -> &T {
        &self.items[id.as_usize()]
    }
}

impl<T> IndexMut<Id<T>> for Arena<T> {
    #[inline]
    fn index_mut(&mut self, id: Id<T>) -> &mut T {
        &mut self.items[id.as_usize()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        value: i32,
    }

    #[test]
    fn test_alloc_and_index() {
        let mut arena: Arena<Node> = Arena::new();
        let a = arena.alloc(Node { value: 1 });
        let b = arena.alloc(Node { value: 2 });

        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(arena[a].value, 1);

        arena[b].value = 20;
        assert_eq!(arena[b].value, 20);
    }

    #[test]
    fn test_id_identity() {
        let mut arena: Arena<Node> = Arena::new();
        let a = arena.alloc(Node { value: 7 });
        let b = arena.alloc(Node { value: 7 });

        // Structurally equal nodes are still distinct instances.
        assert_ne!(a, b);
        assert_eq!(a, Id::new(0));
    }

    #[test]
    fn test_default_needs_no_item_default() {
        // Node has no Default impl; an empty arena of it must still exist.
        let arena: Arena<Node> = Arena::default();
        assert!(arena.is_empty());
    }

    #[test]
    fn test_iter() {
        let mut arena: Arena<Node> = Arena::new();
        arena.alloc(Node { value: 1 });
        arena.alloc(Node { value: 2 });

        let values: Vec<_> = arena.iter().map(|(_, n)| n.value).collect();
        assert_eq!(values, vec![1, 2]);
    }
}
