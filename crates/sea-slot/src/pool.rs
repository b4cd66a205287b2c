//! A homogeneous, fixed-capacity arena with a free-list and per-cell
//! generation counters. This is the layer [`crate::manager::SlotManager`]
//! is built on top of.
//!
//! Modeled on the page/free-list split of a sharded-slab arena and the
//! cache-line padding of `util::CachePadded` (DESIGN.md).

use std::mem::MaybeUninit;

/// Index into a [`SlotPool`]. A small dense integer; no raw addresses ever
/// escape the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolIndex(u32);

/// Reserved index meaning "no entry" — never returned by `alloc`.
pub const NULL_INDEX: PoolIndex = PoolIndex(u32::MAX);

impl PoolIndex {
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_INDEX.0
    }
}

impl From<u32> for PoolIndex {
    fn from(v: u32) -> Self {
        PoolIndex(v)
    }
}

/// Cache-line aligned wrapper, used so that pool elements don't
/// false-share a cache line when `cache_optimised` is requested.
#[repr(align(64))]
#[derive(Debug)]
struct CachePadded<T>(T);

struct Cell<T> {
    generation: u32,
    occupied: bool,
    value: MaybeUninit<T>,
}

impl<T> Cell<T> {
    const fn empty() -> Self {
        Self {
            generation: 0,
            occupied: false,
            value: MaybeUninit::uninit(),
        }
    }
}

/// Fixed-capacity contiguous array of slots with an O(1) LIFO free-index
/// stack. Not thread-safe on its own; upper layers (`SlotManager`) add
/// their own locking, concurrency contract.
pub struct SlotPool<T> {
    cells: Vec<CachePadded<Cell<T>>>,
    free_stack: Vec<PoolIndex>,
    len: usize,
    cache_optimised: bool,
}

impl<T> SlotPool<T> {
    #[must_use]
    pub fn with_capacity(capacity: usize, cache_optimised: bool) -> Self {
        let mut cells = Vec::with_capacity(capacity);
        let mut free_stack = Vec::with_capacity(capacity);
        for i in (0..capacity).rev() {
            cells.push(CachePadded(Cell::empty()));
            free_stack.push(PoolIndex(i as u32));
        }
        Self {
            cells,
            free_stack,
            len: 0,
            cache_optimised,
        }
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn is_cache_optimised(&self) -> bool {
        self.cache_optimised
    }

    /// Allocates a cell in O(1) via the free-index stack, returning its
    /// index and current generation, or `None` when the pool is full.
    pub fn alloc(&mut self, value: T) -> Option<(PoolIndex, u32)> {
        let index = self.free_stack.pop()?;
        let cell = &mut self.cells[index.as_u32() as usize].0;
        debug_assert!(!cell.occupied);
        cell.value = MaybeUninit::new(value);
        cell.occupied = true;
        self.len += 1;
        Some((index, cell.generation))
    }

    /// Frees `index`, clearing its data and bumping its generation so any
    /// handle still referencing the old generation becomes permanently
    /// invalid.
    ///
    /// Returns `false` (a no-op) if `index` was already free or
    /// out-of-range.
    pub fn free(&mut self, index: PoolIndex) -> bool {
        let Some(slot) = self.cells.get_mut(index.as_u32() as usize) else {
            return false;
        };
        let cell = &mut slot.0;
        if !cell.occupied {
            return false;
        }
        // Safety: `occupied` is only set while `value` holds an initialized T.
        unsafe {
            cell.value.assume_init_drop();
        }
        cell.value = MaybeUninit::uninit();
        cell.occupied = false;
        cell.generation = cell.generation.wrapping_add(1);
        self.len -= 1;
        self.free_stack.push(index);
        true
    }

    #[must_use]
    pub fn is_valid(&self, index: PoolIndex) -> bool {
        self.cells
            .get(index.as_u32() as usize)
            .is_some_and(|c| c.0.occupied)
    }

    #[must_use]
    pub fn generation(&self, index: PoolIndex) -> Option<u32> {
        self.cells.get(index.as_u32() as usize).map(|c| c.0.generation)
    }

    /// Returns a shared view of the element at `index`, only while occupied.
    #[must_use]
    pub fn get(&self, index: PoolIndex) -> Option<&T> {
        let cell = &self.cells.get(index.as_u32() as usize)?.0;
        cell.occupied.then(|| unsafe { cell.value.assume_init_ref() })
    }

    /// Returns a writable view of the element at `index`, only while
    /// occupied.
    #[must_use]
    pub fn get_mut(&mut self, index: PoolIndex) -> Option<&mut T> {
        let cell = &mut self.cells.get_mut(index.as_u32() as usize)?.0;
        if cell.occupied {
            Some(unsafe { cell.value.assume_init_mut() })
        } else {
            None
        }
    }

    /// Iterates the indices of every currently-occupied cell, in index
    /// order. Used by [`crate::manager::SlotManager::release_scope`] to
    /// find every slot tagged with a given scope.
    pub fn occupied_indices(&self) -> impl Iterator<Item = PoolIndex> + '_ {
        self.cells.iter().enumerate().filter_map(|(i, c)| {
            c.0.occupied.then(|| PoolIndex(i as u32))
        })
    }
}

impl<T> Drop for SlotPool<T> {
    fn drop(&mut self) {
        for slot in &mut self.cells {
            if slot.0.occupied {
                unsafe {
                    slot.0.value.assume_init_drop();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_free_round_trip() {
        let mut pool: SlotPool<u32> = SlotPool::with_capacity(4, false);
        let (idx, gen0) = pool.alloc(42).unwrap();
        assert_eq!(gen0, 0);
        assert_eq!(*pool.get(idx).unwrap(), 42);
        assert!(pool.free(idx));
        assert!(!pool.is_valid(idx));
        assert_eq!(pool.generation(idx), Some(1));
    }

    #[test]
    fn pool_accounting_tracks_len_and_rejects_overflow() {
        let mut pool: SlotPool<u32> = SlotPool::with_capacity(8, false);
        let mut live = Vec::new();
        for i in 0..8 {
            live.push(pool.alloc(i).unwrap().0);
        }
        assert!(pool.alloc(99).is_none());
        assert_eq!(pool.len(), 8);
        for idx in live.drain(..4) {
            pool.free(idx);
        }
        assert_eq!(pool.len(), 4);
    }

    #[test]
    fn reused_index_has_strictly_greater_generation() {
        let mut pool: SlotPool<u32> = SlotPool::with_capacity(1, false);
        let (idx1, gen1) = pool.alloc(1).unwrap();
        pool.free(idx1);
        let (idx2, gen2) = pool.alloc(2).unwrap();
        assert_eq!(idx1, idx2);
        assert!(gen2 > gen1);
    }
}
