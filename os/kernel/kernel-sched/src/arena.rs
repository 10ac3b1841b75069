//! Fixed-capacity slot table with generation-checked handles.
//!
//! A `u64` bitmap records which slots are occupied. Every slot carries a
//! generation that is bumped when its value is removed, so a [`Handle`] to a
//! removed value never resolves to whatever reuses the slot later.

use core::fmt;
use core::mem::MaybeUninit;

/// Index plus the generation the slot had when the value was inserted.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Handle {
    index: u16,
    generation: u32,
}

impl Handle {
    #[must_use]
    pub const fn new(index: u16, generation: u32) -> Self {
        Self { index, generation }
    }

    #[must_use]
    pub const fn index(self) -> usize {
        self.index as usize
    }

    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

/// Up to `N <= 64` values of `T`.
pub struct Arena<T, const N: usize> {
    occupied: u64,
    generations: [u32; N],
    slots: [MaybeUninit<T>; N],
}

impl<T, const N: usize> Default for Arena<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Arena<T, N> {
    const CAPACITY_FITS: () = assert!(N > 0 && N <= 64);

    #[must_use]
    pub const fn new() -> Self {
        let () = Self::CAPACITY_FITS;
        Self {
            occupied: 0,
            generations: [0; N],
            slots: [const { MaybeUninit::uninit() }; N],
        }
    }

    const fn bit(index: usize) -> u64 {
        1 << index
    }

    const fn is_occupied(&self, index: usize) -> bool {
        index < N && self.occupied & Self::bit(index) != 0
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.occupied.count_ones() as usize
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.len() == N
    }

    #[must_use]
    pub const fn capacity(&self) -> usize {
        N
    }

    fn first_free(&self) -> Option<usize> {
        let index = (!self.occupied).trailing_zeros() as usize;
        (index < N).then_some(index)
    }

    /// Stores `value` in the lowest free slot.
    ///
    /// # Errors
    /// Hands `value` back if the arena is full.
    pub fn insert(&mut self, value: T) -> Result<Handle, T> {
        match self.first_free() {
            Some(index) => Ok(self.insert_with(index, |_| value)),
            None => Err(value),
        }
    }

    /// Stores the value built by `make`, which learns its own handle first.
    ///
    /// Returns `None` if the arena is full.
    pub fn insert_with_handle(&mut self, make: impl FnOnce(Handle) -> T) -> Option<Handle> {
        let index = self.first_free()?;
        Some(self.insert_with(index, make))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn insert_with(&mut self, index: usize, make: impl FnOnce(Handle) -> T) -> Handle {
        let handle = Handle::new(index as u16, self.generations[index]);
        self.slots[index].write(make(handle));
        self.occupied |= Self::bit(index);
        handle
    }

    /// The handle currently valid for slot `index`, if occupied.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn handle_at(&self, index: usize) -> Option<Handle> {
        self.is_occupied(index)
            .then(|| Handle::new(index as u16, self.generations[index]))
    }

    #[must_use]
    pub fn contains(&self, handle: Handle) -> bool {
        self.is_occupied(handle.index()) && self.generations[handle.index()] == handle.generation
    }

    #[must_use]
    #[allow(unsafe_code)]
    pub fn get(&self, handle: Handle) -> Option<&T> {
        if !self.contains(handle) {
            return None;
        }
        // SAFETY: the occupancy bit is set only while the slot is initialized.
        Some(unsafe { self.slots[handle.index()].assume_init_ref() })
    }

    #[allow(unsafe_code)]
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut T> {
        if !self.contains(handle) {
            return None;
        }
        // SAFETY: as in `get`.
        Some(unsafe { self.slots[handle.index()].assume_init_mut() })
    }

    /// Takes the value out and retires `handle`.
    #[allow(unsafe_code)]
    pub fn remove(&mut self, handle: Handle) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let index = handle.index();
        self.occupied &= !Self::bit(index);
        self.generations[index] = self.generations[index].wrapping_add(1);
        // SAFETY: the slot was initialized and is now marked free, so it is
        // read exactly once.
        Some(unsafe { self.slots[index].assume_init_read() })
    }

    /// Occupied slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Handle, &T)> + '_ {
        (0..N).filter_map(move |index| {
            let handle = self.handle_at(index)?;
            self.get(handle).map(|value| (handle, value))
        })
    }

    /// Occupied slot handles in index order.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        (0..N).filter_map(move |index| self.handle_at(index))
    }
}

impl<T, const N: usize> Drop for Arena<T, N> {
    #[allow(unsafe_code)]
    fn drop(&mut self) {
        for index in 0..N {
            if self.is_occupied(index) {
                // SAFETY: occupied slots are initialized and dropped once.
                unsafe { self.slots[index].assume_init_drop() };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fills_lowest_slot_first() {
        let mut arena: Arena<&str, 3> = Arena::new();
        let a = arena.insert("a").unwrap();
        let b = arena.insert("b").unwrap();
        assert_eq!((a.index(), b.index()), (0, 1));

        arena.remove(a);
        let c = arena.insert("c").unwrap();
        assert_eq!(c.index(), 0);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn stale_handles_do_not_resolve() {
        let mut arena: Arena<u32, 2> = Arena::new();
        let old = arena.insert(1).unwrap();
        assert_eq!(arena.remove(old), Some(1));
        let new = arena.insert(2).unwrap();

        assert_eq!(old.index(), new.index());
        assert_ne!(old, new);
        assert_eq!(arena.get(old), None);
        assert_eq!(arena.remove(old), None);
        assert_eq!(arena.get(new), Some(&2));
    }

    #[test]
    fn full_arena_returns_the_value() {
        let mut arena: Arena<u8, 1> = Arena::new();
        arena.insert(1).unwrap();
        assert!(arena.is_full());
        assert_eq!(arena.insert(2), Err(2));
        assert_eq!(arena.insert_with_handle(|_| 3), None);
    }

    #[test]
    fn handle_is_known_while_building() {
        let mut arena: Arena<Handle, 4> = Arena::new();
        arena.insert(Handle::new(9, 9)).unwrap();
        let h = arena.insert_with_handle(|h| h).unwrap();
        assert_eq!(arena.get(h), Some(&h));
        assert_eq!(arena.handles().collect::<Vec<_>>().len(), 2);
    }

    #[test]
    fn values_are_dropped_with_the_arena() {
        use std::rc::Rc;
        let tracker = Rc::new(());
        {
            let mut arena: Arena<Rc<()>, 64> = Arena::new();
            for _ in 0..64 {
                arena.insert(Rc::clone(&tracker)).unwrap();
            }
            let first = arena.handle_at(0).unwrap();
            drop(arena.remove(first));
            assert_eq!(Rc::strong_count(&tracker), 64);
        }
        assert_eq!(Rc::strong_count(&tracker), 1);
    }
}
