//! Backing storage for cached instances.
//!
//! A [`SlotArray`] is a fixed-size array of `N` slots, each capable of
//! holding zero or one constructed `T`. Storage is pre-sized and never
//! grown or shrunk, and every slot is individually heap-allocated
//! (`Box<UnsafeCell<Option<T>>>`) so its address is stable for the life of
//! the array — required by the stable-address reuse property: reacquiring
//! a slot without an intervening destruction must observe the same
//! pointer. Callers therefore never move a value out of a slot; once
//! [`construct`](SlotArray::construct) has placed a value at index `idx`,
//! that value's address is fixed until [`clear_slot`](SlotArray::clear_slot)
//! drops it in place. Pools hand out that pointer directly rather than
//! taking ownership of the value, which is what makes the same address
//! reappear across a release-then-reacquire cycle.
//!
//! Free/idle slot indices are tracked in a lock-free [`SegQueue`], giving
//! linearizable concurrent push/pop without a global lock on the array.

use crossbeam_queue::SegQueue;
use std::cell::UnsafeCell;

/// Fixed-size, stable-address storage for up to `N` cached instances.
pub(crate) struct SlotArray<T> {
    slots: Vec<Box<UnsafeCell<Option<T>>>>,
    free: SegQueue<usize>,
}

// SAFETY: access to a given slot's `UnsafeCell` is only ever performed by
// whoever currently holds that slot's index (taken from `free`, or handed
// back by the admission-control layer above us, or briefly by a reader
// that has independently established via other synchronization that no
// writer holds the index); callers of `SlotArray` uphold this discipline.
unsafe impl<T: Send> Send for SlotArray<T> {}
unsafe impl<T: Send> Sync for SlotArray<T> {}

impl<T> SlotArray<T> {
    /// Create an array of `n` empty slots, all initially free.
    pub(crate) fn new(n: usize) -> Self {
        let mut slots = Vec::with_capacity(n);
        slots.resize_with(n, || Box::new(UnsafeCell::new(None)));

        let free = SegQueue::new();
        for idx in 0..n {
            free.push(idx);
        }

        Self { slots, free }
    }

    /// Total number of slots (fixed at construction).
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Pop a free slot index, if any.
    pub(crate) fn pop_free(&self) -> Option<usize> {
        self.free.pop()
    }

    /// Push a slot index back onto the free list.
    pub(crate) fn push_free(&self, idx: usize) {
        self.free.push(idx);
    }

    /// Number of indices currently on the free list.
    pub(crate) fn free_len(&self) -> usize {
        self.free.len()
    }

    fn cell(&self, idx: usize) -> *mut Option<T> {
        self.slots[idx].get()
    }

    /// If slot `idx` is currently occupied, return a stable pointer to its
    /// payload without disturbing it.
    ///
    /// # Safety
    /// The caller must hold exclusive access to `idx` (popped from `free`
    /// and not yet pushed back), or otherwise know no writer can be
    /// concurrently constructing/clearing this slot.
    pub(crate) unsafe fn occupied_ptr(&self, idx: usize) -> Option<*mut T> {
        match &mut *self.cell(idx) {
            Some(value) => Some(value as *mut T),
            None => None,
        }
    }

    /// Construct `value` into slot `idx`, overwriting whatever was there,
    /// and return a stable pointer to the new payload.
    ///
    /// # Safety
    /// The caller must hold exclusive access to `idx`. Callers should only
    /// invoke this on a slot observed empty via [`occupied_ptr`] moments
    /// earlier, to honor the "construct once, reuse forever" admission
    /// rule described on each pool's `acquire`.
    ///
    /// [`occupied_ptr`]: SlotArray::occupied_ptr
    pub(crate) unsafe fn construct(&self, idx: usize, value: T) -> *mut T {
        let cell = &mut *self.cell(idx);
        *cell = Some(value);
        cell.as_mut().expect("value just stored") as *mut T
    }

    /// Drop the value at `idx` in place, leaving the slot empty.
    ///
    /// # Safety
    /// The caller must hold exclusive access to `idx`.
    pub(crate) unsafe fn clear_slot(&self, idx: usize) {
        *self.cell(idx) = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_array_has_all_slots_free() {
        let arr: SlotArray<i32> = SlotArray::new(4);
        assert_eq!(arr.len(), 4);
        assert_eq!(arr.free_len(), 4);
    }

    #[test]
    fn pop_and_push_free_round_trips() {
        let arr: SlotArray<i32> = SlotArray::new(2);
        let a = arr.pop_free().expect("slot available");
        let b = arr.pop_free().expect("slot available");
        assert_ne!(a, b);
        assert!(arr.pop_free().is_none());

        arr.push_free(a);
        assert_eq!(arr.free_len(), 1);
    }

    #[test]
    fn construct_then_reacquire_preserves_address() {
        let arr: SlotArray<Vec<u8>> = SlotArray::new(1);
        let idx = arr.pop_free().expect("slot available");

        let ptr_first = unsafe {
            assert!(arr.occupied_ptr(idx).is_none());
            arr.construct(idx, vec![1, 2, 3])
        };
        arr.push_free(idx);

        let idx_again = arr.pop_free().expect("slot available");
        assert_eq!(idx_again, idx);
        let ptr_second = unsafe { arr.occupied_ptr(idx_again) }.expect("value still present");

        assert_eq!(ptr_first, ptr_second);
        assert_eq!(unsafe { &*ptr_second }, &vec![1u8, 2, 3]);
    }

    #[test]
    fn clear_slot_drops_value_and_leaves_it_empty() {
        let arr: SlotArray<Vec<u8>> = SlotArray::new(1);
        let idx = arr.pop_free().expect("slot available");
        unsafe {
            arr.construct(idx, vec![1, 2, 3]);
            arr.clear_slot(idx);
            assert!(arr.occupied_ptr(idx).is_none());
        }
    }
}
