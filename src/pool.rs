//! Fixed-size pools: one segregated pool per size class
//!
//! Each pool owns a single contiguous backing region holding
//! `SLOTS_PER_CLASS` slots of `class_size + LINK_WORD` bytes. The slot
//! range is exactly `[base, base + slots * stride)`, so tier ownership
//! of a released pointer is a pure range comparison. An occupancy
//! bitmap mirrors the free list: it answers the dump queries and turns
//! a repeated release of the same slot into a detected no-op instead of
//! a cycle in the list.

use crate::config::{slot_stride, LINK_WORD, SLOTS_PER_CLASS};
use crate::error::FreelistError;
use crate::freelist;
use crate::stats::PoolStats;
use crate::traits::Region;

/// One fixed-size pool
pub struct FixedPool {
    /// Backing reservation; slots occupy a prefix of it
    region: Region,
    /// Payload size served by this pool
    class_size: usize,
    /// Head of the intrusive free list (0 = exhausted)
    head: usize,
    /// One bit per slot, set while the slot is handed out
    bitmap: u16,
}

impl FixedPool {
    /// Wrap a fresh reservation and thread all slots onto the free list.
    ///
    /// # Safety
    /// `region` must be mapped, writable, and at least
    /// `pool_bytes(class_size)` long. The region must stay mapped for
    /// the life of the pool.
    pub unsafe fn new(region: Region, class_size: usize) -> Self {
        let mut pool = Self {
            region,
            class_size,
            head: 0,
            bitmap: 0,
        };
        // SAFETY: caller guarantees the region is mapped and writable
        unsafe { freelist::thread_slots(&mut pool) };
        pool
    }

    /// Size class served by this pool
    pub fn class_size(&self) -> usize {
        self.class_size
    }

    /// Distance between slot starts
    pub fn stride(&self) -> usize {
        slot_stride(self.class_size)
    }

    /// First slot address
    pub fn base_addr(&self) -> usize {
        self.region.base_addr()
    }

    /// One past the last slot byte
    pub fn end_addr(&self) -> usize {
        self.base_addr() + SLOTS_PER_CLASS * self.stride()
    }

    /// Total slot count
    pub fn total_slots(&self) -> usize {
        SLOTS_PER_CLASS
    }

    /// The backing reservation, for teardown
    pub fn region(&self) -> Region {
        self.region
    }

    pub(crate) fn head(&self) -> usize {
        self.head
    }

    pub(crate) fn set_head(&mut self, head: usize) {
        self.head = head;
    }

    /// Address-range ownership test
    pub fn owns(&self, addr: usize) -> bool {
        addr >= self.base_addr() && addr < self.end_addr()
    }

    /// Slot index for an address inside the pool range.
    ///
    /// Interior addresses normalize to their containing slot.
    pub fn addr_to_slot(&self, addr: usize) -> Option<usize> {
        if !self.owns(addr) {
            return None;
        }
        Some((addr - self.base_addr()) / self.stride())
    }

    /// Start address of a slot
    pub fn slot_to_addr(&self, idx: usize) -> usize {
        self.base_addr() + idx * self.stride()
    }

    /// Take the head slot off the free list.
    ///
    /// Returns `Ok(None)` when the pool is fully occupied; the caller
    /// falls through to the arena.
    pub fn alloc(&mut self) -> Result<Option<usize>, FreelistError> {
        // SAFETY: the region is mapped for the life of the pool
        let slot = match unsafe { freelist::pop_slot(self)? } {
            Some(slot) => slot,
            None => return Ok(None),
        };

        let idx = (slot - self.base_addr()) / self.stride();
        let was_free = self.mark_used(idx);
        debug_assert!(was_free, "popped a slot already marked in use");
        Ok(Some(slot))
    }

    /// Re-thread the slot containing `addr` onto the free list head.
    ///
    /// Returns `false` if the slot was already free (double release);
    /// the list is left untouched in that case.
    pub fn release(&mut self, addr: usize) -> bool {
        let idx = match self.addr_to_slot(addr) {
            Some(idx) => idx,
            None => return false,
        };

        if !self.mark_free(idx) {
            return false;
        }

        let slot = self.slot_to_addr(idx);
        // SAFETY: slot is a slot start inside the mapped region
        unsafe { freelist::push_slot(self, slot) };
        true
    }

    /// Mark a slot handed out. Returns `true` if it was free before.
    fn mark_used(&mut self, idx: usize) -> bool {
        let mask = 1u16 << idx;
        let was_free = self.bitmap & mask == 0;
        self.bitmap |= mask;
        was_free
    }

    /// Mark a slot free. Returns `true` if it was handed out before.
    fn mark_free(&mut self, idx: usize) -> bool {
        let mask = 1u16 << idx;
        let was_used = self.bitmap & mask != 0;
        self.bitmap &= !mask;
        was_used
    }

    /// Slots currently handed out
    pub fn occupied(&self) -> usize {
        self.bitmap.count_ones() as usize
    }

    /// Slots on the free list
    pub fn free_slots(&self) -> usize {
        SLOTS_PER_CLASS - self.occupied()
    }

    /// Addresses of the slots currently handed out, ascending
    pub fn occupied_slots(&self) -> impl Iterator<Item = usize> + '_ {
        (0..SLOTS_PER_CLASS)
            .filter(move |idx| self.bitmap & (1u16 << idx) != 0)
            .map(move |idx| self.slot_to_addr(idx))
    }

    /// Occupancy snapshot
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            class_size: self.class_size,
            occupied: self.occupied(),
            free: self.free_slots(),
        }
    }
}

// The link word must hold a full address
const _: () = assert!(LINK_WORD == core::mem::size_of::<usize>());
