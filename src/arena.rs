//! Coalescing arena: one region, one address-ordered block list
//!
//! Every block, free or in use, is preceded by a [`BlockHeader`] whose
//! `prev`/`next` pointers form a doubly-linked list in address order.
//! Allocation is a first-fit walk from the head with a split when the
//! leftover can hold a header plus payload; release marks the block free
//! and absorbs free neighbors, so no two adjacent free blocks survive a
//! release. Header/payload translation is funneled through one pair of
//! helpers.

use core::marker::PhantomData;
use core::ptr;

use crate::config::{ALIGN, ARENA_BYTES};
use crate::stats::ArenaStats;
use crate::traits::Region;

/// In-band metadata preceding every arena payload
#[repr(C)]
pub struct BlockHeader {
    /// Payload bytes following this header
    size: usize,
    /// Previous block in address order (null at the head)
    prev: *mut BlockHeader,
    /// Next block in address order (null at the tail)
    next: *mut BlockHeader,
    /// Whether the payload is handed out
    in_use: bool,
}

/// Bytes consumed by a block header
pub const HEADER_BYTES: usize = core::mem::size_of::<BlockHeader>();

/// A block as seen by the dump walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Payload address
    pub addr: usize,
    /// Payload size in bytes
    pub size: usize,
    /// Whether the payload is handed out
    pub in_use: bool,
}

/// The coalescing arena
pub struct Arena {
    /// Backing reservation
    region: Region,
    /// First block, always at the region base
    head: *mut BlockHeader,
}

impl Arena {
    /// Lay out the initial single free block over a fresh reservation.
    ///
    /// # Safety
    /// `region` must be mapped, writable, at least `ARENA_BYTES` long,
    /// and stay mapped for the life of the arena.
    pub unsafe fn new(region: Region) -> Self {
        let head = region.base as *mut BlockHeader;
        // SAFETY: caller guarantees the region is mapped and large enough
        unsafe {
            head.write(BlockHeader {
                size: ARENA_BYTES - HEADER_BYTES,
                prev: ptr::null_mut(),
                next: ptr::null_mut(),
                in_use: false,
            });
        }
        Self { region, head }
    }

    /// Region base address
    pub fn base_addr(&self) -> usize {
        self.region.base_addr()
    }

    /// The backing reservation, for teardown
    pub fn region(&self) -> Region {
        self.region
    }

    /// Address-range ownership test. Payloads sit strictly inside the
    /// region: the first one starts a header past the base.
    pub fn owns(&self, addr: usize) -> bool {
        addr > self.base_addr() && addr < self.base_addr() + ARENA_BYTES
    }

    fn header_from_payload(payload: usize) -> *mut BlockHeader {
        (payload - HEADER_BYTES) as *mut BlockHeader
    }

    fn payload_from_header(block: *mut BlockHeader) -> usize {
        block as usize + HEADER_BYTES
    }

    /// First-fit carve. `n` is the already-aligned request size.
    ///
    /// Returns the payload address, or `None` when no free block is
    /// large enough. The arena is unchanged on the `None` path.
    pub fn alloc(&mut self, n: usize) -> Option<usize> {
        debug_assert!(n % ALIGN == 0);

        let mut cur = self.head;
        while !cur.is_null() {
            // SAFETY: cur came from the list this arena maintains
            unsafe {
                if !(*cur).in_use && (*cur).size >= n {
                    if (*cur).size > n + HEADER_BYTES {
                        self.split(cur, n);
                    }
                    (*cur).in_use = true;
                    return Some(Self::payload_from_header(cur));
                }
                cur = (*cur).next;
            }
        }
        None
    }

    /// Carve the tail of `block` into a new free block of the leftover.
    ///
    /// # Safety
    /// `block` must be a live list entry with
    /// `size > n + HEADER_BYTES`.
    unsafe fn split(&mut self, block: *mut BlockHeader, n: usize) {
        // SAFETY: caller guarantees block is live and the leftover fits
        unsafe {
            let carved = (block as usize + HEADER_BYTES + n) as *mut BlockHeader;
            carved.write(BlockHeader {
                size: (*block).size - n - HEADER_BYTES,
                prev: block,
                next: (*block).next,
                in_use: false,
            });

            if !(*block).next.is_null() {
                (*(*block).next).prev = carved;
            }
            (*block).next = carved;
            (*block).size = n;
        }
    }

    /// Mark the block owning `payload` free and merge with free
    /// neighbors. Returns `false` if the block was already free.
    ///
    /// # Safety
    /// `payload` must be an address previously returned by
    /// [`alloc`](Self::alloc) on this arena.
    pub unsafe fn release(&mut self, payload: usize) -> bool {
        let block = Self::header_from_payload(payload);
        // SAFETY: caller guarantees payload came from this arena
        unsafe {
            if !(*block).in_use {
                return false;
            }
            (*block).in_use = false;
            self.merge(block);
        }
        true
    }

    /// Absorb `block` into a free predecessor, then absorb a free
    /// successor. Single-step in each direction: the no-adjacent-free
    /// invariant held before this release, so nothing further can be
    /// free beyond the two neighbors.
    ///
    /// # Safety
    /// `block` must be a live, free list entry.
    unsafe fn merge(&mut self, block: *mut BlockHeader) {
        // SAFETY: list links are maintained by this arena
        unsafe {
            let mut block = block;

            let prev = (*block).prev;
            if !prev.is_null() && !(*prev).in_use {
                (*prev).size += (*block).size + HEADER_BYTES;
                (*prev).next = (*block).next;
                if !(*block).next.is_null() {
                    (*(*block).next).prev = prev;
                }
                block = prev;
            }

            let next = (*block).next;
            if !next.is_null() && !(*next).in_use {
                (*block).size += (*next).size + HEADER_BYTES;
                (*block).next = (*next).next;
                if !(*block).next.is_null() {
                    (*(*block).next).prev = block;
                }
            }
        }
    }

    /// Walk the block list front to back
    pub fn blocks(&self) -> Blocks<'_> {
        Blocks {
            cur: self.head,
            _arena: PhantomData,
        }
    }

    /// Block counts for the dumps
    pub fn stats(&self) -> ArenaStats {
        let mut stats = ArenaStats::default();
        for block in self.blocks() {
            if block.in_use {
                stats.occupied += 1;
            } else {
                stats.free += 1;
            }
        }
        stats
    }
}

/// Iterator over the arena's block list
pub struct Blocks<'a> {
    cur: *const BlockHeader,
    _arena: PhantomData<&'a Arena>,
}

impl Iterator for Blocks<'_> {
    type Item = BlockInfo;

    fn next(&mut self) -> Option<BlockInfo> {
        if self.cur.is_null() {
            return None;
        }
        // SAFETY: cur is a live list entry; the arena is borrowed shared
        // for the iterator's lifetime, so the list cannot change under us
        unsafe {
            let info = BlockInfo {
                addr: self.cur as usize + HEADER_BYTES,
                size: (*self.cur).size,
                in_use: (*self.cur).in_use,
            };
            self.cur = (*self.cur).next;
            Some(info)
        }
    }
}
