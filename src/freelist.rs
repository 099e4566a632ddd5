//! Intrusive free-slot links for the fixed-size pools
//!
//! Free slots are threaded through their own first word: while a slot is
//! on the free list, its head holds the address of the next free slot
//! (0 terminates the chain). The word is payload once the slot is handed
//! out. Every link read from pool memory is validated before it is
//! followed, so a stray write into a freed slot surfaces as a
//! [`FreelistError`] instead of a wild dereference.

use crate::error::FreelistError;
use crate::pool::FixedPool;

/// Thread every slot of the pool into the free list in address order.
///
/// # Safety
/// The pool's backing region must be mapped and writable.
pub unsafe fn thread_slots(pool: &mut FixedPool) {
    let base = pool.base_addr();
    let stride = pool.stride();
    let count = pool.total_slots();

    // slot[i] -> slot[i + 1], last slot terminates the chain
    for i in 0..count - 1 {
        let slot = base + i * stride;
        let next = base + (i + 1) * stride;
        // SAFETY: caller guarantees the region is mapped
        unsafe { (slot as *mut usize).write(next) };
    }

    let last = base + (count - 1) * stride;
    // SAFETY: caller guarantees the region is mapped
    unsafe { (last as *mut usize).write(0) };

    pool.set_head(base);
}

/// Pop the head slot, advancing the head to the link stored in it.
///
/// Returns `Ok(None)` when the list is empty (pool fully occupied).
/// The stored link is validated before it becomes the new head.
///
/// # Safety
/// The pool's backing region must be mapped.
pub unsafe fn pop_slot(pool: &mut FixedPool) -> Result<Option<usize>, FreelistError> {
    let head = pool.head();
    if head == 0 {
        return Ok(None);
    }

    // SAFETY: head was validated when it became the head
    let next = unsafe { (head as *const usize).read() };

    if next != 0 {
        if next < pool.base_addr() || next >= pool.end_addr() {
            return Err(FreelistError::OutOfRange);
        }
        if (next - pool.base_addr()) % pool.stride() != 0 {
            return Err(FreelistError::NotSlotAligned);
        }
    }

    pool.set_head(next);
    Ok(Some(head))
}

/// Push a slot back; it becomes the new head (LIFO reuse).
///
/// # Safety
/// `slot` must be the start address of a slot in this pool.
pub unsafe fn push_slot(pool: &mut FixedPool, slot: usize) {
    let old_head = pool.head();
    // SAFETY: caller guarantees slot is a valid slot start in the mapped region
    unsafe { (slot as *mut usize).write(old_head) };
    pool.set_head(slot);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::tests::leaked_pool;

    #[test]
    fn test_initial_chain_is_address_ordered() {
        let mut pool = leaked_pool(16);
        let base = pool.base_addr();
        let stride = pool.stride();

        for i in 0..pool.total_slots() {
            let slot = unsafe { pop_slot(&mut pool) }.unwrap().unwrap();
            assert_eq!(slot, base + i * stride);
        }
        assert_eq!(unsafe { pop_slot(&mut pool) }.unwrap(), None);
    }

    #[test]
    fn test_push_makes_lifo_head() {
        let mut pool = leaked_pool(32);
        let first = unsafe { pop_slot(&mut pool) }.unwrap().unwrap();
        let second = unsafe { pop_slot(&mut pool) }.unwrap().unwrap();
        assert_ne!(first, second);

        unsafe { push_slot(&mut pool, first) };
        assert_eq!(unsafe { pop_slot(&mut pool) }.unwrap(), Some(first));
    }

    #[test]
    fn test_corrupt_link_is_detected() {
        let mut pool = leaked_pool(64);
        let head = pool.head();

        // Clobber the link stored in the head slot with an out-of-pool address
        unsafe { (head as *mut usize).write(0xDEAD_BEE8) };
        assert_eq!(
            unsafe { pop_slot(&mut pool) },
            Err(FreelistError::OutOfRange)
        );

        // A link inside the pool but off the slot grid is also rejected
        unsafe { (head as *mut usize).write(pool.base_addr() + 1) };
        assert_eq!(
            unsafe { pop_slot(&mut pool) },
            Err(FreelistError::NotSlotAligned)
        );
    }
}
