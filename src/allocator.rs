//! Core allocator: tier routing and lifecycle
//!
//! `TierAlloc` owns the three tiers and routes every request between
//! them. Allocation classifies the aligned size: smallest fitting fixed
//! class first (falling through to the arena when the class is full),
//! then the arena up to the OS threshold, then the OS facade. Release
//! recovers the owning tier from the bare pointer by address range, in
//! the same order.

use core::fmt::{self, Write};
use core::ptr;

use crate::arena::Arena;
use crate::config::{align_up, pool_bytes, ALIGN, ARENA_BYTES, CLASS_SIZES, NUM_CLASSES, OS_THRESHOLD};
use crate::error::AllocError;
use crate::large::{OsEntry, OsTable};
use crate::pool::FixedPool;
use crate::stats::AllocatorStats;
use crate::traits::{PageSource, Region};

/// Smallest class that can hold an aligned request, if any
fn find_class(n: usize) -> Option<usize> {
    CLASS_SIZES.iter().position(|&class| class >= n)
}

/// Tier state, materialized at `init` and torn down at `destroy`
struct Tiers {
    pools: [FixedPool; NUM_CLASSES],
    arena: Arena,
    os: OsTable,
}

/// The three-tier allocator
///
/// Lifecycle is strictly `init` then any number of `alloc`/`release`/
/// dump calls then `destroy`. Using the allocator outside that window
/// is a programming error and panics.
pub struct TierAlloc<P: PageSource> {
    source: P,
    tiers: Option<Tiers>,
}

impl<P: PageSource> TierAlloc<P> {
    /// Create an uninitialised allocator over the given page source.
    pub const fn new(source: P) -> Self {
        Self {
            source,
            tiers: None,
        }
    }

    /// Whether `init` has run and `destroy` has not
    pub fn is_initialised(&self) -> bool {
        self.tiers.is_some()
    }

    fn tiers(&self) -> &Tiers {
        match self.tiers.as_ref() {
            Some(tiers) => tiers,
            None => panic!("allocator not initialised"),
        }
    }

    /// Materialize the fixed-size pools and the arena.
    ///
    /// Reservations already made are handed back on a mid-init failure,
    /// leaving the allocator uninitialised.
    ///
    /// # Panics
    /// Panics if the allocator is already initialised.
    pub fn init(&mut self) -> Result<(), AllocError> {
        assert!(self.tiers.is_none(), "allocator already initialised");

        let mut regions = [Region::EMPTY; NUM_CLASSES];
        for (i, &class) in CLASS_SIZES.iter().enumerate() {
            match self.source.reserve(pool_bytes(class)) {
                Ok(region) => regions[i] = region,
                Err(err) => {
                    log::error!("reservation for the {class}-byte class failed: {err:?}");
                    self.unwind(&regions[..i]);
                    return Err(AllocError::OsUnavailable);
                }
            }
        }

        let arena_region = match self.source.reserve(ARENA_BYTES) {
            Ok(region) => region,
            Err(err) => {
                log::error!("arena reservation failed: {err:?}");
                self.unwind(&regions);
                return Err(AllocError::OsUnavailable);
            }
        };

        // SAFETY: each region is a fresh RW reservation no shorter than
        // the pool it backs, mapped until teardown releases it
        let pools: [FixedPool; NUM_CLASSES] =
            core::array::from_fn(|i| unsafe { FixedPool::new(regions[i], CLASS_SIZES[i]) });
        // SAFETY: fresh RW reservation of at least ARENA_BYTES
        let arena = unsafe { Arena::new(arena_region) };

        self.tiers = Some(Tiers {
            pools,
            arena,
            os: OsTable::new(),
        });
        Ok(())
    }

    /// Hand back regions reserved before a mid-init failure
    fn unwind(&self, regions: &[Region]) {
        for &region in regions {
            if let Err(err) = self.source.release(region) {
                log::error!("os release during init unwind failed: {err:?}");
            }
        }
    }

    /// Allocate `size` bytes, 8-byte aligned.
    ///
    /// Returns null when the request cannot be serviced; the allocator
    /// is unchanged on that path.
    ///
    /// # Panics
    /// Panics if the allocator is not initialised.
    pub fn alloc(&mut self, size: usize) -> *mut u8 {
        let tiers = match self.tiers.as_mut() {
            Some(tiers) => tiers,
            None => panic!("allocator not initialised"),
        };
        let source = &self.source;

        let n = align_up(size, ALIGN);

        if let Some(class) = find_class(n) {
            match tiers.pools[class].alloc() {
                Ok(Some(slot)) => return slot as *mut u8,
                Ok(None) => {
                    // Class fully occupied: fall through to the arena
                }
                Err(err) => {
                    log::error!(
                        "{}-byte class free list corrupt ({err}); treating as exhausted",
                        CLASS_SIZES[class]
                    );
                }
            }
        }

        if n <= OS_THRESHOLD {
            return match tiers.arena.alloc(n) {
                Some(payload) => payload as *mut u8,
                None => ptr::null_mut(),
            };
        }

        let region = match source.reserve(n) {
            Ok(region) => region,
            Err(err) => {
                log::error!("os reservation of {n} bytes failed: {err:?}");
                return ptr::null_mut();
            }
        };

        if let Err(err) = tiers.os.insert(OsEntry {
            region,
            requested: n,
        }) {
            log::error!("{err}; dropping the fresh reservation");
            if let Err(release_err) = source.release(region) {
                log::error!("os release of the dropped reservation failed: {release_err:?}");
            }
            return ptr::null_mut();
        }

        region.base
    }

    /// Release a pointer previously returned by [`alloc`](Self::alloc).
    ///
    /// Null and foreign pointers are silent no-ops.
    ///
    /// # Safety
    /// `ptr` must be null, foreign, or a value returned by `alloc` on
    /// this allocator that the caller no longer reads or writes.
    ///
    /// # Panics
    /// Panics if the allocator is not initialised.
    pub unsafe fn release(&mut self, ptr: *mut u8) {
        let tiers = match self.tiers.as_mut() {
            Some(tiers) => tiers,
            None => panic!("allocator not initialised"),
        };
        let source = &self.source;

        if ptr.is_null() {
            return;
        }
        let addr = ptr as usize;

        for pool in tiers.pools.iter_mut() {
            if pool.owns(addr) {
                if !pool.release(addr) {
                    log::warn!(
                        "double release of {ptr:p} in the {}-byte class ignored",
                        pool.class_size()
                    );
                }
                return;
            }
        }

        if tiers.arena.owns(addr) {
            // SAFETY: addr is inside the arena range; the caller
            // guarantees it came from alloc
            if !unsafe { tiers.arena.release(addr) } {
                log::warn!("double release of {ptr:p} in the arena ignored");
            }
            return;
        }

        if let Some(entry) = tiers.os.remove(addr) {
            if let Err(err) = source.release(entry.region) {
                // The block is considered released regardless
                log::error!("os release of {ptr:p} failed: {err:?}");
            }
            return;
        }

        log::debug!("release of foreign pointer {ptr:p} ignored");
    }

    /// Hand back everything the allocator has ever reserved, whether or
    /// not all payloads were released.
    ///
    /// # Panics
    /// Panics if the allocator is not initialised.
    pub fn destroy(&mut self) {
        let tiers = match self.tiers.take() {
            Some(tiers) => tiers,
            None => panic!("allocator not initialised"),
        };
        self.teardown(tiers);
    }

    fn teardown(&self, tiers: Tiers) {
        for pool in &tiers.pools {
            if let Err(err) = self.source.release(pool.region()) {
                log::error!(
                    "os release of the {}-byte pool region failed: {err:?}",
                    pool.class_size()
                );
            }
        }

        if let Err(err) = self.source.release(tiers.arena.region()) {
            log::error!("os release of the arena region failed: {err:?}");
        }

        for entry in tiers.os.iter() {
            if let Err(err) = self.source.release(entry.region) {
                log::error!("os release of an outstanding block failed: {err:?}");
            }
        }
    }

    /// Occupancy snapshot across all three tiers
    pub fn stats(&self) -> AllocatorStats {
        let tiers = self.tiers();
        AllocatorStats {
            pools: core::array::from_fn(|i| tiers.pools[i].stats()),
            arena: tiers.arena.stats(),
            os_blocks: tiers.os.count(),
        }
    }

    /// Write the per-tier occupancy summary to `out`.
    pub fn dump_stat<W: Write>(&self, out: &mut W) -> fmt::Result {
        let stats = self.stats();

        writeln!(out, "Memory statistics:")?;

        writeln!(out, "Fixed-size Memory Allocation:")?;
        for pool in &stats.pools {
            writeln!(
                out,
                "  Block size: {}, Occupied: {}, Free: {}",
                pool.class_size, pool.occupied, pool.free
            )?;
        }

        writeln!(out, "Coalesce Allocation:")?;
        writeln!(
            out,
            "  Occupied: {}, Free: {}",
            stats.arena.occupied, stats.arena.free
        )?;

        writeln!(out, "OS Allocations:")?;
        writeln!(out, "  Total blocks: {}", stats.os_blocks)?;

        Ok(())
    }

    /// Write every currently-outstanding block, grouped by tier, to `out`.
    pub fn dump_blocks<W: Write>(&self, out: &mut W) -> fmt::Result {
        let tiers = self.tiers();

        writeln!(out, "Allocated blocks:")?;

        writeln!(out, "Fixed-size Memory Allocation:")?;
        for pool in &tiers.pools {
            writeln!(out, "  Block size: {}", pool.class_size())?;
            for addr in pool.occupied_slots() {
                writeln!(
                    out,
                    "    Block at {:#x}, size: {}",
                    addr,
                    pool.class_size()
                )?;
            }
        }

        writeln!(out, "Coalesce Allocation:")?;
        for block in tiers.arena.blocks() {
            if block.in_use {
                writeln!(out, "  Block at {:#x}, size: {}", block.addr, block.size)?;
            }
        }

        writeln!(out, "OS Allocations:")?;
        for entry in tiers.os.iter() {
            writeln!(
                out,
                "  Block at {:#x}, size: {}",
                entry.region.base_addr(),
                entry.requested
            )?;
        }

        Ok(())
    }
}

impl<P: PageSource> Drop for TierAlloc<P> {
    fn drop(&mut self) {
        // The lifecycle contract wants destroy first; tear down anyway
        // so no reservation outlives the allocator.
        if let Some(tiers) = self.tiers.take() {
            debug_assert!(false, "destroy must be called before drop");
            log::warn!("allocator dropped while initialised; tearing down");
            self.teardown(tiers);
        }
    }
}

#[cfg(unix)]
impl TierAlloc<crate::os::MmapSource> {
    /// Allocator over the system mmap facade.
    pub const fn system() -> Self {
        Self::new(crate::os::MmapSource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::alloc::Layout;
    use std::cell::Cell;
    use std::rc::Rc;

    use crate::config::PAGE_SIZE;

    /// Facade call counters, shared with the test body.
    #[derive(Default)]
    struct Counters {
        reserves: Cell<usize>,
        releases: Cell<usize>,
    }

    /// Heap-backed page source with failure injection and call counting.
    struct TestSource {
        counters: Rc<Counters>,
        fail_after: Cell<Option<usize>>,
    }

    impl TestSource {
        fn new() -> Self {
            Self {
                counters: Rc::new(Counters::default()),
                fail_after: Cell::new(None),
            }
        }

        fn failing_after(n: usize) -> Self {
            let source = Self::new();
            source.fail_after.set(Some(n));
            source
        }
    }

    impl PageSource for TestSource {
        type Error = ();

        fn reserve(&self, bytes: usize) -> Result<Region, ()> {
            if let Some(limit) = self.fail_after.get() {
                if self.counters.reserves.get() >= limit {
                    return Err(());
                }
            }

            let len = align_up(bytes.max(1), PAGE_SIZE);
            let layout = Layout::from_size_align(len, PAGE_SIZE).map_err(|_| ())?;
            // SAFETY: layout has non-zero size
            let base = unsafe { std::alloc::alloc_zeroed(layout) };
            if base.is_null() {
                return Err(());
            }

            self.counters.reserves.set(self.counters.reserves.get() + 1);
            Ok(Region { base, len })
        }

        fn release(&self, region: Region) -> Result<(), ()> {
            self.counters.releases.set(self.counters.releases.get() + 1);
            let layout = Layout::from_size_align(region.len, PAGE_SIZE).map_err(|_| ())?;
            // SAFETY: region came from reserve with this layout
            unsafe { std::alloc::dealloc(region.base, layout) };
            Ok(())
        }
    }

    fn init_allocator() -> TierAlloc<TestSource> {
        let mut allocator = TierAlloc::new(TestSource::new());
        allocator.init().unwrap();
        allocator
    }

    #[test]
    fn test_find_class_smallest_fit() {
        assert_eq!(find_class(0), Some(0));
        assert_eq!(find_class(8), Some(0));
        assert_eq!(find_class(16), Some(0));
        assert_eq!(find_class(24), Some(1));
        assert_eq!(find_class(32), Some(1));
        assert_eq!(find_class(40), Some(2));
        assert_eq!(find_class(512), Some(5));
        assert_eq!(find_class(520), None);
    }

    #[test]
    fn test_init_reserves_pools_and_arena() {
        let allocator = init_allocator();
        assert!(allocator.is_initialised());
        assert_eq!(allocator.source.counters.reserves.get(), NUM_CLASSES + 1);
    }

    #[test]
    fn test_init_failure_unwinds_partial_reservations() {
        let mut allocator = TierAlloc::new(TestSource::failing_after(3));
        assert_eq!(allocator.init(), Err(AllocError::OsUnavailable));

        assert!(!allocator.is_initialised());
        assert_eq!(allocator.source.counters.releases.get(), 3);
    }

    #[test]
    fn test_destroy_releases_every_reservation() {
        let mut allocator = init_allocator();
        let big = allocator.alloc(OS_THRESHOLD + 1);
        assert!(!big.is_null());

        allocator.destroy();
        assert_eq!(
            allocator.source.counters.releases.get(),
            allocator.source.counters.reserves.get()
        );
    }

    #[test]
    fn test_class_full_falls_through_to_arena() {
        let mut allocator = init_allocator();
        for _ in 0..10 {
            assert!(!allocator.alloc(16).is_null());
        }
        assert_eq!(allocator.stats().pools[0].free, 0);

        let eleventh = allocator.alloc(16);
        assert!(!eleventh.is_null());
        assert_eq!(allocator.stats().pools[0].occupied, 10);
        assert_eq!(allocator.stats().arena.occupied, 1);

        allocator.destroy();
    }

    #[test]
    fn test_threshold_boundary_routes() {
        let mut allocator = init_allocator();

        // Exactly the threshold stays in the arena tier, which cannot
        // hold it: null, state unchanged
        let at_threshold = allocator.alloc(OS_THRESHOLD);
        assert!(at_threshold.is_null());
        assert_eq!(allocator.stats().os_blocks, 0);

        // One past the threshold goes to the OS
        let past = allocator.alloc(OS_THRESHOLD + 1);
        assert!(!past.is_null());
        assert_eq!(allocator.stats().os_blocks, 1);

        // SAFETY: past came from alloc
        unsafe { allocator.release(past) };
        assert_eq!(allocator.stats().os_blocks, 0);

        allocator.destroy();
    }

    #[test]
    fn test_release_unknown_pointer_is_noop() {
        let mut allocator = init_allocator();
        let before = allocator.stats();

        // SAFETY: foreign pointers are a contractual no-op
        unsafe {
            allocator.release(ptr::null_mut());
            allocator.release(0xDEAD_BEE8 as *mut u8);
        }

        let after = allocator.stats();
        assert_eq!(before.pools, after.pools);
        assert_eq!(before.arena, after.arena);
        assert_eq!(before.os_blocks, after.os_blocks);

        allocator.destroy();
    }

    #[test]
    fn test_dump_sections_in_order() {
        let mut allocator = init_allocator();
        let p = allocator.alloc(64);
        assert!(!p.is_null());

        let mut stat = String::new();
        allocator.dump_stat(&mut stat).unwrap();
        let fsa = stat.find("Fixed-size Memory Allocation:").unwrap();
        let ca = stat.find("Coalesce Allocation:").unwrap();
        let os = stat.find("OS Allocations:").unwrap();
        assert!(fsa < ca && ca < os);
        assert!(stat.contains("Block size: 64, Occupied: 1, Free: 9"));

        let mut blocks = String::new();
        allocator.dump_blocks(&mut blocks).unwrap();
        assert!(blocks.contains(&format!("Block at {:#x}, size: 64", p as usize)));

        // SAFETY: p came from alloc
        unsafe { allocator.release(p) };
        allocator.destroy();
    }

    /// Only in release builds: the debug assertion below fires first
    /// in debug builds, mirroring the destroy-before-drop contract.
    #[test]
    #[cfg(not(debug_assertions))]
    fn test_drop_backstop_releases_reservations() {
        let counters = {
            let mut allocator = TierAlloc::new(TestSource::new());
            allocator.init().unwrap();
            allocator.alloc(2048);
            Rc::clone(&allocator.source.counters)
            // Dropped without destroy
        };

        assert_eq!(counters.reserves.get(), NUM_CLASSES + 1);
        assert_eq!(counters.releases.get(), counters.reserves.get());
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "destroy must be called before drop")]
    fn test_drop_while_initialised_asserts() {
        let mut allocator = TierAlloc::new(TestSource::new());
        allocator.init().unwrap();
        drop(allocator);
    }
}
