//! Per-tier statistics gathered for the diagnostic dumps

use crate::config::NUM_CLASSES;

/// Occupancy of one fixed-size pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Size class served by the pool
    pub class_size: usize,
    /// Slots currently handed out
    pub occupied: usize,
    /// Slots on the free list
    pub free: usize,
}

/// Block counts for the coalescing arena
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Blocks currently handed out
    pub occupied: usize,
    /// Free blocks in the list
    pub free: usize,
}

/// Snapshot across all three tiers
#[derive(Debug, Clone, Copy, Default)]
pub struct AllocatorStats {
    /// One entry per size class, ascending
    pub pools: [PoolStats; NUM_CLASSES],
    /// Arena block counts
    pub arena: ArenaStats,
    /// Outstanding OS-tier blocks
    pub os_blocks: usize,
}
