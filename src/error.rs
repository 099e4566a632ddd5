//! Error types for the allocator

use core::fmt;

/// Errors that can occur during allocation operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The OS page facade could not reserve backing memory
    OsUnavailable,
    /// OS-tier block side table is full
    SideTableFull,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OsUnavailable => write!(f, "backing memory unavailable from the OS"),
            Self::SideTableFull => write!(f, "os block side table full"),
        }
    }
}

/// Errors that can occur while following an intrusive free-slot link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreelistError {
    /// Stored link points outside the pool's slot range
    OutOfRange,
    /// Stored link is not on a slot boundary
    NotSlotAligned,
}

impl fmt::Display for FreelistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfRange => write!(f, "free-slot link out of pool range"),
            Self::NotSlotAligned => write!(f, "free-slot link not on a slot boundary"),
        }
    }
}

