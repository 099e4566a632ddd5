//! Three-tier user-space memory allocator
//!
//! Routes each request by size across three cooperating strategies:
//!
//! - **Fixed-size pools**: six segregated pools for the classes
//!   16 through 512 bytes, ten slots each, intrusive per-class free
//!   lists with LIFO reuse
//! - **Coalescing arena**: one 4 KiB region managed as an
//!   address-ordered doubly-linked block list, first-fit carve with
//!   split, neighbor merge on release
//! - **OS tier**: requests above 10 MiB delegate straight to the page
//!   facade and go back to the OS on release
//!
//! The allocator owns every byte it hands out between `init` and
//! `destroy`; `release` recovers the owning tier from the bare pointer
//! by address-range comparison. The interface is single-threaded and
//! non-reentrant.
//!
//! # Usage
//!
//! ```ignore
//! use tier_alloc::TierAlloc;
//!
//! let mut allocator = TierAlloc::system();
//! allocator.init()?;
//!
//! let p = allocator.alloc(64);
//! unsafe { allocator.release(p) };
//!
//! allocator.destroy();
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod allocator;
pub mod arena;
pub mod config;
pub mod error;
pub mod freelist;
pub mod large;
pub mod pool;
pub mod stats;
pub mod traits;

#[cfg(unix)]
pub mod os;

pub use allocator::TierAlloc;
pub use error::{AllocError, FreelistError};
pub use stats::{AllocatorStats, ArenaStats, PoolStats};
pub use traits::{PageSource, Region};

#[cfg(unix)]
pub use os::{MmapError, MmapSource};
