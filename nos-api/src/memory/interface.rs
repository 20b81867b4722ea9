//! Collaborator interfaces of the paging core
//!
//! The paging core owns policy only. Physical pages, the swap device, the
//! hardware page tables and executable files are reached through the traits
//! below so that the same core runs against real hardware or against an
//! in-memory simulation.

use crate::error::Result;
use crate::memory::types::{PhysAddr, SwapSlot, VirtAddr};

/// Raw physical page allocator for user frames.
///
/// The pool hands out each physical page to at most one caller at a time.
pub trait FramePool: Send + Sync {
    /// Takes a free page from the pool, zero-filled when `zero` is set.
    ///
    /// Returns `None` when the pool is exhausted.
    fn acquire_page(&self, zero: bool) -> Option<PhysAddr>;

    /// Returns a page to the pool.
    fn release_page(&self, frame: PhysAddr);

    /// Copies the contents of `frame` into `buf` (one page).
    fn read_frame(&self, frame: PhysAddr, buf: &mut [u8]);

    /// Overwrites the contents of `frame` with `data` (one page).
    fn write_frame(&self, frame: PhysAddr, data: &[u8]);

    /// Total number of pages managed by the pool.
    fn capacity(&self) -> usize;
}

/// Disk-backed overflow area made of page-sized slots.
pub trait SwapDevice: Send + Sync {
    /// Reserves a free slot and writes one page of `contents` into it.
    ///
    /// Fails with [`Error::SwapFull`](crate::Error::SwapFull) when no slot is
    /// free, or with an I/O error on a device failure.
    fn reserve_and_write(&self, contents: &[u8]) -> Result<SwapSlot>;

    /// Reads the page stored in `slot` into `buf`.
    fn read_into(&self, slot: SwapSlot, buf: &mut [u8]) -> Result<()>;

    /// Marks `slot` free again.
    fn release(&self, slot: SwapSlot);
}

/// Hardware-maintained bits of a page-table entry.
///
/// This is the only view of the page tables the eviction scan needs.
pub trait PteFlags {
    /// True if the page was accessed since the bit was last cleared.
    fn is_accessed(&self, upage: VirtAddr) -> bool;

    /// Clears the accessed bit.
    fn clear_accessed(&self, upage: VirtAddr);

    /// True if the page was written since it was mapped.
    fn is_dirty(&self, upage: VirtAddr) -> bool;
}

/// Per-process hardware page directory.
pub trait PageDirectory: PteFlags + Send + Sync {
    /// Maps `upage` to `frame`.
    ///
    /// Fails with [`Error::AlreadyMapped`](crate::Error::AlreadyMapped) if the
    /// page is mapped already.
    fn install(&self, upage: VirtAddr, frame: PhysAddr, writable: bool) -> Result<()>;

    /// Removes the mapping of `upage`, if any.
    fn clear(&self, upage: VirtAddr);

    /// Returns the frame mapped at `upage`.
    fn translate(&self, upage: VirtAddr) -> Option<PhysAddr>;

    /// True if the mapping of `upage` is writable.
    fn is_writable(&self, upage: VirtAddr) -> bool;
}

/// An open executable file backing lazily loaded segments.
pub trait BackingFile: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read, which is short at end of file.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize>;
}
