//! NOS Virtual Memory
//!
//! This crate implements demand paging for NOS user processes: a per-process
//! table describing where each virtual page's data lives, a global registry of
//! the physical frames committed to processes, a second-chance clock that
//! evicts frames to swap under memory pressure, and the page-fault handler
//! tying them together.
//!
//! # Components
//!
//! - [`page`]: the virtual page metadata table ([`PageTable`])
//! - [`frame`]: the frame registry and the allocate-or-evict path ([`FrameRegistry`])
//! - [`evict`]: the clock hand and victim selection
//! - [`fault`]: the page-fault state machine, including stack growth
//! - [`space`]: per-process address spaces ([`AddressSpace`])
//! - [`vm`]: the shared kernel state ([`Vm`]) wiring everything together
//! - [`sim`]: in-memory implementations of every hardware collaborator
//!
//! # Locking
//!
//! Locks are always taken in this order: the allocation lock (clock hand),
//! the registry lock, then an address space's metadata table lock. The
//! filesystem lock is never held together with the allocation lock.

#![no_std]
#![warn(missing_docs)]
#![warn(clippy::all)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod evict;
pub mod fault;
pub mod frame;
pub mod page;
pub mod sim;
pub mod space;
pub mod stats;
pub mod vm;

// Re-export API types
pub use nos_api::{
    BackingFile, Error, FramePool, PageDirectory, PageFaultErrorCode, PhysAddr, Pid, PteFlags,
    Result, SwapDevice, SwapSlot, VirtAddr, FAULT_EXIT_STATUS, PAGE_SIZE,
};

// Re-export commonly used types
pub use config::VmConfig;
pub use fault::{PageFault, PageFaultResult};
pub use frame::{FrameInfo, FrameRegistry};
pub use page::{Backing, FileBacking, PageEntry, PageTable};
pub use space::AddressSpace;
pub use stats::{VmStats, VmStatsSnapshot};
pub use vm::Vm;
