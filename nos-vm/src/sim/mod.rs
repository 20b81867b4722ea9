//! Simulated hardware
//!
//! In-memory implementations of every collaborator the paging core talks to:
//! a fixed pool of physical frames, a slot-based swap device, a per-process
//! page directory maintaining accessed/dirty bits, and executable files.
//! They behave like the real devices from the core's point of view and add
//! fault injection and inspection hooks for tests and benchmarks.

mod file;
mod mmu;
mod pool;
mod swap;

pub use file::SimFile;
pub use mmu::SimPageDirectory;
pub use pool::{SimFramePool, SIM_PHYS_BASE};
pub use swap::SimSwap;
