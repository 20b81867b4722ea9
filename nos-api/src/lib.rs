//! NOS API - Core types and collaborator interfaces for the NOS virtual memory manager
//!
//! This crate provides the types and abstractions shared between the paging
//! core (`nos-vm`) and the parts of the kernel it talks to. It carries no
//! policy of its own.
//!
//! # Architecture
//!
//! The API is organized into a few small modules:
//!
//! - **Core**: Process identifiers and exit statuses
//! - **Error**: The common error type and result alias
//! - **Memory**: Address newtypes, swap slot handles, page-fault error codes
//!   and the collaborator interfaces (physical page pool, swap device,
//!   hardware page directory, executable files)
//! - **Sync**: Lock primitives usable without the standard library
//!
//! # Usage
//!
//! ```rust
//! use nos_api::memory::{VirtAddr, PAGE_SIZE};
//!
//! let va = VirtAddr::new(0x0804_8123);
//! assert_eq!(va.page_round_down().as_usize(), 0x0804_8000);
//! assert_eq!(va.page_offset(), 0x123);
//! assert!(PAGE_SIZE.is_power_of_two());
//! ```

#![no_std]

#[cfg(feature = "std")]
extern crate std;

extern crate alloc;

pub mod core;
pub mod error;
pub mod memory;
pub mod sync;

// Re-export commonly used types
pub use crate::core::types::*;
pub use crate::error::{Error, Result};
pub use crate::memory::interface::{BackingFile, FramePool, PageDirectory, PteFlags, SwapDevice};
pub use crate::memory::types::{PageFaultErrorCode, PhysAddr, SwapSlot, VirtAddr, PAGE_SHIFT, PAGE_SIZE};
