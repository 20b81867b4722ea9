//! Synchronization primitives for the NOS virtual memory manager
//!
//! This module provides the lock types used by the paging core
//! in a no_std environment.

pub use spin::{Mutex, MutexGuard};
pub use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
