//! User address-space layout and paging tunables

use nos_api::error::{invalid_argument, Result};
use nos_api::memory::PAGE_SIZE;

/// Default top of user space, where kernel space begins on 32-bit x86.
pub const DEFAULT_USER_TOP: usize = 0xC000_0000;

/// Distance below the stack pointer that still counts as a stack access.
///
/// `PUSHA` writes 32 bytes below `esp` before adjusting it.
pub const DEFAULT_STACK_GUARD: usize = 32;

/// Default maximum stack size.
pub const DEFAULT_STACK_LIMIT: usize = 8 * 1024 * 1024;

/// Default number of full clock revolutions before the scan gives up.
pub const DEFAULT_MAX_SCAN_PASSES: usize = 4;

/// Paging configuration, fixed at kernel initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct VmConfig {
    /// Lowest user virtual address. Page 0 is never part of user space.
    pub user_base: usize,

    /// First address above user space (exclusive).
    pub user_top: usize,

    /// Bytes below the stack pointer that still count as a stack access.
    pub stack_guard: usize,

    /// Maximum stack size in bytes, measured down from `user_top`.
    pub stack_limit: usize,

    /// Clock revolutions the eviction scan may make before it is declared stuck.
    pub max_scan_passes: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            user_base: PAGE_SIZE,
            user_top: DEFAULT_USER_TOP,
            stack_guard: DEFAULT_STACK_GUARD,
            stack_limit: DEFAULT_STACK_LIMIT,
            max_scan_passes: DEFAULT_MAX_SCAN_PASSES,
        }
    }
}

impl VmConfig {
    /// Check if an address is in user space
    #[inline]
    pub fn is_user_address(&self, addr: usize) -> bool {
        addr >= self.user_base && addr < self.user_top
    }

    /// Lowest address the stack may grow down to.
    #[inline]
    pub fn stack_bottom(&self) -> usize {
        self.user_top.saturating_sub(self.stack_limit).max(self.user_base)
    }

    /// True if a fault at `fault_addr` with stack pointer `sp` looks like a push.
    #[inline]
    pub fn is_stack_access(&self, fault_addr: usize, sp: usize) -> bool {
        self.is_user_address(fault_addr)
            && fault_addr >= self.stack_bottom()
            && fault_addr >= sp.saturating_sub(self.stack_guard)
    }

    /// Verify that the layout is usable
    pub fn verify(&self) -> Result<()> {
        if self.user_base == 0 {
            return Err(invalid_argument("user space must not contain page 0"));
        }
        if self.user_base % PAGE_SIZE != 0 || self.user_top % PAGE_SIZE != 0 {
            return Err(invalid_argument("user space bounds must be page-aligned"));
        }
        if self.user_base >= self.user_top {
            return Err(invalid_argument("user space is empty"));
        }
        if self.stack_limit < PAGE_SIZE || self.stack_limit % PAGE_SIZE != 0 {
            return Err(invalid_argument("stack limit must be a positive number of pages"));
        }
        if self.stack_guard >= PAGE_SIZE {
            return Err(invalid_argument("stack guard must be smaller than a page"));
        }
        if self.max_scan_passes == 0 {
            return Err(invalid_argument("eviction scan needs at least one pass"));
        }
        Ok(())
    }
}
