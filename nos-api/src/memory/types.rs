//! Memory management types
//!
//! Address newtypes follow the layout used by the rest of NOS: a transparent
//! wrapper around `usize` with page arithmetic as `const fn`s.

use core::fmt;
use static_assertions::const_assert;

/// Page size (4KB)
pub const PAGE_SIZE: usize = 4096;
/// Page shift (log2 of PAGE_SIZE)
pub const PAGE_SHIFT: usize = 12;

const_assert!(PAGE_SIZE.is_power_of_two());
const_assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Align address down to page boundary
#[inline]
pub const fn page_round_down(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

/// Align address up to page boundary
#[inline]
pub const fn page_round_up(addr: usize) -> usize {
    (addr + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

/// A physical address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(pub usize);

impl PhysAddr {
    /// Creates a new physical address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the physical address as a raw usize value.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the offset within the current page.
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Returns the page frame number for this physical address.
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Checks if the physical address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }
}

impl fmt::Display for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pa:{:#x}", self.0)
    }
}

/// A virtual address
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(pub usize);

impl VirtAddr {
    /// Creates a new virtual address from a raw usize value.
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// Returns the virtual address as a raw usize value.
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the offset within the current page.
    pub const fn page_offset(self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    /// Returns the page number for this virtual address.
    pub const fn page_number(self) -> usize {
        self.0 >> PAGE_SHIFT
    }

    /// Checks if the virtual address is page-aligned.
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Rounds up the virtual address to the next page boundary.
    pub const fn page_round_up(self) -> Self {
        Self(page_round_up(self.0))
    }

    /// Rounds down the virtual address to the previous page boundary.
    pub const fn page_round_down(self) -> Self {
        Self(page_round_down(self.0))
    }

    /// Returns the address `pages` pages above this one.
    pub const fn add_pages(self, pages: usize) -> Self {
        Self(self.0 + pages * PAGE_SIZE)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for VirtAddr {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

impl From<VirtAddr> for usize {
    fn from(addr: VirtAddr) -> Self {
        addr.0
    }
}

/// Opaque handle to one page-sized slot of the swap area
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct SwapSlot(usize);

impl SwapSlot {
    /// Wraps a raw slot index.
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the raw slot index.
    pub const fn index(self) -> usize {
        self.0
    }
}

bitflags::bitflags! {
    /// Page-fault error code as delivered by the MMU.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFaultErrorCode: u32 {
        /// The page was present; the fault is a rights violation.
        const PRESENT = 0b001;
        /// The faulting access was a write.
        const WRITE = 0b010;
        /// The fault happened in user mode.
        const USER = 0b100;
    }
}

impl PageFaultErrorCode {
    /// Builds the error code of a not-present fault.
    pub fn not_present(is_write: bool, is_user: bool) -> Self {
        let mut code = Self::empty();
        code.set(Self::WRITE, is_write);
        code.set(Self::USER, is_user);
        code
    }

    /// True if the faulting page was not present.
    pub fn is_not_present(self) -> bool {
        !self.contains(Self::PRESENT)
    }

    /// True if the faulting access was a write.
    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    /// True if the fault came from user mode.
    pub fn is_user(self) -> bool {
        self.contains(Self::USER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_rounding() {
        assert_eq!(page_round_down(0x1fff), 0x1000);
        assert_eq!(page_round_up(0x1001), 0x2000);
        assert_eq!(page_round_up(0x1000), 0x1000);

        let va = VirtAddr::new(0xbfff_fffc);
        assert_eq!(va.page_round_down(), VirtAddr::new(0xbfff_f000));
        assert_eq!(va.page_round_up(), VirtAddr::new(0xc000_0000));
        assert!(!va.is_page_aligned());
        assert_eq!(VirtAddr::new(0x1000).add_pages(2), VirtAddr::new(0x3000));
    }

    #[test]
    fn test_phys_addr() {
        let pa = PhysAddr::new(0x0010_2000);
        assert!(pa.is_page_aligned());
        assert_eq!(pa.page_number(), 0x102);
    }

    #[test]
    fn test_error_code_decoding() {
        let code = PageFaultErrorCode::not_present(true, true);
        assert!(code.is_not_present());
        assert!(code.is_write());
        assert!(code.is_user());

        let code = PageFaultErrorCode::PRESENT | PageFaultErrorCode::USER;
        assert!(!code.is_not_present());
        assert!(!code.is_write());
    }
}
