//! Simulated swap device

use alloc::boxed::Box;
use alloc::vec::Vec;
use nos_api::error::{io_error, not_found, Error, Result};
use nos_api::memory::{SwapDevice, SwapSlot, PAGE_SIZE};
use nos_api::sync::{AtomicBool, Mutex, Ordering};

/// A swap area of fixed capacity kept in memory.
pub struct SimSwap {
    slots: Mutex<Vec<Option<Box<[u8]>>>>,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
}

impl SimSwap {
    /// Creates a swap area with `capacity` page slots.
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Mutex::new(slots),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Number of slots holding a page.
    pub fn used_slots(&self) -> usize {
        self.slots.lock().iter().filter(|slot| slot.is_some()).count()
    }

    /// Makes every subsequent write fail with a device error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent read fail with a device error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl SwapDevice for SimSwap {
    fn reserve_and_write(&self, contents: &[u8]) -> Result<SwapSlot> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io_error("simulated swap write failure"));
        }
        let mut slots = self.slots.lock();
        let index = slots.iter().position(Option::is_none).ok_or(Error::SwapFull)?;
        slots[index] = Some(contents[..PAGE_SIZE].into());
        Ok(SwapSlot::new(index))
    }

    fn read_into(&self, slot: SwapSlot, buf: &mut [u8]) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io_error("simulated swap read failure"));
        }
        let slots = self.slots.lock();
        let page = slots
            .get(slot.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| not_found("swap slot holds no page"))?;
        buf[..PAGE_SIZE].copy_from_slice(page);
        Ok(())
    }

    fn release(&self, slot: SwapSlot) {
        let mut slots = self.slots.lock();
        let page = slots.get_mut(slot.index()).and_then(Option::take);
        assert!(page.is_some(), "release of free swap slot {}", slot.index());
    }
}
