//! Simulated physical page pool

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use nos_api::memory::{FramePool, PhysAddr, PAGE_SIZE};
use nos_api::sync::Mutex;

/// Physical address of the first simulated frame.
pub const SIM_PHYS_BASE: usize = 0x0010_0000;

/// Fill pattern of never-zeroed frames, so missing zero-fills show up.
const POISON: u8 = 0xcc;

/// A fixed number of page frames backed by heap memory.
pub struct SimFramePool {
    frames: Vec<Mutex<Box<[u8]>>>,
    in_use: Mutex<Vec<bool>>,
}

impl SimFramePool {
    /// Creates a pool of `frames` pages.
    pub fn new(frames: usize) -> Self {
        Self {
            frames: (0..frames)
                .map(|_| Mutex::new(vec![POISON; PAGE_SIZE].into_boxed_slice()))
                .collect(),
            in_use: Mutex::new(vec![false; frames]),
        }
    }

    fn index_of(&self, frame: PhysAddr) -> usize {
        assert!(frame.is_page_aligned(), "unaligned frame {}", frame);
        let index = frame
            .as_usize()
            .checked_sub(SIM_PHYS_BASE)
            .map(|offset| offset / PAGE_SIZE)
            .filter(|&index| index < self.frames.len());
        index.unwrap_or_else(|| panic!("{} is not part of the pool", frame))
    }

    /// Number of pages currently free.
    pub fn free_count(&self) -> usize {
        self.in_use.lock().iter().filter(|used| !**used).count()
    }

    /// Copies bytes at `offset` within `frame` into `buf`.
    pub fn read_bytes(&self, frame: PhysAddr, offset: usize, buf: &mut [u8]) {
        let page = self.frames[self.index_of(frame)].lock();
        buf.copy_from_slice(&page[offset..offset + buf.len()]);
    }

    /// Copies `data` to `offset` within `frame`.
    pub fn write_bytes(&self, frame: PhysAddr, offset: usize, data: &[u8]) {
        let mut page = self.frames[self.index_of(frame)].lock();
        page[offset..offset + data.len()].copy_from_slice(data);
    }
}

impl FramePool for SimFramePool {
    fn acquire_page(&self, zero: bool) -> Option<PhysAddr> {
        let mut in_use = self.in_use.lock();
        let index = in_use.iter().position(|used| !used)?;
        in_use[index] = true;
        if zero {
            self.frames[index].lock().fill(0);
        }
        Some(PhysAddr::new(SIM_PHYS_BASE + index * PAGE_SIZE))
    }

    fn release_page(&self, frame: PhysAddr) {
        let index = self.index_of(frame);
        let mut in_use = self.in_use.lock();
        assert!(in_use[index], "double release of {}", frame);
        in_use[index] = false;
    }

    fn read_frame(&self, frame: PhysAddr, buf: &mut [u8]) {
        self.read_bytes(frame, 0, &mut buf[..PAGE_SIZE]);
    }

    fn write_frame(&self, frame: PhysAddr, data: &[u8]) {
        self.write_bytes(frame, 0, &data[..PAGE_SIZE]);
    }

    fn capacity(&self) -> usize {
        self.frames.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_until_exhausted() {
        let pool = SimFramePool::new(2);
        let a = pool.acquire_page(false).unwrap();
        let b = pool.acquire_page(false).unwrap();
        assert_ne!(a, b);
        assert!(pool.acquire_page(false).is_none());

        pool.release_page(a);
        assert_eq!(pool.acquire_page(false), Some(a));
    }

    #[test]
    fn test_zero_fill() {
        let pool = SimFramePool::new(1);
        let frame = pool.acquire_page(false).unwrap();
        let mut page = vec![0u8; PAGE_SIZE];
        pool.read_frame(frame, &mut page);
        assert!(page.iter().all(|&b| b == POISON));
        pool.release_page(frame);

        let frame = pool.acquire_page(true).unwrap();
        pool.read_frame(frame, &mut page);
        assert!(page.iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "double release")]
    fn test_double_release_panics() {
        let pool = SimFramePool::new(1);
        let frame = pool.acquire_page(false).unwrap();
        pool.release_page(frame);
        pool.release_page(frame);
    }
}
