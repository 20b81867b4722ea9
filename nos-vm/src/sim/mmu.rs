//! Simulated per-process page directory
//!
//! Translations live in a hash map keyed by user page. User accesses go
//! through [`SimPageDirectory::read`] and [`SimPageDirectory::write`], which
//! set the accessed and dirty bits the way the MMU would and report a page
//! fault error code when the access cannot complete.

use alloc::sync::Arc;
use hashbrown::HashMap;
use nos_api::error::{Error, Result};
use nos_api::memory::{
    PageDirectory, PageFaultErrorCode, PhysAddr, PteFlags, VirtAddr, PAGE_SIZE,
};
use nos_api::sync::Mutex;

use super::pool::SimFramePool;

#[derive(Debug, Clone, Copy)]
struct SimPte {
    frame: PhysAddr,
    writable: bool,
    accessed: bool,
    dirty: bool,
}

/// Hardware page directory of one simulated process.
pub struct SimPageDirectory {
    pool: Arc<SimFramePool>,
    entries: Mutex<HashMap<VirtAddr, SimPte>>,
}

impl SimPageDirectory {
    /// Creates an empty directory translating into `pool`'s frames.
    pub fn new(pool: Arc<SimFramePool>) -> Self {
        Self {
            pool,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Reads user memory at `va`, as an unprivileged load would.
    ///
    /// The access must not cross a page boundary.
    pub fn read(&self, va: VirtAddr, buf: &mut [u8]) -> core::result::Result<(), PageFaultErrorCode> {
        let (upage, offset) = split(va, buf.len());
        let mut entries = self.entries.lock();
        let pte = entries
            .get_mut(&upage)
            .ok_or(PageFaultErrorCode::not_present(false, true))?;
        pte.accessed = true;
        self.pool.read_bytes(pte.frame, offset, buf);
        Ok(())
    }

    /// Writes user memory at `va`, as an unprivileged store would.
    ///
    /// The access must not cross a page boundary.
    pub fn write(&self, va: VirtAddr, data: &[u8]) -> core::result::Result<(), PageFaultErrorCode> {
        let (upage, offset) = split(va, data.len());
        let mut entries = self.entries.lock();
        let pte = entries
            .get_mut(&upage)
            .ok_or(PageFaultErrorCode::not_present(true, true))?;
        if !pte.writable {
            return Err(PageFaultErrorCode::PRESENT | PageFaultErrorCode::WRITE | PageFaultErrorCode::USER);
        }
        pte.accessed = true;
        pte.dirty = true;
        self.pool.write_bytes(pte.frame, offset, data);
        Ok(())
    }

    /// Forces the accessed bit of `upage`.
    pub fn set_accessed(&self, upage: VirtAddr, accessed: bool) {
        if let Some(pte) = self.entries.lock().get_mut(&upage.page_round_down()) {
            pte.accessed = accessed;
        }
    }

    /// Forces the dirty bit of `upage`.
    pub fn set_dirty(&self, upage: VirtAddr, dirty: bool) {
        if let Some(pte) = self.entries.lock().get_mut(&upage.page_round_down()) {
            pte.dirty = dirty;
        }
    }

    /// Number of installed translations.
    pub fn mapped_count(&self) -> usize {
        self.entries.lock().len()
    }
}

fn split(va: VirtAddr, len: usize) -> (VirtAddr, usize) {
    let offset = va.page_offset();
    assert!(offset + len <= PAGE_SIZE, "access at {} crosses a page boundary", va);
    (va.page_round_down(), offset)
}

impl PteFlags for SimPageDirectory {
    fn is_accessed(&self, upage: VirtAddr) -> bool {
        self.entries.lock().get(&upage).is_some_and(|pte| pte.accessed)
    }

    fn clear_accessed(&self, upage: VirtAddr) {
        self.set_accessed(upage, false);
    }

    fn is_dirty(&self, upage: VirtAddr) -> bool {
        self.entries.lock().get(&upage).is_some_and(|pte| pte.dirty)
    }
}

impl PageDirectory for SimPageDirectory {
    fn install(&self, upage: VirtAddr, frame: PhysAddr, writable: bool) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(&upage) {
            return Err(Error::AlreadyMapped(upage.as_usize()));
        }
        entries.insert(upage, SimPte { frame, writable, accessed: false, dirty: false });
        Ok(())
    }

    fn clear(&self, upage: VirtAddr) {
        self.entries.lock().remove(&upage);
    }

    fn translate(&self, upage: VirtAddr) -> Option<PhysAddr> {
        self.entries.lock().get(&upage).map(|pte| pte.frame)
    }

    fn is_writable(&self, upage: VirtAddr) -> bool {
        self.entries.lock().get(&upage).is_some_and(|pte| pte.writable)
    }
}
