//! Per-process address spaces

use alloc::sync::Arc;
use core::fmt;
use nos_api::error::{invalid_argument, Result};
use nos_api::memory::{page_round_down, BackingFile, PageDirectory, VirtAddr, PAGE_SIZE};
use nos_api::sync::{Mutex, MutexGuard};
use nos_api::Pid;

use crate::page::{PageEntry, PageTable};

/// The paging state private to one user process.
///
/// Holds the process's hardware page directory and its [`PageTable`]. Frames
/// in the global registry keep a reference to their owner's address space so
/// that eviction can rewrite the owner's mapping and metadata.
pub struct AddressSpace {
    pid: Pid,
    pagedir: Arc<dyn PageDirectory>,
    pages: Mutex<PageTable>,
    faults: Mutex<()>,
}

impl AddressSpace {
    /// Creates an empty address space over `pagedir`.
    pub fn new(pid: Pid, pagedir: Arc<dyn PageDirectory>) -> Arc<Self> {
        Arc::new(Self {
            pid,
            pagedir,
            pages: Mutex::new(PageTable::new()),
            faults: Mutex::new(()),
        })
    }

    /// Owning process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Hardware page directory of the process.
    pub fn pagedir(&self) -> &dyn PageDirectory {
        self.pagedir.as_ref()
    }

    /// Declares an anonymous zero-filled page.
    pub fn declare_zero(&self, upage: VirtAddr, writable: bool) -> Result<()> {
        self.pages.lock().declare_zero(upage, writable)
    }

    /// Declares a page loaded lazily from `file`.
    pub fn declare_file(
        &self,
        upage: VirtAddr,
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_bytes: usize,
        writable: bool,
    ) -> Result<()> {
        self.pages.lock().declare_file(upage, file, offset, read_bytes, writable)
    }

    /// Declares a loadable segment page by page.
    ///
    /// `read_bytes` bytes starting at `offset` in `file` are followed by
    /// `zero_bytes` zeros, starting at `upage`. Pages without file bytes are
    /// declared zero-filled.
    pub fn declare_segment(
        &self,
        file: Arc<dyn BackingFile>,
        offset: usize,
        upage: VirtAddr,
        read_bytes: usize,
        zero_bytes: usize,
        writable: bool,
    ) -> Result<()> {
        if (read_bytes + zero_bytes) % PAGE_SIZE != 0 {
            return Err(invalid_argument("segment size is not a whole number of pages"));
        }
        if !upage.is_page_aligned() || page_round_down(offset) != offset {
            return Err(invalid_argument("segment is not page-aligned"));
        }

        let mut pages = self.pages.lock();
        let mut remaining = read_bytes;
        let page_count = (read_bytes + zero_bytes) / PAGE_SIZE;
        for i in 0..page_count {
            let page_read_bytes = remaining.min(PAGE_SIZE);
            let va = upage.add_pages(i);
            if page_read_bytes == 0 {
                pages.declare_zero(va, writable)?;
            } else {
                pages.declare_file(va, file.clone(), offset + i * PAGE_SIZE, page_read_bytes, writable)?;
            }
            remaining -= page_read_bytes;
        }
        log::trace!(
            "pid {}: declared segment at {} ({} pages, {} file bytes)",
            self.pid,
            upage,
            page_count,
            read_bytes
        );
        Ok(())
    }

    /// Returns a copy of the entry for the page containing `addr`.
    pub fn lookup(&self, addr: VirtAddr) -> Option<PageEntry> {
        self.pages.lock().lookup(addr).cloned()
    }

    /// True if `va` is mapped or tracked, and writable when `is_write`.
    ///
    /// Does not check that `va` lies in user space; see
    /// [`Vm::access_ok`](crate::Vm::access_ok).
    pub fn access_ok(&self, va: VirtAddr, is_write: bool) -> bool {
        let upage = va.page_round_down();
        if self.pagedir.translate(upage).is_some() {
            return !is_write || self.pagedir.is_writable(upage);
        }
        self.pages.lock().lookup(upage).is_some_and(|entry| !is_write || entry.writable)
    }

    /// Number of pages tracked by the metadata table.
    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }

    pub(crate) fn pages(&self) -> MutexGuard<'_, PageTable> {
        self.pages.lock()
    }

    pub(crate) fn lock_faults(&self) -> MutexGuard<'_, ()> {
        self.faults.lock()
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace").field("pid", &self.pid).finish_non_exhaustive()
    }
}
