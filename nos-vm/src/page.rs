//! Virtual page metadata table
//!
//! Every process keeps one [`PageTable`] recording, for each page the loader
//! declared or the eviction path demoted, where that page's data lives. A page
//! with no entry is either untracked or an anonymous stack page that is
//! currently resident.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use hashbrown::HashMap;
use nos_api::error::{invalid_argument, Result};
use nos_api::memory::{BackingFile, SwapSlot, VirtAddr, PAGE_SIZE};

/// Where a file-backed page comes from.
#[derive(Clone)]
pub struct FileBacking {
    /// Executable the page is read from.
    pub file: Arc<dyn BackingFile>,
    /// Byte offset of the page's contents in `file`.
    pub offset: usize,
    /// Bytes read from the file; the rest of the page is zero-filled.
    pub read_bytes: usize,
}

impl fmt::Debug for FileBacking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileBacking")
            .field("offset", &self.offset)
            .field("read_bytes", &self.read_bytes)
            .finish_non_exhaustive()
    }
}

/// Current location of a virtual page's data.
#[derive(Debug, Clone)]
pub enum Backing {
    /// Not yet backed; the first touch gets a zeroed frame.
    Zero,
    /// Lazily loaded from an executable.
    File(FileBacking),
    /// Evicted to the given swap slot.
    Swap(SwapSlot),
    /// Resident in a frame; the frame is found through the page directory.
    Frame,
}

impl Backing {
    /// Short name used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Backing::Zero => "zero",
            Backing::File(_) => "file",
            Backing::Swap(_) => "swap",
            Backing::Frame => "frame",
        }
    }
}

/// Metadata for one tracked virtual page.
#[derive(Debug, Clone)]
pub struct PageEntry {
    /// Page-aligned user address.
    pub upage: VirtAddr,
    /// Where the data lives.
    pub backing: Backing,
    /// Whether user code may write the page.
    pub writable: bool,
}

impl PageEntry {
    /// True while the page occupies a frame.
    pub fn is_resident(&self) -> bool {
        matches!(self.backing, Backing::Frame)
    }
}

/// Per-process table of [`PageEntry`] keyed by page address.
#[derive(Debug, Default)]
pub struct PageTable {
    entries: HashMap<VirtAddr, PageEntry>,
}

impl PageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    /// Declares `upage` as an anonymous zero-filled page.
    pub fn declare_zero(&mut self, upage: VirtAddr, writable: bool) -> Result<()> {
        check_page_aligned(upage)?;
        self.insert(PageEntry { upage, backing: Backing::Zero, writable });
        Ok(())
    }

    /// Declares `upage` as loaded from `read_bytes` bytes of `file` at `offset`.
    pub fn declare_file(
        &mut self,
        upage: VirtAddr,
        file: Arc<dyn BackingFile>,
        offset: usize,
        read_bytes: usize,
        writable: bool,
    ) -> Result<()> {
        check_page_aligned(upage)?;
        if read_bytes > PAGE_SIZE {
            return Err(invalid_argument("file-backed page reads more than a page"));
        }
        let backing = Backing::File(FileBacking { file, offset, read_bytes });
        self.insert(PageEntry { upage, backing, writable });
        Ok(())
    }

    /// Inserts `entry`, replacing any entry for the same page.
    pub fn insert(&mut self, entry: PageEntry) -> Option<PageEntry> {
        let old = self.entries.insert(entry.upage, entry);
        if let Some(old) = &old {
            debug_assert!(!old.is_resident(), "redeclared resident page {}", old.upage);
        }
        old
    }

    /// Looks up the entry for the page containing `addr`.
    pub fn lookup(&self, addr: VirtAddr) -> Option<&PageEntry> {
        self.entries.get(&addr.page_round_down())
    }

    /// Marks `upage` resident, returning its previous backing.
    ///
    /// # Panics
    ///
    /// Panics if the page has no entry.
    pub fn mark_resident(&mut self, upage: VirtAddr) -> Backing {
        let entry = self
            .entries
            .get_mut(&upage)
            .unwrap_or_else(|| panic!("mark_resident: no entry for {}", upage));
        core::mem::replace(&mut entry.backing, Backing::Frame)
    }

    /// Records that `upage` now lives in swap `slot`.
    ///
    /// Creates the entry when the page had none (anonymous stack pages).
    pub fn mark_swapped(&mut self, upage: VirtAddr, slot: SwapSlot, writable: bool) {
        match self.entries.get_mut(&upage) {
            Some(entry) => {
                entry.backing = Backing::Swap(slot);
                entry.writable = writable;
            }
            None => {
                self.entries.insert(upage, PageEntry { upage, backing: Backing::Swap(slot), writable });
            }
        }
    }

    /// Updates the writable flag of an existing entry.
    pub fn set_writable(&mut self, upage: VirtAddr, writable: bool) {
        if let Some(entry) = self.entries.get_mut(&upage) {
            entry.writable = writable;
        }
    }

    /// Removes the entry for `upage`.
    pub fn remove(&mut self, upage: VirtAddr) -> Option<PageEntry> {
        self.entries.remove(&upage)
    }

    /// Removes and returns every entry.
    pub fn drain(&mut self) -> Vec<PageEntry> {
        self.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Number of tracked pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no page is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn check_page_aligned(upage: VirtAddr) -> Result<()> {
    if upage.is_page_aligned() {
        Ok(())
    } else {
        Err(invalid_argument("page address is not page-aligned"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimFile;

    #[test]
    fn test_declare_and_lookup() {
        let mut table = PageTable::new();
        table.declare_zero(VirtAddr::new(0x0804_8000), true).unwrap();

        let entry = table.lookup(VirtAddr::new(0x0804_8abc)).unwrap();
        assert_eq!(entry.upage, VirtAddr::new(0x0804_8000));
        assert!(matches!(entry.backing, Backing::Zero));
        assert!(entry.writable);
        assert!(table.lookup(VirtAddr::new(0x0804_9000)).is_none());
    }

    #[test]
    fn test_redeclare_replaces() {
        let mut table = PageTable::new();
        let upage = VirtAddr::new(0x1000);
        let file = Arc::new(SimFile::new(alloc::vec![7u8; 100]));

        table.declare_zero(upage, false).unwrap();
        table.declare_file(upage, file, 0, 100, true).unwrap();

        assert_eq!(table.len(), 1);
        let entry = table.lookup(upage).unwrap();
        assert!(entry.writable);
        match &entry.backing {
            Backing::File(fb) => assert_eq!(fb.read_bytes, 100),
            other => panic!("unexpected backing {:?}", other),
        }
    }

    #[test]
    fn test_declare_rejects_bad_arguments() {
        let mut table = PageTable::new();
        let file = Arc::new(SimFile::new(alloc::vec![0u8; 16]));
        assert!(table.declare_zero(VirtAddr::new(0x1004), true).is_err());
        assert!(table.declare_file(VirtAddr::new(0x1000), file, 0, PAGE_SIZE + 1, true).is_err());
        assert!(table.is_empty());
    }

    #[test]
    fn test_transitions() {
        let mut table = PageTable::new();
        let upage = VirtAddr::new(0x2000);
        table.declare_zero(upage, true).unwrap();

        let previous = table.mark_resident(upage);
        assert!(matches!(previous, Backing::Zero));
        assert!(table.lookup(upage).unwrap().is_resident());

        table.mark_swapped(upage, SwapSlot::new(3), false);
        let entry = table.lookup(upage).unwrap();
        assert!(matches!(entry.backing, Backing::Swap(slot) if slot == SwapSlot::new(3)));
        assert!(!entry.writable);
    }

    #[test]
    fn test_mark_swapped_creates_missing_entry() {
        let mut table = PageTable::new();
        let upage = VirtAddr::new(0xbfff_e000);
        table.mark_swapped(upage, SwapSlot::new(0), true);
        assert_eq!(table.len(), 1);
        assert!(table.lookup(upage).unwrap().writable);
    }

    #[test]
    #[should_panic(expected = "no entry")]
    fn test_mark_resident_without_entry_panics() {
        let mut table = PageTable::new();
        table.mark_resident(VirtAddr::new(0x3000));
    }

    #[test]
    fn test_drain() {
        let mut table = PageTable::new();
        table.declare_zero(VirtAddr::new(0x1000), true).unwrap();
        table.declare_zero(VirtAddr::new(0x2000), true).unwrap();
        let drained = table.drain();
        assert_eq!(drained.len(), 2);
        assert!(table.is_empty());
    }
}
