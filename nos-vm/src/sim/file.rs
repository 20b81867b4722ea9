//! Simulated executable file

use alloc::vec::Vec;
use nos_api::error::{io_error, Result};
use nos_api::memory::BackingFile;
use nos_api::sync::{AtomicBool, AtomicUsize, Ordering};

/// An immutable file held in memory.
///
/// Reads past the end return fewer bytes than asked for. The file also
/// counts its reads and asserts that no two of them overlap, which holds as
/// long as callers respect the filesystem lock.
pub struct SimFile {
    data: Vec<u8>,
    reads: AtomicUsize,
    active: AtomicUsize,
    fail_reads: AtomicBool,
}

impl SimFile {
    /// Creates a file with the given contents.
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            reads: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            fail_reads: AtomicBool::new(false),
        }
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True for an empty file.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Makes every subsequent read fail with a device error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }
}

impl BackingFile for SimFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        let overlapping = self.active.fetch_add(1, Ordering::SeqCst);
        assert_eq!(overlapping, 0, "concurrent reads of one file");
        self.reads.fetch_add(1, Ordering::SeqCst);

        let result = if self.fail_reads.load(Ordering::SeqCst) {
            Err(io_error("simulated file read failure"))
        } else {
            let start = offset.min(self.data.len());
            let end = offset.saturating_add(buf.len()).min(self.data.len());
            buf[..end - start].copy_from_slice(&self.data[start..end]);
            Ok(end - start)
        };

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
