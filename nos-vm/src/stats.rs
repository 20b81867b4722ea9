//! Paging statistics

use nos_api::sync::{AtomicU64, Ordering};

/// Live paging counters, shared by the fault handler and the frame registry.
#[derive(Debug, Default)]
pub struct VmStats {
    page_faults: AtomicU64,
    resolved: AtomicU64,
    killed: AtomicU64,
    evictions: AtomicU64,
    swap_ins: AtomicU64,
    stack_pages: AtomicU64,
    file_loads: AtomicU64,
    zero_fills: AtomicU64,
}

/// Point-in-time copy of [`VmStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VmStatsSnapshot {
    /// Page faults delivered to the handler
    pub page_faults: u64,
    /// Faults resolved by installing a mapping
    pub resolved: u64,
    /// Faults that terminated the faulting process
    pub killed: u64,
    /// Frames evicted to swap
    pub evictions: u64,
    /// Pages read back from swap
    pub swap_ins: u64,
    /// Pages added by stack growth
    pub stack_pages: u64,
    /// Pages loaded from executables
    pub file_loads: u64,
    /// Pages materialized as zeros
    pub zero_fills: u64,
}

impl VmStats {
    /// Creates zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_fault(&self) {
        self.page_faults.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resolved(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_killed(&self) {
        self.killed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_swap_in(&self) {
        self.swap_ins.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stack_pages(&self, pages: u64) {
        self.stack_pages.fetch_add(pages, Ordering::Relaxed);
    }

    pub(crate) fn record_file_load(&self) {
        self.file_loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_zero_fill(&self) {
        self.zero_fills.fetch_add(1, Ordering::Relaxed);
    }

    /// Takes a snapshot of all counters.
    pub fn snapshot(&self) -> VmStatsSnapshot {
        VmStatsSnapshot {
            page_faults: self.page_faults.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            swap_ins: self.swap_ins.load(Ordering::Relaxed),
            stack_pages: self.stack_pages.load(Ordering::Relaxed),
            file_loads: self.file_loads.load(Ordering::Relaxed),
            zero_fills: self.zero_fills.load(Ordering::Relaxed),
        }
    }
}
