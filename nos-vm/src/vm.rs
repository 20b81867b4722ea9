//! Kernel-wide paging state
//!
//! [`Vm`] is built once at boot and shared by every fault path. It owns the
//! frame registry with its clock hand, the filesystem lock serializing
//! executable reads, and the counters behind [`Vm::stats`].

use alloc::sync::Arc;
use nos_api::error::{invalid_argument, Result};
use nos_api::memory::{FramePool, PageDirectory, PhysAddr, SwapDevice, VirtAddr, PAGE_SIZE};
use nos_api::sync::Mutex;
use nos_api::Pid;

use crate::config::VmConfig;
use crate::fault::{self, PageFault, PageFaultResult};
use crate::frame::FrameRegistry;
use crate::page::Backing;
use crate::space::AddressSpace;
use crate::stats::{VmStats, VmStatsSnapshot};

/// Demand-paging virtual memory manager.
pub struct Vm {
    pub(crate) config: VmConfig,
    pub(crate) registry: FrameRegistry,
    pub(crate) pool: Arc<dyn FramePool>,
    pub(crate) swap: Arc<dyn SwapDevice>,
    pub(crate) fs_lock: Mutex<()>,
    pub(crate) stats: Arc<VmStats>,
}

impl Vm {
    /// Creates the manager over a physical page pool and a swap device.
    pub fn new(config: VmConfig, pool: Arc<dyn FramePool>, swap: Arc<dyn SwapDevice>) -> Result<Self> {
        config.verify()?;
        let stats = Arc::new(VmStats::new());
        let registry = FrameRegistry::new(pool.clone(), swap.clone(), stats.clone(), config.max_scan_passes);
        log::info!(
            "vm: {} frames, user space {:#x}..{:#x}, stack limit {:#x}",
            pool.capacity(),
            config.user_base,
            config.user_top,
            config.stack_limit
        );
        Ok(Self {
            config,
            registry,
            pool,
            swap,
            fs_lock: Mutex::new(()),
            stats,
        })
    }

    /// Creates the address space of a new process.
    pub fn create_address_space(&self, pid: Pid, pagedir: Arc<dyn PageDirectory>) -> Arc<AddressSpace> {
        log::debug!("pid {}: address space created", pid);
        AddressSpace::new(pid, pagedir)
    }

    /// Resolves a page fault raised by `space`'s process.
    ///
    /// # Panics
    ///
    /// Panics if the fault happened in kernel context, or if the kernel's own
    /// bookkeeping turns out to be inconsistent.
    pub fn handle_page_fault(&self, space: &Arc<AddressSpace>, fault: &PageFault) -> PageFaultResult {
        fault::handle(self, space, fault)
    }

    /// Maps the initial stack page just below the top of user space.
    ///
    /// Returns the initial stack pointer.
    pub fn setup_stack(&self, space: &Arc<AddressSpace>) -> Result<VirtAddr> {
        let upage = VirtAddr::new(self.config.user_top - PAGE_SIZE);
        let frame = self.registry.allocate(space, true)?;
        if let Err(err) = space.pagedir().install(upage, frame, true) {
            self.registry.free(frame);
            return Err(err);
        }
        self.registry.bind(frame, upage);
        self.stats.record_stack_pages(1);
        Ok(VirtAddr::new(self.config.user_top))
    }

    /// Maps a registered `frame` at `upage` on behalf of the loader.
    ///
    /// If the page has a metadata entry it becomes resident and takes the
    /// new permission.
    pub fn install_page(&self, space: &Arc<AddressSpace>, upage: VirtAddr, frame: PhysAddr, writable: bool) -> Result<()> {
        if !upage.is_page_aligned() || !self.config.is_user_address(upage.as_usize()) {
            return Err(invalid_argument("install target is not a user page"));
        }
        match self.registry.find(frame) {
            Some(info) if info.owner == space.pid() && info.upage.is_none() => {}
            _ => return Err(invalid_argument("frame is not an unbound frame of this process")),
        }

        space.pagedir().install(upage, frame, writable)?;
        let stale_slot = {
            let mut pages = space.pages();
            if pages.lookup(upage).is_some() {
                pages.set_writable(upage, writable);
                match pages.mark_resident(upage) {
                    Backing::Swap(slot) => Some(slot),
                    _ => None,
                }
            } else {
                None
            }
        };
        if let Some(slot) = stale_slot {
            self.swap.release(slot);
        }
        self.registry.bind(frame, upage);
        Ok(())
    }

    /// Pins the resident page containing `va` so eviction leaves it alone.
    pub fn pin_page(&self, space: &Arc<AddressSpace>, va: VirtAddr) -> Result<PhysAddr> {
        self.registry.pin_user_page(space, va.page_round_down(), true)
    }

    /// Undoes [`pin_page`](Self::pin_page).
    pub fn unpin_page(&self, space: &Arc<AddressSpace>, va: VirtAddr) -> Result<()> {
        self.registry.pin_user_page(space, va.page_round_down(), false).map(|_| ())
    }

    /// Checks whether the process may access `va`.
    ///
    /// The address must be in user space and either mapped or tracked by the
    /// metadata table; a write additionally needs a writable page.
    pub fn access_ok(&self, space: &AddressSpace, va: VirtAddr, is_write: bool) -> bool {
        self.config.is_user_address(va.as_usize()) && space.access_ok(va, is_write)
    }

    /// Tears down `space`, returning every frame and swap slot it holds.
    ///
    /// No fault against `space` may be in flight or arrive afterwards.
    pub fn destroy_address_space(&self, space: &Arc<AddressSpace>) {
        let _serial = space.lock_faults();
        let frames = self.registry.release_owned_by(space);

        let entries = space.pages().drain();
        let mut slots = 0;
        for entry in &entries {
            if let Backing::Swap(slot) = entry.backing {
                self.swap.release(slot);
                slots += 1;
            }
        }
        log::debug!(
            "pid {}: address space destroyed ({} frames, {} swap slots, {} entries)",
            space.pid(),
            frames,
            slots,
            entries.len()
        );
    }

    /// Global frame registry.
    pub fn registry(&self) -> &FrameRegistry {
        &self.registry
    }

    /// Snapshot of the paging counters.
    pub fn stats(&self) -> VmStatsSnapshot {
        self.stats.snapshot()
    }

    /// Active configuration.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }
}
