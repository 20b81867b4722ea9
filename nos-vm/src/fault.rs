//! Page fault handling
//!
//! [`handle`] resolves a fault against one address space. A fault is either
//! resolved by bringing the page into a frame, or it kills the faulting
//! process. Faults raised in kernel context are kernel bugs and panic.
//!
//! Resolution order:
//!
//! 1. Kernel-context faults panic. Faults outside user space kill the process.
//! 2. Rights violations kill the process.
//! 3. A tracked page is loaded from its backing (zero, swap or file).
//! 4. An untracked page close enough to the stack pointer grows the stack.
//! 5. Anything else is an invalid access and kills the process.

use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use nos_api::error::{Error, Result};
use nos_api::memory::{PageFaultErrorCode, PhysAddr, VirtAddr, PAGE_SIZE};
use nos_api::ExitStatus;

pub use nos_api::FAULT_EXIT_STATUS;

use crate::page::{Backing, FileBacking, PageEntry};
use crate::space::AddressSpace;
use crate::vm::Vm;

/// Fault context delivered by the exception entry path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFault {
    /// Address whose access faulted
    pub fault_addr: VirtAddr,
    /// Error code pushed by the MMU
    pub error_code: PageFaultErrorCode,
    /// User stack pointer at the time of the fault
    pub stack_pointer: VirtAddr,
}

impl PageFault {
    /// Creates a fault record.
    pub fn new(fault_addr: VirtAddr, error_code: PageFaultErrorCode, stack_pointer: VirtAddr) -> Self {
        Self { fault_addr, error_code, stack_pointer }
    }

    /// Creates the record of a not-present fault.
    pub fn not_present(fault_addr: VirtAddr, is_write: bool, is_user: bool, stack_pointer: VirtAddr) -> Self {
        Self::new(fault_addr, PageFaultErrorCode::not_present(is_write, is_user), stack_pointer)
    }

    fn describe(&self) -> &'static str {
        match (self.error_code.is_not_present(), self.error_code.is_write()) {
            (true, true) => "not-present write",
            (true, false) => "not-present read",
            (false, true) => "rights violation on write",
            (false, false) => "rights violation on read",
        }
    }
}

/// Outcome of a page fault
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageFaultResult {
    /// The page is mapped; the faulting instruction can be restarted.
    Handled,
    /// The faulting process must be terminated with `status`.
    Killed {
        /// Exit status reported for the process
        status: ExitStatus,
        /// Why the fault could not be resolved
        cause: Error,
    },
}

impl PageFaultResult {
    /// True if the fault was resolved.
    pub fn is_handled(&self) -> bool {
        matches!(self, PageFaultResult::Handled)
    }
}

/// Resolves `fault` in `space`.
///
/// # Panics
///
/// Panics on a kernel-context fault, on a fault against a page whose
/// metadata says it is resident, and on the unrecoverable conditions of
/// [`FrameRegistry::allocate`](crate::FrameRegistry::allocate).
pub(crate) fn handle(vm: &Vm, space: &Arc<AddressSpace>, fault: &PageFault) -> PageFaultResult {
    vm.stats.record_fault();

    if !fault.error_code.is_user() {
        log::error!("kernel page fault at {} ({})", fault.fault_addr, fault.describe());
        panic!("unexpected page fault in kernel context at {}", fault.fault_addr);
    }
    if !vm.config.is_user_address(fault.fault_addr.as_usize()) {
        return kill(vm, space, fault, Error::InvalidAccess(fault.fault_addr.as_usize()));
    }

    let _serial = space.lock_faults();
    match resolve(vm, space, fault) {
        Ok(()) => {
            vm.stats.record_resolved();
            PageFaultResult::Handled
        }
        Err(cause) => kill(vm, space, fault, cause),
    }
}

fn kill(vm: &Vm, space: &AddressSpace, fault: &PageFault, cause: Error) -> PageFaultResult {
    log::warn!(
        "pid {}: {} at {} (sp {}): {}; killing process",
        space.pid(),
        fault.describe(),
        fault.fault_addr,
        fault.stack_pointer,
        cause
    );
    vm.stats.record_killed();
    PageFaultResult::Killed { status: FAULT_EXIT_STATUS, cause }
}

fn resolve(vm: &Vm, space: &Arc<AddressSpace>, fault: &PageFault) -> Result<()> {
    let addr = fault.fault_addr;
    if !fault.error_code.is_not_present() {
        return Err(Error::ProtectionViolation(addr.as_usize()));
    }

    let entry = space.pages().lookup(addr).cloned();
    match entry {
        Some(entry) => {
            if fault.error_code.is_write() && !entry.writable {
                return Err(Error::ProtectionViolation(addr.as_usize()));
            }
            load_page(vm, space, entry)
        }
        None if vm.config.is_stack_access(addr.as_usize(), fault.stack_pointer.as_usize()) => {
            grow_stack(vm, space, fault)
        }
        None => Err(Error::InvalidAccess(addr.as_usize())),
    }
}

/// Brings a tracked page into a fresh frame.
fn load_page(vm: &Vm, space: &Arc<AddressSpace>, entry: PageEntry) -> Result<()> {
    let upage = entry.upage;
    log::trace!("pid {}: loading {} from {}", space.pid(), upage, entry.backing.kind());

    match entry.backing {
        Backing::Frame => {
            panic!("pid {}: fault on {} whose metadata says resident", space.pid(), upage);
        }
        Backing::Zero => {
            let frame = vm.registry.allocate(space, true)?;
            map_resident(vm, space, upage, frame, entry.writable)?;
            vm.stats.record_zero_fill();
        }
        Backing::Swap(slot) => {
            let frame = vm.registry.allocate(space, false)?;
            let mut contents = vec![0u8; PAGE_SIZE];
            if let Err(err) = vm.swap.read_into(slot, &mut contents) {
                vm.registry.free(frame);
                return Err(err);
            }
            vm.pool.write_frame(frame, &contents);
            map_resident(vm, space, upage, frame, entry.writable)?;
            vm.swap.release(slot);
            vm.stats.record_swap_in();
        }
        Backing::File(source) => {
            let frame = vm.registry.allocate(space, false)?;
            let contents = match read_file_page(vm, &source) {
                Ok(contents) => contents,
                Err(err) => {
                    vm.registry.free(frame);
                    return Err(err);
                }
            };
            vm.pool.write_frame(frame, &contents);
            map_resident(vm, space, upage, frame, entry.writable)?;
            vm.stats.record_file_load();
        }
    }
    Ok(())
}

/// Reads one page worth of `source`, zero-filling past `read_bytes`.
///
/// The frame is allocated before the filesystem lock is taken, so the two
/// locks never nest.
fn read_file_page(vm: &Vm, source: &FileBacking) -> Result<Vec<u8>> {
    let mut contents = vec![0u8; PAGE_SIZE];
    let read = {
        let _fs = vm.fs_lock.lock();
        source.file.read_at(source.offset, &mut contents[..source.read_bytes])?
    };
    if read != source.read_bytes {
        return Err(Error::ShortRead { expected: source.read_bytes, actual: read });
    }
    Ok(contents)
}

/// Installs `frame` at `upage` and records the page as resident.
///
/// The frame stays unbound, and thus out of the clock's reach, until the
/// metadata already says resident.
fn map_resident(vm: &Vm, space: &AddressSpace, upage: VirtAddr, frame: PhysAddr, writable: bool) -> Result<()> {
    if let Err(err) = space.pagedir().install(upage, frame, writable) {
        vm.registry.free(frame);
        return Err(err);
    }
    space.pages().mark_resident(upage);
    vm.registry.bind(frame, upage);
    Ok(())
}

/// Extends the stack down to the faulting page.
///
/// Every missing page from the lower of the fault page and the stack
/// pointer's page up to the fault page is mapped, then the walk continues
/// upward until it meets the existing stack. Pages that already have a
/// mapping or a metadata entry are left alone. If any allocation fails, every
/// page added by this fault is released again.
fn grow_stack(vm: &Vm, space: &Arc<AddressSpace>, fault: &PageFault) -> Result<()> {
    let fault_page = fault.fault_addr.page_round_down().as_usize();
    let sp_page = fault.stack_pointer.page_round_down().as_usize();
    let low = fault_page.min(sp_page).max(vm.config.stack_bottom());

    let mut grown: Vec<VirtAddr> = Vec::new();
    let mut va = low;
    while va < vm.config.user_top {
        let upage = VirtAddr::new(va);
        let occupied = space.pagedir().translate(upage).is_some() || space.pages().lookup(upage).is_some();
        if occupied {
            if va > fault_page {
                break;
            }
        } else if let Err(err) = map_stack_page(vm, space, upage) {
            let released = vm.registry.release_pages(space, &grown);
            log::debug!("pid {}: stack growth at {} rolled back {} pages", space.pid(), upage, released);
            return Err(err);
        } else {
            grown.push(upage);
        }
        va += PAGE_SIZE;
    }

    log::debug!("pid {}: stack grew by {} pages down to {:#x}", space.pid(), grown.len(), low);
    vm.stats.record_stack_pages(grown.len() as u64);
    Ok(())
}

fn map_stack_page(vm: &Vm, space: &Arc<AddressSpace>, upage: VirtAddr) -> Result<()> {
    let frame = vm.registry.allocate(space, true)?;
    if let Err(err) = space.pagedir().install(upage, frame, true) {
        vm.registry.free(frame);
        return Err(err);
    }
    vm.registry.bind(frame, upage);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::sim::{SimFile, SimFramePool, SimPageDirectory, SimSwap};
    use nos_api::memory::PageDirectory;

    const TOP: usize = 0xC000_0000;

    fn setup(frames: usize) -> (Vm, Arc<AddressSpace>, Arc<SimPageDirectory>) {
        let pool = Arc::new(SimFramePool::new(frames));
        let vm = Vm::new(VmConfig::default(), pool.clone(), Arc::new(SimSwap::new(8))).unwrap();
        let dir = Arc::new(SimPageDirectory::new(pool));
        let space = vm.create_address_space(1, dir.clone());
        (vm, space, dir)
    }

    fn user_read(addr: usize, sp: usize) -> PageFault {
        PageFault::not_present(VirtAddr::new(addr), false, true, VirtAddr::new(sp))
    }

    #[test]
    fn test_describe() {
        let fault = user_read(0x1000, 0);
        assert_eq!(fault.describe(), "not-present read");
        let code = PageFaultErrorCode::PRESENT | PageFaultErrorCode::WRITE | PageFaultErrorCode::USER;
        let fault = PageFault::new(VirtAddr::new(0x1000), code, VirtAddr::new(0));
        assert_eq!(fault.describe(), "rights violation on write");
    }

    #[test]
    fn test_zero_page_resolves_resident() {
        let (vm, space, dir) = setup(2);
        space.declare_zero(VirtAddr::new(0x0804_8000), true).unwrap();

        let result = handle(&vm, &space, &user_read(0x0804_8123, TOP));
        assert!(result.is_handled());
        assert!(dir.translate(VirtAddr::new(0x0804_8000)).is_some());
        assert!(space.lookup(VirtAddr::new(0x0804_8000)).unwrap().is_resident());
        assert_eq!(vm.stats().zero_fills, 1);
    }

    #[test]
    fn test_write_to_read_only_entry_kills() {
        let (vm, space, _dir) = setup(2);
        space.declare_zero(VirtAddr::new(0x0804_8000), false).unwrap();

        let fault = PageFault::not_present(VirtAddr::new(0x0804_8000), true, true, VirtAddr::new(TOP));
        let result = handle(&vm, &space, &fault);
        assert_eq!(
            result,
            PageFaultResult::Killed { status: FAULT_EXIT_STATUS, cause: Error::ProtectionViolation(0x0804_8000) }
        );
        assert!(vm.registry().is_empty());
    }

    #[test]
    fn test_file_read_failure_frees_frame() {
        let (vm, space, _dir) = setup(2);
        let file = Arc::new(SimFile::new(vec![7u8; 64]));
        file.set_fail_reads(true);
        space.declare_file(VirtAddr::new(0x0804_8000), file, 0, 64, false).unwrap();

        let result = handle(&vm, &space, &user_read(0x0804_8000, TOP));
        assert!(matches!(result, PageFaultResult::Killed { cause: Error::IoError(_), .. }));
        assert!(vm.registry().is_empty());
        assert!(!space.lookup(VirtAddr::new(0x0804_8000)).unwrap().is_resident());
    }

    #[test]
    #[should_panic(expected = "metadata says resident")]
    fn test_resident_entry_fault_panics() {
        let (vm, space, _dir) = setup(2);
        space.declare_zero(VirtAddr::new(0x0804_8000), true).unwrap();
        space.pages().mark_resident(VirtAddr::new(0x0804_8000));
        handle(&vm, &space, &user_read(0x0804_8000, TOP));
    }

    #[test]
    fn test_stack_growth_fills_gap_to_existing_stack() {
        let (vm, space, dir) = setup(8);
        let sp = vm.setup_stack(&space).unwrap().as_usize();

        // Push three pages below the initial stack page in one go.
        let fault_addr = sp - 4 * PAGE_SIZE + 16;
        let result = handle(&vm, &space, &user_read(fault_addr, fault_addr));
        assert!(result.is_handled());
        assert_eq!(dir.mapped_count(), 4);
        assert_eq!(vm.stats().stack_pages, 4);
    }

    #[test]
    fn test_stack_growth_rolls_back_on_failure() {
        let pool = Arc::new(SimFramePool::new(2));
        let swap = Arc::new(SimSwap::new(8));
        let vm = Vm::new(VmConfig::default(), pool.clone(), swap.clone()).unwrap();
        let dir = Arc::new(SimPageDirectory::new(pool.clone()));
        let space = vm.create_address_space(1, dir.clone());
        let sp = vm.setup_stack(&space).unwrap().as_usize();

        // Growing three pages needs an eviction, which cannot write to swap.
        swap.set_fail_writes(true);
        let fault_addr = sp - 3 * PAGE_SIZE;
        let result = handle(&vm, &space, &user_read(fault_addr, fault_addr));
        assert!(matches!(result, PageFaultResult::Killed { cause: Error::IoError(_), .. }));
        assert_eq!(dir.mapped_count(), 1);
        assert_eq!(vm.registry().len(), 1);
        assert_eq!(pool.free_count(), 1);
    }
}
