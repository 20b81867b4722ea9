//! Common test utilities for nos-vm integration tests

#![allow(dead_code)]

use std::sync::Arc;

use nos_vm::sim::{SimFramePool, SimPageDirectory, SimSwap};
use nos_vm::{AddressSpace, PageFault, PageFaultResult, Pid, VirtAddr, Vm, VmConfig};

/// Faults serviced per access before giving up on progress.
const MAX_RETRIES: usize = 64;

/// A VM over simulated hardware.
pub struct Harness {
    pub vm: Vm,
    pub pool: Arc<SimFramePool>,
    pub swap: Arc<SimSwap>,
}

impl Harness {
    pub fn new(frames: usize, swap_slots: usize) -> Self {
        Self::with_config(VmConfig::default(), frames, swap_slots)
    }

    pub fn with_config(config: VmConfig, frames: usize, swap_slots: usize) -> Self {
        let pool = Arc::new(SimFramePool::new(frames));
        let swap = Arc::new(SimSwap::new(swap_slots));
        let vm = Vm::new(config, pool.clone(), swap.clone()).expect("valid configuration");
        Self { vm, pool, swap }
    }

    /// Creates a process with an empty page directory.
    pub fn spawn(&self, pid: Pid) -> Process {
        let dir = Arc::new(SimPageDirectory::new(self.pool.clone()));
        let space = self.vm.create_address_space(pid, dir.clone());
        Process { space, dir, sp: VirtAddr::new(self.vm.config().user_top) }
    }
}

/// A simulated user process.
pub struct Process {
    pub space: Arc<AddressSpace>,
    pub dir: Arc<SimPageDirectory>,
    pub sp: VirtAddr,
}

impl Process {
    /// Loads from user memory, servicing faults the way the trap path would.
    pub fn read(&self, vm: &Vm, va: usize, buf: &mut [u8]) -> Result<(), PageFaultResult> {
        let va = VirtAddr::new(va);
        for _ in 0..MAX_RETRIES {
            match self.dir.read(va, buf) {
                Ok(()) => return Ok(()),
                Err(code) => self.service(vm, PageFault::new(va, code, self.sp))?,
            }
        }
        panic!("pid {}: read at {} made no progress", self.space.pid(), va);
    }

    /// Stores to user memory, servicing faults the way the trap path would.
    pub fn write(&self, vm: &Vm, va: usize, data: &[u8]) -> Result<(), PageFaultResult> {
        let va = VirtAddr::new(va);
        for _ in 0..MAX_RETRIES {
            match self.dir.write(va, data) {
                Ok(()) => return Ok(()),
                Err(code) => self.service(vm, PageFault::new(va, code, self.sp))?,
            }
        }
        panic!("pid {}: write at {} made no progress", self.space.pid(), va);
    }

    /// Reads a whole page.
    pub fn read_page(&self, vm: &Vm, upage: usize) -> Result<Vec<u8>, PageFaultResult> {
        let mut page = vec![0u8; nos_vm::PAGE_SIZE];
        self.read(vm, upage, &mut page)?;
        Ok(page)
    }

    fn service(&self, vm: &Vm, fault: PageFault) -> Result<(), PageFaultResult> {
        match vm.handle_page_fault(&self.space, &fault) {
            PageFaultResult::Handled => Ok(()),
            killed => Err(killed),
        }
    }
}
