//! Frame registry
//!
//! The registry records every physical frame currently committed to a user
//! process: its owner, the user page mapped onto it and whether it is pinned.
//! Entries live in an arena whose slot order doubles as the clock's scan
//! order; a hash index finds a frame's slot by physical address.
//!
//! Two locks guard the registry. The allocation lock (the clock hand)
//! serializes the whole allocate-or-evict sequence, so two faults never pick
//! the same victim or claim the same freed page. The arena lock guards
//! structural changes and is only held for short critical sections.

use alloc::sync::Arc;
use alloc::vec::Vec;
use hashbrown::HashMap;
use nos_api::error::{not_found, Result};
use nos_api::memory::{FramePool, PhysAddr, SwapDevice, VirtAddr};
use nos_api::sync::Mutex;
use nos_api::Pid;

use crate::evict::{self, ClockHand};
use crate::page::Backing;
use crate::space::AddressSpace;
use crate::stats::VmStats;

/// A registered frame.
pub(crate) struct FrameEntry {
    pub(crate) frame: PhysAddr,
    pub(crate) owner: Arc<AddressSpace>,
    pub(crate) upage: Option<VirtAddr>,
    pub(crate) pinned: bool,
}

impl FrameEntry {
    pub(crate) fn new(frame: PhysAddr, owner: Arc<AddressSpace>) -> Self {
        Self { frame, owner, upage: None, pinned: false }
    }

    fn info(&self) -> FrameInfo {
        FrameInfo {
            frame: self.frame,
            owner: self.owner.pid(),
            upage: self.upage,
            pinned: self.pinned,
        }
    }
}

/// Public view of a registered frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Physical address of the frame
    pub frame: PhysAddr,
    /// Owning process
    pub owner: Pid,
    /// User page mapped onto the frame, once installed
    pub upage: Option<VirtAddr>,
    /// Whether the frame is protected from eviction
    pub pinned: bool,
}

/// Slot arena with a hash index by physical address.
#[derive(Default)]
pub(crate) struct FrameArena {
    slots: Vec<Option<FrameEntry>>,
    index: HashMap<PhysAddr, usize>,
    vacant: Vec<usize>,
}

impl FrameArena {
    fn insert(&mut self, entry: FrameEntry) {
        let frame = entry.frame;
        assert!(!self.index.contains_key(&frame), "frame {} registered twice", frame);
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        };
        self.index.insert(frame, slot);
    }

    fn remove(&mut self, frame: PhysAddr) -> Option<FrameEntry> {
        let slot = self.index.remove(&frame)?;
        self.vacant.push(slot);
        self.slots[slot].take()
    }

    fn get(&self, frame: PhysAddr) -> Option<&FrameEntry> {
        let slot = *self.index.get(&frame)?;
        self.slots[slot].as_ref()
    }

    fn get_mut(&mut self, frame: PhysAddr) -> Option<&mut FrameEntry> {
        let slot = *self.index.get(&frame)?;
        self.slots[slot].as_mut()
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Option<FrameEntry>] {
        &mut self.slots
    }

    fn len(&self) -> usize {
        self.index.len()
    }

    fn entries(&self) -> impl Iterator<Item = &FrameEntry> {
        self.slots.iter().flatten()
    }
}

/// Global registry of frames committed to user processes.
pub struct FrameRegistry {
    hand: Mutex<ClockHand>,
    arena: Mutex<FrameArena>,
    pool: Arc<dyn FramePool>,
    swap: Arc<dyn SwapDevice>,
    stats: Arc<VmStats>,
    max_scan_passes: usize,
}

impl FrameRegistry {
    /// Creates an empty registry drawing frames from `pool` and evicting to `swap`.
    pub fn new(
        pool: Arc<dyn FramePool>,
        swap: Arc<dyn SwapDevice>,
        stats: Arc<VmStats>,
        max_scan_passes: usize,
    ) -> Self {
        Self {
            hand: Mutex::new(ClockHand::new()),
            arena: Mutex::new(FrameArena::default()),
            pool,
            swap,
            stats,
            max_scan_passes,
        }
    }

    /// Allocates a frame for `owner`, evicting one if the pool is exhausted.
    ///
    /// The frame is registered but unbound; it is invisible to the clock
    /// until [`bind`](Self::bind) records its user page.
    ///
    /// # Errors
    ///
    /// Fails only when the eviction it triggered could not write the victim
    /// to swap. The victim stays resident in that case.
    ///
    /// # Panics
    ///
    /// Panics if the pool is still empty after a successful eviction, or if
    /// swap is full as well.
    pub fn allocate(&self, owner: &Arc<AddressSpace>, zero: bool) -> Result<PhysAddr> {
        let mut hand = self.hand.lock();
        let frame = match self.pool.acquire_page(zero) {
            Some(frame) => frame,
            None => {
                let freed = self.evict_one(&mut hand)?;
                self.pool
                    .acquire_page(zero)
                    .unwrap_or_else(|| panic!("out of memory: pool empty right after freeing {}", freed))
            }
        };
        self.arena.lock().insert(FrameEntry::new(frame, owner.clone()));
        log::trace!("pid {}: allocated {}", owner.pid(), frame);
        Ok(frame)
    }

    /// Evicts one frame to swap and returns its page to the pool.
    fn evict_one(&self, hand: &mut ClockHand) -> Result<PhysAddr> {
        let victim = {
            let mut arena = self.arena.lock();
            let frames = arena.len();
            evict::select_victim(arena.slots_mut(), hand, self.max_scan_passes)
                .unwrap_or_else(|| panic!("eviction scan found no victim among {} frames", frames))
        };

        match evict::swap_out(&victim, self.pool.as_ref(), self.swap.as_ref()) {
            Ok(slot) => {
                log::debug!(
                    "evicted {} of pid {} ({}, {}) to swap slot {}",
                    victim.upage,
                    victim.owner.pid(),
                    victim.frame,
                    if victim.dirty { "dirty" } else { "clean" },
                    slot.index()
                );
                let entry = self.arena.lock().remove(victim.frame);
                assert!(entry.is_some(), "victim {} vanished from the registry", victim.frame);
                self.pool.release_page(victim.frame);
                self.stats.record_eviction();
                Ok(victim.frame)
            }
            Err(err) => {
                if let Some(entry) = self.arena.lock().get_mut(victim.frame) {
                    entry.pinned = false;
                }
                Err(err)
            }
        }
    }

    /// Records that `frame` now backs `upage` in its owner's page directory.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is not registered.
    pub fn bind(&self, frame: PhysAddr, upage: VirtAddr) {
        let mut arena = self.arena.lock();
        let entry = arena
            .get_mut(frame)
            .unwrap_or_else(|| panic!("bind of unregistered frame {}", frame));
        entry.upage = Some(upage);
    }

    /// Unregisters `frame` and returns it to the pool.
    ///
    /// The caller clears the hardware mapping, if one was installed.
    ///
    /// # Panics
    ///
    /// Panics if `frame` is not registered (double free).
    pub fn free(&self, frame: PhysAddr) {
        let _hand = self.hand.lock();
        let entry = self.arena.lock().remove(frame);
        if entry.is_none() {
            panic!("free of unregistered frame {}", frame);
        }
        self.pool.release_page(frame);
    }

    /// Looks up a registered frame.
    pub fn find(&self, frame: PhysAddr) -> Option<FrameInfo> {
        self.arena.lock().get(frame).map(FrameEntry::info)
    }

    /// Pins or unpins `frame`.
    pub fn set_pinned(&self, frame: PhysAddr, pinned: bool) -> Result<()> {
        let mut arena = self.arena.lock();
        let entry = arena.get_mut(frame).ok_or_else(|| not_found("frame is not registered"))?;
        entry.pinned = pinned;
        Ok(())
    }

    /// Pins or unpins the frame backing `upage` in `space`.
    ///
    /// Runs under the allocation lock, so the frame cannot be evicted between
    /// the translation and the update. Returns the frame.
    pub fn pin_user_page(&self, space: &Arc<AddressSpace>, upage: VirtAddr, pinned: bool) -> Result<PhysAddr> {
        let _hand = self.hand.lock();
        let frame = space
            .pagedir()
            .translate(upage)
            .ok_or_else(|| not_found("page is not resident"))?;
        let mut arena = self.arena.lock();
        let entry = arena
            .get_mut(frame)
            .filter(|entry| Arc::ptr_eq(&entry.owner, space) && entry.upage == Some(upage))
            .ok_or_else(|| not_found("page is not backed by a registered frame"))?;
        entry.pinned = pinned;
        Ok(frame)
    }

    /// Releases the user pages `upages` of `space`, wherever they now live.
    ///
    /// Resident pages lose their mapping and frame. Pages evicted in the
    /// meantime lose their metadata entry and swap slot. Returns the number of
    /// pages released.
    pub fn release_pages(&self, space: &Arc<AddressSpace>, upages: &[VirtAddr]) -> usize {
        let _hand = self.hand.lock();
        let mut released = 0;
        for &upage in upages {
            if let Some(frame) = space.pagedir().translate(upage) {
                space.pagedir().clear(upage);
                let entry = self.arena.lock().remove(frame);
                assert!(entry.is_some(), "mapped frame {} missing from the registry", frame);
                self.pool.release_page(frame);
                released += 1;
            } else if let Some(entry) = space.pages().remove(upage) {
                if let Backing::Swap(slot) = entry.backing {
                    self.swap.release(slot);
                }
                released += 1;
            }
        }
        released
    }

    /// Frees every frame owned by `space`, clearing bound mappings first.
    ///
    /// Returns the number of frames released.
    pub fn release_owned_by(&self, space: &Arc<AddressSpace>) -> usize {
        let _hand = self.hand.lock();
        let owned: Vec<(PhysAddr, Option<VirtAddr>)> = self
            .arena
            .lock()
            .entries()
            .filter(|entry| Arc::ptr_eq(&entry.owner, space))
            .map(|entry| (entry.frame, entry.upage))
            .collect();

        for &(frame, upage) in &owned {
            if let Some(upage) = upage {
                space.pagedir().clear(upage);
            }
            self.arena.lock().remove(frame);
            self.pool.release_page(frame);
        }
        owned.len()
    }

    /// Number of registered frames.
    pub fn len(&self) -> usize {
        self.arena.lock().len()
    }

    /// True if no frame is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every registered frame in scan order.
    pub fn frames(&self) -> Vec<FrameInfo> {
        self.arena.lock().entries().map(FrameEntry::info).collect()
    }

    /// Current position of the clock hand.
    pub fn hand_position(&self) -> usize {
        self.hand.lock().position()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimFramePool, SimPageDirectory, SimSwap};

    fn registry(frames: usize) -> (FrameRegistry, Arc<AddressSpace>, Arc<SimFramePool>) {
        let pool = Arc::new(SimFramePool::new(frames));
        let swap = Arc::new(SimSwap::new(16));
        let space = AddressSpace::new(7, Arc::new(SimPageDirectory::new(pool.clone())));
        let registry = FrameRegistry::new(pool.clone(), swap, Arc::new(VmStats::new()), 4);
        (registry, space, pool)
    }

    #[test]
    fn test_allocate_registers_unbound_frame() {
        let (registry, space, pool) = registry(2);
        let frame = registry.allocate(&space, true).unwrap();

        let info = registry.find(frame).unwrap();
        assert_eq!(info.owner, 7);
        assert_eq!(info.upage, None);
        assert!(!info.pinned);
        assert_eq!(pool.free_count(), 1);

        registry.bind(frame, VirtAddr::new(0x1000));
        assert_eq!(registry.find(frame).unwrap().upage, Some(VirtAddr::new(0x1000)));
    }

    #[test]
    fn test_free_returns_page() {
        let (registry, space, pool) = registry(1);
        let frame = registry.allocate(&space, false).unwrap();
        registry.free(frame);
        assert!(registry.find(frame).is_none());
        assert!(registry.is_empty());
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    #[should_panic(expected = "free of unregistered frame")]
    fn test_double_free_panics() {
        let (registry, space, _pool) = registry(1);
        let frame = registry.allocate(&space, false).unwrap();
        registry.free(frame);
        registry.free(frame);
    }

    #[test]
    fn test_arena_reuses_vacant_slots() {
        let (registry, space, _pool) = registry(3);
        let a = registry.allocate(&space, false).unwrap();
        let b = registry.allocate(&space, false).unwrap();
        registry.free(a);
        let c = registry.allocate(&space, false).unwrap();

        let order: Vec<PhysAddr> = registry.frames().iter().map(|info| info.frame).collect();
        assert_eq!(order, alloc::vec![c, b]);
    }

    #[test]
    fn test_set_pinned_unknown_frame() {
        let (registry, _space, _pool) = registry(1);
        assert!(registry.set_pinned(PhysAddr::new(0xdead_0000), true).is_err());
    }
}
