//! Second-chance clock eviction
//!
//! The clock hand sweeps the registry's slots in order and keeps its position
//! between evictions. Frames that are unbound or pinned are passed over. A
//! frame whose accessed bit is set has the bit cleared and is passed over
//! once more. The first bound, unpinned frame found with a clear accessed bit
//! is the victim.
//!
//! The dirty bit does not protect a frame: anonymous and zero pages have no
//! copy anywhere else, so every victim is written to swap.

use alloc::sync::Arc;
use alloc::vec;
use nos_api::error::{Error, Result};
use nos_api::memory::{FramePool, PhysAddr, SwapDevice, SwapSlot, VirtAddr, PAGE_SIZE};

use crate::frame::FrameEntry;
use crate::space::AddressSpace;

/// Persistent position of the clock hand.
///
/// The registry's allocation lock wraps this value, so holding the hand means
/// holding the right to allocate and evict.
#[derive(Debug, Default)]
pub struct ClockHand {
    cursor: usize,
}

impl ClockHand {
    /// Creates a hand pointing at the first slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot the next scan starts from.
    pub fn position(&self) -> usize {
        self.cursor
    }
}

/// A frame chosen for eviction. It is pinned until disposed of.
pub(crate) struct Victim {
    pub(crate) frame: PhysAddr,
    pub(crate) owner: Arc<AddressSpace>,
    pub(crate) upage: VirtAddr,
    pub(crate) dirty: bool,
}

/// Runs the clock over `slots` until a victim is found.
///
/// Gives up after `max_passes` full revolutions and returns `None`; with at
/// least one bound, unpinned frame two revolutions always suffice unless the
/// accessed bits keep being set under the scan.
pub(crate) fn select_victim(
    slots: &mut [Option<FrameEntry>],
    hand: &mut ClockHand,
    max_passes: usize,
) -> Option<Victim> {
    let len = slots.len();
    if len == 0 {
        return None;
    }

    for _ in 0..len.saturating_mul(max_passes) {
        let index = hand.cursor % len;
        hand.cursor = (index + 1) % len;

        let Some(entry) = slots[index].as_mut() else {
            continue;
        };
        // Unbound frames still belong to their installer.
        let Some(upage) = entry.upage else {
            continue;
        };
        if entry.pinned {
            continue;
        }

        let pte = entry.owner.pagedir();
        if pte.is_accessed(upage) {
            pte.clear_accessed(upage);
            continue;
        }

        let dirty = pte.is_dirty(upage);
        entry.pinned = true;
        return Some(Victim {
            frame: entry.frame,
            owner: entry.owner.clone(),
            upage,
            dirty,
        });
    }
    None
}

/// Moves `victim`'s contents to a fresh swap slot and demotes its owner's page.
///
/// The owner's metadata table stays locked from the moment the mapping is
/// cleared until the entry says `Swap`, so the owner never faults on the page
/// while its entry still claims residence. The writable bit is taken from the
/// hardware mapping before it is cleared.
///
/// On a device error the mapping is restored and the error returned.
///
/// # Panics
///
/// Panics when swap is full: there is nowhere left to put the page.
pub(crate) fn swap_out(victim: &Victim, pool: &dyn FramePool, swap: &dyn SwapDevice) -> Result<SwapSlot> {
    let mut pages = victim.owner.pages();
    let pagedir = victim.owner.pagedir();

    let writable = pagedir.is_writable(victim.upage);
    pagedir.clear(victim.upage);

    let mut contents = vec![0u8; PAGE_SIZE];
    pool.read_frame(victim.frame, &mut contents);

    let slot = match swap.reserve_and_write(&contents) {
        Ok(slot) => slot,
        Err(Error::SwapFull) => {
            log::error!("out of memory: no free frame and no free swap slot");
            panic!("out of memory: physical pool and swap are both exhausted");
        }
        Err(err) => {
            log::error!("swap write for {} of pid {} failed: {}", victim.upage, victim.owner.pid(), err);
            if let Err(restore) = pagedir.install(victim.upage, victim.frame, writable) {
                panic!("cannot restore mapping of {} after swap failure: {}", victim.upage, restore);
            }
            return Err(err);
        }
    };

    pages.mark_swapped(victim.upage, slot, writable);
    Ok(slot)
}
