//! Process-wide slab of exception trackers.
//!
//! # Overview
//!
//! Trackers are allocated on every managed exception, frequently while the heap is under
//! pressure, so they do not live on the managed heap. [`TrackerAllocator`] keeps an
//! append-only list of fixed-size pages; pages are never freed or moved, so a
//! [`TrackerHandle`] (page index, slot index, generation) stays valid to resolve for the
//! lifetime of the allocator.
//!
//! # Ownership
//!
//! A slot is claimed by a compare-and-swap of its owner word from zero to the claiming
//! thread's id, so the owning thread never takes a shared lock to acquire or release a
//! tracker. Every release bumps the slot's generation; resolving a handle whose
//! generation no longer matches fails with [`Error::StaleTracker`] instead of reaching a
//! tracker that belongs to someone else.
//!
//! Threads tearing down state they do not own (context unload) take the coarse
//! [`TrackerAllocator::lock_for_teardown`] lock first.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering},
        Mutex, MutexGuard,
    },
};

use crate::{dispatch::tracker::ExceptionTracker, thread::ThreadId, Error, Result};

const FREE: u64 = 0;

/// Generation-checked reference to a tracker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackerHandle {
    page: u32,
    slot: u32,
    generation: u32,
}

impl fmt::Display for TrackerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tracker({}:{}#{})", self.page, self.slot, self.generation)
    }
}

struct TrackerSlot {
    owner: AtomicU64,
    generation: AtomicU32,
    tracker: Mutex<Option<ExceptionTracker>>,
}

impl TrackerSlot {
    fn new() -> Self {
        TrackerSlot {
            owner: AtomicU64::new(FREE),
            generation: AtomicU32::new(0),
            tracker: Mutex::new(None),
        }
    }
}

struct TrackerPage {
    slots: Box<[TrackerSlot]>,
    // Index to start the next free-slot scan at.
    free_hint: AtomicUsize,
}

impl TrackerPage {
    fn new(slots: usize) -> Self {
        TrackerPage {
            slots: (0..slots).map(|_| TrackerSlot::new()).collect(),
            free_hint: AtomicUsize::new(0),
        }
    }

    fn claim(&self, owner: u64) -> Option<usize> {
        let len = self.slots.len();
        let start = self.free_hint.load(Ordering::Relaxed) % len;

        for offset in 0..len {
            let index = (start + offset) % len;
            if self.slots[index]
                .owner
                .compare_exchange(FREE, owner, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                self.free_hint.store(index + 1, Ordering::Relaxed);
                return Some(index);
            }
        }

        None
    }
}

/// Slab allocator for [`ExceptionTracker`]s.
pub struct TrackerAllocator {
    pages: boxcar::Vec<TrackerPage>,
    slots_per_page: usize,
    max_pages: usize,
    grow: Mutex<()>,
    teardown: Mutex<()>,
}

impl TrackerAllocator {
    /// Creates an empty allocator.
    ///
    /// # Arguments
    ///
    /// * `slots_per_page` - Trackers per page, at least one
    /// * `max_pages` - Upper bound on the number of pages
    #[must_use]
    pub fn new(slots_per_page: usize, max_pages: usize) -> Self {
        TrackerAllocator {
            pages: boxcar::Vec::new(),
            slots_per_page: slots_per_page.max(1),
            max_pages,
            grow: Mutex::new(()),
            teardown: Mutex::new(()),
        }
    }

    /// Claims a free slot for `owner`.
    ///
    /// The slot is empty until [`TrackerAllocator::install`] stores a tracker in it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfMemory`] when every page is full and no page can be added.
    pub fn acquire(&self, owner: ThreadId) -> Result<TrackerHandle> {
        let owner_word = u64::from(owner.id());

        loop {
            let seen = self.pages.count();
            for index in 0..seen {
                if let Some(handle) = self.claim_in(index, owner_word) {
                    return Ok(handle);
                }
            }

            let _grow = lock!(self.grow);
            if self.pages.count() != seen {
                // Another thread added a page while we scanned.
                continue;
            }
            if seen >= self.max_pages {
                warn!(%owner, pages = seen, "tracker allocator exhausted");
                return Err(Error::OutOfMemory);
            }

            let index = self.pages.push(TrackerPage::new(self.slots_per_page));
            debug!(page = index, "added tracker page");
            if let Some(handle) = self.claim_in(index, owner_word) {
                return Ok(handle);
            }
        }
    }

    fn claim_in(&self, page_index: usize, owner: u64) -> Option<TrackerHandle> {
        let page = self.pages.get(page_index)?;
        let slot = page.claim(owner)?;

        Some(TrackerHandle {
            page: page_index as u32,
            slot: slot as u32,
            generation: page.slots[slot].generation.load(Ordering::Acquire),
        })
    }

    fn slot(&self, handle: TrackerHandle) -> Result<&TrackerSlot> {
        let slot = self
            .pages
            .get(handle.page as usize)
            .and_then(|page| page.slots.get(handle.slot as usize))
            .ok_or(Error::StaleTracker)?;

        if slot.owner.load(Ordering::Acquire) == FREE
            || slot.generation.load(Ordering::Acquire) != handle.generation
        {
            return Err(Error::StaleTracker);
        }

        Ok(slot)
    }

    /// Stores `tracker` in a claimed slot, replacing any previous occupant.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the handle no longer owns its slot.
    pub fn install(&self, handle: TrackerHandle, tracker: ExceptionTracker) -> Result<()> {
        let slot = self.slot(handle)?;
        *lock!(slot.tracker) = Some(tracker);
        Ok(())
    }

    /// Removes the tracker from a slot without giving up the slot.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the handle no longer owns its slot.
    pub fn clear(&self, handle: TrackerHandle) -> Result<Option<ExceptionTracker>> {
        let slot = self.slot(handle)?;
        Ok(lock_or_recover!(slot.tracker).take())
    }

    /// Returns the slot to the allocator and hands back the tracker it held.
    ///
    /// The handle and every copy of it become stale.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the handle was already released.
    pub fn release(&self, handle: TrackerHandle) -> Result<Option<ExceptionTracker>> {
        let slot = self.slot(handle)?;
        // Runs while threads are torn down, so a poisoned slot is still emptied.
        let tracker = lock_or_recover!(slot.tracker).take();

        slot.generation.fetch_add(1, Ordering::AcqRel);
        slot.owner.store(FREE, Ordering::Release);
        if let Some(page) = self.pages.get(handle.page as usize) {
            page.free_hint.store(handle.slot as usize, Ordering::Relaxed);
        }

        Ok(tracker)
    }

    /// Runs `f` against the tracker behind `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the handle is stale or its slot holds no tracker.
    pub fn with<R>(&self, handle: TrackerHandle, f: impl FnOnce(&ExceptionTracker) -> R) -> Result<R> {
        let slot = self.slot(handle)?;
        let guard = lock!(slot.tracker);
        guard.as_ref().map(f).ok_or(Error::StaleTracker)
    }

    /// Runs `f` against the tracker behind `handle`, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StaleTracker`] if the handle is stale or its slot holds no tracker.
    pub fn with_mut<R>(
        &self,
        handle: TrackerHandle,
        f: impl FnOnce(&mut ExceptionTracker) -> R,
    ) -> Result<R> {
        let slot = self.slot(handle)?;
        let mut guard = lock!(slot.tracker);
        guard.as_mut().map(f).ok_or(Error::StaleTracker)
    }

    /// Returns `true` if `handle` still owns its slot.
    #[must_use]
    pub fn is_live(&self, handle: TrackerHandle) -> bool {
        self.slot(handle).is_ok()
    }

    /// Takes the coarse lock required before touching trackers of another thread.
    pub fn lock_for_teardown(&self) -> MutexGuard<'_, ()> {
        lock!(self.teardown)
    }

    /// Number of pages allocated so far.
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.pages.count()
    }

    /// Number of claimed slots.
    #[must_use]
    pub fn live_count(&self) -> usize {
        (0..self.pages.count())
            .filter_map(|index| self.pages.get(index))
            .flat_map(|page| page.slots.iter())
            .filter(|slot| slot.owner.load(Ordering::Acquire) != FREE)
            .count()
    }
}
