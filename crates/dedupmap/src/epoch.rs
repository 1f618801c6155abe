//! Epoch-based reclamation for retired nodes and retired bucket arrays.
//!
//! # Protocol
//!
//! Readers and writers bracket every traversal with [`EpochManager::enter`],
//! which publishes the current global epoch into the calling thread's slot
//! (0 means "not in a protected section"; the global epoch starts at 1 so
//! the two can never be confused). Unlinked pointers are handed to
//! [`EpochManager::retire`] together with a deleter and the epoch at
//! retirement; they are freed only once every participating thread has
//! either advanced past that epoch or left its protected section.
//!
//! Reclamation is single-flight (a CAS latch), bumps the global epoch with
//! `AcqRel`, and yield-waits on every *foreign* slot with a bounded retry
//! ceiling - a stalled slot abandons the cycle rather than deadlocking, and
//! the retired entries simply wait for a later cycle. A reclaimer never
//! waits on its own slot: reclamation can be triggered from inside a
//! protected section (a remove retires its victim before exiting), so the
//! free pass only drops entries tagged older than every epoch still
//! published, the reclaimer's own included.
//!
//! Thread slots are claimed on a thread's first use of any manager,
//! `fetch_add % min(hardware_concurrency, 64)`.

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

/// Upper bound on participating thread slots.
pub const MAX_THREADS: usize = 64;

/// Per-slot retired-list length that triggers a reclamation attempt.
pub const RECLAIM_THRESHOLD: usize = 64;

/// Yield-retries per slot before a reclamation cycle is abandoned.
const WAIT_CEILING: usize = 1000;

/// Process-wide ticket counter; a thread's ticket is claimed once and mapped
/// onto each manager's slot range by modulus.
static NEXT_TICKET: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static TICKET: Cell<Option<usize>> = const { Cell::new(None) };
}

struct Retired {
    epoch: usize,
    ptr: *mut (),
    free: Option<Box<dyn FnOnce(*mut ()) + Send>>,
}

// Safety: the pointer travels between threads only while unreachable from
// any chain, and the deleter is itself Send.
unsafe impl Send for Retired {}

impl Retired {
    /// Runs the deleter. Idempotent: a fired entry is inert.
    fn fire(&mut self) {
        if let Some(free) = self.free.take() {
            free(self.ptr);
        }
    }
}

impl Drop for Retired {
    fn drop(&mut self) {
        debug_assert!(
            self.free.is_none(),
            "retired pointer dropped without running its deleter"
        );
    }
}

/// Process-wide reclamation manager shared by all threads touching one
/// lock-free index.
pub struct EpochManager {
    global: CachePadded<AtomicUsize>,
    slots: Box<[CachePadded<AtomicUsize>]>,
    retired: Box<[Mutex<Vec<Retired>>]>,
    reclaiming: AtomicBool,
    slot_count: usize,
}

impl EpochManager {
    pub fn new() -> Self {
        let slot_count = thread::available_parallelism()
            .map_or(MAX_THREADS, |n| n.get().min(MAX_THREADS));

        Self {
            // starts at 1: a published slot value of 0 always means inactive
            global: CachePadded::new(AtomicUsize::new(1)),
            slots: (0..slot_count)
                .map(|_| CachePadded::new(AtomicUsize::new(0)))
                .collect(),
            retired: (0..slot_count).map(|_| Mutex::new(Vec::new())).collect(),
            reclaiming: AtomicBool::new(false),
            slot_count,
        }
    }

    /// Slot index for the calling thread, claimed on first use.
    fn slot_index(&self) -> usize {
        let ticket = TICKET.with(|t| match t.get() {
            Some(ticket) => ticket,
            None => {
                let ticket = NEXT_TICKET.fetch_add(1, Ordering::Relaxed);
                t.set(Some(ticket));
                ticket
            }
        });
        ticket % self.slot_count
    }

    /// Opens a protected section; close it by dropping the guard.
    ///
    /// Pointers obtained from a protected structure stay valid until the
    /// guard drops, and must not be held past it - copy records out.
    pub fn enter(&self) -> Guard<'_> {
        let slot = self.slot_index();
        let epoch = self.global.load(Ordering::Acquire);
        self.slots[slot].store(epoch, Ordering::Release);
        Guard { manager: self, slot }
    }

    /// Defers freeing of an unlinked pointer until no protected section can
    /// still observe it. Retiring the same pointer twice is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must no longer be reachable from any shared structure, and the
    /// deleter must be the unique owner of its deallocation.
    pub unsafe fn retire(&self, ptr: *mut (), free: Box<dyn FnOnce(*mut ()) + Send>) {
        let slot = self.slot_index();
        let epoch = self.global.load(Ordering::Acquire);
        let pending = {
            let mut list = self.retired[slot].lock();
            if list.iter().any(|r| r.ptr == ptr) {
                return; // already retired; the first entry owns deallocation
            }
            list.push(Retired { epoch, ptr, free: Some(free) });
            list.len()
        };

        if pending >= RECLAIM_THRESHOLD {
            self.reclaim();
        }
    }

    /// Attempts one reclamation cycle. Returns without blocking when another
    /// thread already holds the reclaimer latch.
    pub fn reclaim(&self) {
        if self
            .reclaiming
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let me = self.slot_index();
        let new_epoch = self.global.fetch_add(1, Ordering::AcqRel) + 1;

        // Wait for every foreign slot to advance or go inactive. A slot that
        // never moves within the ceiling abandons this cycle; its garbage
        // keeps until a later attempt.
        let mut stalled = false;
        'slots: for (i, slot) in self.slots.iter().enumerate() {
            if i == me {
                continue; // a thread cannot wait for itself to exit
            }
            let mut retries = WAIT_CEILING;
            loop {
                let seen = slot.load(Ordering::Acquire);
                if seen == 0 || seen >= new_epoch {
                    break;
                }
                retries -= 1;
                if retries == 0 {
                    tracing::warn!(slot = i, epoch = seen, "slot stuck in old epoch, abandoning reclamation cycle");
                    stalled = true;
                    break 'slots;
                }
                thread::yield_now();
            }
        }

        if !stalled {
            // Free everything older than any epoch still published. The
            // reclaimer's own slot participates here: entries it could still
            // observe stay pending.
            let mut floor = new_epoch;
            for slot in self.slots.iter() {
                let seen = slot.load(Ordering::Acquire);
                if seen != 0 {
                    floor = floor.min(seen);
                }
            }

            for list in self.retired.iter() {
                let mut list = list.lock();
                let mut kept = Vec::with_capacity(list.len());
                for mut entry in list.drain(..) {
                    if entry.epoch < floor {
                        entry.fire();
                    } else {
                        kept.push(entry);
                    }
                }
                *list = kept;
            }
        }

        self.reclaiming.store(false, Ordering::Release);
    }

    /// Number of retired pointers still awaiting a safe epoch.
    pub fn pending(&self) -> usize {
        self.retired.iter().map(|l| l.lock().len()).sum()
    }
}

impl Default for EpochManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for EpochManager {
    fn drop(&mut self) {
        // &mut self: no protected section can be open, every deleter fires
        for list in self.retired.iter() {
            for entry in list.lock().iter_mut() {
                entry.fire();
            }
        }
    }
}

/// RAII handle for a protected section; see [`EpochManager::enter`].
pub struct Guard<'a> {
    manager: &'a EpochManager,
    slot: usize,
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        self.manager.slots[self.slot].store(0, Ordering::Release);
    }
}
