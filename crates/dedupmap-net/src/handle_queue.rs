//! Bounded SPSC ring of accepted connection handles.
//!
//! # Protocol
//!
//! Head and tail are unbounded u64 sequence numbers; the slot index is
//! `sequence & mask`, so full/empty tests are plain subtractions and the
//! indices never wrap back onto each other. Exactly one producer (the
//! accept loop) advances `head` and exactly one consumer advances `tail`:
//!
//! - push: load own `head` Relaxed, observe `tail` Acquire, write the slot,
//!   publish `head + 1` Release
//! - pop: load own `tail` Relaxed, observe `head` Acquire, read the slot,
//!   publish `tail + 1` Release
//!
//! The queue splits into a [`HandlePusher`] and a [`HandlePopper`] at
//! construction; the worker pool shares the popper behind a mutex, which
//! keeps the consumer side single-file. Teardown (both halves dropped)
//! closes every handle still queued - by then no push or pop can race it.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Capacity of the accept-loop handle queue.
pub const HANDLE_QUEUE_CAPACITY: usize = 1024;

struct Shared {
    /// Next sequence to publish (written by the producer only).
    head: CachePadded<AtomicU64>,
    /// Next sequence to consume (written by the consumer only).
    tail: CachePadded<AtomicU64>,
    slots: Box<[UnsafeCell<RawFd>]>,
    mask: u64,
}

// Safety: slot i is written only between the producer observing it free and
// publishing head, and read only between the consumer observing it occupied
// and publishing tail; the Release/Acquire pair on head orders the two.
unsafe impl Send for Shared {}
unsafe impl Sync for Shared {}

impl Shared {
    #[inline]
    fn capacity(&self) -> u64 {
        self.mask + 1
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        // teardown only: both halves are gone, nothing races these loads
        let head = self.head.load(Ordering::Relaxed);
        let mut tail = self.tail.load(Ordering::Relaxed);
        while tail != head {
            let fd = unsafe { *self.slots[(tail & self.mask) as usize].get() };
            // Safety: the fd was queued by into_raw_fd and never popped
            unsafe { libc::close(fd) };
            tail += 1;
        }
    }
}

/// Producer half; owned by the accept loop.
pub struct HandlePusher {
    shared: Arc<Shared>,
}

impl HandlePusher {
    /// Enqueues a handle. Returns `false` (caller keeps ownership and must
    /// close the fd) when the ring is full.
    pub fn push(&self, fd: RawFd) -> bool {
        let head = self.shared.head.load(Ordering::Relaxed);
        let tail = self.shared.tail.load(Ordering::Acquire);
        if head - tail == self.shared.capacity() {
            return false;
        }

        // Safety: single producer; the slot at `head` is free until head is
        // published
        unsafe {
            *self.shared.slots[(head & self.shared.mask) as usize].get() = fd;
        }
        self.shared.head.store(head + 1, Ordering::Release);
        true
    }
}

/// Consumer half; shared by the worker pool behind a mutex.
pub struct HandlePopper {
    shared: Arc<Shared>,
}

impl HandlePopper {
    /// Dequeues one handle, transferring ownership to the caller. Returns
    /// `None` when the ring is empty.
    pub fn pop(&mut self) -> Option<RawFd> {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        let head = self.shared.head.load(Ordering::Acquire);
        if tail == head {
            return None;
        }

        // Safety: `&mut self` keeps the consumer side single-file; the slot
        // at `tail` stays occupied until tail is published
        let fd = unsafe { *self.shared.slots[(tail & self.shared.mask) as usize].get() };
        self.shared.tail.store(tail + 1, Ordering::Release);
        Some(fd)
    }

    /// Handles currently queued (advisory; the producer may be mid-push).
    pub fn len(&self) -> usize {
        let head = self.shared.head.load(Ordering::Acquire);
        let tail = self.shared.tail.load(Ordering::Relaxed);
        (head - tail) as usize
    }

    /// True when nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Builds the ring and splits it into its two halves.
///
/// # Panics
///
/// Panics unless `capacity` is a nonzero power of two.
pub fn handle_queue(capacity: usize) -> (HandlePusher, HandlePopper) {
    assert!(
        capacity.is_power_of_two(),
        "queue capacity must be a power of two, got {capacity}"
    );

    let shared = Arc::new(Shared {
        head: CachePadded::new(AtomicU64::new(0)),
        tail: CachePadded::new(AtomicU64::new(0)),
        slots: (0..capacity).map(|_| UnsafeCell::new(-1)).collect(),
        mask: capacity as u64 - 1,
    });

    (
        HandlePusher { shared: Arc::clone(&shared) },
        HandlePopper { shared },
    )
}
