//! Blocking index variant: per-bucket reader-writer locks behind a global
//! reader-writer gate.
//!
//! # Locking discipline
//!
//! - Every insert/find/remove holds the global gate in *shared* mode for its
//!   whole duration, then the selected bucket's lock in *exclusive* mode for
//!   the chain walk and any mutation.
//! - The rehash monitor takes the gate in *exclusive* mode, which excludes
//!   every operation; holding the gate shared also pins the table borrow, so
//!   the bucket-lock array can never be swapped out from under an in-flight
//!   thread.
//!
//! Capacity is a power of two and the hash is masked. A background monitor
//! wakes every 500 ms and doubles the table once `size >= capacity * 0.75`,
//! moving entry allocations intact and rewriting only the chain links.

use crate::index::{over_load_factor, MessageIndex, DEFAULT_BLOCKING_CAPACITY};
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_bucket_placement;
use crate::invariants::debug_assert_size_underflow;
use crate::Message;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Interval between load-factor checks by the rehash monitor.
const MONITOR_INTERVAL: Duration = Duration::from_millis(500);

struct Entry {
    message: Message,
    next: Option<Box<Entry>>,
}

#[derive(Default)]
struct Bucket {
    head: Option<Box<Entry>>,
}

impl Drop for Bucket {
    fn drop(&mut self) {
        // unlink before drop so teardown of a long chain stays iterative
        let mut cur = self.head.take();
        while let Some(mut entry) = cur {
            cur = entry.next.take();
        }
    }
}

struct Table {
    buckets: Box<[RwLock<Bucket>]>,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: (0..capacity).map(|_| RwLock::new(Bucket::default())).collect(),
        }
    }
}

struct Shared {
    gate: RwLock<Table>,
    size: AtomicUsize,
    /// Mirrors `gate.read().buckets.len()`; lets `capacity()` and the
    /// monitor's trigger check skip the gate.
    capacity: AtomicUsize,
    /// Set under the mutex on drop; the condvar cuts the monitor's 500 ms
    /// sleep short so teardown does not stall.
    stopped: Mutex<bool>,
    stop_signal: Condvar,
}

/// Bucketed chain map under per-bucket RW locks plus a global rehash gate.
///
/// Cloning the handle is not supported; share it behind an `Arc` the way the
/// processors do.
pub struct BlockingIndex {
    shared: Arc<Shared>,
    monitor: Option<JoinHandle<()>>,
}

impl BlockingIndex {
    /// Index with the default 1024-bucket table.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BLOCKING_CAPACITY)
    }

    /// Index with a caller-chosen initial bucket count.
    ///
    /// # Panics
    ///
    /// Panics unless `capacity` is a nonzero power of two (the hash masks).
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(
            capacity.is_power_of_two(),
            "bucket count must be a power of two, got {capacity}"
        );

        let shared = Arc::new(Shared {
            gate: RwLock::new(Table::with_capacity(capacity)),
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
            stopped: Mutex::new(false),
            stop_signal: Condvar::new(),
        });

        let monitor = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name("dedupmap-rehash".into())
                .spawn(move || Self::monitor_loop(&shared))
                .expect("spawn rehash monitor")
        };

        Self { shared, monitor: Some(monitor) }
    }

    #[inline]
    fn bucket_of(id: u64, capacity: usize) -> usize {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() as usize) & (capacity - 1)
    }

    fn monitor_loop(shared: &Shared) {
        loop {
            {
                let mut stopped = shared.stopped.lock();
                if !*stopped {
                    let _ = shared.stop_signal.wait_for(&mut stopped, MONITOR_INTERVAL);
                }
                if *stopped {
                    return;
                }
            }

            let size = shared.size.load(Ordering::Acquire);
            let capacity = shared.capacity.load(Ordering::Acquire);
            if over_load_factor(size, capacity) {
                Self::rehash(shared);
            }
        }
    }

    /// Doubles the table under the exclusive gate, preserving every entry
    /// allocation.
    fn rehash(shared: &Shared) {
        let mut table = shared.gate.write();

        let old_capacity = table.buckets.len();
        let new_capacity = old_capacity << 1;
        tracing::info!(old_capacity, new_capacity, "rehashing blocking index");

        let new_buckets: Box<[RwLock<Bucket>]> =
            (0..new_capacity).map(|_| RwLock::new(Bucket::default())).collect();
        let old_buckets = std::mem::replace(&mut table.buckets, new_buckets);

        for lock in old_buckets.into_vec() {
            let mut cur = lock.into_inner().head.take();
            while let Some(mut entry) = cur {
                cur = entry.next.take();
                let index = Self::bucket_of(entry.message.id, new_capacity);

                // exclusive gate: plain mutable access, no bucket lock needed
                let bucket = table.buckets[index].get_mut();
                entry.next = bucket.head.take();
                bucket.head = Some(entry);
            }
        }

        // every entry must be reachable from exactly the chain its hash selects
        #[cfg(debug_assertions)]
        for (index, lock) in table.buckets.iter_mut().enumerate() {
            let mut cur = lock.get_mut().head.as_deref();
            while let Some(entry) = cur {
                debug_assert_bucket_placement!(
                    Self::bucket_of(entry.message.id, new_capacity),
                    index,
                    entry.message.id
                );
                cur = entry.next.as_deref();
            }
        }

        shared.capacity.store(new_capacity, Ordering::Release);
    }
}

impl MessageIndex for BlockingIndex {
    fn insert(&self, msg: Message) -> bool {
        let table = self.shared.gate.read();
        let index = Self::bucket_of(msg.id, table.buckets.len());
        let mut bucket = table.buckets[index].write();

        // walk to the tail, bailing on a duplicate id
        let mut slot = &mut bucket.head;
        while let Some(entry) = slot {
            if entry.message.id == msg.id {
                return false;
            }
            slot = &mut entry.next;
        }

        *slot = Some(Box::new(Entry { message: msg, next: None }));
        self.shared.size.fetch_add(1, Ordering::Release);
        true
    }

    fn find(&self, id: u64) -> Option<Message> {
        let table = self.shared.gate.read();
        let index = Self::bucket_of(id, table.buckets.len());
        let bucket = table.buckets[index].write();

        let mut cur = bucket.head.as_deref();
        while let Some(entry) = cur {
            if entry.message.id == id {
                return Some(entry.message);
            }
            cur = entry.next.as_deref();
        }
        None
    }

    fn remove(&self, id: u64) -> bool {
        let table = self.shared.gate.read();
        let index = Self::bucket_of(id, table.buckets.len());
        let mut bucket = table.buckets[index].write();

        let mut slot = &mut bucket.head;
        while slot.is_some() {
            if slot.as_ref().is_some_and(|entry| entry.message.id == id) {
                let victim = slot.take().expect("checked above");
                *slot = victim.next;

                let old = self.shared.size.fetch_sub(1, Ordering::Release);
                debug_assert_size_underflow!(old);
                return true;
            }
            slot = &mut slot.as_mut().expect("checked above").next;
        }
        false
    }

    fn len(&self) -> usize {
        self.shared.size.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        self.shared.capacity.load(Ordering::Acquire)
    }
}

impl Default for BlockingIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for BlockingIndex {
    fn drop(&mut self) {
        *self.shared.stopped.lock() = true;
        self.shared.stop_signal.notify_all();
        if let Some(monitor) = self.monitor.take() {
            let _ = monitor.join();
        }
        // buckets drop their chains iteratively via Bucket::drop
    }
}
