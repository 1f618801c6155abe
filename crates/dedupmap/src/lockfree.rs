use crate::epoch::EpochManager;
use crate::index::{over_load_factor, MessageIndex, DEFAULT_LOCKFREE_CAPACITY};
#[cfg(debug_assertions)]
use crate::invariants::debug_assert_bucket_placement;
use crate::invariants::debug_assert_size_underflow;
use crate::{Backoff, Message};
use std::ptr;
use std::sync::atomic::{fence, AtomicBool, AtomicPtr, AtomicUsize, Ordering};

// =============================================================================
// MEMORY ORDERING & RECLAMATION PROTOCOL
// =============================================================================
//
// ## Structure
//
// One `AtomicPtr<Table>` holds the current bucket array; each bucket is an
// atomic head pointer to a singly linked chain of heap nodes
// `{ message, atomic next }`. The table allocation is self-describing (its
// length lives inside it), so a single acquire load of the table pointer
// yields a consistent array-and-length pair even while a resize publication
// is in flight. The separate `capacity` atomic is advisory and feeds only
// the resize trigger.
//
// ## Read protocol (find)
//
// 1. Enter epoch (publish global epoch into this thread's slot, release)
// 2. Load table with Acquire, bucket head with Acquire
// 3. Walk `next` links with Acquire; copy the record out on a match
// 4. Exit epoch. Readers never allocate and never mutate.
//
// ## Write protocol (insert)
//
// 1. Bounded spin-wait on the `resizing` latch (writers do not race the
//    table migration)
// 2. Enter epoch; walk the chain for a duplicate id
// 3. Allocate the node only after the walk; push-front with a CAS on the
//    bucket head (Release on success). Every failed CAS re-walks the chain
//    from the fresh head, so two racing same-id inserts can never both land.
// 4. Increment size (Relaxed), exit epoch, and - outside the protected
//    section - attempt a resize once `size >= 0.75 * capacity`.
//
// ## Remove protocol
//
// Locate the victim with a predecessor link; CAS that link (bucket head or
// predecessor `next`) from victim to successor; a failed CAS restarts the
// walk. The victim is *retired* through the epoch manager, never freed
// synchronously: a concurrent reader may still be parked on it.
//
// ## Resize protocol
//
// Single-flight via CAS on `resizing`. The new table is private until
// publication, so splicing nodes into it contends with nobody; the
// `acq_rel` fence orders all splice stores before the Release publication
// of the table pointer. The old array (buckets only - its nodes have been
// transferred) is retired through the epoch manager with an array deleter.
// In-flight writers that loaded the old table before publication may still
// mutate a just-transferred chain; new writers are held at the latch.
//
// =============================================================================

struct Node {
    message: Message,
    next: AtomicPtr<Node>,
}

impl Node {
    fn new(message: Message) -> Self {
        Self { message, next: AtomicPtr::new(ptr::null_mut()) }
    }
}

struct Bucket {
    head: AtomicPtr<Node>,
}

struct Table {
    buckets: Box<[Bucket]>,
}

impl Table {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            buckets: (0..capacity)
                .map(|_| Bucket { head: AtomicPtr::new(ptr::null_mut()) })
                .collect(),
        }
    }
}

/// Bucketed chain map manipulated by compare-and-swap, with epoch-based
/// reclamation of retired nodes and retired bucket arrays.
///
/// Operations never block on a lock; writers take a bounded spin-wait on
/// the resize latch. Capacity may be prime (the default is 8191) - hashing
/// is by modulus over a mixed key.
pub struct LockFreeIndex {
    table: AtomicPtr<Table>,
    size: AtomicUsize,
    /// Advisory mirror of the published table's length; feeds the resize
    /// trigger and `capacity()`.
    capacity: AtomicUsize,
    resizing: AtomicBool,
    epochs: EpochManager,
}

// Safety: all shared mutation goes through atomics; node and table
// lifetimes are governed by the epoch manager, and `Drop` requires `&mut`
// (quiescence) before reclaiming anything synchronously.
unsafe impl Send for LockFreeIndex {}
unsafe impl Sync for LockFreeIndex {}

impl LockFreeIndex {
    /// Index with the default 8191-bucket table.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOCKFREE_CAPACITY)
    }

    /// Index with a caller-chosen initial bucket count.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "bucket count must be nonzero");

        let table = Box::new(Table::with_capacity(capacity));
        Self {
            table: AtomicPtr::new(Box::into_raw(table)),
            size: AtomicUsize::new(0),
            capacity: AtomicUsize::new(capacity),
            resizing: AtomicBool::new(false),
            epochs: EpochManager::new(),
        }
    }

    /// 32-bit multiplicative mix, then modulus over the bucket count.
    #[inline]
    fn bucket_of(id: u64, capacity: usize) -> usize {
        let mut key = id;
        key = (key ^ (key >> 32)).wrapping_mul(0x45d9f3b);
        key = (key ^ (key >> 16)).wrapping_mul(0x45d9f3b);
        key ^= key >> 16;
        (key % capacity as u64) as usize
    }

    /// Holds writers while a table migration is in flight.
    fn wait_for_resize(&self) {
        let mut backoff = Backoff::new();
        while self.resizing.load(Ordering::Acquire) {
            backoff.wait();
        }
    }

    unsafe fn retire_node(&self, node: *mut Node) {
        let free: Box<dyn FnOnce(*mut ()) + Send> = Box::new(|p| {
            // Safety: p is the node this retire unlinked; nobody else frees it
            unsafe { drop(Box::from_raw(p.cast::<Node>())) }
        });
        unsafe { self.epochs.retire(node.cast(), free) };
    }

    fn try_resize(&self) {
        if self
            .resizing
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return; // another thread is already migrating
        }
        self.resize();
        self.resizing.store(false, Ordering::Release);
    }

    fn resize(&self) {
        let guard = self.epochs.enter();

        let old_ptr = self.table.load(Ordering::Acquire);
        // Safety: the published table stays alive until retired below, and
        // we hold an epoch guard
        let old = unsafe { &*old_ptr };
        let new_capacity = old.buckets.len() * 2;
        tracing::info!(
            old_capacity = old.buckets.len(),
            new_capacity,
            "resizing lock-free index"
        );

        let new = Box::new(Table::with_capacity(new_capacity));
        for bucket in old.buckets.iter() {
            let mut cur = bucket.head.load(Ordering::Acquire);
            while !cur.is_null() {
                // Safety: nodes reached from a published chain outlive the
                // guard
                let node = unsafe { &*cur };
                let next = node.next.load(Ordering::Acquire);

                let index = Self::bucket_of(node.message.id, new_capacity);
                let head = &new.buckets[index].head;
                // pre-publication: the CAS contends only with this loop
                let mut expected = head.load(Ordering::Acquire);
                loop {
                    node.next.store(expected, Ordering::Relaxed);
                    match head.compare_exchange_weak(
                        expected,
                        cur,
                        Ordering::Release,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => break,
                        Err(observed) => expected = observed,
                    }
                }

                cur = next;
            }
        }

        #[cfg(debug_assertions)]
        for (index, bucket) in new.buckets.iter().enumerate() {
            let mut cur = bucket.head.load(Ordering::Relaxed);
            while !cur.is_null() {
                let node = unsafe { &*cur };
                debug_assert_bucket_placement!(
                    Self::bucket_of(node.message.id, new_capacity),
                    index,
                    node.message.id
                );
                cur = node.next.load(Ordering::Relaxed);
            }
        }

        // order every splice store before the table publication
        fence(Ordering::AcqRel);
        self.table.store(Box::into_raw(new), Ordering::Release);
        self.capacity.store(new_capacity, Ordering::Release);

        // the old array's nodes have been transferred; retire the bucket
        // sequence only (Table itself carries no node ownership)
        let free: Box<dyn FnOnce(*mut ()) + Send> = Box::new(|p| {
            // Safety: p came from Box::into_raw at table construction
            unsafe { drop(Box::from_raw(p.cast::<Table>())) }
        });
        unsafe { self.epochs.retire(old_ptr.cast(), free) };

        drop(guard);
    }

    /// Pointers retired but not yet reclaimed (test hook).
    #[doc(hidden)]
    pub fn pending_reclaims(&self) -> usize {
        self.epochs.pending()
    }
}

impl MessageIndex for LockFreeIndex {
    fn insert(&self, msg: Message) -> bool {
        self.wait_for_resize();

        let inserted = {
            let _guard = self.epochs.enter();
            // Safety: table pointer is valid for the lifetime of the guard
            let table = unsafe { &*self.table.load(Ordering::Acquire) };
            let bucket = &table.buckets[Self::bucket_of(msg.id, table.buckets.len())];

            let mut pending: Option<Box<Node>> = None;
            let mut head = bucket.head.load(Ordering::Acquire);
            loop {
                // duplicate walk from the current head
                let mut cur = head;
                let mut duplicate = false;
                while !cur.is_null() {
                    // Safety: chain nodes stay valid under the guard
                    let node = unsafe { &*cur };
                    if node.message.id == msg.id {
                        duplicate = true;
                        break;
                    }
                    cur = node.next.load(Ordering::Acquire);
                }
                if duplicate {
                    // `pending` (if any) was never published; plain drop
                    break false;
                }

                let node = pending.take().unwrap_or_else(|| Box::new(Node::new(msg)));
                node.next.store(head, Ordering::Relaxed);
                let node_ptr = Box::into_raw(node);
                match bucket.head.compare_exchange_weak(
                    head,
                    node_ptr,
                    Ordering::Release,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break true,
                    Err(observed) => {
                        // reclaim the attempt and re-walk from the new head
                        // Safety: the failed CAS never published node_ptr
                        pending = Some(unsafe { Box::from_raw(node_ptr) });
                        head = observed;
                    }
                }
            }
        };

        if !inserted {
            return false;
        }
        self.size.fetch_add(1, Ordering::Relaxed);

        // outside the protected section
        if over_load_factor(self.size.load(Ordering::Relaxed), self.capacity.load(Ordering::Acquire)) {
            self.try_resize();
        }
        true
    }

    fn find(&self, id: u64) -> Option<Message> {
        let _guard = self.epochs.enter();
        // Safety: table pointer is valid for the lifetime of the guard
        let table = unsafe { &*self.table.load(Ordering::Acquire) };
        let bucket = &table.buckets[Self::bucket_of(id, table.buckets.len())];

        let mut cur = bucket.head.load(Ordering::Acquire);
        while !cur.is_null() {
            // Safety: chain nodes stay valid under the guard
            let node = unsafe { &*cur };
            if node.message.id == id {
                return Some(node.message); // copied out before the guard drops
            }
            cur = node.next.load(Ordering::Acquire);
        }
        None
    }

    fn remove(&self, id: u64) -> bool {
        self.wait_for_resize();

        let _guard = self.epochs.enter();
        // Safety: table pointer is valid for the lifetime of the guard
        let table = unsafe { &*self.table.load(Ordering::Acquire) };
        let bucket = &table.buckets[Self::bucket_of(id, table.buckets.len())];

        let removed = 'retry: loop {
            let mut link: &AtomicPtr<Node> = &bucket.head;
            loop {
                let cur = link.load(Ordering::Acquire);
                if cur.is_null() {
                    break 'retry false;
                }
                // Safety: chain nodes stay valid under the guard
                let node = unsafe { &*cur };
                if node.message.id == id {
                    let next = node.next.load(Ordering::Acquire);
                    if link
                        .compare_exchange(cur, next, Ordering::AcqRel, Ordering::Relaxed)
                        .is_ok()
                    {
                        // Safety: the CAS unlinked `cur`; defer its free
                        unsafe { self.retire_node(cur) };
                        break 'retry true;
                    }
                    continue 'retry; // the link moved under us; restart the walk
                }
                link = &node.next;
            }
        };

        if removed {
            let old = self.size.fetch_sub(1, Ordering::Relaxed);
            debug_assert_size_underflow!(old);
        }
        removed
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }
}

impl Default for LockFreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for LockFreeIndex {
    fn drop(&mut self) {
        // &mut self: destruction is quiescent, synchronous frees are safe
        let table_ptr = *self.table.get_mut();
        // Safety: exclusive access; the pointer came from Box::into_raw
        let table = unsafe { Box::from_raw(table_ptr) };
        for bucket in table.buckets.iter() {
            let mut cur = bucket.head.load(Ordering::Relaxed);
            while !cur.is_null() {
                // Safety: chain nodes are exclusively ours now
                let node = unsafe { Box::from_raw(cur) };
                cur = node.next.load(Ordering::Relaxed);
            }
        }
        self.size.store(0, Ordering::Relaxed);
        // `epochs` drops afterwards and fires the deleters of every retired
        // node and retired table
    }
}
