use crate::Message;

/// Default bucket count for [`BlockingIndex`](crate::BlockingIndex)
/// (power of two: the blocking variant hashes by masking).
pub const DEFAULT_BLOCKING_CAPACITY: usize = 1024;

/// Default bucket count for [`LockFreeIndex`](crate::LockFreeIndex)
/// (prime: the lock-free variant hashes by modulus).
pub const DEFAULT_LOCKFREE_CAPACITY: usize = 8191;

/// Load factor above which either variant doubles its table.
pub const LOAD_FACTOR: f64 = 0.75;

/// The observable contract shared by both index variants.
///
/// For every identifier at most one entry exists across all buckets at any
/// observable moment; duplicates are dropped at insert. `len` is advisory
/// and may lag chain contents by bounded amounts, but moves monotonically
/// per successful insert/remove.
pub trait MessageIndex: Send + Sync {
    /// Inserts a message keyed by its id. Returns `false` (and changes
    /// nothing) when the id is already present.
    fn insert(&self, msg: Message) -> bool;

    /// Copies out the record stored under `id`, if any.
    fn find(&self, id: u64) -> Option<Message>;

    /// Unlinks the record stored under `id`. Returns `false` when absent.
    fn remove(&self, id: u64) -> bool;

    /// Advisory entry count.
    fn len(&self) -> usize;

    /// True when the advisory entry count is zero.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current bucket count.
    fn capacity(&self) -> usize;
}

/// Resize trigger shared by both variants: `size >= capacity * 0.75`.
#[inline]
pub(crate) fn over_load_factor(size: usize, capacity: usize) -> bool {
    size as f64 >= capacity as f64 * LOAD_FACTOR
}
