//! DedupMap - Concurrent Deduplicating Message Index
//!
//! A resizable, bucketed hash map keyed by message identifier, shared by
//! several producer threads and deduplicating on insert. Two implementations
//! satisfy the same observable contract:
//!
//! - [`BlockingIndex`]: per-bucket reader-writer locks plus a global
//!   reader-writer gate; a background monitor doubles the table when the
//!   load factor crosses 0.75.
//! - [`LockFreeIndex`]: per-bucket CAS chains with epoch-based reclamation
//!   of retired nodes and retired bucket arrays; resizing happens inline on
//!   the inserting thread.
//!
//! The crate also carries the fixed 19-byte wire codec for [`Message`] and
//! the adaptive [`Backoff`] writers spin with at the resize latch.
//!
//! # Example
//!
//! ```
//! use dedupmap::{LockFreeIndex, Message, MessageIndex};
//!
//! let index = LockFreeIndex::new();
//! let msg = Message { size: 19, kind: 1, id: 1001, data: 12345 };
//!
//! assert!(index.insert(msg));
//! assert!(!index.insert(Message { data: 99999, ..msg })); // same id: dropped
//! assert_eq!(index.find(1001).unwrap().data, 12345);
//! ```

mod backoff;
mod blocking;
mod epoch;
mod index;
mod invariants;
mod lockfree;
mod message;
mod wire;

pub use backoff::Backoff;
pub use blocking::BlockingIndex;
pub use epoch::{EpochManager, Guard, MAX_THREADS, RECLAIM_THRESHOLD};
pub use index::{
    MessageIndex, DEFAULT_BLOCKING_CAPACITY, DEFAULT_LOCKFREE_CAPACITY, LOAD_FACTOR,
};
pub use lockfree::LockFreeIndex;
pub use message::Message;
pub use wire::{decode, decode_slice, encode, WireError, WIRE_SIZE};
