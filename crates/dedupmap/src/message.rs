use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

/// The fixed-size application datum exchanged on the wire.
///
/// Two messages are equal when their identifiers are equal; the remaining
/// fields are payload. Ordering between messages goes by type tag and is
/// exposed as the explicit [`Message::cmp_by_kind`] comparator rather than an
/// `Ord` impl, which would have to disagree with the id-based `Eq`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Message {
    /// Declared size of the record (19 by convention).
    pub size: u16,
    /// Application type tag.
    pub kind: u8,
    /// Unique identifier; the deduplication key.
    pub id: u64,
    /// Opaque payload.
    pub data: u64,
}

impl Message {
    /// Compares by type tag (the only ordering the system defines).
    #[inline]
    pub fn cmp_by_kind(&self, other: &Self) -> Ordering {
        self.kind.cmp(&other.kind)
    }
}

impl PartialEq for Message {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Message {}

impl Hash for Message {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
