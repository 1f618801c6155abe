//! Property-based tests for the codec and both index variants.
//!
//! The indexes are driven through the shared `MessageIndex` trait so every
//! property is checked against the blocking and the lock-free
//! implementation with the same inputs.

use dedupmap::{
    decode, decode_slice, encode, BlockingIndex, LockFreeIndex, Message, MessageIndex,
    WIRE_SIZE,
};
use proptest::prelude::*;
use std::collections::HashSet;

fn arb_message() -> impl Strategy<Value = Message> {
    (any::<u16>(), any::<u8>(), any::<u64>(), any::<u64>())
        .prop_map(|(size, kind, id, data)| Message { size, kind, id, data })
}

// =============================================================================
// Codec: decode(encode(m)) == m, field for field, and the layout is fixed
// =============================================================================

proptest! {
    #[test]
    fn prop_codec_round_trip(msg in arb_message()) {
        let bytes = encode(&msg);
        let out = decode(&bytes);

        // Message equality is id-only; compare every field explicitly
        prop_assert_eq!(out.size, msg.size);
        prop_assert_eq!(out.kind, msg.kind);
        prop_assert_eq!(out.id, msg.id);
        prop_assert_eq!(out.data, msg.data);
    }

    #[test]
    fn prop_codec_layout(msg in arb_message()) {
        let bytes = encode(&msg);

        prop_assert_eq!(bytes.len(), WIRE_SIZE);
        prop_assert_eq!(&bytes[0..2], &msg.size.to_be_bytes()[..]);
        prop_assert_eq!(bytes[2], msg.kind);
        prop_assert_eq!(&bytes[3..11], &msg.id.to_be_bytes()[..]);
        prop_assert_eq!(&bytes[11..19], &msg.data.to_be_bytes()[..]);
    }

    #[test]
    fn prop_codec_rejects_wrong_lengths(msg in arb_message(), cut in 0usize..WIRE_SIZE) {
        let bytes = encode(&msg);
        prop_assert!(decode_slice(&bytes[..cut]).is_err());
    }
}

// =============================================================================
// Dedup: after any insert sequence, len() counts distinct surviving ids
// =============================================================================

fn check_dedup_counting(index: &dyn MessageIndex, ops: &[(u64, bool)]) {
    let mut live: HashSet<u64> = HashSet::new();

    for &(id, is_insert) in ops {
        let msg = Message { size: 19, kind: 0, id, data: id };
        if is_insert {
            assert_eq!(index.insert(msg), live.insert(id), "insert({id}) outcome");
        } else {
            assert_eq!(index.remove(id), live.remove(&id), "remove({id}) outcome");
        }
    }

    assert_eq!(index.len(), live.len());
    for &id in &live {
        assert!(index.find(id).is_some(), "id {id} should be present");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_dedup_counting_blocking(
        ops in prop::collection::vec((0u64..64, any::<bool>()), 1..200),
    ) {
        let index = BlockingIndex::with_capacity(1024);
        check_dedup_counting(&index, &ops);
    }

    #[test]
    fn prop_dedup_counting_lockfree(
        ops in prop::collection::vec((0u64..64, any::<bool>()), 1..200),
    ) {
        let index = LockFreeIndex::with_capacity(64);
        check_dedup_counting(&index, &ops);
    }

    /// First writer wins: a duplicate insert never replaces the stored record.
    #[test]
    fn prop_first_record_wins(id in any::<u64>(), first in any::<u64>(), second in any::<u64>()) {
        let index = LockFreeIndex::with_capacity(64);

        let first_insert = index.insert(Message { size: 19, kind: 1, id, data: first });
        let second_insert = index.insert(Message { size: 19, kind: 2, id, data: second });
        prop_assert!(first_insert);
        prop_assert!(!second_insert);
        prop_assert_eq!(index.find(id).unwrap().data, first);
    }
}
