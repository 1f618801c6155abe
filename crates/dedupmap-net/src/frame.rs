//! Exact-length framed record transfer over stream endpoints.
//!
//! A record occupies exactly [`WIRE_SIZE`] bytes on the stream - no length
//! prefix, no separator. Both directions loop over short transfers;
//! `Interrupted` is always retried in place. A `WouldBlock`/`TimedOut`
//! *between* frames is reported to the caller (its loop re-checks the stop
//! flag), but *inside* a frame it means the rest is still in flight, so the
//! read keeps going: returning early there would desync the stream, and
//! partial-frame recovery is unsupported.

use crate::NetError;
use dedupmap::{decode, encode, Message, WIRE_SIZE};
use std::io::{self, Read, Write};

/// Writes exactly one 19-byte frame.
pub fn send_frame<W: Write>(writer: &mut W, msg: &Message) -> Result<(), NetError> {
    let buf = encode(msg);
    let mut sent = 0;
    while sent < WIRE_SIZE {
        match writer.write(&buf[sent..]) {
            Ok(0) => return Err(NetError::PeerClosed),
            Ok(n) => sent += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e)
                if sent > 0
                    && matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
            Err(e) => return Err(NetError::Io(e)),
        }
    }
    Ok(())
}

/// Reads exactly one 19-byte frame.
///
/// A clean close between frames is [`NetError::PeerClosed`]; a close after
/// bytes were consumed is the fatal [`NetError::ShortFrame`].
pub fn recv_frame<R: Read>(reader: &mut R) -> Result<Message, NetError> {
    let mut buf = [0u8; WIRE_SIZE];
    let mut got = 0;
    while got < WIRE_SIZE {
        match reader.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(if got == 0 {
                    NetError::PeerClosed
                } else {
                    NetError::ShortFrame { got }
                });
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e)
                if got > 0
                    && matches!(
                        e.kind(),
                        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                    ) => {}
            Err(e) => return Err(NetError::Io(e)),
        }
    }
    Ok(decode(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn msg(id: u64, data: u64) -> Message {
        Message { size: 19, kind: 2, id, data }
    }

    #[test]
    fn frames_round_trip_through_a_stream() {
        let mut wire = Vec::new();
        send_frame(&mut wire, &msg(7, 10)).unwrap();
        send_frame(&mut wire, &msg(8, 11)).unwrap();
        assert_eq!(wire.len(), 2 * WIRE_SIZE);

        let mut reader = Cursor::new(wire);
        let first = recv_frame(&mut reader).unwrap();
        let second = recv_frame(&mut reader).unwrap();
        assert_eq!((first.id, first.data), (7, 10));
        assert_eq!((second.id, second.data), (8, 11));

        assert!(matches!(recv_frame(&mut reader), Err(NetError::PeerClosed)));
    }

    #[test]
    fn short_frame_is_fatal() {
        let mut wire = Vec::new();
        send_frame(&mut wire, &msg(7, 0)).unwrap();
        wire.truncate(WIRE_SIZE - 5);

        let mut reader = Cursor::new(wire);
        assert!(matches!(
            recv_frame(&mut reader),
            Err(NetError::ShortFrame { got: 14 })
        ));
    }

    /// A reader that dribbles one byte at a time forces the short-read loop.
    struct Dribble<'a> {
        bytes: &'a [u8],
        pos: usize,
    }

    impl Read for Dribble<'_> {
        fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
            if self.pos == self.bytes.len() {
                return Ok(0);
            }
            out[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn short_reads_are_retried() {
        let bytes = encode(&msg(0x0102030405060708, 99));
        let mut reader = Dribble { bytes: &bytes, pos: 0 };
        let out = recv_frame(&mut reader).unwrap();
        assert_eq!(out.id, 0x0102030405060708);
        assert_eq!(out.data, 99);
    }
}
