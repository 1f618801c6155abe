//! Datagram receiver: nonblocking receive loop feeding the shared index.
//!
//! One receiver per datagram endpoint. Readiness is polled with a 1 ms
//! timeout so the stop flag is observed every iteration; each ready event
//! reads exactly one datagram. Records whose `data` field equals
//! [`FORWARD_DATA`] are handed to a bounded forwarder channel drained by a
//! dedicated thread that owns this receiver's downstream TCP link - the
//! link's write guard. Forwarding is fire-and-forget and is not gated on
//! insert success: a duplicate arrival still forwards.

use crate::poll::wait_readable;
use crate::{send_frame, LogSink, NetError, StopFlag, POLL_TIMEOUT_MS};
use dedupmap::{decode_slice, Message, MessageIndex, WIRE_SIZE};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::os::unix::io::AsRawFd;
use std::sync::mpsc::{self, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Payload value that marks a record for downstream forwarding.
pub const FORWARD_DATA: u64 = 10;

/// Bound on records parked between the receive loop and the link writer.
const FORWARD_QUEUE_DEPTH: usize = 64;

/// Owns the downstream TCP link and serializes all sends onto it.
struct Forwarder {
    queue: Option<SyncSender<Message>>,
    writer: Option<JoinHandle<()>>,
}

impl Forwarder {
    fn connect(addr: SocketAddr) -> Result<Self, NetError> {
        let mut link =
            TcpStream::connect(addr).map_err(|source| NetError::Connect { addr, source })?;

        let (queue, incoming) = mpsc::sync_channel::<Message>(FORWARD_QUEUE_DEPTH);
        let writer = thread::Builder::new()
            .name("udp-forward".into())
            .spawn(move || {
                // exits when the receiver drops its sender
                while let Ok(msg) = incoming.recv() {
                    if let Err(err) = send_frame(&mut link, &msg) {
                        tracing::error!(id = msg.id, %err, "downstream send failed");
                    }
                }
            })
            .map_err(NetError::Io)?;

        Ok(Self { queue: Some(queue), writer: Some(writer) })
    }

    /// Fire-and-forget: a saturated queue drops the record rather than
    /// stalling the receive loop.
    fn forward(&self, msg: Message) {
        let queue = self.queue.as_ref().expect("forwarder queue alive until drop");
        match queue.try_send(msg) {
            Ok(()) => {}
            Err(TrySendError::Full(msg)) => {
                tracing::warn!(id = msg.id, "forward queue full, dropping record");
            }
            Err(TrySendError::Disconnected(msg)) => {
                tracing::error!(id = msg.id, "forward link writer is gone");
            }
        }
    }
}

impl Drop for Forwarder {
    fn drop(&mut self) {
        self.queue.take(); // close the channel so the writer drains and exits
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

/// Nonblocking datagram receiver bound to one UDP port.
pub struct UdpReceiver {
    socket: UdpSocket,
    index: Arc<dyn MessageIndex>,
    forwarder: Forwarder,
    sink: Arc<LogSink>,
    stop: StopFlag,
    port: u16,
}

impl UdpReceiver {
    /// Binds the datagram socket and connects the downstream link.
    pub fn bind(
        port: u16,
        downstream: SocketAddr,
        index: Arc<dyn MessageIndex>,
        sink: Arc<LogSink>,
        stop: StopFlag,
    ) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(("0.0.0.0", port)).map_err(NetError::Setup)?;
        socket.set_nonblocking(true).map_err(NetError::Setup)?;
        let port = socket.local_addr().map_err(NetError::Setup)?.port();
        let forwarder = Forwarder::connect(downstream)?;

        Ok(Self { socket, index, forwarder, sink, stop, port })
    }

    /// Port actually bound (useful when constructed with port 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Receive loop; returns when the stop flag clears.
    pub fn run(&self) -> Result<(), NetError> {
        tracing::info!(port = self.port, "udp receiver started");

        // one slot larger than a frame so oversized datagrams are detected
        // instead of silently truncated
        let mut buf = [0u8; WIRE_SIZE + 1];
        while self.stop.is_running() {
            if !wait_readable(self.socket.as_raw_fd(), POLL_TIMEOUT_MS)? {
                continue;
            }

            let (len, peer) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(e) => return Err(NetError::Io(e)),
            };

            let msg = match decode_slice(&buf[..len]) {
                Ok(msg) => msg,
                Err(err) => {
                    tracing::warn!(%peer, %err, "dropping malformed datagram");
                    continue;
                }
            };
            tracing::debug!(
                id = msg.id,
                kind = msg.kind,
                data = msg.data,
                "received datagram"
            );

            // duplicates are dropped inside the index
            self.index.insert(msg);

            if msg.data == FORWARD_DATA {
                self.forwarder.forward(msg);
                if let Err(err) = self.sink.append(&msg) {
                    tracing::error!(id = msg.id, %err, "log append failed");
                }
            }
        }

        tracing::info!(port = self.port, "udp receiver stopped");
        Ok(())
    }
}
