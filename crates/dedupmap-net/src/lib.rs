//! Network layer for the dedupmap message system.
//!
//! Two UDP receivers insert incoming 19-byte records into a shared
//! [`dedupmap::MessageIndex`] and forward the distinguished subset
//! (`data == 10`) over a per-receiver TCP link. The TCP server accepts many
//! clients, hands their raw fds through a bounded SPSC [`HandleQueue`], and
//! a fixed worker pool drains framed records into an append-only log sink.
//!
//! Everything runs on parallel OS threads; sockets are nonblocking and
//! readiness is polled with a 1 ms timeout so every loop observes the
//! process [`StopFlag`] promptly. Shutdown is cooperative: SIGINT/SIGTERM
//! clear the flag with a single atomic store and each component's drop
//! closes its sockets and joins its threads.

mod config;
mod error;
mod frame;
mod handle_queue;
mod poll;
mod shutdown;
mod sink;
mod tcp;
mod udp;

pub use config::{ArgError, RelayConfig, StreamConfig};
pub use error::NetError;
pub use frame::{recv_frame, send_frame};
pub use handle_queue::{handle_queue, HandlePopper, HandlePusher, HANDLE_QUEUE_CAPACITY};
pub use shutdown::{install_signal_handlers, StopFlag};
pub use sink::{LogSink, SYSTEM_LOG, TCP_LOG, UDP_LOG};
pub use tcp::{StreamServer, WORKER_COUNT};
pub use udp::{UdpReceiver, FORWARD_DATA};

/// Readiness-poll timeout shared by the datagram and accept loops.
pub(crate) const POLL_TIMEOUT_MS: i32 = 1;
