//! Error types for the network layer.

use dedupmap::{WireError, WIRE_SIZE};
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Errors surfaced by sockets, framing and the processors built on them.
#[derive(Debug, Error)]
pub enum NetError {
    /// socket/bind/listen/fcntl failed while setting a component up.
    #[error("socket setup failed: {0}")]
    Setup(#[source] io::Error),

    /// Connecting the downstream forwarding link failed.
    #[error("connect to downstream {addr} failed: {source}")]
    Connect {
        /// Downstream address.
        addr: SocketAddr,
        /// Underlying connect error.
        source: io::Error,
    },

    /// The peer closed the stream between frames.
    #[error("peer closed the connection")]
    PeerClosed,

    /// The peer closed the stream after a frame was partially consumed.
    /// Partial-frame recovery is unsupported; the connection is dead.
    #[error("peer closed mid-frame after {got} of {WIRE_SIZE} bytes")]
    ShortFrame {
        /// Bytes consumed before the close.
        got: usize,
    },

    /// Installing the SIGINT/SIGTERM handler failed.
    #[error("signal handler installation failed: {0}")]
    Signal(#[from] ctrlc::Error),

    /// A received buffer was not a whole frame.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// Any other I/O error, including the transient kinds the loops retry.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl NetError {
    /// True for the `EAGAIN`/`EWOULDBLOCK`/`EINTR` family: the operation
    /// found nothing to do and the caller's loop should continue.
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(e) if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_kinds() {
        assert!(NetError::Io(io::Error::from(io::ErrorKind::WouldBlock)).is_transient());
        assert!(NetError::Io(io::Error::from(io::ErrorKind::TimedOut)).is_transient());
        assert!(NetError::Io(io::Error::from(io::ErrorKind::Interrupted)).is_transient());
        assert!(!NetError::Io(io::Error::from(io::ErrorKind::BrokenPipe)).is_transient());
        assert!(!NetError::PeerClosed.is_transient());
    }
}
