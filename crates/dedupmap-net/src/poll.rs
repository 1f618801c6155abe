//! Minimal readiness helper over `libc::poll`.

use std::io;
use std::os::unix::io::RawFd;

/// Waits up to `timeout_ms` for `fd` to become readable.
///
/// `EINTR` reports "not ready" instead of retrying so the caller's loop
/// re-checks the stop flag right away - the interrupt may have been the
/// shutdown signal.
pub(crate) fn wait_readable(fd: RawFd, timeout_ms: i32) -> io::Result<bool> {
    let mut pollfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };

    // Safety: pollfd points at one valid descriptor record for the call
    let rc = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0 && pollfd.revents & libc::POLLIN != 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::os::unix::io::AsRawFd;

    #[test]
    fn reports_readable_and_idle() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();

        assert!(!wait_readable(server.as_raw_fd(), 0).unwrap());

        client.write_all(b"x").unwrap();
        client.flush().unwrap();
        assert!(wait_readable(server.as_raw_fd(), 1000).unwrap());
    }
}
