//! Stream server: accept loop, handle queue, and the worker pool that
//! drains framed records into the log sink.
//!
//! The nonblocking listener is polled with a 1 ms timeout; every accepted
//! connection is converted to its raw fd and pushed onto the SPSC handle
//! queue (a full queue closes the fresh handle). Workers pop under the
//! consumer mutex and serve one connection to completion: framed receives
//! until the peer closes or a frame error, each record appended to the
//! sink. Worker reads carry a 200 ms timeout so an idle connection still
//! observes the stop flag.

use crate::poll::wait_readable;
use crate::{
    handle_queue, recv_frame, HandlePopper, HandlePusher, LogSink, NetError, StopFlag,
    HANDLE_QUEUE_CAPACITY, POLL_TIMEOUT_MS,
};
use parking_lot::Mutex;
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Fixed size of the connection-serving worker pool.
pub const WORKER_COUNT: usize = 12;

/// Read timeout on worker sockets; bounds how long an idle connection can
/// keep a worker from seeing the stop flag.
const WORKER_RECV_TIMEOUT: Duration = Duration::from_millis(200);

/// Pause between empty pops so idle workers do not spin.
const IDLE_POP_PAUSE: Duration = Duration::from_millis(1);

/// Accepting stream server with its worker pool.
pub struct StreamServer {
    listener: TcpListener,
    pusher: HandlePusher,
    workers: Vec<JoinHandle<()>>,
    stop: StopFlag,
    port: u16,
}

impl StreamServer {
    /// Binds the listener and spawns the worker pool.
    pub fn bind(port: u16, sink: Arc<LogSink>, stop: StopFlag) -> Result<Self, NetError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).map_err(NetError::Setup)?;
        listener.set_nonblocking(true).map_err(NetError::Setup)?;
        let port = listener.local_addr().map_err(NetError::Setup)?.port();

        let (pusher, popper) = handle_queue(HANDLE_QUEUE_CAPACITY);
        let popper = Arc::new(Mutex::new(popper));

        let workers = (0..WORKER_COUNT)
            .map(|worker| {
                let popper = Arc::clone(&popper);
                let sink = Arc::clone(&sink);
                let stop = stop.clone();
                thread::Builder::new()
                    .name(format!("tcp-worker-{worker}"))
                    .spawn(move || worker_loop(&popper, &sink, &stop))
                    .map_err(NetError::Io)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { listener, pusher, workers, stop, port })
    }

    /// Port actually bound (useful when constructed with port 0).
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Accept loop; runs on the calling thread until the stop flag clears.
    pub fn run(&self) -> Result<(), NetError> {
        tracing::info!(port = self.port, workers = WORKER_COUNT, "tcp server started");

        while self.stop.is_running() {
            if !wait_readable(self.listener.as_raw_fd(), POLL_TIMEOUT_MS)? {
                continue;
            }

            match self.listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!(%peer, "client connected");
                    let fd = stream.into_raw_fd();
                    if !self.pusher.push(fd) {
                        tracing::warn!(%peer, "handle queue full, dropping connection");
                        // Safety: ownership of fd stayed with us on a failed push
                        unsafe { libc::close(fd) };
                    }
                }
                Err(ref e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(NetError::Io(e)),
            }
        }

        tracing::info!(port = self.port, "tcp server stopped");
        Ok(())
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        // the pool only exits once the flag clears; make sure of it even on
        // an error path out of run()
        self.stop.trigger();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
        // pending handles in the queue are closed by its teardown
    }
}

fn worker_loop(popper: &Mutex<HandlePopper>, sink: &LogSink, stop: &StopFlag) {
    while stop.is_running() {
        let fd = popper.lock().pop();
        let Some(fd) = fd else {
            thread::sleep(IDLE_POP_PAUSE);
            continue;
        };

        // Safety: the accept loop released ownership of fd via into_raw_fd
        // when it pushed; exactly one worker pops it
        let stream = unsafe { TcpStream::from_raw_fd(fd) };
        serve_connection(stream, sink, stop);
    }
}

/// Drains one connection: framed receives until close or error.
fn serve_connection(mut stream: TcpStream, sink: &LogSink, stop: &StopFlag) {
    let peer = stream.peer_addr().ok();

    // accepted sockets are served blocking, with a bounded read timeout so
    // the stop flag is still observed
    if let Err(err) = stream
        .set_nonblocking(false)
        .and_then(|()| stream.set_read_timeout(Some(WORKER_RECV_TIMEOUT)))
    {
        tracing::warn!(?peer, %err, "socket setup failed, dropping connection");
        return;
    }

    while stop.is_running() {
        match recv_frame(&mut stream) {
            Ok(msg) => {
                tracing::debug!(
                    ?peer,
                    id = msg.id,
                    kind = msg.kind,
                    data = msg.data,
                    "received stream record"
                );
                if let Err(err) = sink.append(&msg) {
                    tracing::error!(id = msg.id, %err, "log append failed");
                }
            }
            Err(err) if err.is_transient() => {} // idle between frames
            Err(NetError::PeerClosed) => {
                tracing::info!(?peer, "client disconnected");
                return;
            }
            Err(err) => {
                tracing::warn!(?peer, %err, "closing connection");
                return;
            }
        }
    }
}
