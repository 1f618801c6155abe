//! End-to-end tests over loopback sockets: datagram in, dedup in the shared
//! index, distinguished records forwarded over TCP, drained by the worker
//! pool into the log sink.

use dedupmap::{encode, LockFreeIndex, Message, MessageIndex};
use dedupmap_net::{send_frame, LogSink, StopFlag, StreamServer, UdpReceiver};
use std::io::Write;
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn unique_log(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("dedupmap-{tag}-{}.log", std::process::id()))
}

fn msg(id: u64, data: u64) -> Message {
    Message { size: 19, kind: 1, id, data }
}

/// Polls the sink file until `predicate` holds or the deadline passes.
fn wait_for_log<F: Fn(&str) -> bool>(path: &PathBuf, predicate: F) -> String {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let text = std::fs::read_to_string(path).unwrap_or_default();
        if predicate(&text) {
            return text;
        }
        assert!(
            Instant::now() < deadline,
            "log {path:?} never satisfied the predicate; contents:\n{text}"
        );
        thread::sleep(Duration::from_millis(25));
    }
}

fn count_lines_with(text: &str, needle: &str) -> usize {
    text.lines().filter(|line| line.contains(needle)).count()
}

struct Harness {
    stop: StopFlag,
    index: Arc<LockFreeIndex>,
    stream_log: PathBuf,
    udp_log: PathBuf,
    receiver_ports: Vec<u16>,
    threads: Vec<thread::JoinHandle<()>>,
}

impl Harness {
    /// Boots a stream server plus `receivers` UDP receivers sharing one
    /// lock-free index, all on ephemeral ports.
    fn start(tag: &str, receivers: usize) -> Self {
        let stop = StopFlag::new();
        let index = Arc::new(LockFreeIndex::with_capacity(1024));
        let stream_log = unique_log(&format!("{tag}-stream"));
        let udp_log = unique_log(&format!("{tag}-udp"));
        std::fs::remove_file(&stream_log).ok();
        std::fs::remove_file(&udp_log).ok();

        let server = StreamServer::bind(
            0,
            Arc::new(LogSink::open(&stream_log).unwrap()),
            stop.clone(),
        )
        .unwrap();
        let server_port = server.port();

        let mut threads = Vec::new();
        let mut receiver_ports = Vec::new();

        let udp_sink = Arc::new(LogSink::open(&udp_log).unwrap());
        let downstream = SocketAddr::from(([127, 0, 0, 1], server_port));
        for _ in 0..receivers {
            let receiver = UdpReceiver::bind(
                0,
                downstream,
                index.clone(),
                Arc::clone(&udp_sink),
                stop.clone(),
            )
            .unwrap();
            receiver_ports.push(receiver.port());
            threads.push(thread::spawn(move || {
                receiver.run().unwrap();
            }));
        }

        threads.push(thread::spawn(move || {
            server.run().unwrap();
            // dropping the server here joins its worker pool
        }));

        Self { stop, index, stream_log, udp_log, receiver_ports, threads }
    }

    fn send_datagram(&self, receiver: usize, msg: &Message) {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = SocketAddr::from(([127, 0, 0, 1], self.receiver_ports[receiver]));
        socket.send_to(&encode(msg), target).unwrap();
    }

    fn shutdown(mut self) {
        self.stop.trigger();
        for handle in self.threads.drain(..) {
            handle.join().expect("component thread panicked");
        }
        std::fs::remove_file(&self.stream_log).ok();
        std::fs::remove_file(&self.udp_log).ok();
    }
}

#[test]
fn forwarding_relays_distinguished_records_exactly_once() {
    let harness = Harness::start("forward", 1);
    let id = 0xDEAD_BEEF_u64;

    harness.send_datagram(0, &msg(id, 10));

    // the record crosses udp -> index -> tcp link -> worker -> sink
    let text = wait_for_log(&harness.stream_log, |t| t.contains("ID: 3735928559"));
    assert!(text.contains("Data: 10"));

    // no duplicate frame shows up after a settle period
    thread::sleep(Duration::from_millis(300));
    let text = std::fs::read_to_string(&harness.stream_log).unwrap();
    assert_eq!(count_lines_with(&text, "ID: 3735928559"), 1);

    // a non-distinguished record is indexed but never forwarded
    harness.send_datagram(0, &msg(7, 500));
    let deadline = Instant::now() + Duration::from_secs(5);
    while harness.index.find(7).is_none() {
        assert!(Instant::now() < deadline, "datagram never reached the index");
        thread::sleep(Duration::from_millis(10));
    }
    thread::sleep(Duration::from_millis(200));
    let text = std::fs::read_to_string(&harness.stream_log).unwrap();
    assert_eq!(count_lines_with(&text, "ID: 7"), 0);

    harness.shutdown();
}

#[test]
fn duplicate_arrivals_index_once_but_forward_each_time() {
    let harness = Harness::start("dup", 2);
    let id = 4242_u64;

    // identical records hit both datagram ports
    harness.send_datagram(0, &msg(id, 10));
    harness.send_datagram(1, &msg(id, 10));

    // forwarding is per arrival: two frames reach the stream sink
    wait_for_log(&harness.stream_log, |t| count_lines_with(t, "ID: 4242") == 2);
    // ... and both arrivals were logged on the datagram side
    wait_for_log(&harness.udp_log, |t| count_lines_with(t, "ID: 4242") == 2);

    // but the index deduplicated
    assert!(harness.index.find(id).is_some());
    assert_eq!(harness.index.len(), 1);

    harness.shutdown();
}

#[test]
fn stream_clients_are_drained_by_the_worker_pool() {
    let stop = StopFlag::new();
    let log = unique_log("drain");
    std::fs::remove_file(&log).ok();

    let server =
        StreamServer::bind(0, Arc::new(LogSink::open(&log).unwrap()), stop.clone()).unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], server.port()));
    let server_thread = thread::spawn(move || server.run().unwrap());

    // several concurrent clients, several frames each
    let clients: Vec<_> = (0..4u64)
        .map(|c| {
            thread::spawn(move || {
                let mut stream = TcpStream::connect(addr).unwrap();
                for k in 0..5 {
                    send_frame(&mut stream, &msg(c * 100 + k, k)).unwrap();
                }
            })
        })
        .collect();
    for client in clients {
        client.join().unwrap();
    }

    wait_for_log(&log, |t| t.lines().count() == 20);

    stop.trigger();
    server_thread.join().unwrap();
    std::fs::remove_file(&log).ok();
}

#[test]
fn split_frames_reassemble_and_short_frames_drop_the_connection() {
    let stop = StopFlag::new();
    let log = unique_log("split");
    std::fs::remove_file(&log).ok();

    let server =
        StreamServer::bind(0, Arc::new(LogSink::open(&log).unwrap()), stop.clone()).unwrap();
    let addr = SocketAddr::from(([127, 0, 0, 1], server.port()));
    let server_thread = thread::spawn(move || server.run().unwrap());

    // a frame dribbled across two writes, straddling the worker's read
    // timeout, must still land as one record
    let bytes = encode(&msg(31337, 1));
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(&bytes[..7]).unwrap();
    stream.flush().unwrap();
    thread::sleep(Duration::from_millis(400));
    stream.write_all(&bytes[7..]).unwrap();
    drop(stream);

    wait_for_log(&log, |t| t.contains("ID: 31337"));

    // a partial frame followed by a close is discarded
    let mut stream = TcpStream::connect(addr).unwrap();
    stream.write_all(&bytes[..12]).unwrap();
    drop(stream);

    thread::sleep(Duration::from_millis(400));
    let text = std::fs::read_to_string(&log).unwrap();
    assert_eq!(count_lines_with(&text, "ID: 31337"), 1);

    stop.trigger();
    server_thread.join().unwrap();
    std::fs::remove_file(&log).ok();
}
