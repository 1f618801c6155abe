//! Combined binary: both UDP receivers (sharing the lock-free index) plus
//! the TCP server in a single process.
//!
//! ```bash
//! message_system <udp_port_1> <udp_port_2> <tcp_port>
//! ```

use dedupmap::LockFreeIndex;
use dedupmap_net::{
    install_signal_handlers, LogSink, NetError, RelayConfig, StopFlag, StreamServer,
    UdpReceiver, SYSTEM_LOG, UDP_LOG,
};
use std::net::SocketAddr;
use std::process;
use std::sync::Arc;
use std::thread;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match RelayConfig::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("usage: {} <udp_port_1> <udp_port_2> <tcp_port>", args[0]);
            process::exit(1);
        }
    };

    if let Err(err) = run(config) {
        tracing::error!(%err, "message system failed");
        process::exit(1);
    }
}

fn run(config: RelayConfig) -> Result<(), NetError> {
    let stop = StopFlag::new();
    install_signal_handlers(&stop)?;

    let index = Arc::new(LockFreeIndex::new());
    let udp_sink = Arc::new(LogSink::open(UDP_LOG)?);
    let stream_sink = Arc::new(LogSink::open(SYSTEM_LOG)?);

    // listen before the receivers dial their downstream links
    let server = StreamServer::bind(config.tcp_port, stream_sink, stop.clone())?;
    let downstream = SocketAddr::from(([127, 0, 0, 1], config.tcp_port));

    let receivers = [config.udp_port_1, config.udp_port_2].map(|port| {
        UdpReceiver::bind(
            port,
            downstream,
            index.clone(),
            Arc::clone(&udp_sink),
            stop.clone(),
        )
    });

    let mut receiver_threads = Vec::new();
    for (slot, receiver) in receivers.into_iter().enumerate() {
        let receiver = receiver?;
        receiver_threads.push(
            thread::Builder::new()
                .name(format!("udp-rx-{}", slot + 1))
                .spawn(move || {
                    if let Err(err) = receiver.run() {
                        tracing::error!(%err, "udp receiver failed");
                    }
                })?,
        );
    }

    // the accept loop holds the main thread
    let result = server.run();
    stop.trigger();
    for handle in receiver_threads {
        let _ = handle.join();
    }
    result
}
