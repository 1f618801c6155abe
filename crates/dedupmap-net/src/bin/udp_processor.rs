//! Datagram processor: two UDP receivers over a shared blocking index,
//! forwarding distinguished records to the downstream stream endpoint.
//!
//! ```bash
//! udp_processor <udp_port_1> <udp_port_2> <tcp_port>
//! ```

use dedupmap::BlockingIndex;
use dedupmap_net::{
    install_signal_handlers, LogSink, NetError, RelayConfig, StopFlag, UdpReceiver, UDP_LOG,
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
        tracing::error!(%err, "udp processor failed");
        process::exit(1);
    }
}

fn run(config: RelayConfig) -> Result<(), NetError> {
    let stop = StopFlag::new();
    install_signal_handlers(&stop)?;

    let index = Arc::new(BlockingIndex::new());
    let sink = Arc::new(LogSink::open(UDP_LOG)?);
    let downstream = SocketAddr::from(([127, 0, 0, 1], config.tcp_port));

    let first = UdpReceiver::bind(
        config.udp_port_1,
        downstream,
        index.clone(),
        Arc::clone(&sink),
        stop.clone(),
    )?;
    let second = UdpReceiver::bind(
        config.udp_port_2,
        downstream,
        index,
        sink,
        stop.clone(),
    )?;

    let first_thread = thread::Builder::new()
        .name("udp-rx-1".into())
        .spawn(move || {
            if let Err(err) = first.run() {
                tracing::error!(%err, "first receiver failed");
            }
        })?;

    // the second receiver runs on the main thread
    let result = second.run();
    stop.trigger();
    let _ = first_thread.join();
    result
}
