//! Stream processor: accepts clients and drains their framed records into
//! the TCP log sink through the worker pool.
//!
//! ```bash
//! tcp_processor <tcp_port>
//! ```

use dedupmap_net::{
    install_signal_handlers, LogSink, NetError, StopFlag, StreamConfig, StreamServer, TCP_LOG,
};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = match StreamConfig::from_args(&args) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            eprintln!("usage: {} <tcp_port>", args[0]);
            process::exit(1);
        }
    };

    if let Err(err) = run(config) {
        tracing::error!(%err, "tcp processor failed");
        process::exit(1);
    }
}

fn run(config: StreamConfig) -> Result<(), NetError> {
    let stop = StopFlag::new();
    install_signal_handlers(&stop)?;

    let sink = Arc::new(LogSink::open(TCP_LOG)?);
    let server = StreamServer::bind(config.tcp_port, sink, stop)?;
    server.run()
    // dropping the server joins the worker pool
}
