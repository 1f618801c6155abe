//! Command-line configuration for the processor binaries.
//!
//! Ports are positional arguments, validated to [0, 65535] by the `u16`
//! parse; any argument error aborts startup with exit code 1 (handled by
//! the binaries).

use thiserror::Error;

/// Argument-parsing failures; always fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgError {
    /// Wrong number of positional arguments.
    #[error("expected {expected} arguments, got {got}")]
    WrongCount {
        /// Required argument count.
        expected: usize,
        /// Observed argument count.
        got: usize,
    },

    /// A port argument was not an integer in [0, 65535].
    #[error("invalid port {arg:?}: must be an integer in [0, 65535]")]
    InvalidPort {
        /// The offending argument.
        arg: String,
    },
}

fn parse_port(arg: &str) -> Result<u16, ArgError> {
    arg.parse().map_err(|_| ArgError::InvalidPort { arg: arg.to_owned() })
}

/// `<argv0> <udp_port_1> <udp_port_2> <tcp_port>` - the datagram processor
/// and the combined binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayConfig {
    /// First datagram endpoint.
    pub udp_port_1: u16,
    /// Second datagram endpoint.
    pub udp_port_2: u16,
    /// Downstream stream endpoint.
    pub tcp_port: u16,
}

impl RelayConfig {
    /// Parses `args` as handed out by `std::env::args` (argv0 included).
    pub fn from_args(args: &[String]) -> Result<Self, ArgError> {
        let [_, udp1, udp2, tcp] = args else {
            return Err(ArgError::WrongCount { expected: 3, got: args.len().saturating_sub(1) });
        };
        Ok(Self {
            udp_port_1: parse_port(udp1)?,
            udp_port_2: parse_port(udp2)?,
            tcp_port: parse_port(tcp)?,
        })
    }
}

/// `<argv0> <tcp_port>` - the stream processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    /// Listening stream endpoint.
    pub tcp_port: u16,
}

impl StreamConfig {
    /// Parses `args` as handed out by `std::env::args` (argv0 included).
    pub fn from_args(args: &[String]) -> Result<Self, ArgError> {
        let [_, tcp] = args else {
            return Err(ArgError::WrongCount { expected: 1, got: args.len().saturating_sub(1) });
        };
        Ok(Self { tcp_port: parse_port(tcp)? })
    }
}
