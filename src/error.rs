//! Error types.
//!
//! Only [`StartupError`] is fatal. Everything else is reported and the
//! prober keeps running.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures that prevent a session from ever starting.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Target name could not be resolved.
    #[error("unable to resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    /// Target resolved, but not to anything we can ping.
    #[error("{0} has no IPv4 address")]
    NoIpv4Address(String),

    /// Raw ICMP channel could not be opened (usually missing CAP_NET_RAW).
    #[error("unable to open ICMP channel: {0}")]
    Transport(#[source] io::Error),

    /// Scrape server could not bind its listen address.
    #[error("unable to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Rejected session parameters.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("interval must be greater than zero")]
    ZeroInterval,

    #[error("timeout must be greater than zero")]
    ZeroTimeout,

    #[error("payload size {0} exceeds the maximum of {max}", max = crate::packet::MAX_PAYLOAD_SIZE)]
    PayloadTooLarge(usize),
}

/// Reasons an incoming ICMP packet is not one of our echo replies.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("packet too short ({0} bytes)")]
    Truncated(usize),

    #[error("not an echo reply (type {0})")]
    NotEchoReply(u8),

    #[error("checksum mismatch: expected {expected:#06x}, got {actual:#06x}")]
    BadChecksum { expected: u16, actual: u16 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelatorError {
    #[error("sequence {0} is already in flight")]
    DuplicateSequence(u16),
}

/// A metrics sink refused a sample.
#[derive(Debug, Error)]
#[error("metrics sink error: {0}")]
pub struct SinkError(pub String);
