//! ICMP latency exporter.
//!
//! Pings a single target at a fixed interval, matches replies to requests,
//! detects loss by timeout and keeps running round-trip statistics. The
//! latest round-trip time is published as the `ping_rtt` gauge for
//! Prometheus to scrape.

pub mod correlator;
pub mod dns_resolver;
pub mod error;
mod listener;
pub mod messages;
pub mod metrics;
pub mod packet;
mod sender;
pub mod server;
pub mod session;
pub mod stats;
pub mod transport;

pub use correlator::{Correlator, Outcome, Probe};
pub use error::{ConfigError, CorrelatorError, DecodeError, SinkError, StartupError};
pub use messages::{Sample, SessionEvent, Summary};
pub use metrics::{MetricsSink, RttGauge};
pub use session::{LoopState, Session, SessionConfig, SessionController, SessionHandle};
pub use stats::{Aggregator, Statistics};
