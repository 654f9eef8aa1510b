use std::net::IpAddr;
use std::time::Duration;

use crate::stats::Statistics;

/// A resolved echo reply, as shown to observers and the metrics sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub target: String,
    pub sequence: u16,
    pub bytes: usize,
    pub source: IpAddr,
    pub rtt: Duration,
}

impl Sample {
    pub fn rtt_millis(&self) -> f64 {
        self.rtt.as_nanos() as f64 / 1e6
    }
}

/// Final statistics of a finished session.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub target: String,
    pub address: IpAddr,
    pub sent: u64,
    pub received: u64,
    pub loss_percent: f64,
    pub min_rtt: Duration,
    pub avg_rtt: Duration,
    pub max_rtt: Duration,
    pub std_dev_rtt: Duration,
}

impl Summary {
    pub fn new(target: String, address: IpAddr, stats: &Statistics) -> Self {
        Summary {
            target,
            address,
            sent: stats.sent,
            received: stats.received,
            loss_percent: stats.loss_percent(),
            min_rtt: stats.min_rtt,
            avg_rtt: stats.mean_rtt,
            max_rtt: stats.max_rtt,
            std_dev_rtt: stats.std_dev_rtt(),
        }
    }
}

/// Everything a session reports to its observers, in order.
///
/// `Finished` is always the last event and is sent exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Reply(Sample),
    Lost { sequence: u16 },
    Finished(Summary),
}
