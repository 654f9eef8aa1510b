//! Live metric values and their Prometheus text exposition.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::{Mutex, MutexGuard};

use crate::error::SinkError;
use crate::stats::Statistics;

pub const RTT_GAUGE_NAME: &str = "ping_rtt";
pub const RTT_GAUGE_HELP: &str = "Historical ping RTTs over time (ms)";

/// Receives the round-trip time of every resolved probe.
pub trait MetricsSink: Send + Sync {
    fn set(&self, target: &str, value: f64) -> Result<(), SinkError>;
}

/// The `ping_rtt` gauge vector, labelled by target and by the host running
/// the exporter.
#[derive(Debug)]
pub struct RttGauge {
    hostname: String,
    values: Mutex<BTreeMap<String, f64>>,
}

impl RttGauge {
    pub fn new(hostname: impl Into<String>) -> Self {
        RttGauge { hostname: hostname.into(), values: Mutex::new(BTreeMap::new()) }
    }

    pub fn get(&self, target: &str) -> Option<f64> {
        self.lock().get(target).copied()
    }

    pub fn render(&self, out: &mut String) {
        let values = self.lock();
        write_header(out, RTT_GAUGE_NAME, RTT_GAUGE_HELP);
        for (target, value) in values.iter() {
            let _ = writeln!(
                out,
                "{}{{hostname=\"{}\",targetHost=\"{}\"}} {}",
                RTT_GAUGE_NAME,
                escape_label(&self.hostname),
                escape_label(target),
                value
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<String, f64>> {
        self.values.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MetricsSink for RttGauge {
    fn set(&self, target: &str, value: f64) -> Result<(), SinkError> {
        if !value.is_finite() {
            return Err(SinkError(format!("non-finite sample {} for {}", value, target)));
        }
        self.lock().insert(target.to_string(), value);
        Ok(())
    }
}

/// Renders a statistics snapshot as one gauge per field.
pub fn render_statistics(out: &mut String, target: &str, hostname: &str, stats: &Statistics) {
    let millis = |d: std::time::Duration| d.as_nanos() as f64 / 1e6;
    let series = [
        ("ping_packets_sent", "Probes resolved as replied or lost", stats.sent as f64),
        ("ping_packets_received", "Probes answered by the target", stats.received as f64),
        ("ping_packet_loss_percent", "Percentage of probes lost", stats.loss_percent()),
        ("ping_rtt_min_ms", "Minimum RTT (ms)", millis(stats.min_rtt)),
        ("ping_rtt_avg_ms", "Mean RTT (ms)", millis(stats.mean_rtt)),
        ("ping_rtt_max_ms", "Maximum RTT (ms)", millis(stats.max_rtt)),
        ("ping_rtt_stddev_ms", "RTT standard deviation (ms)", millis(stats.std_dev_rtt())),
    ];

    for (name, help, value) in series {
        write_header(out, name, help);
        let _ = writeln!(
            out,
            "{}{{hostname=\"{}\",targetHost=\"{}\"}} {}",
            name,
            escape_label(hostname),
            escape_label(target),
            value
        );
    }
}

fn write_header(out: &mut String, name: &str, help: &str) {
    let _ = writeln!(out, "# HELP {} {}", name, help);
    let _ = writeln!(out, "# TYPE {} gauge", name);
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}
