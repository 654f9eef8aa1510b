//! Running round-trip statistics.
//!
//! Mean and variance use Welford's online algorithm, so nothing is kept per
//! sample and the variance does not suffer from cancellation.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::correlator::Outcome;

/// Point-in-time copy of the aggregated statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Statistics {
    pub sent: u64,
    pub received: u64,
    pub min_rtt: Duration,
    pub max_rtt: Duration,
    pub mean_rtt: Duration,
    /// Population variance, in seconds squared.
    pub variance_rtt: f64,
}

impl Statistics {
    pub fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 0.0;
        }
        (self.sent - self.received) as f64 / self.sent as f64 * 100.0
    }

    pub fn std_dev_rtt(&self) -> Duration {
        Duration::from_secs_f64(self.variance_rtt.max(0.0).sqrt())
    }
}

#[derive(Debug, Default)]
struct Running {
    sent: u64,
    received: u64,
    min: Option<Duration>,
    max: Option<Duration>,
    mean: f64,
    m2: f64,
}

/// Thread-safe statistics accumulator.
///
/// `update` and `snapshot` take the same lock, so a reader never sees a
/// half-applied update.
#[derive(Debug, Default)]
pub struct Aggregator {
    state: Mutex<Running>,
}

impl Aggregator {
    pub fn new() -> Self {
        Aggregator::default()
    }

    pub fn update(&self, outcome: &Outcome) {
        let mut state = self.lock();
        state.sent += 1;

        if let Outcome::Success { rtt, .. } = outcome {
            state.received += 1;
            state.min = Some(state.min.map_or(*rtt, |min| min.min(*rtt)));
            state.max = Some(state.max.map_or(*rtt, |max| max.max(*rtt)));

            let x = rtt.as_secs_f64();
            let delta = x - state.mean;
            state.mean += delta / state.received as f64;
            state.m2 += delta * (x - state.mean);
        }
    }

    pub fn snapshot(&self) -> Statistics {
        let state = self.lock();
        let variance_rtt = if state.received > 0 {
            state.m2 / state.received as f64
        } else {
            0.0
        };

        let min_rtt = state.min.unwrap_or_default();
        let max_rtt = state.max.unwrap_or_default();
        // float rounding must not push the mean outside [min, max]
        let mean_rtt = Duration::from_secs_f64(state.mean.max(0.0)).clamp(min_rtt, max_rtt);

        Statistics {
            sent: state.sent,
            received: state.received,
            min_rtt,
            max_rtt,
            mean_rtt,
            variance_rtt,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Running> {
        // counters stay consistent even if an observer panicked mid-read
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;
    use std::thread;

    fn success(sequence: u16, millis: u64) -> Outcome {
        Outcome::Success {
            sequence,
            rtt: Duration::from_millis(millis),
            bytes: 32,
            source: IpAddr::V4(Ipv4Addr::LOCALHOST),
        }
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        let stats = Aggregator::new().snapshot();
        assert_eq!(stats, Statistics::default());
        assert_eq!(stats.loss_percent(), 0.0);
    }

    #[test]
    fn tracks_min_max_mean_and_std_dev() {
        let aggregator = Aggregator::new();
        for (seq, ms) in [2, 4, 4, 4, 5, 5, 7, 9].into_iter().enumerate() {
            aggregator.update(&success(seq as u16, ms));
        }
        aggregator.update(&Outcome::Lost { sequence: 8 });
        aggregator.update(&Outcome::Lost { sequence: 9 });

        let stats = aggregator.snapshot();
        assert_eq!(stats.sent, 10);
        assert_eq!(stats.received, 8);
        assert_eq!(stats.min_rtt, Duration::from_millis(2));
        assert_eq!(stats.max_rtt, Duration::from_millis(9));
        assert!((stats.mean_rtt.as_secs_f64() - 0.005).abs() < 1e-9);
        assert!((stats.std_dev_rtt().as_secs_f64() - 0.002).abs() < 1e-9);
        assert!((stats.loss_percent() - 20.0).abs() < 1e-9);
        assert!(stats.min_rtt <= stats.mean_rtt && stats.mean_rtt <= stats.max_rtt);
    }

    #[test]
    fn all_lost_is_full_loss() {
        let aggregator = Aggregator::new();
        for seq in 0..3 {
            aggregator.update(&Outcome::Lost { sequence: seq });
        }
        let stats = aggregator.snapshot();
        assert_eq!((stats.sent, stats.received), (3, 0));
        assert_eq!(stats.loss_percent(), 100.0);
        assert_eq!(stats.std_dev_rtt(), Duration::ZERO);
    }

    #[test]
    fn stable_with_large_offset() {
        // RTTs sharing a large common offset
        let aggregator = Aggregator::new();
        for seq in 0..1000u16 {
            let ms = 10_000_000 + u64::from(seq % 2);
            aggregator.update(&success(seq, ms));
        }
        let stats = aggregator.snapshot();
        assert!((stats.std_dev_rtt().as_secs_f64() - 0.0005).abs() < 1e-6);
    }

    #[test]
    fn snapshot_never_observes_torn_update() {
        let aggregator = Arc::new(Aggregator::new());
        let writer = {
            let aggregator = Arc::clone(&aggregator);
            thread::spawn(move || {
                for seq in 0..10_000u16 {
                    aggregator.update(&success(seq, 10));
                }
            })
        };

        while !writer.is_finished() {
            let stats = aggregator.snapshot();
            assert_eq!(stats.sent, stats.received);
            if stats.received > 0 {
                assert_eq!(stats.mean_rtt, Duration::from_millis(10));
            }
        }
        writer.join().unwrap();
        assert_eq!(aggregator.snapshot().received, 10_000);
    }
}
