//! Matches echo replies to the requests that caused them.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::error::CorrelatorError;
use crate::packet::EchoReply;

/// An echo request waiting for its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Probe {
    pub sequence: u16,
    pub identifier: u16,
    pub send_time: Instant,
}

/// What became of a single probe. Produced exactly once per probe.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success {
        sequence: u16,
        rtt: Duration,
        bytes: usize,
        source: IpAddr,
    },
    Lost {
        sequence: u16,
    },
}

/// Pending probes of one session, keyed by wire sequence number.
#[derive(Debug)]
pub struct Correlator {
    identifier: u16,
    pending: HashMap<u16, Probe>,
}

impl Correlator {
    pub fn new(identifier: u16) -> Self {
        Correlator { identifier, pending: HashMap::new() }
    }

    pub fn identifier(&self) -> u16 {
        self.identifier
    }

    pub fn in_flight(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn register(&mut self, sequence: u16, send_time: Instant) -> Result<(), CorrelatorError> {
        if self.pending.contains_key(&sequence) {
            return Err(CorrelatorError::DuplicateSequence(sequence));
        }
        self.pending.insert(sequence, Probe { sequence, identifier: self.identifier, send_time });
        Ok(())
    }

    /// Removes the probe `reply` answers.
    ///
    /// Returns `None` for replies addressed to another prober, and for
    /// late or duplicate replies whose probe is no longer pending.
    pub fn resolve(&mut self, reply: &EchoReply, receive_time: Instant) -> Option<Outcome> {
        if reply.identifier != self.identifier {
            return None;
        }
        let probe = self.pending.remove(&reply.sequence)?;
        Some(Outcome::Success {
            sequence: probe.sequence,
            rtt: receive_time.saturating_duration_since(probe.send_time),
            bytes: reply.bytes,
            source: reply.source,
        })
    }

    /// Evicts every probe sent more than `timeout` before `now`.
    pub fn sweep_timeouts(&mut self, now: Instant, timeout: Duration) -> Vec<Outcome> {
        let mut expired: Vec<Probe> = self.pending.values()
            .filter(|probe| now.saturating_duration_since(probe.send_time) > timeout)
            .copied()
            .collect();
        expired.sort_by_key(|probe| probe.send_time);

        expired.into_iter()
            .map(|probe| {
                self.pending.remove(&probe.sequence);
                Outcome::Lost { sequence: probe.sequence }
            })
            .collect()
    }

    /// Gives up on a probe whose request never left the host.
    pub fn abandon(&mut self, sequence: u16) -> Option<Outcome> {
        self.pending.remove(&sequence)
            .map(|probe| Outcome::Lost { sequence: probe.sequence })
    }

    /// Marks everything still pending as lost.
    pub fn drain(&mut self) -> Vec<Outcome> {
        let mut remaining: Vec<Probe> = self.pending.drain().map(|(_, probe)| probe).collect();
        remaining.sort_by_key(|probe| probe.send_time);
        remaining.into_iter()
            .map(|probe| Outcome::Lost { sequence: probe.sequence })
            .collect()
    }
}
