use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::correlator::Outcome;
use crate::packet::{build_payload, encode_request};
use crate::session::SessionContext;
use crate::transport::ProbeSender;

/// Tick path of the prober loop: one echo request per interval.
pub(crate) struct PacketSender<S> {
    ctx: Arc<SessionContext>,
    sender: S,
    payload: Vec<u8>,
}

impl<S: ProbeSender> PacketSender<S> {

    pub fn new(ctx: Arc<SessionContext>, sender: S) -> Self {
        let payload = build_payload(ctx.config.tracker, ctx.config.payload_size);
        PacketSender { ctx, sender, payload }
    }

    /// Sends probes until the count or deadline is reached or the session is
    /// cancelled. Returns the number of probes sent.
    pub fn run(&mut self) -> u64 {
        let started = Instant::now();
        let interval = self.ctx.config.interval;
        let mut sequence: u16 = 0;
        let mut transmitted: u64 = 0;

        loop {
            if self.ctx.cancel.is_cancelled() || self.limit_reached(transmitted, started) {
                break;
            }

            let tick = Instant::now();
            self.send_probe(sequence);
            transmitted += 1;
            sequence = sequence.wrapping_add(1);

            self.ctx.sweep(Instant::now());

            if self.ctx.cancel.is_cancelled() || self.limit_reached(transmitted, started) {
                break;
            }

            let wait = interval.saturating_sub(tick.elapsed());
            if self.ctx.cancel.wait_timeout(wait) {
                break;
            }
        }
        transmitted
    }

    fn limit_reached(&self, transmitted: u64, started: Instant) -> bool {
        let count_reached = self.ctx.config.count.is_some_and(|count| transmitted >= count);
        let deadline_passed = self.ctx.config.deadline.is_some_and(|deadline| started.elapsed() >= deadline);
        count_reached || deadline_passed
    }

    fn send_probe(&mut self, sequence: u16) {
        let icmp_buf = encode_request(self.ctx.config.identifier, sequence, &self.payload);

        // register first: the reply may beat us back from send_to
        let send_time = Instant::now();
        let registered = self.ctx.correlator().register(sequence, send_time);
        if let Err(e) = registered {
            warn!("{}, counting probe as lost", e);
            self.ctx.record(Outcome::Lost { sequence });
            return;
        }

        match self.sender.send_to(&icmp_buf, self.ctx.config.address) {
            Ok(_) => debug!("sent icmp_seq={} to {}", sequence, self.ctx.config.address),
            Err(e) => {
                warn!("failed to send icmp_seq={}: {}", sequence, e);
                let abandoned = self.ctx.correlator().abandon(sequence);
                if let Some(outcome) = abandoned {
                    self.ctx.record(outcome);
                }
            }
        }
    }
}
