use std::net::IpAddr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use std::{io, thread};

use tracing::{debug, warn};

use crate::packet::{carries_tracker, decode_reply};
use crate::session::SessionContext;
use crate::transport::ReplyReceiver;

/// Receive path of the prober loop.
pub(crate) struct PacketListener<R> {
    ctx: Arc<SessionContext>,
    receiver: R,
}

impl<R: ReplyReceiver + 'static> PacketListener<R> {

    pub fn start(ctx: Arc<SessionContext>, receiver: R) -> io::Result<JoinHandle<()>> {
        let mut packet_listener = PacketListener { ctx, receiver };
        thread::Builder::new()
            .name("ping-listener".to_string())
            .spawn(move || packet_listener.run())
    }

    fn run(&mut self) {
        let poll = self.ctx.config.receive_poll();
        while self.ctx.is_receiving() {
            match self.receiver.recv_timeout(poll) {
                Ok(Some((packet_data, source))) => self.handle_packet(&packet_data, source, Instant::now()),
                Ok(None) => {}
                Err(e) => {
                    warn!("unable to receive packet: {}", e);
                    thread::sleep(poll);
                }
            }
        }
        debug!("receive path stopped");
    }

    fn handle_packet(&self, packet_data: &[u8], source: IpAddr, receive_time: Instant) {
        let reply = match decode_reply(packet_data, source) {
            Ok(reply) => reply,
            Err(e) => {
                debug!("ignoring packet from {}: {}", source, e);
                return;
            }
        };

        if reply.identifier != self.ctx.config.identifier {
            // ICMP reply for a different app / source, ignore
            return;
        }
        let config = &self.ctx.config;
        if !carries_tracker(&reply.payload, config.tracker, config.payload_size) {
            debug!("ignoring icmp_seq={} from {}: tracker mismatch", reply.sequence, source);
            return;
        }

        let resolved = self.ctx.correlator().resolve(&reply, receive_time);
        match resolved {
            Some(outcome) => self.ctx.record(outcome),
            None => debug!("late or duplicate reply icmp_seq={} from {}", reply.sequence, source),
        }
    }
}
