//! Raw ICMP channel.
//!
//! The channel is split into a sending and a receiving half so the tick and
//! receive paths of a session never share a handle.

use std::io;
use std::net::IpAddr;
use std::time::Duration;

use pnet::packet::Packet;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::transport::TransportChannelType::Layer4;
use pnet::transport::TransportProtocol::Ipv4;
use pnet::transport::{TransportReceiver, TransportSender, icmp_packet_iter, transport_channel};

use crate::packet::ECHO_HEADER_SIZE;

const MIN_CHANNEL_BUFFER_SIZE: usize = 4096;

/// IPv4 header with the largest possible options.
const MAX_IPV4_HEADER_SIZE: usize = 60;

/// Receive buffer that holds a whole echo reply carrying `payload_size`
/// bytes, IP header included. Reads longer than the buffer are truncated.
pub fn receive_buffer_size(payload_size: usize) -> usize {
    (MAX_IPV4_HEADER_SIZE + ECHO_HEADER_SIZE + payload_size).max(MIN_CHANNEL_BUFFER_SIZE)
}

pub trait ProbeSender: Send {
    /// Sends an encoded ICMP message to `destination`.
    fn send_to(&mut self, packet: &[u8], destination: IpAddr) -> io::Result<usize>;
}

pub trait ReplyReceiver: Send {
    /// Waits at most `timeout` for the next ICMP message.
    ///
    /// Returns the ICMP bytes (without IP header) and their source, or
    /// `None` if nothing arrived in time.
    fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<(Vec<u8>, IpAddr)>>;
}

/// Opens a raw IPv4 ICMP channel sized for replies of `payload_size` bytes.
/// Needs CAP_NET_RAW or root.
pub fn open_icmp_channel(payload_size: usize) -> io::Result<(IcmpSender, IcmpReceiver)> {
    let buffer_size = receive_buffer_size(payload_size);
    let (tx, rx) = transport_channel(buffer_size, Layer4(Ipv4(IpNextHeaderProtocols::Icmp)))?;
    Ok((IcmpSender { tx }, IcmpReceiver { rx }))
}

pub struct IcmpSender {
    tx: TransportSender,
}

impl ProbeSender for IcmpSender {
    fn send_to(&mut self, packet: &[u8], destination: IpAddr) -> io::Result<usize> {
        let icmp_packet = IcmpPacket::new(packet)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "packet shorter than an ICMP header"))?;
        self.tx.send_to(icmp_packet, destination)
    }
}

pub struct IcmpReceiver {
    rx: TransportReceiver,
}

impl ReplyReceiver for IcmpReceiver {
    fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<(Vec<u8>, IpAddr)>> {
        let mut iter = icmp_packet_iter(&mut self.rx);
        match iter.next_with_timeout(timeout)? {
            Some((icmp_packet, source)) => Ok(Some((icmp_packet.packet().to_vec(), source))),
            None => Ok(None),
        }
    }
}
