//! ICMP echo request/reply codec.

use std::net::IpAddr;

use pnet::packet::Packet;
use pnet::packet::icmp::echo_reply::{EchoReplyPacket, MutableEchoReplyPacket};
use pnet::packet::icmp::echo_request::{EchoRequestPacket, MutableEchoRequestPacket};
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpTypes, checksum};
use pnet::packet::util;

use crate::error::DecodeError;

/// Largest payload that still fits a single IPv4 datagram.
pub const MAX_PAYLOAD_SIZE: usize = 65507 - ECHO_HEADER_SIZE;

/// Type, code, checksum, identifier, sequence.
pub const ECHO_HEADER_SIZE: usize = 8;

/// Leading payload bytes carrying the session tracker.
pub const TRACKER_SIZE: usize = 8;

/// A decoded echo reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EchoReply {
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
    pub source: IpAddr,
    /// Length of the whole ICMP message.
    pub bytes: usize,
}

/// Builds an echo request with a valid checksum.
pub fn encode_request(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; EchoRequestPacket::minimum_packet_size() + payload.len()];
    if let Some(mut echo_packet) = MutableEchoRequestPacket::new(&mut buf) {
        echo_packet.set_icmp_type(IcmpTypes::EchoRequest);
        echo_packet.set_icmp_code(IcmpCode::new(0));
        echo_packet.set_identifier(identifier);
        echo_packet.set_sequence_number(sequence);
        echo_packet.set_payload(payload);

        let echo_checksum = util::checksum(echo_packet.packet(), 1);
        echo_packet.set_checksum(echo_checksum);
    }
    buf
}

/// Builds the echo reply a peer would answer `encode_request` with.
pub fn encode_reply(identifier: u16, sequence: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = vec![0u8; EchoReplyPacket::minimum_packet_size() + payload.len()];
    if let Some(mut erp) = MutableEchoReplyPacket::new(&mut buf) {
        erp.set_icmp_type(IcmpTypes::EchoReply);
        erp.set_icmp_code(IcmpCode::new(0));
        erp.set_identifier(identifier);
        erp.set_sequence_number(sequence);
        erp.set_payload(payload);

        let reply_checksum = util::checksum(erp.packet(), 1);
        erp.set_checksum(reply_checksum);
    }
    buf
}

/// Parses an ICMP message received from `source`.
///
/// Only well-formed echo replies are accepted; the identifier is not checked
/// here since the channel also carries other processes' traffic.
pub fn decode_reply(bytes: &[u8], source: IpAddr) -> Result<EchoReply, DecodeError> {
    let icmp_packet = IcmpPacket::new(bytes).ok_or(DecodeError::Truncated(bytes.len()))?;

    if icmp_packet.get_icmp_type() != IcmpTypes::EchoReply {
        return Err(DecodeError::NotEchoReply(icmp_packet.get_icmp_type().0));
    }

    let expected = checksum(&icmp_packet);
    let actual = icmp_packet.get_checksum();
    if expected != actual {
        return Err(DecodeError::BadChecksum { expected, actual });
    }

    let erp = EchoReplyPacket::new(bytes).ok_or(DecodeError::Truncated(bytes.len()))?;
    Ok(EchoReply {
        identifier: erp.get_identifier(),
        sequence: erp.get_sequence_number(),
        payload: erp.payload().to_vec(),
        source,
        bytes: bytes.len(),
    })
}

/// Echo payload of `size` bytes: the tracker token, then zero padding.
///
/// Payloads shorter than the tracker carry a truncated token.
pub fn build_payload(tracker: u64, size: usize) -> Vec<u8> {
    let mut payload = vec![0u8; size];
    let token = tracker.to_be_bytes();
    let n = size.min(TRACKER_SIZE);
    payload[..n].copy_from_slice(&token[..n]);
    payload
}

/// Whether an echoed payload starts with the token [`build_payload`] put
/// into a request of `payload_size` bytes.
pub fn carries_tracker(payload: &[u8], tracker: u64, payload_size: usize) -> bool {
    let n = payload_size.min(TRACKER_SIZE);
    payload.len() >= n && payload[..n] == tracker.to_be_bytes()[..n]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const SOURCE: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 7));

    #[test]
    fn request_has_echo_header_and_valid_checksum() {
        let pkt = encode_request(0x1234, 7, b"abcd");
        assert_eq!(pkt.len(), ECHO_HEADER_SIZE + 4);
        assert_eq!(pkt[0], 8);
        assert_eq!(pkt[1], 0);
        assert_eq!(&pkt[4..6], &[0x12, 0x34]);
        assert_eq!(&pkt[6..8], &[0, 7]);

        let icmp = IcmpPacket::new(&pkt).unwrap();
        assert_eq!(checksum(&icmp), icmp.get_checksum());
    }

    #[test]
    fn reply_recovers_identifier_and_sequence() {
        let payload = build_payload(0xdead_beef, 24);
        let request = encode_request(4242, 513, &payload);
        let reply = encode_reply(4242, 513, &request[ECHO_HEADER_SIZE..]);

        let decoded = decode_reply(&reply, SOURCE).unwrap();
        assert_eq!(decoded.identifier, 4242);
        assert_eq!(decoded.sequence, 513);
        assert_eq!(decoded.payload, payload);
        assert_eq!(decoded.source, SOURCE);
        assert_eq!(decoded.bytes, ECHO_HEADER_SIZE + 24);
    }

    #[test]
    fn rejects_echo_request() {
        let request = encode_request(1, 1, &[]);
        assert_eq!(decode_reply(&request, SOURCE), Err(DecodeError::NotEchoReply(8)));
    }

    #[test]
    fn rejects_corrupted_checksum() {
        let mut reply = encode_reply(1, 2, b"payload!");
        reply[10] ^= 0xff;
        assert!(matches!(
            decode_reply(&reply, SOURCE),
            Err(DecodeError::BadChecksum { .. })
        ));
    }

    #[test]
    fn rejects_truncated_packet() {
        assert_eq!(decode_reply(&[0, 0, 0], SOURCE), Err(DecodeError::Truncated(3)));
    }

    #[test]
    fn payload_carries_tracker() {
        let payload = build_payload(0x0102_0304_0506_0708, 12);
        assert_eq!(payload, [1, 2, 3, 4, 5, 6, 7, 8, 0, 0, 0, 0]);
        assert_eq!(build_payload(0x0102_0304_0506_0708, 3), [1, 2, 3]);
    }

    #[test]
    fn tracker_must_match_echoed_payload() {
        let tracker = 0x0102_0304_0506_0708;
        assert!(carries_tracker(&build_payload(tracker, 24), tracker, 24));
        assert!(carries_tracker(&build_payload(tracker, 3), tracker, 3));
        assert!(carries_tracker(&[], tracker, 0));

        assert!(!carries_tracker(&[0xAA; 24], tracker, 24));
        assert!(!carries_tracker(&build_payload(tracker + 1, 24), tracker, 24));
        // echo cut short before the end of the token
        assert!(!carries_tracker(&[1, 2, 3], tracker, 24));
    }

    #[test]
    fn largest_payload_decodes_whole() {
        let mut payload = build_payload(42, MAX_PAYLOAD_SIZE);
        if let Some(last) = payload.last_mut() {
            *last = 0x5a;
        }
        let reply = encode_reply(9, 9, &payload);

        let decoded = decode_reply(&reply, SOURCE).unwrap();
        assert_eq!(decoded.bytes, ECHO_HEADER_SIZE + MAX_PAYLOAD_SIZE);
        assert_eq!(decoded.payload.last(), Some(&0x5a));
    }
}
