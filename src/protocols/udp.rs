//! UDP descriptor.
//!
//! Grounded on `libparistraceroute/protocols/udp.c`: fixed 8-byte header,
//! checksum computed over an IPv4/IPv6 pseudo-header followed by the UDP
//! segment. `create_pseudo_header` branches on the IP version byte of
//! whatever segment precedes this layer, exactly as `udp_write_checksum`
//! does by calling into `udp_create_psh_ipv4`/`create_psh_ipv6`.

use std::sync::OnceLock;

use crate::checksum::internet_checksum_with_pseudo_header;
use crate::error::Result;
use crate::field::{FieldType, ProtocolField};
use crate::probe::Probe;
use crate::protocol::{default_next_protocol, ProtocolDescriptor, ProtocolRegistry};

const HEADER_SIZE: usize = 8;
pub const PROTOCOL_ID: u8 = 17;

static FIELDS: &[ProtocolField] = &[
    ProtocolField::scalar("src_port", FieldType::U16, 0),
    ProtocolField::scalar("dst_port", FieldType::U16, 2),
    ProtocolField::scalar("length", FieldType::U16, 4),
    ProtocolField::scalar("checksum", FieldType::U16, 6),
];

fn write_default_header() -> Vec<u8> {
    vec![0u8; HEADER_SIZE]
}

fn get_header_size(_segment: Option<&[u8]>) -> usize {
    HEADER_SIZE
}

fn write_checksum(segment: &mut [u8], pseudo_header: Option<&[u8]>) -> Result<()> {
    segment[6] = 0;
    segment[7] = 0;
    let csum = match pseudo_header {
        Some(psh) => internet_checksum_with_pseudo_header(psh, segment),
        None => crate::checksum::internet_checksum(segment),
    };
    segment[6..8].copy_from_slice(&csum.to_be_bytes());
    Ok(())
}

/// Builds the 12-byte IPv4 or 40-byte IPv6 pseudo-header from whatever IP
/// layer immediately precedes this one. Unlike the C original, the IPv6
/// size field is the payload length as-is (RFC 8200 §8.1), not
/// payload-length-minus-40; the original's ICMPv6 path silently patched
/// that subtraction back out, which only this crate's uniform treatment
/// makes unnecessary.
pub fn create_pseudo_header(ip_segment: &[u8]) -> Vec<u8> {
    match ip_segment.first().map(|b| b >> 4) {
        Some(4) => ipv4_pseudo_header(ip_segment),
        Some(6) => ipv6_pseudo_header(ip_segment),
        _ => Vec::new(),
    }
}

fn ipv4_pseudo_header(ip_segment: &[u8]) -> Vec<u8> {
    let ihl = (ip_segment[0] & 0x0f) as u16 * 4;
    let tot_len = u16::from_be_bytes([ip_segment[2], ip_segment[3]]);
    let protocol = ip_segment[9];
    let size = tot_len.saturating_sub(ihl);
    let mut psh = Vec::with_capacity(12);
    psh.extend_from_slice(&ip_segment[12..16]);
    psh.extend_from_slice(&ip_segment[16..20]);
    psh.push(0);
    psh.push(protocol);
    psh.extend_from_slice(&size.to_be_bytes());
    psh
}

fn ipv6_pseudo_header(ip_segment: &[u8]) -> Vec<u8> {
    let payload_length = u16::from_be_bytes([ip_segment[4], ip_segment[5]]);
    let next_header = ip_segment[6];
    let mut psh = Vec::with_capacity(40);
    psh.extend_from_slice(&ip_segment[8..24]);
    psh.extend_from_slice(&ip_segment[24..40]);
    psh.extend_from_slice(&(payload_length as u32).to_be_bytes());
    psh.extend_from_slice(&[0, 0, 0]);
    psh.push(next_header);
    psh
}

fn get_next_protocol(segment: &[u8], registry: &ProtocolRegistry) -> Option<&'static ProtocolDescriptor> {
    default_next_protocol(descriptor(), segment, registry)
}

fn matches(probe: &Probe, reply: &Probe) -> bool {
    crate::matching::transport_error_matches(probe, reply)
}

pub fn descriptor() -> &'static ProtocolDescriptor {
    static DESCRIPTOR: OnceLock<ProtocolDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| ProtocolDescriptor {
        name: "udp",
        protocol_id: PROTOCOL_ID,
        fields: FIELDS,
        write_default_header,
        get_header_size,
        write_checksum: Some(write_checksum),
        create_pseudo_header: Some(create_pseudo_header),
        get_next_protocol,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::ipv4;

    #[test]
    fn checksum_round_trips_with_ipv4_pseudo_header() {
        let mut ip_header = (ipv4::descriptor().write_default_header)();
        ip_header[9] = PROTOCOL_ID;
        ip_header[2..4].copy_from_slice(&28u16.to_be_bytes());
        ip_header[12..16].copy_from_slice(&[10, 0, 0, 1]);
        ip_header[16..20].copy_from_slice(&[10, 0, 0, 2]);

        let mut udp_segment = vec![0u8; 8];
        udp_segment[0..2].copy_from_slice(&53u16.to_be_bytes());
        udp_segment[4..6].copy_from_slice(&8u16.to_be_bytes());

        let psh = create_pseudo_header(&ip_header);
        write_checksum(&mut udp_segment, Some(&psh)).unwrap();

        let verify_psh = create_pseudo_header(&ip_header);
        assert_eq!(internet_checksum_with_pseudo_header(&verify_psh, &udp_segment), 0);
    }
}
