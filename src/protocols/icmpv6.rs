//! ICMPv6 descriptor.
//!
//! Grounded on `libparistraceroute/protocols/icmpv6.c`: same 8-byte shape
//! as ICMPv4, but the checksum always requires the IPv6 pseudo-header
//! (RFC 4443 §2.3), built by the same dispatcher UDP/TCP use since it's
//! just the preceding IP layer's bytes.

use std::sync::OnceLock;

use crate::checksum::internet_checksum_with_pseudo_header;
use crate::error::{ProbezError, Result};
use crate::field::{FieldType, ProtocolField};
use crate::probe::Probe;
use crate::protocol::{ProtocolDescriptor, ProtocolRegistry};
use crate::protocols::udp::create_pseudo_header;

const HEADER_SIZE: usize = 8;
pub const PROTOCOL_ID: u8 = 58;

pub const TYPE_DEST_UNREACHABLE: u8 = 1;
pub const TYPE_TIME_EXCEEDED: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 128;
pub const TYPE_ECHO_REPLY: u8 = 129;

static FIELDS: &[ProtocolField] = &[
    ProtocolField::scalar("type", FieldType::U8, 0),
    ProtocolField::scalar("code", FieldType::U8, 1),
    ProtocolField::scalar("checksum", FieldType::U16, 2),
    ProtocolField::scalar("body", FieldType::U32, 4),
    ProtocolField::scalar("identifier", FieldType::U16, 4),
    ProtocolField::scalar("sequence", FieldType::U16, 6),
];

fn write_default_header() -> Vec<u8> {
    let mut header = vec![0u8; HEADER_SIZE];
    header[0] = TYPE_ECHO_REQUEST;
    header
}

fn get_header_size(_segment: Option<&[u8]>) -> usize {
    HEADER_SIZE
}

fn write_checksum(segment: &mut [u8], pseudo_header: Option<&[u8]>) -> Result<()> {
    let psh = pseudo_header.ok_or_else(|| {
        ProbezError::InvalidArgument("icmpv6 checksum requires the IPv6 pseudo-header".into())
    })?;
    segment[2] = 0;
    segment[3] = 0;
    let csum = internet_checksum_with_pseudo_header(psh, segment);
    segment[2..4].copy_from_slice(&csum.to_be_bytes());
    Ok(())
}

fn get_next_protocol(segment: &[u8], registry: &ProtocolRegistry) -> Option<&'static ProtocolDescriptor> {
    let kind = *segment.first()?;
    if kind == TYPE_DEST_UNREACHABLE || kind == TYPE_TIME_EXCEEDED {
        registry.by_name("ipv6").ok()
    } else {
        None
    }
}

fn matches(probe: &Probe, reply: &Probe) -> bool {
    crate::matching::icmp_matches(probe, reply)
}

pub fn descriptor() -> &'static ProtocolDescriptor {
    static DESCRIPTOR: OnceLock<ProtocolDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| ProtocolDescriptor {
        name: "icmpv6",
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
    use crate::protocols::ipv6;

    #[test]
    fn checksum_round_trips_with_ipv6_pseudo_header() {
        let mut ip_header = (ipv6::descriptor().write_default_header)();
        ip_header[6] = PROTOCOL_ID;
        ip_header[4..6].copy_from_slice(&8u16.to_be_bytes());
        ip_header[8..24].copy_from_slice(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1]);
        ip_header[24..40].copy_from_slice(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);

        let mut icmp_segment = write_default_header();
        let psh = create_pseudo_header(&ip_header);
        write_checksum(&mut icmp_segment, Some(&psh)).unwrap();

        let verify_psh = create_pseudo_header(&ip_header);
        assert_eq!(internet_checksum_with_pseudo_header(&verify_psh, &icmp_segment), 0);
    }
}
