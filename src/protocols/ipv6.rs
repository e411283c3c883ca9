//! IPv6 descriptor.
//!
//! Grounded on `libparistraceroute/protocols/ipv6.c`. Extension headers
//! (hop-by-hop, routing, fragment) are out of scope, same as the
//! original's field table; only the fixed 40-byte header is modeled.
//! `next_header` is exposed twice — once under its own name, once as
//! `protocol` — because [`crate::protocol::default_next_protocol`] always
//! looks for a field literally named `protocol`.

use std::net::{IpAddr, Ipv6Addr};
use std::sync::OnceLock;

use crate::error::{ProbezError, Result};
use crate::field::{FieldType, FieldValue, ProtocolField};
use crate::probe::Probe;
use crate::protocol::{default_next_protocol, ProtocolDescriptor, ProtocolRegistry};

const HEADER_SIZE: usize = 40;

fn get_src_ip(segment: &[u8]) -> FieldValue {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&segment[8..24]);
    FieldValue::IpAddr(IpAddr::V6(Ipv6Addr::from(octets)))
}

fn set_src_ip(segment: &mut [u8], value: &FieldValue) -> Result<()> {
    write_addr(segment, 8, value)
}

fn get_dst_ip(segment: &[u8]) -> FieldValue {
    let mut octets = [0u8; 16];
    octets.copy_from_slice(&segment[24..40]);
    FieldValue::IpAddr(IpAddr::V6(Ipv6Addr::from(octets)))
}

fn set_dst_ip(segment: &mut [u8], value: &FieldValue) -> Result<()> {
    write_addr(segment, 24, value)
}

fn write_addr(segment: &mut [u8], offset: usize, value: &FieldValue) -> Result<()> {
    match value.as_ip_addr() {
        Some(IpAddr::V6(addr)) => {
            segment[offset..offset + 16].copy_from_slice(&addr.octets());
            Ok(())
        }
        _ => Err(ProbezError::InvalidArgument("expected an IPv6 address".into())),
    }
}

static FIELDS: &[ProtocolField] = &[
    ProtocolField::bits("version", FieldType::U8, 0, 0, 4),
    // Low 16 bits of the 20-bit flow label; matches the original's
    // deliberately imprecise "close enough for load-balancer hashing" cut.
    ProtocolField::scalar("flow_id", FieldType::U16, 2),
    ProtocolField::scalar("length", FieldType::U16, 4),
    ProtocolField::scalar("next_header", FieldType::U8, 6),
    ProtocolField::scalar("protocol", FieldType::U8, 6),
    ProtocolField::scalar("ttl", FieldType::U8, 7),
    ProtocolField::custom("src_ip", FieldType::Ipv6Addr, 8, get_src_ip, set_src_ip),
    ProtocolField::custom("dst_ip", FieldType::Ipv6Addr, 24, get_dst_ip, set_dst_ip),
];

fn write_default_header() -> Vec<u8> {
    let mut header = vec![0u8; HEADER_SIZE];
    header[0] = 0x60; // version 6
    header[6] = 17; // next_header, overwritten once the next layer is known
    header[7] = 64; // hop limit
    header
}

fn get_header_size(_segment: Option<&[u8]>) -> usize {
    HEADER_SIZE
}

fn get_next_protocol(segment: &[u8], registry: &ProtocolRegistry) -> Option<&'static ProtocolDescriptor> {
    default_next_protocol(descriptor(), segment, registry)
}

fn matches(_probe: &Probe, _reply: &Probe) -> bool {
    false
}

pub fn descriptor() -> &'static ProtocolDescriptor {
    static DESCRIPTOR: OnceLock<ProtocolDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| ProtocolDescriptor {
        name: "ipv6",
        protocol_id: 0,
        fields: FIELDS,
        write_default_header,
        get_header_size,
        write_checksum: None,
        create_pseudo_header: None,
        get_next_protocol,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_is_ipv6_with_udp_next_header() {
        let header = write_default_header();
        assert_eq!(header[0] >> 4, 6);
        assert_eq!(header[6], 17);
    }

    #[test]
    fn address_roundtrip() {
        let mut header = write_default_header();
        let field = descriptor().field("dst_ip").unwrap();
        let addr = IpAddr::V6(Ipv6Addr::LOCALHOST);
        field.write(&mut header, &FieldValue::IpAddr(addr)).unwrap();
        assert_eq!(field.read(&header).unwrap(), FieldValue::IpAddr(addr));
    }
}
