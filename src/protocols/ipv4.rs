//! IPv4 descriptor.
//!
//! Grounded on `libparistraceroute/protocols/ipv4.c`. The C field table is
//! mostly commented out (version/ihl were never wired up there); this
//! descriptor fills that gap with the version/ihl bitfield so probe
//! construction doesn't need a special case for the one header whose
//! length is self-describing.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::OnceLock;

use crate::checksum::internet_checksum;
use crate::error::{ProbezError, Result};
use crate::field::{FieldType, FieldValue, ProtocolField};
use crate::probe::Probe;
use crate::protocol::{default_next_protocol, ProtocolDescriptor, ProtocolRegistry};

const HEADER_SIZE: usize = 20;

fn get_src_ip(segment: &[u8]) -> FieldValue {
    FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::new(segment[12], segment[13], segment[14], segment[15])))
}

fn set_src_ip(segment: &mut [u8], value: &FieldValue) -> Result<()> {
    write_addr(segment, 12, value)
}

fn get_dst_ip(segment: &[u8]) -> FieldValue {
    FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::new(segment[16], segment[17], segment[18], segment[19])))
}

fn set_dst_ip(segment: &mut [u8], value: &FieldValue) -> Result<()> {
    write_addr(segment, 16, value)
}

fn write_addr(segment: &mut [u8], offset: usize, value: &FieldValue) -> Result<()> {
    match value.as_ip_addr() {
        Some(IpAddr::V4(addr)) => {
            segment[offset..offset + 4].copy_from_slice(&addr.octets());
            Ok(())
        }
        _ => Err(ProbezError::InvalidArgument("expected an IPv4 address".into())),
    }
}

static FIELDS: &[ProtocolField] = &[
    ProtocolField::bits("version", FieldType::U8, 0, 0, 4),
    ProtocolField::bits("ihl", FieldType::U8, 0, 4, 4),
    ProtocolField::scalar("tos", FieldType::U8, 1),
    ProtocolField::scalar("length", FieldType::U16, 2),
    ProtocolField::scalar("identification", FieldType::U16, 4),
    ProtocolField::bits("flags", FieldType::U16, 6, 0, 3),
    ProtocolField::bits("fragment_offset", FieldType::U16, 6, 3, 13),
    ProtocolField::scalar("ttl", FieldType::U8, 8),
    ProtocolField::scalar("protocol", FieldType::U8, 9),
    ProtocolField::scalar("checksum", FieldType::U16, 10),
    ProtocolField::custom("src_ip", FieldType::Ipv4Addr, 12, get_src_ip, set_src_ip),
    ProtocolField::custom("dst_ip", FieldType::Ipv4Addr, 16, get_dst_ip, set_dst_ip),
];

fn write_default_header() -> Vec<u8> {
    let mut header = vec![0u8; HEADER_SIZE];
    header[0] = 0x45; // version 4, ihl 5
    header[4..6].copy_from_slice(&1u16.to_be_bytes()); // identification
    header[8] = 255; // ttl
    header[9] = 17; // protocol, overwritten once the next layer is known
    header
}

fn get_header_size(segment: Option<&[u8]>) -> usize {
    match segment {
        Some(s) if !s.is_empty() => ((s[0] & 0x0f) as usize) * 4,
        _ => HEADER_SIZE,
    }
}

fn write_checksum(segment: &mut [u8], _pseudo_header: Option<&[u8]>) -> Result<()> {
    let header_size = get_header_size(Some(segment)).min(segment.len());
    segment[10] = 0;
    segment[11] = 0;
    let csum = internet_checksum(&segment[..header_size]);
    segment[10..12].copy_from_slice(&csum.to_be_bytes());
    Ok(())
}

fn get_next_protocol(segment: &[u8], registry: &ProtocolRegistry) -> Option<&'static ProtocolDescriptor> {
    default_next_protocol(descriptor(), segment, registry)
}

fn matches(_probe: &Probe, _reply: &Probe) -> bool {
    // Matching is driven by the transport/ICMP descriptor, never by the
    // IP layer itself; see `crate::matching`.
    false
}

pub fn descriptor() -> &'static ProtocolDescriptor {
    static DESCRIPTOR: OnceLock<ProtocolDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| ProtocolDescriptor {
        name: "ipv4",
        protocol_id: 0,
        fields: FIELDS,
        write_default_header,
        get_header_size,
        write_checksum: Some(write_checksum),
        create_pseudo_header: None,
        get_next_protocol,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_has_sane_version_and_ihl() {
        let header = write_default_header();
        assert_eq!(header[0], 0x45);
        assert_eq!(get_header_size(Some(&header)), 20);
    }

    #[test]
    fn checksum_is_self_validating() {
        let mut header = write_default_header();
        header[16..20].copy_from_slice(&[127, 0, 0, 1]);
        write_checksum(&mut header, None).unwrap();
        assert_eq!(internet_checksum(&header), 0);
    }

    #[test]
    fn address_roundtrip() {
        let mut header = write_default_header();
        let field = descriptor().field("dst_ip").unwrap();
        let addr = IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8));
        field.write(&mut header, &FieldValue::IpAddr(addr)).unwrap();
        assert_eq!(field.read(&header).unwrap(), FieldValue::IpAddr(addr));
    }
}
