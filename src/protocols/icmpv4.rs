//! ICMPv4 descriptor.
//!
//! Grounded on `libparistraceroute/protocols/icmpv4.c`: an 8-byte header
//! (type, code, checksum, then a 4-byte union the original calls `body`;
//! this crate additionally exposes that union's two common
//! interpretations — echo `identifier`/`sequence` — as aliasing fields,
//! matching how `algorithms/ping.c` reads them). No pseudo-header; the
//! checksum covers the layer's own segment, matching
//! `icmpv4_write_checksum`'s rejection of a non-NULL pseudo-header.

use std::sync::OnceLock;

use crate::checksum::internet_checksum;
use crate::error::{ProbezError, Result};
use crate::field::{FieldType, ProtocolField};
use crate::probe::Probe;
use crate::protocol::{ProtocolDescriptor, ProtocolRegistry};

const HEADER_SIZE: usize = 8;
pub const PROTOCOL_ID: u8 = 1;

pub const TYPE_ECHO_REPLY: u8 = 0;
pub const TYPE_DEST_UNREACHABLE: u8 = 3;
pub const TYPE_ECHO_REQUEST: u8 = 8;
pub const TYPE_TIME_EXCEEDED: u8 = 11;

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
    if pseudo_header.is_some() {
        return Err(ProbezError::InvalidArgument(
            "icmpv4 does not use a pseudo-header".into(),
        ));
    }
    segment[2] = 0;
    segment[3] = 0;
    let csum = internet_checksum(segment);
    segment[2..4].copy_from_slice(&csum.to_be_bytes());
    Ok(())
}

/// Only Destination-Unreachable and Time-Exceeded carry a quoted copy of
/// the original IP header; an echo reply's trailing bytes are an opaque
/// payload echo, not a nested protocol.
fn get_next_protocol(segment: &[u8], registry: &ProtocolRegistry) -> Option<&'static ProtocolDescriptor> {
    let kind = *segment.first()?;
    if kind == TYPE_DEST_UNREACHABLE || kind == TYPE_TIME_EXCEEDED {
        registry.by_name("ipv4").ok()
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
        name: "icmpv4",
        protocol_id: PROTOCOL_ID,
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
    fn checksum_of_echo_request_is_self_validating() {
        let mut header = write_default_header();
        header[4..6].copy_from_slice(&42u16.to_be_bytes());
        header[6..8].copy_from_slice(&1u16.to_be_bytes());
        write_checksum(&mut header, None).unwrap();
        assert_eq!(internet_checksum(&header), 0);
    }

    #[test]
    fn only_error_types_descend_into_quoted_ip_header() {
        let registry = ProtocolRegistry::global();
        let mut header = write_default_header();
        assert!(get_next_protocol(&header, registry).is_none());
        header[0] = TYPE_TIME_EXCEEDED;
        assert_eq!(get_next_protocol(&header, registry).unwrap().name, "ipv4");
    }
}
