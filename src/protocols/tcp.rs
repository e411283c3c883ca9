//! TCP descriptor.
//!
//! Grounded on `libparistraceroute/protocols/tcp.c`: a fixed 20-byte
//! header (the original never implements variable-length TCP options
//! either, despite the comment placeholders) with the pseudo-header
//! shared with UDP. Matching a TCP reply is out of scope here — real TCP
//! probing needs a handshake-aware algorithm, which spec.md excludes —
//! so `matches` falls back to the same ICMP-error tag check UDP uses.

use std::sync::OnceLock;

use crate::checksum::internet_checksum_with_pseudo_header;
use crate::error::Result;
use crate::field::{FieldType, ProtocolField};
use crate::probe::Probe;
use crate::protocol::{default_next_protocol, ProtocolDescriptor, ProtocolRegistry};

const HEADER_SIZE: usize = 20;
pub const PROTOCOL_ID: u8 = 6;

static FIELDS: &[ProtocolField] = &[
    ProtocolField::scalar("src_port", FieldType::U16, 0),
    ProtocolField::scalar("dst_port", FieldType::U16, 2),
    ProtocolField::scalar("seq_num", FieldType::U32, 4),
    ProtocolField::scalar("ack_num", FieldType::U32, 8),
    ProtocolField::bits("data_offset", FieldType::U8, 12, 0, 4),
    ProtocolField::scalar("window", FieldType::U16, 14),
    ProtocolField::scalar("checksum", FieldType::U16, 16),
    ProtocolField::scalar("urgent_pointer", FieldType::U16, 18),
];

fn write_default_header() -> Vec<u8> {
    let mut header = vec![0u8; HEADER_SIZE];
    header[0..2].copy_from_slice(&2828u16.to_be_bytes());
    header[2..4].copy_from_slice(&2828u16.to_be_bytes());
    header[12] = 5 << 4; // data_offset = 5 words, no options
    header[14..16].copy_from_slice(&2u16.to_be_bytes());
    header
}

fn get_header_size(_segment: Option<&[u8]>) -> usize {
    HEADER_SIZE
}

fn write_checksum(segment: &mut [u8], pseudo_header: Option<&[u8]>) -> Result<()> {
    segment[16] = 0;
    segment[17] = 0;
    let csum = match pseudo_header {
        Some(psh) => internet_checksum_with_pseudo_header(psh, segment),
        None => crate::checksum::internet_checksum(segment),
    };
    segment[16..18].copy_from_slice(&csum.to_be_bytes());
    Ok(())
}

fn get_next_protocol(_segment: &[u8], _registry: &ProtocolRegistry) -> Option<&'static ProtocolDescriptor> {
    // TCP never encapsulates a named next protocol in a probe context.
    None
}

fn matches(probe: &Probe, reply: &Probe) -> bool {
    crate::matching::transport_error_matches(probe, reply)
}

pub fn descriptor() -> &'static ProtocolDescriptor {
    static DESCRIPTOR: OnceLock<ProtocolDescriptor> = OnceLock::new();
    DESCRIPTOR.get_or_init(|| ProtocolDescriptor {
        name: "tcp",
        protocol_id: PROTOCOL_ID,
        fields: FIELDS,
        write_default_header,
        get_header_size,
        write_checksum: Some(write_checksum),
        create_pseudo_header: Some(crate::protocols::udp::create_pseudo_header),
        get_next_protocol,
        matches,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_header_has_no_options() {
        let header = write_default_header();
        assert_eq!(header.len(), HEADER_SIZE);
        assert_eq!(header[12] >> 4, 5);
    }
}
