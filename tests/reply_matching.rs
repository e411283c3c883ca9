//! Exercises the tag-and-match scheme `Network` relies on
//! (`network_tag_probe` in the original), without needing raw sockets:
//! the tagging step itself is pure packet manipulation, so it's
//! reproduced here directly against the public `Probe` API.

use std::net::{IpAddr, Ipv4Addr};

use probez::field::{Field, FieldValue};
use probez::matching::transport_error_matches;
use probez::probe::Probe;

fn tag_probe(probe: &mut Probe, tag: u16) {
    probe.write_payload(&tag.to_be_bytes(), 0).unwrap();
    probe.update_fields().unwrap();
    let original_checksum = probe.extract_ext(1, "checksum").unwrap().as_u64().unwrap() as u16;
    probe.set_field_ext(1, Field::u16("checksum", tag)).unwrap();
    probe.write_payload(&original_checksum.to_be_bytes(), 0).unwrap();
}

#[test]
fn tagged_probe_matches_its_quoting_icmp_error() {
    let mut probe = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
    probe.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))).unwrap();
    probe.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))).unwrap();
    probe.set_field(Field::u8("ttl", 1)).unwrap();
    tag_probe(&mut probe, 0xbeef);

    assert_eq!(probe.extract_ext(1, "checksum").unwrap(), FieldValue::U16(0xbeef));

    let mut reply = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
    reply.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))).unwrap();
    reply.set_field(Field::u8("type", 11)).unwrap();
    reply.write_payload(probe.packet.bytes(), 0).unwrap();
    reply.update_fields().unwrap();

    let dissected_reply = Probe::wrap_packet(reply.packet.clone()).unwrap();
    assert!(transport_error_matches(&probe, &dissected_reply));
}

#[test]
fn untagged_reply_does_not_match_a_different_probe() {
    let mut probe_a = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
    probe_a.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))).unwrap();
    tag_probe(&mut probe_a, 1);

    let mut probe_b = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
    probe_b.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))).unwrap();
    tag_probe(&mut probe_b, 2);

    let mut reply = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
    reply.set_field(Field::u8("type", 11)).unwrap();
    reply.write_payload(probe_a.packet.bytes(), 0).unwrap();
    reply.update_fields().unwrap();
    let dissected_reply = Probe::wrap_packet(reply.packet.clone()).unwrap();

    assert!(transport_error_matches(&probe_a, &dissected_reply));
    assert!(!transport_error_matches(&probe_b, &dissected_reply));
}
