//! Cross-module round-trip checks that don't need raw-socket privileges:
//! forge a probe end to end, then dissect the wire bytes back and make
//! sure the two views agree.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use probez::field::{Field, FieldValue};
use probez::probe::Probe;

#[test]
fn ipv4_udp_probe_forges_a_checksum_valid_packet() {
    let mut probe = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
    probe.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)))).unwrap();
    probe.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)))).unwrap();
    probe.set_field(Field::u16("dst_port", 33434)).unwrap();
    probe.set_field(Field::u16("src_port", 54321)).unwrap();
    probe.write_payload(b"paristraceroute", 0).unwrap();
    probe.update_fields().unwrap();

    let ip_header = &probe.packet.bytes()[0..20];
    assert_eq!(probez::checksum::internet_checksum(ip_header), 0);

    let dissected = Probe::wrap_packet(probe.packet.clone()).unwrap();
    assert_eq!(dissected.layers.len(), 3);
    assert_eq!(dissected.extract_ext(0, "dst_ip").unwrap(), FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))));
    assert_eq!(dissected.extract_ext(1, "dst_port").unwrap(), FieldValue::U16(33434));
    assert_eq!(dissected.extract_ext(1, "src_port").unwrap(), FieldValue::U16(54321));
}

#[test]
fn ipv6_udp_probe_uses_rfc8200_pseudo_header_length() {
    let mut probe = Probe::set_protocols(&["ipv6", "udp"]).unwrap();
    let src = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
    let dst = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2));
    probe.set_field(Field::ip_addr("src_ip", src)).unwrap();
    probe.set_field(Field::ip_addr("dst_ip", dst)).unwrap();
    probe.write_payload(&[1, 2, 3, 4, 5, 6, 7, 8], 0).unwrap();
    probe.update_fields().unwrap();

    // UDP checksum must validate against its own pseudo-header once the
    // full packet (including payload) is in place.
    let ip_segment = &probe.packet.bytes()[0..probe.layers[1].offset];
    let udp_segment = &probe.packet.bytes()[probe.layers[1].offset..];
    let pseudo_header = probez::protocols::udp::create_pseudo_header(ip_segment);
    assert_eq!(probez::checksum::internet_checksum_with_pseudo_header(&pseudo_header, udp_segment), 0);
}

#[test]
fn traceroute_quoted_reply_round_trips_through_dissection() {
    // Build an inner UDP-over-IPv4 probe (the kind a traceroute send).
    let mut inner = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
    inner.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))).unwrap();
    inner.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))).unwrap();
    inner.set_field(Field::u8("ttl", 1)).unwrap();
    inner.update_fields().unwrap();

    // A router's ICMP Time-Exceeded reply quotes the original IP+UDP
    // header (8 bytes of UDP is plenty since only the first 8 matter).
    let mut reply_bytes = Vec::new();
    let mut outer = Probe::set_protocols(&["ipv4", "icmpv4"]).unwrap();
    outer.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))).unwrap();
    outer.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))).unwrap();
    outer.set_field(Field::u8("type", 11)).unwrap(); // time exceeded
    outer.write_payload(inner.packet.bytes(), 0).unwrap();
    outer.update_fields().unwrap();
    reply_bytes.extend_from_slice(outer.packet.bytes());

    let dissected = Probe::wrap_packet(probez::packet::Packet::from_bytes(reply_bytes)).unwrap();
    assert_eq!(dissected.layers.len(), 5); // ipv4, icmpv4, quoted ipv4, quoted udp, payload
    assert_eq!(dissected.layers[2].protocol.unwrap().name, "ipv4");
    assert_eq!(dissected.layers[3].protocol.unwrap().name, "udp");
    assert_eq!(
        dissected.extract_ext(2, "dst_ip").unwrap(),
        FieldValue::IpAddr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 9)))
    );
}
