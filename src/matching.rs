//! Reply-to-probe matching predicates shared by the ICMP/UDP/TCP
//! descriptors' `matches` callback.
//!
//! Grounded on spec.md's description of `network.c`'s reply dispatch:
//! an echo reply matches on (type, identifier, sequence); any other
//! reply must be an ICMP error quoting the original probe, identified by
//! comparing the tag [`crate::network`] embedded in the probe's checksum
//! field against the checksum the error quotes back.

use crate::probe::Probe;
use crate::protocols::{icmpv4, icmpv6};

/// Finds the depth of `reply`'s ICMP layer. This is 1 for an IPv4 reply
/// (the kernel hands back the IPv4 header the socket captured along with
/// it) but 0 for an IPv6 reply, since a raw ICMPv6 socket never includes
/// the IPv6 header the kernel already consumed — see
/// [`crate::probe::Probe::wrap_packet_from`].
pub(crate) fn icmp_layer_index(reply: &Probe) -> Option<usize> {
    reply
        .layers
        .iter()
        .position(|l| matches!(l.protocol.map(|d| d.name), Some("icmpv4") | Some("icmpv6")))
}

fn is_echo_reply(probe_type: u8, reply_type: u8) -> bool {
    (probe_type == icmpv4::TYPE_ECHO_REQUEST && reply_type == icmpv4::TYPE_ECHO_REPLY)
        || (probe_type == icmpv6::TYPE_ECHO_REQUEST && reply_type == icmpv6::TYPE_ECHO_REPLY)
}

fn is_icmp_error(kind: u8) -> bool {
    kind == icmpv4::TYPE_DEST_UNREACHABLE
        || kind == icmpv4::TYPE_TIME_EXCEEDED
        || kind == icmpv6::TYPE_DEST_UNREACHABLE
        || kind == icmpv6::TYPE_TIME_EXCEEDED
}

/// Used by the ICMP descriptor itself: an echo-reply probe matches its
/// echo reply by identifier/sequence; anything else falls back to the
/// generic quoted-packet tag check.
pub fn icmp_matches(probe: &Probe, reply: &Probe) -> bool {
    let Some(icmp_depth) = icmp_layer_index(reply) else {
        return false;
    };
    let probe_type = probe.extract_ext(1, "type").ok().and_then(|v| v.as_u64());
    let reply_type = reply.extract_ext(icmp_depth, "type").ok().and_then(|v| v.as_u64());
    if let (Some(pt), Some(rt)) = (probe_type, reply_type) {
        if is_echo_reply(pt as u8, rt as u8) {
            let probe_id = probe.extract_ext(1, "identifier").ok();
            let reply_id = reply.extract_ext(icmp_depth, "identifier").ok();
            let probe_seq = probe.extract_ext(1, "sequence").ok();
            let reply_seq = reply.extract_ext(icmp_depth, "sequence").ok();
            return probe_id.is_some() && probe_id == reply_id && probe_seq == reply_seq;
        }
    }
    transport_error_matches(probe, reply)
}

/// Used by UDP/TCP: these protocols never get a direct kernel-delivered
/// reply in this crate's raw-socket model, only ICMP errors quoting the
/// original datagram. The quoted transport header's checksum field still
/// carries the tag [`crate::network`] wrote into the probe before it was
/// sent, so matching is a single field comparison two layers past the
/// ICMP error (skipping the quoted IP header).
pub fn transport_error_matches(probe: &Probe, reply: &Probe) -> bool {
    let Some(icmp_depth) = icmp_layer_index(reply) else {
        return false;
    };
    let reply_kind = match reply.extract_ext(icmp_depth, "type").ok().and_then(|v| v.as_u64()) {
        Some(t) if is_icmp_error(t as u8) => t as u8,
        _ => return false,
    };
    let _ = reply_kind;
    let probe_tag = probe.extract_ext(1, "checksum").ok().and_then(|v| v.as_u64());
    let reply_tag = reply.extract_ext(icmp_depth + 2, "checksum").ok().and_then(|v| v.as_u64());
    probe_tag.is_some() && probe_tag == reply_tag
}
