//! Ties together the send/receive queues, the raw sockets, and the
//! in-flight probe table: everything the event loop needs to actually
//! get probes on the wire and match replies back to them.
//!
//! Grounded on `libparistraceroute/network.c`. The tagging scheme in
//! [`Network::tag_probe`] mirrors `network_tag_probe` exactly: the tag is
//! first written into the probe's payload so `update_fields` folds it
//! into the transport checksum naturally, then the *real* checksum that
//! resulted is swapped into the payload and the transport checksum field
//! is overwritten with the tag — so a tagged probe is wire-valid (its
//! checksum field holds something a receiver will accept) while still
//! carrying a value the reply's ICMP-quoted copy lets us recognize.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{ProbezError, Result};
use crate::field::Field;
use crate::probe::Probe;
use crate::queue::EventQueue;
use crate::sniffer::Sniffer;
use crate::socketpool::SocketPool;

pub struct Network {
    pub send_queue: EventQueue<Probe>,
    /// Matched `(probe, reply)` pairs: `probe` is the instance's own probe
    /// as it was sent, `reply` is the dissected packet it was matched
    /// against.
    pub recv_queue: EventQueue<(Probe, Probe)>,
    flying_probes: HashMap<u16, (Probe, Instant)>,
    last_tag: u16,
    sockets: SocketPool,
    sniffer: Sniffer,
}

impl Network {
    pub fn new() -> Result<Self> {
        Ok(Self {
            send_queue: EventQueue::new()?,
            recv_queue: EventQueue::new()?,
            flying_probes: HashMap::new(),
            last_tag: 0,
            sockets: SocketPool::new(),
            sniffer: Sniffer::new()?,
        })
    }

    pub fn sniffer_mut(&mut self) -> &mut Sniffer {
        &mut self.sniffer
    }

    fn next_tag(&mut self) -> u16 {
        self.last_tag = self.last_tag.wrapping_add(1);
        self.last_tag
    }

    /// Embeds `tag` so a later ICMP error quoting this probe can be
    /// recognized, while leaving the probe's own checksum field holding
    /// a value a receiving stack will actually accept.
    fn tag_probe(&self, probe: &mut Probe, tag: u16) -> Result<()> {
        let tag_bytes = tag.to_be_bytes();
        probe.write_payload(&tag_bytes, 0)?;
        probe.update_fields()?;

        let original_checksum = probe
            .extract_ext(1, "checksum")
            .ok()
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u16;

        probe.set_field_ext(1, Field::u16("checksum", tag))?;
        probe.write_payload(&original_checksum.to_be_bytes(), 0)?;
        Ok(())
    }

    /// Dequeues every probe currently waiting to be sent, tags it, and
    /// hands it to the raw socket for its destination's address family.
    pub fn process_send_queue(&mut self) -> Result<usize> {
        let mut sent = 0;
        while let Some(mut probe) = self.send_queue.pop()? {
            let tag = self.next_tag();
            self.tag_probe(&mut probe, tag)?;

            let dst = probe
                .extract("dst_ip")
                .ok()
                .and_then(|v| v.as_ip_addr())
                .ok_or_else(|| ProbezError::InvalidArgument("probe has no dst_ip set".into()))?;
            let dst_port = probe.extract("dst_port").ok().and_then(|v| v.as_u64()).unwrap_or(0) as u16;

            self.sockets.send_to(probe.packet.bytes(), SocketAddr::new(dst, dst_port))?;
            probe.sending_time = Some(Instant::now());
            debug!(tag, %dst, "sent probe");
            self.flying_probes.insert(tag, (probe, Instant::now()));
            sent += 1;
        }
        Ok(sent)
    }

    /// Reads one pending datagram off the sniffer for the given address
    /// family and, if it matches an in-flight probe, moves the matched
    /// probe (now carrying the reply's dissected layers as `reply`) onto
    /// the receive queue.
    pub fn process_sniffer(&mut self, family_v4: bool) -> Result<bool> {
        let Some((packet, _src)) = self.sniffer.recv(family_v4)? else {
            return Ok(false);
        };
        let dissected = if family_v4 {
            Probe::wrap_packet(packet)
        } else {
            Probe::wrap_packet_from(packet, "icmpv6")
        };
        let reply = match dissected {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping unparsable reply");
                return Ok(true);
            }
        };
        if let Some((mut matched, _sent_at)) = self.find_and_remove_match(&reply) {
            matched.receiving_time = Some(Instant::now());
            self.recv_queue.push((matched, reply))?;
        }
        Ok(true)
    }

    fn find_and_remove_match(&mut self, reply: &Probe) -> Option<(Probe, Instant)> {
        let quoted_checksum_depth = crate::matching::icmp_layer_index(reply).map(|d| d + 2);
        if let Some(tag) = quoted_checksum_depth
            .and_then(|depth| reply.extract_ext(depth, "checksum").ok())
            .and_then(|v| v.as_u64())
        {
            if let Some(entry) = self.flying_probes.remove(&(tag as u16)) {
                return Some(entry);
            }
        }
        let candidate_tags: Vec<u16> = self.flying_probes.keys().copied().collect();
        for tag in candidate_tags {
            let is_match = self
                .flying_probes
                .get(&tag)
                .and_then(|(probe, _)| probe.layers.get(1).and_then(|l| l.protocol))
                .map(|descriptor| (descriptor.matches)(&self.flying_probes[&tag].0, reply))
                .unwrap_or(false);
            if is_match {
                return self.flying_probes.remove(&tag);
            }
        }
        None
    }

    /// Removes and returns every in-flight probe older than `timeout`.
    pub fn drain_timeouts(&mut self, timeout: Duration) -> Vec<Probe> {
        let now = Instant::now();
        let expired: Vec<u16> = self
            .flying_probes
            .iter()
            .filter(|(_, (_, sent_at))| now.duration_since(*sent_at) >= timeout)
            .map(|(tag, _)| *tag)
            .collect();
        expired
            .into_iter()
            .filter_map(|tag| self.flying_probes.remove(&tag).map(|(probe, _)| probe))
            .collect()
    }

    /// The deadline of the oldest in-flight probe, used to arm the
    /// per-probe timeout timer for exactly as long as needed.
    pub fn next_timeout_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.flying_probes.values().map(|(_, sent_at)| *sent_at + timeout).min()
    }

    pub fn in_flight_count(&self) -> usize {
        self.flying_probes.len()
    }
}

pub fn resolve_family(addr: IpAddr) -> bool {
    addr.is_ipv4()
}
