//! The probe: a stack of protocol layers over one owned packet buffer,
//! plus the scheduling/bookkeeping state the event loop and algorithms
//! need around it.
//!
//! Grounded on `libparistraceroute/probe.c` (construction, field
//! dispatch, `probe_update_fields`) and `probe.h` (the queuing/sending/
//! receiving timestamp triple, `caller`, `left_to_send`). The original
//! keeps a dynarray of `layer_t*` pointing into a shared `buffer_t`; this
//! keeps the same layering but expresses the "points into" relationship
//! as `Layer::{offset, size}` over `Probe::packet`, so there's exactly
//! one owner of the bytes and the borrow checker enforces it.

use std::net::{IpAddr, UdpSocket};
use std::time::Instant;

use crate::error::{ProbezError, Result};
use crate::field::{Field, FieldValue};
use crate::generator::Generator;
use crate::layer::Layer;
use crate::packet::Packet;
use crate::protocol::ProtocolRegistry;

#[derive(Clone)]
pub struct Probe {
    pub layers: Vec<Layer>,
    pub packet: Packet,
    /// Scheduled send delay; `None` means "send as soon as possible".
    pub delay: Option<Generator>,
    /// Opaque handle back to the algorithm instance that owns this probe.
    pub caller: Option<u64>,
    /// Remaining retransmissions an algorithm is willing to spend on this
    /// probe before giving up (e.g. MDA's per-branch retry budget).
    pub left_to_send: u32,
    pub queuing_time: Option<Instant>,
    pub sending_time: Option<Instant>,
    pub receiving_time: Option<Instant>,
}

impl Default for Probe {
    fn default() -> Self {
        Self {
            layers: Vec::new(),
            packet: Packet::new(),
            delay: None,
            caller: None,
            left_to_send: 0,
            queuing_time: None,
            sending_time: None,
            receiving_time: None,
        }
    }
}

impl Probe {
    pub fn create() -> Self {
        Self::default()
    }

    /// Builds a fresh probe by stacking the default header of each named
    /// protocol in order (e.g. `["ipv4", "udp"]`), plus a zero-length
    /// trailing payload layer.
    pub fn set_protocols(names: &[&str]) -> Result<Self> {
        let registry = ProtocolRegistry::global();
        let mut bytes = Vec::new();
        let mut layers = Vec::with_capacity(names.len() + 1);
        for name in names {
            let descriptor = registry.by_name(name)?;
            let offset = bytes.len();
            let header = (descriptor.write_default_header)();
            let size = header.len();
            bytes.extend_from_slice(&header);
            layers.push(Layer::protocol_layer(descriptor, offset, size));
        }
        let payload_offset = bytes.len();
        layers.push(Layer::payload_layer(payload_offset, 0));
        Ok(Self {
            layers,
            packet: Packet::from_bytes(bytes),
            ..Self::default()
        })
    }

    /// Dissects an already-encoded packet (typically a captured reply)
    /// into layers, starting from its IP version nibble and walking
    /// `get_next_protocol` until a layer declines to name a successor.
    pub fn wrap_packet(packet: Packet) -> Result<Self> {
        let bytes = packet.bytes();
        if bytes.is_empty() {
            return Err(ProbezError::InvalidArgument("cannot dissect an empty packet".into()));
        }
        let first_name = match bytes[0] >> 4 {
            4 => "ipv4",
            6 => "ipv6",
            v => return Err(ProbezError::UnknownProtocol(format!("IP version {v}"))),
        };
        Self::wrap_packet_from(packet, first_name)
    }

    /// Dissects an already-encoded packet starting from a named protocol
    /// rather than sniffing the IP version nibble. A raw ICMPv6 socket
    /// never includes the IPv6 header the kernel already consumed (unlike
    /// ICMPv4, where the IP header rides along), so replies captured on
    /// that family have to be handed in starting from `"icmpv6"`.
    pub fn wrap_packet_from(packet: Packet, first_name: &str) -> Result<Self> {
        let registry = ProtocolRegistry::global();
        let mut layers = Vec::new();
        let mut descriptor = registry.by_name(first_name)?;
        let mut offset = 0usize;
        loop {
            let segment = &packet.bytes()[offset..];
            let header_size = (descriptor.get_header_size)(Some(segment)).min(segment.len());
            layers.push(Layer::protocol_layer(descriptor, offset, header_size));
            let next_segment = &packet.bytes()[offset..];
            let next = (descriptor.get_next_protocol)(next_segment, registry);
            offset += header_size;
            match next {
                Some(next_descriptor) if offset < packet.len() => descriptor = next_descriptor,
                _ => break,
            }
        }
        let remaining = packet.len() - offset;
        layers.push(Layer::payload_layer(offset, remaining));
        Ok(Self {
            layers,
            packet,
            ..Self::default()
        })
    }

    fn protocol_layers(&self) -> impl Iterator<Item = (usize, &Layer)> {
        self.layers.iter().enumerate().filter(|(_, l)| !l.is_payload())
    }

    /// Sets a field on the first layer (searched outermost-first) that
    /// declares it.
    pub fn set_field(&mut self, field: Field) -> Result<()> {
        let index = self
            .protocol_layers()
            .find(|(_, l)| l.protocol.unwrap().has_field(&field.name))
            .map(|(i, _)| i)
            .ok_or_else(|| ProbezError::UnknownField(field.name.clone()))?;
        self.set_field_ext(index, field)
    }

    pub fn set_field_ext(&mut self, depth: usize, field: Field) -> Result<()> {
        let bytes = self.packet.bytes_mut();
        self.layers
            .get_mut(depth)
            .ok_or_else(|| ProbezError::UnknownField(field.name.clone()))?
            .set_field(bytes, &field)
    }

    pub fn set_fields(&mut self, fields: Vec<Field>) -> Result<()> {
        for field in fields {
            self.set_field(field)?;
        }
        Ok(())
    }

    pub fn set_metafield(&mut self, field: Field) -> Result<()> {
        crate::metafield::apply(self, field)
    }

    pub fn extract_metafield(&self, name: &str) -> Result<FieldValue> {
        crate::metafield::extract(self, name)
    }

    pub fn extract(&self, name: &str) -> Result<FieldValue> {
        let (_, layer) = self
            .protocol_layers()
            .find(|(_, l)| l.protocol.unwrap().has_field(name))
            .ok_or_else(|| ProbezError::UnknownField(name.to_string()))?;
        layer.get_field(self.packet.bytes(), name)
    }

    pub fn extract_ext(&self, depth: usize, name: &str) -> Result<FieldValue> {
        self.layers
            .get(depth)
            .ok_or_else(|| ProbezError::UnknownField(name.to_string()))?
            .get_field(self.packet.bytes(), name)
    }

    fn payload_layer_index(&self) -> usize {
        self.layers.len() - 1
    }

    pub fn payload_resize(&mut self, new_len: usize) -> Result<()> {
        let index = self.payload_layer_index();
        let old_len = self.layers[index].size;
        if new_len == old_len {
            return Ok(());
        }
        let new_total = self.packet.len() as isize + (new_len as isize - old_len as isize);
        if new_total < 0 {
            return Err(ProbezError::InvalidArgument("payload resize underflows the packet".into()));
        }
        self.packet.resize(new_total as usize);
        self.layers[index].size = new_len;
        Ok(())
    }

    pub fn write_payload(&mut self, bytes: &[u8], offset: usize) -> Result<()> {
        if offset + bytes.len() > self.layers[self.payload_layer_index()].size {
            self.payload_resize(offset + bytes.len())?;
        }
        let index = self.payload_layer_index();
        let packet_bytes = self.packet.bytes_mut();
        self.layers[index].write_payload(packet_bytes, bytes, offset)
    }

    pub fn next_delay(&self) -> f64 {
        self.delay.as_ref().map(|g| g.next_value()).unwrap_or(-1.0)
    }

    /// Rebuilds every field that depends on the shape of the whole
    /// probe, in the order `network.c`'s `packet_create_from_probe` path
    /// relies on: per-layer finalize, next-protocol chaining, length
    /// fields, then checksums innermost-first... actually outermost last,
    /// since an outer checksum (e.g. UDP) depends on an inner layer never
    /// existing, while a pseudo-header depends on the *preceding* layer
    /// already holding its final length. Reverse layer order satisfies
    /// both: by the time a layer's checksum runs, every layer after it is
    /// already finished and every layer before it already has its final
    /// length field written (step 3 ran over the whole probe first).
    pub fn update_fields(&mut self) -> Result<()> {
        self.finalize_source_addresses()?;
        self.chain_protocol_fields()?;
        self.write_length_fields()?;
        self.write_checksums()
    }

    fn finalize_source_addresses(&mut self) -> Result<()> {
        for index in 0..self.layers.len() {
            let Some(descriptor) = self.layers[index].protocol else { continue };
            if descriptor.name != "ipv4" && descriptor.name != "ipv6" {
                continue;
            }
            let src = self.extract_ext(index, "src_ip").ok().and_then(|v| v.as_ip_addr());
            let dst = self.extract_ext(index, "dst_ip").ok().and_then(|v| v.as_ip_addr());
            let (Some(src), Some(dst)) = (src, dst) else { continue };
            if !src.is_unspecified() || dst.is_unspecified() {
                continue;
            }
            if let Some(resolved) = guess_source_address(dst) {
                self.set_field_ext(index, Field::ip_addr("src_ip", resolved))?;
            }
        }
        Ok(())
    }

    fn chain_protocol_fields(&mut self) -> Result<()> {
        for i in 0..self.layers.len().saturating_sub(1) {
            let Some(descriptor) = self.layers[i].protocol else { continue };
            if !descriptor.has_field("protocol") {
                continue;
            }
            let Some(next_descriptor) = self.layers[i + 1].protocol else { continue };
            self.set_field_ext(i, Field::u8("protocol", next_descriptor.protocol_id))?;
        }
        Ok(())
    }

    fn write_length_fields(&mut self) -> Result<()> {
        let packet_len = self.packet.len();
        for i in 0..self.layers.len() {
            let offset = self.layers[i].offset;
            let Some(descriptor) = self.layers[i].protocol else { continue };
            if !descriptor.has_field("length") {
                continue;
            }
            let len = (packet_len - offset) as u16;
            self.set_field_ext(i, Field::u16("length", len))?;
        }
        Ok(())
    }

    fn write_checksums(&mut self) -> Result<()> {
        for i in (0..self.layers.len()).rev() {
            let (offset, size, descriptor) = {
                let layer = &self.layers[i];
                (layer.offset, layer.size, layer.protocol)
            };
            let Some(descriptor) = descriptor else { continue };
            let Some(checksum_fn) = descriptor.write_checksum else { continue };
            let pseudo = if let Some(make_pseudo_header) = descriptor.create_pseudo_header {
                if i == 0 {
                    return Err(ProbezError::Fatal(format!(
                        "{} has no preceding IP layer for its pseudo-header",
                        descriptor.name
                    )));
                }
                let prev = &self.layers[i - 1];
                Some(make_pseudo_header(&self.packet.bytes()[prev.offset..prev.offset + prev.size]))
            } else {
                None
            };
            let segment = &mut self.packet.bytes_mut()[offset..offset + size];
            checksum_fn(segment, pseudo.as_deref())?;
        }
        Ok(())
    }
}

fn guess_source_address(dst: IpAddr) -> Option<IpAddr> {
    let socket = match dst {
        IpAddr::V4(_) => UdpSocket::bind("0.0.0.0:0").ok()?,
        IpAddr::V6(_) => UdpSocket::bind("[::]:0").ok()?,
    };
    socket.connect((dst, 32000)).ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn set_protocols_builds_stacked_default_headers() {
        let probe = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
        assert_eq!(probe.layers.len(), 3); // ipv4, udp, payload
        assert_eq!(probe.layers[1].offset, 20);
        assert_eq!(probe.packet.len(), 28);
    }

    #[test]
    fn update_fields_chains_protocol_and_checksums() {
        let mut probe = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
        probe.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))).unwrap();
        probe.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))).unwrap();
        probe.set_field(Field::u16("dst_port", 33434)).unwrap();
        probe.update_fields().unwrap();

        assert_eq!(probe.extract_ext(0, "protocol").unwrap(), FieldValue::U8(17));
        assert_eq!(probe.extract_ext(0, "length").unwrap(), FieldValue::U16(28));
        assert_eq!(probe.extract_ext(1, "length").unwrap(), FieldValue::U16(8));
        let ip_header = &probe.packet.bytes()[0..20];
        assert_eq!(crate::checksum::internet_checksum(ip_header), 0);
    }

    #[test]
    fn wrap_packet_dissects_udp_over_ipv4() {
        let mut probe = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
        probe.set_field(Field::ip_addr("src_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)))).unwrap();
        probe.set_field(Field::ip_addr("dst_ip", IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))).unwrap();
        probe.update_fields().unwrap();

        let dissected = Probe::wrap_packet(probe.packet.clone()).unwrap();
        assert_eq!(dissected.layers.len(), 3);
        assert_eq!(dissected.layers[1].protocol.unwrap().name, "udp");
    }

    #[test]
    fn payload_resize_extends_packet_without_moving_headers() {
        let mut probe = Probe::set_protocols(&["ipv4", "udp"]).unwrap();
        probe.write_payload(&[1, 2, 3, 4], 0).unwrap();
        assert_eq!(probe.packet.len(), 32);
        assert_eq!(probe.extract_ext(0, "ttl").unwrap(), FieldValue::U8(255));
    }
}
