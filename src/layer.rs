//! A non-owning view over one segment of a probe's packet, plus the
//! protocol that governs it.
//!
//! Grounded on `libparistraceroute/layer.h`/`layer.c`, reworked per
//! spec.md §9's ownership note: rather than layers holding raw pointers
//! into a shared buffer, a `Layer` stores `(offset, size)` into the
//! `Probe`'s owned [`crate::packet::Packet`]; every method that touches
//! bytes takes the packet's buffer explicitly so the borrow checker (not
//! a manual "refresh all views" pass) keeps them honest after a resize.

use crate::bitfield::Bitfield;
use crate::error::{ProbezError, Result};
use crate::field::{Field, FieldValue};
use crate::protocol::ProtocolDescriptor;

#[derive(Clone)]
pub struct Layer {
    /// `None` marks the terminal payload layer.
    pub protocol: Option<&'static ProtocolDescriptor>,
    pub offset: usize,
    pub size: usize,
    /// Tracks which of this layer's fields the user has explicitly set,
    /// one bit per entry in `protocol.fields` (unused on payload layers).
    pub touched: Option<Bitfield>,
}

impl Layer {
    pub fn protocol_layer(protocol: &'static ProtocolDescriptor, offset: usize, size: usize) -> Self {
        let touched = Bitfield::new(protocol.fields.len().max(1));
        Self {
            protocol: Some(protocol),
            offset,
            size,
            touched: Some(touched),
        }
    }

    pub fn payload_layer(offset: usize, size: usize) -> Self {
        Self {
            protocol: None,
            offset,
            size,
            touched: None,
        }
    }

    pub fn is_payload(&self) -> bool {
        self.protocol.is_none()
    }

    pub fn end(&self) -> usize {
        self.offset + self.size
    }

    pub fn segment<'p>(&self, packet_bytes: &'p [u8]) -> &'p [u8] {
        &packet_bytes[self.offset..self.end().min(packet_bytes.len())]
    }

    pub fn segment_mut<'p>(&self, packet_bytes: &'p mut [u8]) -> &'p mut [u8] {
        let end = self.end().min(packet_bytes.len());
        &mut packet_bytes[self.offset..end]
    }

    pub fn header_size(&self, packet_bytes: &[u8]) -> usize {
        match self.protocol {
            Some(p) => (p.get_header_size)(Some(self.segment(packet_bytes))),
            None => 0,
        }
    }

    pub fn get_field(&self, packet_bytes: &[u8], name: &str) -> Result<FieldValue> {
        let protocol = self.protocol.ok_or_else(|| ProbezError::UnknownField(name.to_string()))?;
        let field = protocol
            .field(name)
            .ok_or_else(|| ProbezError::UnknownField(name.to_string()))?;
        field.read(self.segment(packet_bytes))
    }

    pub fn set_field(&mut self, packet_bytes: &mut [u8], field: &Field) -> Result<()> {
        let protocol = self
            .protocol
            .ok_or_else(|| ProbezError::UnknownField(field.name.clone()))?;
        let index = protocol
            .fields
            .iter()
            .position(|f| f.name == field.name)
            .ok_or_else(|| ProbezError::UnknownField(field.name.clone()))?;
        protocol.fields[index].write(self.segment_mut(packet_bytes), &field.value)?;
        if let Some(touched) = self.touched.as_mut() {
            touched.set_bit(index, true);
        }
        Ok(())
    }

    /// Writes raw payload bytes at `offset` within this layer's segment,
    /// growing the segment in place if needed. Rejected on a non-payload
    /// layer followed by a nested protocol layer (caller must resize via
    /// the owning probe instead).
    pub fn write_payload(&mut self, packet_bytes: &mut [u8], bytes: &[u8], offset: usize) -> Result<()> {
        if !self.is_payload() {
            return Err(ProbezError::InvalidArgument(
                "write_payload called on a protocol layer".into(),
            ));
        }
        let seg = self.segment_mut(packet_bytes);
        if offset + bytes.len() > seg.len() {
            return Err(ProbezError::InvalidArgument(
                "payload write extends past the layer's current segment; resize the probe first".into(),
            ));
        }
        seg[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocols::udp;

    #[test]
    fn unknown_field_is_reported() {
        let layer = Layer::protocol_layer(udp::descriptor(), 0, 8);
        let packet = vec![0u8; 8];
        let err = layer.get_field(&packet, "nonexistent").unwrap_err();
        assert!(matches!(err, ProbezError::UnknownField(_)));
    }

    #[test]
    fn set_field_marks_touched_bit() {
        let mut layer = Layer::protocol_layer(udp::descriptor(), 0, 8);
        let mut packet = vec![0u8; 8];
        layer
            .set_field(&mut packet, &Field::u16("src_port", 53))
            .unwrap();
        let index = udp::descriptor()
            .fields
            .iter()
            .position(|f| f.name == "src_port")
            .unwrap();
        assert_eq!(layer.touched.as_ref().unwrap().get_bit(index), Some(true));
    }
}
