//! Protocol descriptors and the process-wide registry that holds them.
//!
//! Grounded on `libparistraceroute/protocol.c`/`protocol.h`: protocols are
//! registered once (there, via constructor attributes and a splay tree
//! keyed by name and by protocol number; here, via [`ProtocolRegistry::new`]
//! building two sorted `Vec`s once behind a `OnceLock`). Lookup is by name
//! or by IP protocol number; the registry is read-only after construction.

use std::sync::OnceLock;

use crate::error::{ProbezError, Result};
use crate::field::ProtocolField;
use crate::probe::Probe;

pub type DefaultHeaderFn = fn() -> Vec<u8>;
pub type HeaderSizeFn = fn(Option<&[u8]>) -> usize;
pub type ChecksumFn = fn(&mut [u8], Option<&[u8]>) -> Result<()>;
pub type PseudoHeaderFn = fn(&[u8]) -> Vec<u8>;
pub type NextProtocolFn = fn(&[u8], &ProtocolRegistry) -> Option<&'static ProtocolDescriptor>;
pub type MatchFn = fn(&Probe, &Probe) -> bool;

pub struct ProtocolDescriptor {
    pub name: &'static str,
    /// IP protocol number (UDP=17, TCP=6, ICMPv4=1, ICMPv6=58). IPv4/IPv6
    /// themselves have no meaningful protocol number and use 0.
    pub protocol_id: u8,
    pub fields: &'static [ProtocolField],
    pub write_default_header: DefaultHeaderFn,
    pub get_header_size: HeaderSizeFn,
    pub write_checksum: Option<ChecksumFn>,
    pub create_pseudo_header: Option<PseudoHeaderFn>,
    pub get_next_protocol: NextProtocolFn,
    pub matches: MatchFn,
}

impl ProtocolDescriptor {
    pub fn field(&self, name: &str) -> Option<ProtocolField> {
        self.fields.iter().find(|f| f.name == name).copied()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }
}

/// Default `get_next_protocol`, shared by IPv4/IPv6/UDP/TCP: read the
/// `protocol` field of this layer's header and look it up in the
/// registry. ICMPv4/ICMPv6 install their own (only descend into the
/// quoted inner IP header for Destination-Unreachable/Time-Exceeded).
pub fn default_next_protocol(
    descriptor: &ProtocolDescriptor,
    segment: &[u8],
    registry: &ProtocolRegistry,
) -> Option<&'static ProtocolDescriptor> {
    let field = descriptor.field("protocol")?;
    let value = field.read(segment).ok()?;
    let id = value.as_u64()? as u8;
    registry.by_protocol_id(id)
}

pub struct ProtocolRegistry {
    by_name: Vec<(&'static str, &'static ProtocolDescriptor)>,
    by_id: Vec<(u8, &'static ProtocolDescriptor)>,
}

impl ProtocolRegistry {
    fn build() -> Self {
        let descriptors: Vec<&'static ProtocolDescriptor> = vec![
            crate::protocols::ipv4::descriptor(),
            crate::protocols::ipv6::descriptor(),
            crate::protocols::udp::descriptor(),
            crate::protocols::tcp::descriptor(),
            crate::protocols::icmpv4::descriptor(),
            crate::protocols::icmpv6::descriptor(),
        ];
        let mut by_name = Vec::new();
        let mut by_id = Vec::new();
        for d in descriptors {
            // Idempotent on key collision: first registration wins.
            if !by_name.iter().any(|(n, _): &(&str, _)| *n == d.name) {
                by_name.push((d.name, d));
            }
            if !matches!(d.name, "ipv4" | "ipv6") && !by_id.iter().any(|(id, _): &(u8, _)| *id == d.protocol_id) {
                by_id.push((d.protocol_id, d));
            }
        }
        by_name.sort_by_key(|(n, _)| *n);
        by_id.sort_by_key(|(id, _)| *id);
        Self { by_name, by_id }
    }

    pub fn global() -> &'static ProtocolRegistry {
        static REGISTRY: OnceLock<ProtocolRegistry> = OnceLock::new();
        REGISTRY.get_or_init(ProtocolRegistry::build)
    }

    pub fn by_name(&self, name: &str) -> Result<&'static ProtocolDescriptor> {
        self.by_name
            .binary_search_by(|(n, _)| (*n).cmp(name))
            .map(|i| self.by_name[i].1)
            .map_err(|_| ProbezError::UnknownProtocol(name.to_string()))
    }

    pub fn by_protocol_id(&self, id: u8) -> Option<&'static ProtocolDescriptor> {
        self.by_id
            .binary_search_by(|(n, _)| n.cmp(&id))
            .ok()
            .map(|i| self.by_id[i].1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_known_protocols_by_name_and_id() {
        let reg = ProtocolRegistry::global();
        assert_eq!(reg.by_name("udp").unwrap().protocol_id, 17);
        assert_eq!(reg.by_protocol_id(17).unwrap().name, "udp");
        assert_eq!(reg.by_name("ipv4").unwrap().name, "ipv4");
        assert!(reg.by_name("sctp").is_err());
    }
}
