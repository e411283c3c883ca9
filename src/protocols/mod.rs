//! Concrete protocol descriptors, one module per wire format.
//!
//! Grounded file-for-file on `libparistraceroute/protocols/{ipv4,ipv6,
//! udp,tcp,icmpv4,icmpv6}.c`.

pub mod icmpv4;
pub mod icmpv6;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;
