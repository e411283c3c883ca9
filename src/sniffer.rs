//! Raw, non-blocking sockets that capture every inbound ICMPv4/ICMPv6
//! packet so the event loop can match replies against in-flight probes.
//!
//! Grounded on `libparistraceroute/sniffer.c` (one `SOCK_RAW` per address
//! family, filtered by the kernel's own ICMP protocol demux rather than
//! BPF) and on `mtr_ng::probe::ProbeEngine`'s `Socket::new(Domain::IPV4,
//! Type::RAW, Some(Protocol::ICMPV4))` construction.

use std::net::IpAddr;

use std::os::fd::AsRawFd;

use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::Result;
use crate::packet::Packet;

pub struct Sniffer {
    v4: Socket,
    v6: Socket,
}

impl Sniffer {
    pub fn new() -> Result<Self> {
        let v4 = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))?;
        v4.set_nonblocking(true)?;
        let v6 = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::ICMPV6))?;
        v6.set_nonblocking(true)?;
        Ok(Self { v4, v6 })
    }

    pub fn register(&mut self, registry: &Registry, token_v4: Token, token_v6: Token) -> Result<()> {
        let v4_fd = self.v4.as_raw_fd();
        let v6_fd = self.v6.as_raw_fd();
        registry.register(&mut SourceFd(&v4_fd), token_v4, Interest::READABLE)?;
        registry.register(&mut SourceFd(&v6_fd), token_v6, Interest::READABLE)?;
        Ok(())
    }

    /// Drains one pending datagram from whichever family `addr` names. A
    /// raw ICMPv6 socket never includes the IPv6 header the kernel
    /// already consumed, so the caller's dissection has to start from
    /// ICMPv6 rather than IPv4/IPv6 for that family.
    pub fn recv(&mut self, family_v4: bool) -> Result<Option<(Packet, IpAddr)>> {
        let socket = if family_v4 { &self.v4 } else { &self.v6 };
        let mut buf = [std::mem::MaybeUninit::uninit(); 2048];
        match socket.recv_from(&mut buf) {
            Ok((n, addr)) => {
                let bytes: Vec<u8> = buf[..n].iter().map(|b| unsafe { b.assume_init() }).collect();
                let ip = addr.as_socket().map(|s| s.ip());
                Ok(ip.map(|ip| (Packet::from_bytes(bytes), ip)))
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
