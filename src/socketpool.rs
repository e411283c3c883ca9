//! One raw send socket per address family, opened lazily.
//!
//! Grounded on `libparistraceroute/socketpool.c` (a small per-family
//! cache of already-open sockets, since `socket(2)` for `SOCK_RAW`
//! requires `CAP_NET_RAW` and is worth paying for once) and
//! `mtr_ng::probe::ProbeEngine::new`'s use of `socket2::Socket` to build
//! the equivalent raw ICMP socket.

use std::net::SocketAddr;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::debug;

use crate::error::Result;

pub struct SocketPool {
    v4: Option<Socket>,
    v6: Option<Socket>,
}

impl SocketPool {
    pub fn new() -> Self {
        Self { v4: None, v6: None }
    }

    fn v4_socket(&mut self) -> Result<&Socket> {
        if self.v4.is_none() {
            debug!("opening raw IPv4 send socket");
            let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::from(libc::IPPROTO_RAW)))?;
            socket.set_header_included(true)?;
            self.v4 = Some(socket);
        }
        Ok(self.v4.as_ref().unwrap())
    }

    fn v6_socket(&mut self) -> Result<&Socket> {
        if self.v6.is_none() {
            debug!("opening raw IPv6 send socket");
            let socket = Socket::new(Domain::IPV6, Type::RAW, Some(Protocol::from(libc::IPPROTO_RAW)))?;
            self.v6 = Some(socket);
        }
        Ok(self.v6.as_ref().unwrap())
    }

    /// Sends a fully-encoded packet (IP header included) to `dst`.
    pub fn send_to(&mut self, bytes: &[u8], dst: SocketAddr) -> Result<usize> {
        let addr = SockAddr::from(dst);
        let socket = match dst {
            SocketAddr::V4(_) => self.v4_socket()?,
            SocketAddr::V6(_) => self.v6_socket()?,
        };
        Ok(socket.send_to(bytes, &addr)?)
    }
}

impl Default for SocketPool {
    fn default() -> Self {
        Self::new()
    }
}
