//! The owned byte buffer behind a probe or a captured reply.
//!
//! Grounded on `libparistraceroute/packet.h`/`packet.c`: there a packet is
//! little more than a `buffer_t*` plus a cached destination socket
//! address used to route `sendto()`. The crate keeps that shape, typed
//! over `std::net::IpAddr` instead of a raw `sockaddr`.

use std::net::IpAddr;

use crate::buffer::Buffer;

#[derive(Debug, Clone, Default)]
pub struct Packet {
    buffer: Buffer,
    pub dst_addr: Option<IpAddr>,
}

impl Packet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self {
            buffer: Buffer::from_bytes(bytes),
            dst_addr: None,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.buffer.as_mut_slice()
    }

    /// Grows or shrinks the underlying buffer, preserving the existing
    /// prefix (new bytes on growth are zero-filled).
    pub fn resize(&mut self, new_size: usize) {
        self.buffer.resize(new_size);
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buffer.into_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resize_preserves_existing_bytes() {
        let mut p = Packet::from_bytes(vec![1, 2, 3]);
        p.resize(5);
        assert_eq!(p.bytes(), &[1, 2, 3, 0, 0]);
        p.resize(2);
        assert_eq!(p.bytes(), &[1, 2]);
    }
}
