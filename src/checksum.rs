//! The one's-complement 16-bit checksum shared by IPv4, UDP, TCP, ICMPv4
//! and ICMPv6 (RFC 791 §3.1 / RFC 793 §3.1), grounded on the checksum
//! helper duplicated across `mtr_ng::probe` and
//! `libparistraceroute/protocols/udp.c`'s `csum()` call.

/// Sum of 16-bit words over `data` (big-endian), folded and complemented.
/// `data` should have its own checksum field zeroed by the caller first.
pub fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Checksum over a pseudo-header followed by the real segment, as used by
/// UDP, TCP and ICMPv6. Concatenating the two buffers first keeps the
/// carry propagation correct across the boundary.
pub fn internet_checksum_with_pseudo_header(pseudo_header: &[u8], segment: &[u8]) -> u16 {
    let mut combined = Vec::with_capacity(pseudo_header.len() + segment.len());
    combined.extend_from_slice(pseudo_header);
    combined.extend_from_slice(segment);
    internet_checksum(&combined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_self_validated_packet_is_zero() {
        // A packet with its checksum field already filled in sums to 0
        // when recomputed over the whole thing (RFC 1071 property).
        let mut data = vec![0x45, 0x00, 0x00, 0x1c, 0, 0, 0, 0, 64, 17, 0, 0, 127, 0, 0, 1, 127, 0, 0, 1];
        let csum = internet_checksum(&data);
        data[10] = (csum >> 8) as u8;
        data[11] = (csum & 0xff) as u8;
        assert_eq!(internet_checksum(&data), 0);
    }

    #[test]
    fn odd_length_buffer_pads_last_byte() {
        let a = internet_checksum(&[0x01]);
        let b = internet_checksum(&[0x01, 0x00]);
        assert_eq!(a, b);
    }
}
