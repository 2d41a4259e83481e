//! TCP segment parsing and construction.

use super::checksum;
use super::error::{ParseError, ParseResult};
use bitflags::bitflags;
use bytes::BufMut;
use std::net::Ipv4Addr;

/// TCP header size without options.
pub const TCP_HEADER_LEN: usize = 20;

bitflags! {
    /// TCP flag byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
        const ECE = 0x40;
        const CWR = 0x80;
    }
}

/// A parsed TCP segment: header fields, raw options, and payload.
///
/// Options are carried opaquely so a forwarded segment re-serializes with
/// its original option block intact. The checksum is recomputed on
/// serialization from the pseudo-header the caller supplies.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TcpSegment {
    /// Source port.
    pub src_port: u16,

    /// Destination port.
    pub dst_port: u16,

    /// Sequence number.
    pub seq: u32,

    /// Acknowledgement number.
    pub ack: u32,

    /// Flag byte.
    pub flags: TcpFlags,

    /// Advertised window.
    pub window: u16,

    /// Raw option bytes (length must be a multiple of 4).
    pub options: Vec<u8>,

    /// Segment payload.
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// Parse a TCP segment from the start of `data`.
    pub fn parse(data: &[u8]) -> ParseResult<Self> {
        if data.len() < TCP_HEADER_LEN {
            return Err(ParseError::TruncatedTcp(data.len()));
        }
        let data_offset = usize::from(data[12] >> 4) * 4;
        if data_offset < TCP_HEADER_LEN || data.len() < data_offset {
            return Err(ParseError::TruncatedTcp(data.len()));
        }
        Ok(Self {
            src_port: u16::from_be_bytes([data[0], data[1]]),
            dst_port: u16::from_be_bytes([data[2], data[3]]),
            seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
            flags: TcpFlags::from_bits_retain(data[13]),
            window: u16::from_be_bytes([data[14], data[15]]),
            options: data[TCP_HEADER_LEN..data_offset].to_vec(),
            payload: data[data_offset..].to_vec(),
        })
    }

    /// Total serialized length: header, options, payload.
    #[must_use]
    pub fn wire_len(&self) -> usize {
        TCP_HEADER_LEN + self.options.len() + self.payload.len()
    }

    /// Append the segment to `buf` with a checksum valid for the given
    /// pseudo-header addresses.
    pub fn put(&self, buf: &mut impl BufMut, src: Ipv4Addr, dst: Ipv4Addr) {
        let bytes = self.to_bytes(src, dst);
        buf.put_slice(&bytes);
    }

    /// Serialize the segment with a checksum valid for the given
    /// pseudo-header addresses. Used directly for raw-socket writes where
    /// the kernel prepends the IPv4 header.
    #[must_use]
    pub fn to_bytes(&self, src: Ipv4Addr, dst: Ipv4Addr) -> Vec<u8> {
        debug_assert_eq!(self.options.len() % 4, 0);
        let mut bytes = Vec::with_capacity(self.wire_len());
        bytes.put_u16(self.src_port);
        bytes.put_u16(self.dst_port);
        bytes.put_u32(self.seq);
        bytes.put_u32(self.ack);
        let data_offset = ((TCP_HEADER_LEN + self.options.len()) / 4) as u8;
        bytes.put_u8(data_offset << 4);
        bytes.put_u8(self.flags.bits());
        bytes.put_u16(self.window);
        bytes.put_u16(0); // checksum, patched below
        bytes.put_u16(0); // urgent pointer
        bytes.put_slice(&self.options);
        bytes.put_slice(&self.payload);

        let csum = checksum::tcp_segment(src, dst, &bytes);
        bytes[16..18].copy_from_slice(&csum.to_be_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TcpSegment {
        TcpSegment {
            src_port: 40000,
            dst_port: 80,
            seq: 1000,
            ack: 2000,
            flags: TcpFlags::SYN | TcpFlags::ACK,
            window: 64240,
            options: vec![0x02, 0x04, 0x05, 0xb4],
            payload: b"hello".to_vec(),
        }
    }

    const SRC: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);
    const DST: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    #[test]
    fn test_round_trip_preserves_fields() {
        let seg = sample();
        let bytes = seg.to_bytes(SRC, DST);
        let parsed = TcpSegment::parse(&bytes).unwrap();
        assert_eq!(parsed, seg);
    }

    #[test]
    fn test_emitted_checksum_is_valid() {
        let bytes = sample().to_bytes(SRC, DST);
        let mut acc = checksum::sum_words(0, &SRC.octets());
        acc = checksum::sum_words(acc, &DST.octets());
        acc += u32::from(crate::wire::ipv4::PROTOCOL_TCP);
        acc += bytes.len() as u32;
        acc = checksum::sum_words(acc, &bytes);
        while acc > 0xFFFF {
            acc = (acc & 0xFFFF) + (acc >> 16);
        }
        assert_eq!(acc, 0xFFFF);
    }

    #[test]
    fn test_data_offset_includes_options() {
        let bytes = sample().to_bytes(SRC, DST);
        assert_eq!(bytes[12] >> 4, 6);
        let no_opts = TcpSegment {
            options: Vec::new(),
            ..sample()
        };
        let bytes = no_opts.to_bytes(SRC, DST);
        assert_eq!(bytes[12] >> 4, 5);
    }

    #[test]
    fn test_parse_rejects_truncated() {
        assert_eq!(
            TcpSegment::parse(&[0u8; 19]),
            Err(ParseError::TruncatedTcp(19))
        );
    }

    #[test]
    fn test_parse_rejects_bad_data_offset() {
        let mut bytes = TcpSegment::default().to_bytes(SRC, DST);
        bytes[12] = 0xF0; // claims 60-byte header in a 20-byte segment
        assert!(TcpSegment::parse(&bytes).is_err());
    }

    #[test]
    fn test_odd_payload_checksum_round_trip() {
        let seg = TcpSegment {
            payload: b"abc".to_vec(),
            options: Vec::new(),
            ..sample()
        };
        let bytes = seg.to_bytes(SRC, DST);
        assert_eq!(TcpSegment::parse(&bytes).unwrap().payload, b"abc");
    }
}
