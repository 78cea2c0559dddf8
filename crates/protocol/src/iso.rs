//! Isochronous packet descriptors
//!
//! Iso submits carry a contiguous array of 16-byte descriptors after the
//! payload; iso replies carry the same array after the reply payload with
//! actual_length and status filled in.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, Result};

/// Size of one descriptor on the wire
pub const ISO_DESCRIPTOR_SIZE: usize = 16;

/// Largest representable iso packet; per-packet offsets in the driver's URB
/// record are 16-bit
pub const MAX_ISO_PACKET_LENGTH: u32 = 65_535;

/// One isochronous packet descriptor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IsoPacket {
    /// Offset of this packet's slot within the transfer buffer
    pub offset: u32,
    /// Requested length of the slot
    pub length: u32,
    /// Bytes actually transferred (filled in on completion)
    pub actual_length: u32,
    /// 0 on success, a negated errno otherwise (filled in on completion)
    pub status: i32,
}

impl IsoPacket {
    pub fn decode(buf: &[u8]) -> Self {
        Self {
            offset: BigEndian::read_u32(&buf[0..4]),
            length: BigEndian::read_u32(&buf[4..8]),
            actual_length: BigEndian::read_u32(&buf[8..12]),
            status: BigEndian::read_i32(&buf[12..16]),
        }
    }

    pub fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u32(&mut buf[0..4], self.offset);
        BigEndian::write_u32(&mut buf[4..8], self.length);
        BigEndian::write_u32(&mut buf[8..12], self.actual_length);
        BigEndian::write_i32(&mut buf[12..16], self.status);
    }
}

/// Decode a contiguous descriptor array
///
/// `bytes` must be exactly `n * ISO_DESCRIPTOR_SIZE` long; the codec reads
/// that many bytes off the stream before calling this.
pub fn decode_array(bytes: &[u8]) -> Vec<IsoPacket> {
    bytes
        .chunks_exact(ISO_DESCRIPTOR_SIZE)
        .map(IsoPacket::decode)
        .collect()
}

/// Encode a descriptor array for a reply
pub fn encode_array(packets: &[IsoPacket]) -> Vec<u8> {
    let mut out = vec![0u8; packets.len() * ISO_DESCRIPTOR_SIZE];
    for (pkt, chunk) in packets.iter().zip(out.chunks_exact_mut(ISO_DESCRIPTOR_SIZE)) {
        pkt.encode(chunk);
    }
    out
}

/// Validate an incoming iso submit's descriptor array
///
/// Every packet length must fit in 16 bits and the lengths must sum to the
/// transfer buffer length. Either violation ends the session.
pub fn validate(packets: &[IsoPacket], transfer_buffer_length: u32) -> Result<()> {
    let mut sum: u64 = 0;
    for pkt in packets {
        if pkt.length > MAX_ISO_PACKET_LENGTH {
            return Err(ProtocolError::IsoPacketTooLarge(pkt.length));
        }
        sum += u64::from(pkt.length);
    }
    if sum != u64::from(transfer_buffer_length) {
        return Err(ProtocolError::IsoLengthMismatch {
            sum,
            expected: transfer_buffer_length,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(offset: u32, length: u32) -> IsoPacket {
        IsoPacket {
            offset,
            length,
            actual_length: 0,
            status: 0,
        }
    }

    #[test]
    fn test_descriptor_roundtrip() {
        let pkt = IsoPacket {
            offset: 300,
            length: 100,
            actual_length: 80,
            status: -84,
        };
        let mut buf = [0u8; ISO_DESCRIPTOR_SIZE];
        pkt.encode(&mut buf);
        assert_eq!(IsoPacket::decode(&buf), pkt);
    }

    #[test]
    fn test_array_roundtrip() {
        let packets = vec![packet(0, 100), packet(100, 100), packet(200, 100)];
        let bytes = encode_array(&packets);
        assert_eq!(bytes.len(), 48);
        assert_eq!(decode_array(&bytes), packets);
    }

    #[test]
    fn test_validate_ok() {
        let packets = vec![packet(0, 100), packet(100, 200)];
        assert!(validate(&packets, 300).is_ok());
    }

    #[test]
    fn test_validate_sum_mismatch() {
        let packets = vec![packet(0, 100), packet(100, 100)];
        let err = validate(&packets, 300).unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::IsoLengthMismatch {
                sum: 200,
                expected: 300
            }
        ));
    }

    #[test]
    fn test_validate_oversized_packet() {
        let packets = vec![packet(0, 65_536)];
        let err = validate(&packets, 65_536).unwrap_err();
        assert!(matches!(err, ProtocolError::IsoPacketTooLarge(65_536)));
    }

    #[test]
    fn test_validate_boundary_packet() {
        let packets = vec![packet(0, 65_535)];
        assert!(validate(&packets, 65_535).is_ok());
    }
}
