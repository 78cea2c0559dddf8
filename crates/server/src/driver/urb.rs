//! Driver URB record layout
//!
//! A SEND_URB block is a fixed 64-byte little-endian header followed by the
//! transfer payload. The driver writes status, actual length, and per-packet
//! results back into the same block on completion. Iso URBs carry at most
//! eight inline packet slots; larger submits are split by the session engine.

use byteorder::{ByteOrder, LittleEndian};
use common::usb::{Direction, TransferKind};
use protocol::errno;

/// Size of the URB header within a SEND_URB block
pub const URB_HEADER_SIZE: usize = 64;

/// Inline iso packet slots per URB
pub const URB_MAX_ISO_PACKETS: usize = 8;

/// Largest payload one iso URB may carry; per-packet offsets are 16-bit
pub const MAX_SPLIT_URB_BYTES: usize = 65_535;

/// Transfer completed
pub const XFER_OK: u32 = 0;
/// Endpoint stalled
pub const XFER_STALL: u32 = 1;
/// Device not responding
pub const XFER_DNR: u32 = 2;
/// CRC error on the bus
pub const XFER_CRC: u32 = 3;
/// Device sent more data than the buffer holds
pub const XFER_DATA_OVERRUN: u32 = 4;
/// Device sent less data than requested
pub const XFER_DATA_UNDERRUN: u32 = 5;
/// Device disconnected mid-transfer
pub const XFER_DISCONNECTED: u32 = 6;

/// URB flag bit: a short IN completion is not an error
pub const URB_FLAG_SHORT_OK: u8 = 0x01;

/// One inline iso packet slot
///
/// `length` is the requested slot size on submission; the driver overwrites
/// it with the actual length on completion. `offset` is relative to the
/// URB's own payload, not the whole transfer buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UrbIsoSlot {
    pub length: u16,
    pub offset: u16,
    pub status: u16,
}

/// Decoded URB header
#[derive(Debug, Clone)]
pub struct UrbHeader {
    /// Endpoint number without the direction bit
    pub endpoint: u8,
    pub kind: TransferKind,
    pub direction: Direction,
    /// Allow a short IN completion
    pub short_ok: bool,
    /// Driver transfer status (XFER_*), written back on completion
    pub status: u32,
    /// Payload bytes following the header; written back to the actual
    /// length on completion
    pub length: u32,
    /// Populated iso slots, empty for non-iso URBs
    pub packets: Vec<UrbIsoSlot>,
}

impl UrbHeader {
    /// Build a non-iso URB header
    pub fn new(endpoint: u8, kind: TransferKind, direction: Direction, short_ok: bool) -> Self {
        Self {
            endpoint,
            kind,
            direction,
            short_ok,
            status: XFER_OK,
            length: 0,
            packets: Vec::new(),
        }
    }

    /// Encode the header and payload into one SEND_URB block
    pub fn encode_block(&self, payload: &[u8]) -> Vec<u8> {
        let mut block = vec![0u8; URB_HEADER_SIZE + payload.len()];
        block[0] = self.endpoint;
        block[1] = kind_code(self.kind);
        block[2] = match self.direction {
            Direction::Out => 0,
            Direction::In => 1,
        };
        block[3] = if self.short_ok { URB_FLAG_SHORT_OK } else { 0 };
        LittleEndian::write_u32(&mut block[4..8], self.status);
        LittleEndian::write_u32(&mut block[8..12], payload.len() as u32);
        LittleEndian::write_u32(
            &mut block[12..16],
            self.packets.len().min(URB_MAX_ISO_PACKETS) as u32,
        );
        for (i, slot) in self.packets.iter().take(URB_MAX_ISO_PACKETS).enumerate() {
            let base = 16 + i * 6;
            LittleEndian::write_u16(&mut block[base..base + 2], slot.length);
            LittleEndian::write_u16(&mut block[base + 2..base + 4], slot.offset);
            LittleEndian::write_u16(&mut block[base + 4..base + 6], slot.status);
        }
        block[URB_HEADER_SIZE..].copy_from_slice(payload);
        block
    }

    /// Decode the header part of a SEND_URB block
    ///
    /// Completion handling only reads status, length, and packet slots, so
    /// unrecognized kind/direction bytes decode to harmless defaults rather
    /// than failing.
    pub fn decode(block: &[u8]) -> Self {
        let packet_count =
            (LittleEndian::read_u32(&block[12..16]) as usize).min(URB_MAX_ISO_PACKETS);
        let packets = (0..packet_count)
            .map(|i| {
                let base = 16 + i * 6;
                UrbIsoSlot {
                    length: LittleEndian::read_u16(&block[base..base + 2]),
                    offset: LittleEndian::read_u16(&block[base + 2..base + 4]),
                    status: LittleEndian::read_u16(&block[base + 4..base + 6]),
                }
            })
            .collect();
        Self {
            endpoint: block[0],
            kind: match block[1] {
                0 => TransferKind::Control,
                1 => TransferKind::Isochronous,
                2 => TransferKind::Bulk,
                _ => TransferKind::Interrupt,
            },
            direction: if block[2] == 0 {
                Direction::Out
            } else {
                Direction::In
            },
            short_ok: block[3] & URB_FLAG_SHORT_OK != 0,
            status: LittleEndian::read_u32(&block[4..8]),
            length: LittleEndian::read_u32(&block[8..12]),
            packets,
        }
    }
}

/// The payload portion of a SEND_URB block
pub fn payload(block: &[u8]) -> &[u8] {
    &block[URB_HEADER_SIZE..]
}

fn kind_code(kind: TransferKind) -> u8 {
    match kind {
        TransferKind::Control => 0,
        TransferKind::Isochronous => 1,
        TransferKind::Bulk => 2,
        TransferKind::Interrupt => 3,
    }
}

/// Map a driver transfer status to the negated errno USB/IP carries
///
/// The table is deliberately coarse; vhci only distinguishes broad failure
/// classes.
pub fn status_to_errno(status: u32) -> i32 {
    match status {
        XFER_OK => 0,
        XFER_STALL => -errno::EPIPE,
        XFER_DNR => -errno::ETIME,
        XFER_CRC => -errno::EILSEQ,
        XFER_DATA_OVERRUN => -errno::EOVERFLOW,
        XFER_DATA_UNDERRUN => -errno::EREMOTEIO,
        XFER_DISCONNECTED => -errno::ENODEV,
        _ => -errno::EPROTO,
    }
}

/// SET_CONFIG request record
pub fn encode_set_config(value: u8) -> Vec<u8> {
    vec![value]
}

/// SELECT_INTERFACE request record
pub fn encode_select_interface(interface: u8, alt_setting: u8) -> Vec<u8> {
    vec![interface, alt_setting]
}

/// CLEAR_ENDPOINT request record; takes the raw endpoint address
pub fn encode_clear_endpoint(endpoint: u8) -> Vec<u8> {
    vec![endpoint]
}

/// ABORT_ENDPOINT request record; takes the raw endpoint address
pub fn encode_abort_endpoint(endpoint: u8) -> Vec<u8> {
    vec![endpoint]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip() {
        let mut urb = UrbHeader::new(2, TransferKind::Bulk, Direction::In, true);
        urb.status = XFER_STALL;
        let payload_in = [0xaa; 32];
        let block = urb.encode_block(&payload_in);

        assert_eq!(block.len(), URB_HEADER_SIZE + 32);
        let decoded = UrbHeader::decode(&block);
        assert_eq!(decoded.endpoint, 2);
        assert_eq!(decoded.kind, TransferKind::Bulk);
        assert_eq!(decoded.direction, Direction::In);
        assert!(decoded.short_ok);
        assert_eq!(decoded.status, XFER_STALL);
        assert_eq!(decoded.length, 32);
        assert_eq!(payload(&block), &payload_in);
    }

    #[test]
    fn test_iso_slots_roundtrip() {
        let mut urb = UrbHeader::new(3, TransferKind::Isochronous, Direction::Out, false);
        urb.packets = vec![
            UrbIsoSlot {
                length: 100,
                offset: 0,
                status: 0,
            },
            UrbIsoSlot {
                length: 200,
                offset: 100,
                status: XFER_CRC as u16,
            },
        ];
        let block = urb.encode_block(&[0u8; 300]);
        let decoded = UrbHeader::decode(&block);
        assert_eq!(decoded.packets, urb.packets);
    }

    #[test]
    fn test_decode_clamps_packet_count() {
        let urb = UrbHeader::new(1, TransferKind::Isochronous, Direction::In, false);
        let mut block = urb.encode_block(&[]);
        // corrupt packet count beyond the inline array
        LittleEndian::write_u32(&mut block[12..16], 1000);
        assert_eq!(UrbHeader::decode(&block).packets.len(), URB_MAX_ISO_PACKETS);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_to_errno(XFER_OK), 0);
        assert_eq!(status_to_errno(XFER_STALL), -32);
        assert_eq!(status_to_errno(XFER_DNR), -62);
        assert_eq!(status_to_errno(XFER_CRC), -84);
        assert_eq!(status_to_errno(XFER_DATA_OVERRUN), -75);
        assert_eq!(status_to_errno(XFER_DATA_UNDERRUN), -121);
        assert_eq!(status_to_errno(XFER_DISCONNECTED), -19);
        assert_eq!(status_to_errno(99), -71);
    }
}
