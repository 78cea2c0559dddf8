//! Stage-2 USB/IP message headers
//!
//! Every stage-2 message is a 48-byte header: a 20-byte basic block shared by
//! all commands, then a 28-byte command-specific area. The server only ever
//! decodes CMD_SUBMIT and CMD_UNLINK and encodes RET_SUBMIT and RET_UNLINK.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, Result};

/// Submit a USB request (URB)
pub const USBIP_CMD_SUBMIT: u32 = 0x0000_0001;
/// Unlink (cancel) a previously submitted URB
pub const USBIP_CMD_UNLINK: u32 = 0x0000_0002;
/// Reply to CMD_SUBMIT
pub const USBIP_RET_SUBMIT: u32 = 0x0000_0003;
/// Reply to CMD_UNLINK
pub const USBIP_RET_UNLINK: u32 = 0x0000_0004;

/// Host-to-device transfer
pub const USBIP_DIR_OUT: u32 = 0;
/// Device-to-host transfer
pub const USBIP_DIR_IN: u32 = 1;

/// transfer_flags bit: treat a short IN completion as an error
pub const USBIP_URB_SHORT_NOT_OK: u32 = 0x0000_0001;

/// Size of every stage-2 header on the wire
pub const HEADER_SIZE: usize = 48;

const BASIC_SIZE: usize = 20;

/// Fields common to all stage-2 messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderBasic {
    pub command: u32,
    /// Sequence number matching requests to replies
    pub seqnum: u32,
    /// Device ID (busnum << 16 | devnum)
    pub devid: u32,
    /// USBIP_DIR_OUT or USBIP_DIR_IN
    pub direction: u32,
    /// Endpoint number, 0-15, without the direction bit
    pub ep: u32,
}

impl HeaderBasic {
    fn decode(buf: &[u8]) -> Self {
        Self {
            command: BigEndian::read_u32(&buf[0..4]),
            seqnum: BigEndian::read_u32(&buf[4..8]),
            devid: BigEndian::read_u32(&buf[8..12]),
            direction: BigEndian::read_u32(&buf[12..16]),
            ep: BigEndian::read_u32(&buf[16..20]),
        }
    }

    fn encode(&self, buf: &mut [u8]) {
        BigEndian::write_u32(&mut buf[0..4], self.command);
        BigEndian::write_u32(&mut buf[4..8], self.seqnum);
        BigEndian::write_u32(&mut buf[8..12], self.devid);
        BigEndian::write_u32(&mut buf[12..16], self.direction);
        BigEndian::write_u32(&mut buf[16..20], self.ep);
    }

    /// True for device-to-host transfers
    pub fn is_in(&self) -> bool {
        self.direction == USBIP_DIR_IN
    }

    /// Raw endpoint address: endpoint number with the IN bit applied
    pub fn endpoint_address(&self) -> u8 {
        let ep = (self.ep & 0x0f) as u8;
        if self.is_in() { ep | 0x80 } else { ep }
    }
}

/// CMD_SUBMIT command-specific fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdSubmit {
    pub transfer_flags: u32,
    pub transfer_buffer_length: u32,
    /// Initial frame for isochronous transfers
    pub start_frame: u32,
    /// Number of iso packet descriptors following the payload
    pub number_of_packets: u32,
    /// Polling interval for interrupt/isochronous transfers
    pub interval: u32,
    /// Control setup packet, all zero for non-control transfers
    pub setup: [u8; 8],
}

impl CmdSubmit {
    fn decode(buf: &[u8]) -> Self {
        let mut setup = [0u8; 8];
        setup.copy_from_slice(&buf[20..28]);
        Self {
            transfer_flags: BigEndian::read_u32(&buf[0..4]),
            transfer_buffer_length: BigEndian::read_u32(&buf[4..8]),
            start_frame: BigEndian::read_u32(&buf[8..12]),
            number_of_packets: BigEndian::read_u32(&buf[12..16]),
            interval: BigEndian::read_u32(&buf[16..20]),
            setup,
        }
    }

    /// True when the client asked for a short IN completion to be an error
    pub fn short_not_ok(&self) -> bool {
        self.transfer_flags & USBIP_URB_SHORT_NOT_OK != 0
    }
}

/// CMD_UNLINK command-specific fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CmdUnlink {
    /// Sequence number of the submit to cancel
    pub unlink_seqnum: u32,
}

impl CmdUnlink {
    fn decode(buf: &[u8]) -> Self {
        Self {
            unlink_seqnum: BigEndian::read_u32(&buf[0..4]),
        }
    }
}

/// A decoded stage-2 command
#[derive(Debug, Clone, Copy)]
pub enum Command {
    Submit(HeaderBasic, CmdSubmit),
    Unlink(HeaderBasic, CmdUnlink),
}

impl Command {
    /// Decode a 48-byte stage-2 header
    ///
    /// Any command other than CMD_SUBMIT or CMD_UNLINK is a protocol
    /// violation.
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Result<Self> {
        let basic = HeaderBasic::decode(&buf[..BASIC_SIZE]);
        let rest = &buf[BASIC_SIZE..];
        match basic.command {
            USBIP_CMD_SUBMIT => Ok(Command::Submit(basic, CmdSubmit::decode(rest))),
            USBIP_CMD_UNLINK => Ok(Command::Unlink(basic, CmdUnlink::decode(rest))),
            other => Err(ProtocolError::UnknownCommand(other)),
        }
    }
}

/// RET_SUBMIT reply fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetSubmit {
    /// 0 on success, a negated errno otherwise
    pub status: i32,
    pub actual_length: u32,
    pub start_frame: u32,
    pub number_of_packets: u32,
    /// Number of iso packets that completed with a non-zero status
    pub error_count: u32,
}

impl RetSubmit {
    /// Encode a full 48-byte RET_SUBMIT header
    ///
    /// devid, direction, and ep are zeroed in replies; vhci matches on the
    /// sequence number alone.
    pub fn encode(&self, seqnum: u32) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        HeaderBasic {
            command: USBIP_RET_SUBMIT,
            seqnum,
            devid: 0,
            direction: 0,
            ep: 0,
        }
        .encode(&mut buf);
        BigEndian::write_i32(&mut buf[20..24], self.status);
        BigEndian::write_u32(&mut buf[24..28], self.actual_length);
        BigEndian::write_u32(&mut buf[28..32], self.start_frame);
        BigEndian::write_u32(&mut buf[32..36], self.number_of_packets);
        BigEndian::write_u32(&mut buf[36..40], self.error_count);
        buf
    }

    /// Decode the reply fields from a 48-byte header (used by tests)
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            status: BigEndian::read_i32(&buf[20..24]),
            actual_length: BigEndian::read_u32(&buf[24..28]),
            start_frame: BigEndian::read_u32(&buf[28..32]),
            number_of_packets: BigEndian::read_u32(&buf[32..36]),
            error_count: BigEndian::read_u32(&buf[36..40]),
        }
    }
}

/// RET_UNLINK reply fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetUnlink {
    /// -ECONNRESET if a pending submit was cancelled, 0 otherwise
    pub status: i32,
}

impl RetUnlink {
    /// Encode a full 48-byte RET_UNLINK header
    pub fn encode(&self, seqnum: u32) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        HeaderBasic {
            command: USBIP_RET_UNLINK,
            seqnum,
            devid: 0,
            direction: 0,
            ep: 0,
        }
        .encode(&mut buf);
        BigEndian::write_i32(&mut buf[20..24], self.status);
        buf
    }

    /// Decode the reply fields from a 48-byte header (used by tests)
    pub fn decode(buf: &[u8; HEADER_SIZE]) -> Self {
        Self {
            status: BigEndian::read_i32(&buf[20..24]),
        }
    }
}

/// Encode a CMD_SUBMIT header (client side of the exchange, used by tests)
pub fn encode_cmd_submit(basic: &HeaderBasic, cmd: &CmdSubmit) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    basic.encode(&mut buf);
    BigEndian::write_u32(&mut buf[20..24], cmd.transfer_flags);
    BigEndian::write_u32(&mut buf[24..28], cmd.transfer_buffer_length);
    BigEndian::write_u32(&mut buf[28..32], cmd.start_frame);
    BigEndian::write_u32(&mut buf[32..36], cmd.number_of_packets);
    BigEndian::write_u32(&mut buf[36..40], cmd.interval);
    buf[40..48].copy_from_slice(&cmd.setup);
    buf
}

/// Encode a CMD_UNLINK header (client side of the exchange, used by tests)
pub fn encode_cmd_unlink(basic: &HeaderBasic, unlink: &CmdUnlink) -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    basic.encode(&mut buf);
    BigEndian::write_u32(&mut buf[20..24], unlink.unlink_seqnum);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submit_basic(seqnum: u32) -> HeaderBasic {
        HeaderBasic {
            command: USBIP_CMD_SUBMIT,
            seqnum,
            devid: 0x0001_0002,
            direction: USBIP_DIR_IN,
            ep: 1,
        }
    }

    #[test]
    fn test_cmd_submit_roundtrip() {
        let basic = submit_basic(42);
        let cmd = CmdSubmit {
            transfer_flags: USBIP_URB_SHORT_NOT_OK,
            transfer_buffer_length: 512,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup: [0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00],
        };

        let buf = encode_cmd_submit(&basic, &cmd);
        let Command::Submit(b, c) = Command::decode(&buf).unwrap() else {
            panic!("expected CMD_SUBMIT");
        };
        assert_eq!(b, basic);
        assert_eq!(c, cmd);
        assert!(c.short_not_ok());
    }

    #[test]
    fn test_cmd_unlink_roundtrip() {
        let basic = HeaderBasic {
            command: USBIP_CMD_UNLINK,
            seqnum: 7,
            devid: 0,
            direction: USBIP_DIR_OUT,
            ep: 0,
        };
        let buf = encode_cmd_unlink(&basic, &CmdUnlink { unlink_seqnum: 3 });
        let Command::Unlink(b, u) = Command::decode(&buf).unwrap() else {
            panic!("expected CMD_UNLINK");
        };
        assert_eq!(b.seqnum, 7);
        assert_eq!(u.unlink_seqnum, 3);
    }

    #[test]
    fn test_unknown_command_rejected() {
        let mut buf = [0u8; HEADER_SIZE];
        BigEndian::write_u32(&mut buf[0..4], 0x0000_00ff);
        let err = Command::decode(&buf).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownCommand(0xff)));
    }

    #[test]
    fn test_ret_submit_encoding() {
        let ret = RetSubmit {
            status: -32,
            actual_length: 64,
            start_frame: 5,
            number_of_packets: 3,
            error_count: 1,
        };
        let buf = ret.encode(9);

        assert_eq!(BigEndian::read_u32(&buf[0..4]), USBIP_RET_SUBMIT);
        assert_eq!(BigEndian::read_u32(&buf[4..8]), 9);
        // devid/direction/ep are zero in replies
        assert_eq!(&buf[8..20], &[0u8; 12]);
        assert_eq!(RetSubmit::decode(&buf), ret);
    }

    #[test]
    fn test_ret_unlink_encoding() {
        let buf = RetUnlink { status: -104 }.encode(11);
        assert_eq!(BigEndian::read_u32(&buf[0..4]), USBIP_RET_UNLINK);
        assert_eq!(BigEndian::read_u32(&buf[4..8]), 11);
        assert_eq!(RetUnlink::decode(&buf).status, -104);
    }

    #[test]
    fn test_endpoint_address() {
        let mut basic = submit_basic(1);
        assert_eq!(basic.endpoint_address(), 0x81);
        basic.direction = USBIP_DIR_OUT;
        assert_eq!(basic.endpoint_address(), 0x01);
    }
}
