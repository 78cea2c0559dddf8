//! Stage-1 attach operations
//!
//! Before any URB traffic, the client either asks for the export list
//! (OP_REQ_DEVLIST) or claims one device by bus id (OP_REQ_IMPORT). Both
//! exchanges share an 8-byte operation header; device and interface records
//! use fixed-width NUL-padded fields.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{ProtocolError, Result};

/// Protocol version announced in every stage-1 header
pub const USBIP_VERSION: u16 = 0x0111;

pub const OP_REQ_DEVLIST: u16 = 0x8005;
pub const OP_REP_DEVLIST: u16 = 0x0005;
pub const OP_REQ_IMPORT: u16 = 0x8003;
pub const OP_REP_IMPORT: u16 = 0x0003;

/// Operation completed
pub const ST_OK: u32 = 0;
/// Device not available
pub const ST_NA: u32 = 1;

/// Size of the stage-1 operation header
pub const OP_HEADER_SIZE: usize = 8;

/// Size of the fixed busid field in OP_REQ_IMPORT
pub const BUSID_SIZE: usize = 32;

/// Size of an exported-device record
pub const DEVICE_RECORD_SIZE: usize = 312;

/// Size of a per-interface record in OP_REP_DEVLIST
pub const INTERFACE_RECORD_SIZE: usize = 4;

/// Common header of every stage-1 message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpHeader {
    pub version: u16,
    pub code: u16,
    pub status: u32,
}

impl OpHeader {
    /// Build a reply header for `code` with the given status
    pub fn reply(code: u16, status: u32) -> Self {
        Self {
            version: USBIP_VERSION,
            code,
            status,
        }
    }

    pub fn decode(buf: &[u8; OP_HEADER_SIZE]) -> Self {
        Self {
            version: BigEndian::read_u16(&buf[0..2]),
            code: BigEndian::read_u16(&buf[2..4]),
            status: BigEndian::read_u32(&buf[4..8]),
        }
    }

    pub fn encode(&self) -> [u8; OP_HEADER_SIZE] {
        let mut buf = [0u8; OP_HEADER_SIZE];
        BigEndian::write_u16(&mut buf[0..2], self.version);
        BigEndian::write_u16(&mut buf[2..4], self.code);
        BigEndian::write_u32(&mut buf[4..8], self.status);
        buf
    }

    /// Reject requests from clients speaking an unknown protocol version
    pub fn check_version(&self) -> Result<()> {
        if self.version != USBIP_VERSION {
            return Err(ProtocolError::VersionMismatch {
                got: self.version,
                expected: USBIP_VERSION,
            });
        }
        Ok(())
    }
}

/// Exported-device record in OP_REP_DEVLIST and OP_REP_IMPORT
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Host-side device path, informational only
    pub path: String,
    /// Bus id the client claims the device by
    pub busid: String,
    pub busnum: u32,
    pub devnum: u32,
    /// USB speed code (1=low, 2=full, 3=high, 5=super)
    pub speed: u32,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub configuration_value: u8,
    pub num_configurations: u8,
    pub num_interfaces: u8,
}

impl DeviceRecord {
    pub fn encode(&self) -> [u8; DEVICE_RECORD_SIZE] {
        let mut buf = [0u8; DEVICE_RECORD_SIZE];
        write_padded(&mut buf[0..256], &self.path);
        write_padded(&mut buf[256..288], &self.busid);
        BigEndian::write_u32(&mut buf[288..292], self.busnum);
        BigEndian::write_u32(&mut buf[292..296], self.devnum);
        BigEndian::write_u32(&mut buf[296..300], self.speed);
        BigEndian::write_u16(&mut buf[300..302], self.id_vendor);
        BigEndian::write_u16(&mut buf[302..304], self.id_product);
        BigEndian::write_u16(&mut buf[304..306], self.bcd_device);
        buf[306] = self.device_class;
        buf[307] = self.device_subclass;
        buf[308] = self.device_protocol;
        buf[309] = self.configuration_value;
        buf[310] = self.num_configurations;
        buf[311] = self.num_interfaces;
        buf
    }

    pub fn decode(buf: &[u8; DEVICE_RECORD_SIZE]) -> Self {
        Self {
            path: read_padded(&buf[0..256]),
            busid: read_padded(&buf[256..288]),
            busnum: BigEndian::read_u32(&buf[288..292]),
            devnum: BigEndian::read_u32(&buf[292..296]),
            speed: BigEndian::read_u32(&buf[296..300]),
            id_vendor: BigEndian::read_u16(&buf[300..302]),
            id_product: BigEndian::read_u16(&buf[302..304]),
            bcd_device: BigEndian::read_u16(&buf[304..306]),
            device_class: buf[306],
            device_subclass: buf[307],
            device_protocol: buf[308],
            configuration_value: buf[309],
            num_configurations: buf[310],
            num_interfaces: buf[311],
        }
    }
}

/// Per-interface record following a device record in OP_REP_DEVLIST
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceRecord {
    pub interface_class: u8,
    pub interface_subclass: u8,
    pub interface_protocol: u8,
}

impl InterfaceRecord {
    pub fn encode(&self) -> [u8; INTERFACE_RECORD_SIZE] {
        [
            self.interface_class,
            self.interface_subclass,
            self.interface_protocol,
            0,
        ]
    }
}

/// Decode the fixed busid field of OP_REQ_IMPORT
pub fn decode_busid(buf: &[u8; BUSID_SIZE]) -> String {
    read_padded(buf)
}

/// Encode a busid into its fixed field (client side, used by tests)
pub fn encode_busid(busid: &str) -> [u8; BUSID_SIZE] {
    let mut buf = [0u8; BUSID_SIZE];
    write_padded(&mut buf, busid);
    buf
}

fn write_padded(buf: &mut [u8], s: &str) {
    // keep one trailing NUL even for max-length strings
    let n = s.len().min(buf.len() - 1);
    buf[..n].copy_from_slice(&s.as_bytes()[..n]);
}

fn read_padded(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_header_roundtrip() {
        let hdr = OpHeader::reply(OP_REP_IMPORT, ST_OK);
        let buf = hdr.encode();
        assert_eq!(OpHeader::decode(&buf), hdr);
    }

    #[test]
    fn test_op_header_version_check() {
        let hdr = OpHeader {
            version: 0x0106,
            code: OP_REQ_DEVLIST,
            status: 0,
        };
        assert!(matches!(
            hdr.check_version(),
            Err(ProtocolError::VersionMismatch { got: 0x0106, .. })
        ));
    }

    #[test]
    fn test_device_record_roundtrip() {
        let record = DeviceRecord {
            path: "/sys/devices/usb1/1-2".into(),
            busid: "1-2".into(),
            busnum: 1,
            devnum: 5,
            speed: 3,
            id_vendor: 0x1234,
            id_product: 0x5678,
            bcd_device: 0x0100,
            device_class: 0,
            device_subclass: 0,
            device_protocol: 0,
            configuration_value: 1,
            num_configurations: 1,
            num_interfaces: 2,
        };
        let buf = record.encode();
        assert_eq!(DeviceRecord::decode(&buf), record);
    }

    #[test]
    fn test_busid_padding() {
        let buf = encode_busid("3-4.1");
        assert_eq!(buf.len(), BUSID_SIZE);
        assert_eq!(decode_busid(&buf), "3-4.1");
    }

    #[test]
    fn test_interface_record_layout() {
        let rec = InterfaceRecord {
            interface_class: 0x08,
            interface_subclass: 0x06,
            interface_protocol: 0x50,
        };
        assert_eq!(rec.encode(), [0x08, 0x06, 0x50, 0x00]);
    }
}
