//! USB domain types
//!
//! Setup packets and the standard requests the session engine traps, plus
//! the configuration topology (configurations, interfaces, alternate
//! settings, endpoints) that drives endpoint classification.

/// Transfer direction, host-relative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Out,
    In,
}

impl Direction {
    /// Direction encoded in bit 7 of an endpoint address
    pub fn from_endpoint_address(address: u8) -> Self {
        if address & 0x80 != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// USB transfer type of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl TransferKind {
    /// Decode bmAttributes bits 1:0 of an endpoint descriptor
    pub fn from_attributes(bm_attributes: u8) -> Self {
        match bm_attributes & 0x03 {
            0 => TransferKind::Control,
            1 => TransferKind::Isochronous,
            2 => TransferKind::Bulk,
            _ => TransferKind::Interrupt,
        }
    }
}

/// bRequest: SET_CONFIGURATION
pub const REQUEST_SET_CONFIGURATION: u8 = 9;
/// bRequest: SET_INTERFACE
pub const REQUEST_SET_INTERFACE: u8 = 11;
/// bRequest: CLEAR_FEATURE
pub const REQUEST_CLEAR_FEATURE: u8 = 1;
/// wValue for CLEAR_FEATURE targeting a halted endpoint
pub const FEATURE_ENDPOINT_HALT: u16 = 0;

/// bmRequestType: standard request to the device
pub const RT_STANDARD_DEVICE_OUT: u8 = 0x00;
/// bmRequestType: standard request to an interface
pub const RT_STANDARD_INTERFACE_OUT: u8 = 0x01;
/// bmRequestType: standard request to an endpoint
pub const RT_STANDARD_ENDPOINT_OUT: u8 = 0x02;

/// A decoded 8-byte control setup packet
///
/// Multi-byte fields are little-endian on the bus, unlike the USB/IP
/// framing around them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    pub fn from_bytes(bytes: &[u8; 8]) -> Self {
        Self {
            request_type: bytes[0],
            request: bytes[1],
            value: u16::from_le_bytes([bytes[2], bytes[3]]),
            index: u16::from_le_bytes([bytes[4], bytes[5]]),
            length: u16::from_le_bytes([bytes[6], bytes[7]]),
        }
    }

    pub fn to_bytes(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        let index = self.index.to_le_bytes();
        let length = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            value[0],
            value[1],
            index[0],
            index[1],
            length[0],
            length[1],
        ]
    }

    /// True when the data phase is device-to-host
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

/// One endpoint of an alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointInfo {
    /// Endpoint address including the direction bit
    pub address: u8,
    pub kind: TransferKind,
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltSetting {
    pub alt: u8,
    pub class: u8,
    pub subclass: u8,
    pub protocol: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// One interface of a configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    pub number: u8,
    pub alt_settings: Vec<AltSetting>,
}

/// One device configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigurationInfo {
    /// bConfigurationValue selected by SET_CONFIGURATION
    pub value: u8,
    pub interfaces: Vec<InterfaceInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_packet_roundtrip() {
        let setup = SetupPacket {
            request_type: 0x21,
            request: 0x09,
            value: 0x0200,
            index: 0x0001,
            length: 8,
        };
        assert_eq!(SetupPacket::from_bytes(&setup.to_bytes()), setup);
    }

    #[test]
    fn test_setup_packet_little_endian_words() {
        // SET_CONFIGURATION(2): wValue 0x0002 little-endian
        let setup = SetupPacket::from_bytes(&[0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(setup.request, REQUEST_SET_CONFIGURATION);
        assert_eq!(setup.value, 2);
        assert!(!setup.is_in());
    }

    #[test]
    fn test_transfer_kind_from_attributes() {
        assert_eq!(TransferKind::from_attributes(0x00), TransferKind::Control);
        assert_eq!(
            TransferKind::from_attributes(0x05),
            TransferKind::Isochronous
        );
        assert_eq!(TransferKind::from_attributes(0x02), TransferKind::Bulk);
        assert_eq!(TransferKind::from_attributes(0x03), TransferKind::Interrupt);
    }

    #[test]
    fn test_direction_from_address() {
        assert_eq!(Direction::from_endpoint_address(0x81), Direction::In);
        assert_eq!(Direction::from_endpoint_address(0x01), Direction::Out);
    }
}
