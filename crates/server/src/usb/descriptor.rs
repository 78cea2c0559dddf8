//! Standard descriptor parsing
//!
//! Just enough of the USB descriptor format to build the configuration
//! topology the classifier and the attach handshake need: device identity,
//! interfaces with their alternate settings, and endpoint transfer types.
//! Class-specific descriptors are skipped, not interpreted.

use common::usb::{AltSetting, ConfigurationInfo, EndpointInfo, InterfaceInfo, TransferKind};
use thiserror::Error;

const DT_DEVICE: u8 = 1;
const DT_CONFIGURATION: u8 = 2;
const DT_INTERFACE: u8 = 4;
const DT_ENDPOINT: u8 = 5;

const DEVICE_DESCRIPTOR_LEN: usize = 18;
const CONFIGURATION_DESCRIPTOR_LEN: usize = 9;
const INTERFACE_DESCRIPTOR_LEN: usize = 9;
const ENDPOINT_DESCRIPTOR_LEN: usize = 7;

#[derive(Debug, Error)]
pub enum DescriptorError {
    #[error("descriptor truncated at offset {0}")]
    Truncated(usize),

    #[error("expected descriptor type {expected:#04x}, found {found:#04x}")]
    UnexpectedType { expected: u8, found: u8 },

    #[error("descriptor has invalid bLength {0}")]
    InvalidLength(u8),
}

/// Identity fields of a device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub num_configurations: u8,
}

/// Parse an 18-byte device descriptor
pub fn parse_device(bytes: &[u8]) -> Result<DeviceIdentity, DescriptorError> {
    if bytes.len() < DEVICE_DESCRIPTOR_LEN {
        return Err(DescriptorError::Truncated(bytes.len()));
    }
    if bytes[1] != DT_DEVICE {
        return Err(DescriptorError::UnexpectedType {
            expected: DT_DEVICE,
            found: bytes[1],
        });
    }
    Ok(DeviceIdentity {
        id_vendor: u16::from_le_bytes([bytes[8], bytes[9]]),
        id_product: u16::from_le_bytes([bytes[10], bytes[11]]),
        bcd_device: u16::from_le_bytes([bytes[12], bytes[13]]),
        device_class: bytes[4],
        device_subclass: bytes[5],
        device_protocol: bytes[6],
        num_configurations: bytes[17],
    })
}

/// wTotalLength of a configuration from its 9-byte prefix
pub fn total_length(bytes: &[u8]) -> Result<u16, DescriptorError> {
    if bytes.len() < CONFIGURATION_DESCRIPTOR_LEN {
        return Err(DescriptorError::Truncated(bytes.len()));
    }
    if bytes[1] != DT_CONFIGURATION {
        return Err(DescriptorError::UnexpectedType {
            expected: DT_CONFIGURATION,
            found: bytes[1],
        });
    }
    Ok(u16::from_le_bytes([bytes[2], bytes[3]]))
}

/// Parse a full configuration descriptor stream
///
/// `bytes` is the wTotalLength-sized blob: the configuration descriptor
/// followed by interleaved interface, endpoint, and class-specific
/// descriptors in bus order.
pub fn parse_configuration(bytes: &[u8]) -> Result<ConfigurationInfo, DescriptorError> {
    total_length(bytes)?;
    let value = bytes[5];

    let mut interfaces: Vec<InterfaceInfo> = Vec::new();
    let mut current: Option<AltSetting> = None;
    let mut current_number = 0u8;

    let mut offset = bytes[0] as usize;
    while offset < bytes.len() {
        let remaining = &bytes[offset..];
        if remaining.len() < 2 {
            return Err(DescriptorError::Truncated(offset));
        }
        let len = remaining[0] as usize;
        if len < 2 || len > remaining.len() {
            return Err(DescriptorError::InvalidLength(remaining[0]));
        }
        match remaining[1] {
            DT_INTERFACE => {
                if len < INTERFACE_DESCRIPTOR_LEN {
                    return Err(DescriptorError::InvalidLength(remaining[0]));
                }
                finish_alt_setting(&mut interfaces, current.take(), current_number);
                current_number = remaining[2];
                current = Some(AltSetting {
                    alt: remaining[3],
                    class: remaining[5],
                    subclass: remaining[6],
                    protocol: remaining[7],
                    endpoints: Vec::new(),
                });
            }
            DT_ENDPOINT => {
                if len < ENDPOINT_DESCRIPTOR_LEN {
                    return Err(DescriptorError::InvalidLength(remaining[0]));
                }
                if let Some(alt) = current.as_mut() {
                    alt.endpoints.push(EndpointInfo {
                        address: remaining[2],
                        kind: TransferKind::from_attributes(remaining[3]),
                    });
                }
            }
            // class- and vendor-specific descriptors are opaque here
            _ => {}
        }
        offset += len;
    }
    finish_alt_setting(&mut interfaces, current.take(), current_number);

    Ok(ConfigurationInfo { value, interfaces })
}

fn finish_alt_setting(
    interfaces: &mut Vec<InterfaceInfo>,
    alt: Option<AltSetting>,
    number: u8,
) {
    let Some(alt) = alt else { return };
    if let Some(interface) = interfaces.iter_mut().find(|i| i.number == number) {
        interface.alt_settings.push(alt);
    } else {
        interfaces.push(InterfaceInfo {
            number,
            alt_settings: vec![alt],
        });
    }
}
