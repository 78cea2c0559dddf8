//! Exported device registry
//!
//! Devices are declared in the configuration; at startup each one is probed
//! through its monitor node for its device and configuration descriptors.
//! The registry answers devlist and import lookups and enforces one client
//! per device.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{bail, Context, Result};
use common::usb::{ConfigurationInfo, Direction, SetupPacket, TransferKind};
use protocol::{DeviceRecord, InterfaceRecord};
use tracing::debug;

use crate::config::ExportEntry;
use crate::driver::urb::{self, UrbHeader};
use crate::driver::{DeviceChannel, DriverIoctl, IoctlCode, MonitorChannel};
use crate::usb::descriptor::{self, DeviceIdentity};

const REQUEST_GET_DESCRIPTOR: u8 = 6;
const DESCRIPTOR_TYPE_DEVICE: u8 = 1;
const DESCRIPTOR_TYPE_CONFIGURATION: u8 = 2;
const SETUP_SIZE: usize = 8;

/// One device offered for export
#[derive(Debug, Clone)]
pub struct ExportedDevice {
    pub busid: String,
    /// Monitor driver node for this device
    pub node: PathBuf,
    pub busnum: u32,
    pub devnum: u32,
    pub speed: u32,
    pub identity: DeviceIdentity,
    pub configurations: Vec<ConfigurationInfo>,
}

impl ExportedDevice {
    /// USB/IP device id: busnum in the high half, devnum in the low
    pub fn devid(&self) -> u32 {
        self.busnum << 16 | self.devnum
    }

    /// bConfigurationValue a fresh session starts from
    pub fn configuration_value(&self) -> u8 {
        self.configurations.first().map(|c| c.value).unwrap_or(0)
    }

    /// Wire record for devlist and import replies
    pub fn device_record(&self) -> DeviceRecord {
        DeviceRecord {
            path: self.node.display().to_string(),
            busid: self.busid.clone(),
            busnum: self.busnum,
            devnum: self.devnum,
            speed: self.speed,
            id_vendor: self.identity.id_vendor,
            id_product: self.identity.id_product,
            bcd_device: self.identity.bcd_device,
            device_class: self.identity.device_class,
            device_subclass: self.identity.device_subclass,
            device_protocol: self.identity.device_protocol,
            configuration_value: self.configuration_value(),
            num_configurations: self.identity.num_configurations,
            num_interfaces: self
                .configurations
                .first()
                .map(|c| c.interfaces.len() as u8)
                .unwrap_or(0),
        }
    }

    /// Per-interface wire records for the devlist reply
    pub fn interface_records(&self) -> Vec<InterfaceRecord> {
        let Some(config) = self.configurations.first() else {
            return Vec::new();
        };
        config
            .interfaces
            .iter()
            .filter_map(|interface| interface.alt_settings.first())
            .map(|alt| InterfaceRecord {
                interface_class: alt.class,
                interface_subclass: alt.subclass,
                interface_protocol: alt.protocol,
            })
            .collect()
    }
}

/// The set of exportable devices plus their claim state
pub struct Registry {
    devices: Vec<ExportedDevice>,
    claimed: Mutex<HashSet<String>>,
}

impl Registry {
    pub fn new(devices: Vec<ExportedDevice>) -> Self {
        Self {
            devices,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn devices(&self) -> &[ExportedDevice] {
        &self.devices
    }

    pub fn find(&self, busid: &str) -> Option<&ExportedDevice> {
        self.devices.iter().find(|d| d.busid == busid)
    }

    /// Claim a device for one session; false if another client holds it
    pub fn claim(&self, busid: &str) -> bool {
        self.claimed
            .lock()
            .expect("claim set lock poisoned")
            .insert(busid.to_string())
    }

    pub fn release(&self, busid: &str) {
        self.claimed
            .lock()
            .expect("claim set lock poisoned")
            .remove(busid);
    }
}

/// Open an export's monitor node and probe its descriptors
pub async fn probe_export(entry: &ExportEntry, worker_threads: usize) -> Result<ExportedDevice> {
    let channel = MonitorChannel::open(&entry.node, worker_threads)
        .with_context(|| format!("failed to open monitor node {}", entry.node.display()))?;
    probe_device(&channel, entry).await
}

/// Build an `ExportedDevice` by reading descriptors through the channel
///
/// Uses the same SEND_URB path a session uses, so a device that cannot
/// answer GET_DESCRIPTOR is rejected before it is ever offered.
pub async fn probe_device<C: DeviceChannel>(
    channel: &C,
    entry: &ExportEntry,
) -> Result<ExportedDevice> {
    let device_bytes = get_descriptor(channel, DESCRIPTOR_TYPE_DEVICE, 0, 18).await?;
    let identity = descriptor::parse_device(&device_bytes)
        .with_context(|| format!("bad device descriptor from {}", entry.busid))?;

    let mut configurations = Vec::with_capacity(identity.num_configurations as usize);
    for index in 0..identity.num_configurations {
        let prefix = get_descriptor(channel, DESCRIPTOR_TYPE_CONFIGURATION, index, 9).await?;
        let total = descriptor::total_length(&prefix)
            .with_context(|| format!("bad configuration descriptor from {}", entry.busid))?;
        let full = get_descriptor(channel, DESCRIPTOR_TYPE_CONFIGURATION, index, total).await?;
        configurations.push(
            descriptor::parse_configuration(&full)
                .with_context(|| format!("bad configuration descriptor from {}", entry.busid))?,
        );
    }
    debug!(
        "probed device {}: {:04x}:{:04x}, {} configuration(s)",
        entry.busid,
        identity.id_vendor,
        identity.id_product,
        configurations.len()
    );

    Ok(ExportedDevice {
        busid: entry.busid.clone(),
        node: entry.node.clone(),
        busnum: entry.busnum,
        devnum: entry.devnum,
        speed: entry.speed,
        identity,
        configurations,
    })
}

async fn get_descriptor<C: DeviceChannel>(
    channel: &C,
    descriptor_type: u8,
    index: u8,
    length: u16,
) -> Result<Vec<u8>> {
    let setup = SetupPacket {
        request_type: 0x80,
        request: REQUEST_GET_DESCRIPTOR,
        value: u16::from(descriptor_type) << 8 | u16::from(index),
        index: 0,
        length,
    };
    let mut buffer = vec![0u8; SETUP_SIZE + length as usize];
    buffer[..SETUP_SIZE].copy_from_slice(&setup.to_bytes());

    let block = UrbHeader::new(0, TransferKind::Control, Direction::In, true).encode_block(&buffer);
    let completion = channel
        .submit_ioctl(DriverIoctl::in_out(IoctlCode::SendUrb, block))
        .await?;
    let header = UrbHeader::decode(&completion.data);
    if header.status != urb::XFER_OK {
        bail!(
            "GET_DESCRIPTOR({descriptor_type}, {index}) failed with driver status {}",
            header.status
        );
    }
    let data = urb::payload(&completion.data);
    let actual = (header.length as usize)
        .min(data.len())
        .saturating_sub(SETUP_SIZE);
    Ok(data[SETUP_SIZE..SETUP_SIZE + actual].to_vec())
}
