//! Common utilities for usbipd
//!
//! This crate provides functionality shared across the workspace: the
//! layered error type, logging setup, and the USB domain types (setup
//! packets, transfer kinds, configuration topology) that both the session
//! engine and the attach handshake consume.

pub mod error;
pub mod logging;
pub mod usb;

pub use error::{Error, Result};
pub use logging::setup_logging;
pub use usb::{
    AltSetting, ConfigurationInfo, Direction, EndpointInfo, InterfaceInfo, SetupPacket,
    TransferKind,
};
