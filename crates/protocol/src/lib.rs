//! USB/IP wire protocol for usbipd
//!
//! This crate defines the on-wire format spoken between the server and the
//! `vhci-hcd` kernel driver on the client side. The protocol is documented in
//! the Linux kernel: drivers/usb/usbip/usbip_common.h
//!
//! # Protocol Overview
//!
//! USB/IP is a binary protocol over TCP with two stages:
//! - Stage 1 (attach): OP_REQ_DEVLIST / OP_REQ_IMPORT exchange, after which
//!   the connection is bound to one exported device.
//! - Stage 2 (URB traffic): CMD_SUBMIT / CMD_UNLINK from the client,
//!   RET_SUBMIT / RET_UNLINK from the server. Each message starts with a
//!   48-byte header; submits may carry a payload and, for isochronous
//!   endpoints, an array of 16-byte packet descriptors.
//!
//! All integers are big-endian (network byte order). Status fields carry
//! negated Linux errno values.

#[cfg(feature = "async")]
pub mod codec;
pub mod errno;
pub mod error;
pub mod header;
pub mod iso;
pub mod op;

pub use error::{ProtocolError, Result};
pub use header::{
    Command, CmdSubmit, CmdUnlink, HeaderBasic, RetSubmit, RetUnlink, HEADER_SIZE,
    USBIP_CMD_SUBMIT, USBIP_CMD_UNLINK, USBIP_DIR_IN, USBIP_DIR_OUT, USBIP_RET_SUBMIT,
    USBIP_RET_UNLINK, USBIP_URB_SHORT_NOT_OK,
};
pub use iso::{IsoPacket, ISO_DESCRIPTOR_SIZE, MAX_ISO_PACKET_LENGTH};
pub use op::{
    DeviceRecord, InterfaceRecord, OpHeader, OP_REP_DEVLIST, OP_REP_IMPORT, OP_REQ_DEVLIST,
    OP_REQ_IMPORT, ST_NA, ST_OK, USBIP_VERSION,
};

#[cfg(feature = "async")]
pub use codec::{read_command, read_exactly, read_iso_descriptors, read_op_header};
