//! Monitor driver interface
//!
//! The kernel USB monitor driver exposes one device node per captured
//! device; everything the server does to a device goes through ioctls on
//! that node. `channel` defines the async ioctl primitive the rest of the
//! server is written against, `urb` the driver's little-endian record
//! layouts, and `monitor` the real device-node backend.

pub mod channel;
pub mod monitor;
pub mod urb;

pub use channel::{ChannelError, DeviceChannel, DriverIoctl, IoctlCode, IoctlCompletion};
pub use monitor::MonitorChannel;
