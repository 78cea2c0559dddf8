//! The async ioctl primitive
//!
//! A `DeviceChannel` accepts ioctl submissions and completes them
//! asynchronously; any number may be outstanding at once. The session engine
//! is generic over this trait so tests can substitute a scripted channel for
//! the monitor driver.

use std::future::Future;

use thiserror::Error;

/// Request codes understood by the monitor driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCode {
    /// Submit a URB; the driver writes completion fields back into the block
    SendUrb,
    /// Select a device configuration
    SetConfig,
    /// Select an interface alternate setting
    SelectInterface,
    /// Clear a halted endpoint
    ClearEndpoint,
    /// Abort all URBs queued on an endpoint pipe
    AbortEndpoint,
}

/// One ioctl submission
///
/// `data` is the input block. For in/out requests the driver writes its
/// completion back into the first `output_len` bytes of the same block, so
/// there is nothing to correlate at completion time beyond what the caller
/// already holds.
#[derive(Debug)]
pub struct DriverIoctl {
    pub code: IoctlCode,
    pub data: Vec<u8>,
    /// Bytes of `data` the driver may write back; 0 for input-only requests
    pub output_len: usize,
    /// Treat a short write-back as a protocol violation
    pub exact_output: bool,
}

impl DriverIoctl {
    /// An input-only request (configuration and abort ioctls)
    pub fn input_only(code: IoctlCode, data: Vec<u8>) -> Self {
        Self {
            code,
            data,
            output_len: 0,
            exact_output: false,
        }
    }

    /// An in/out request whose whole block is the write-back area
    pub fn in_out(code: IoctlCode, data: Vec<u8>) -> Self {
        let output_len = data.len();
        Self {
            code,
            data,
            output_len,
            exact_output: false,
        }
    }
}

/// A completed ioctl
#[derive(Debug)]
pub struct IoctlCompletion {
    /// The submission block, with any driver write-back applied
    pub data: Vec<u8>,
    /// Bytes the driver actually produced
    pub produced: usize,
}

/// Hard channel failures
///
/// These are distinct from in-band URB errors, which the driver reports in
/// the URB record itself. A `ChannelError` means the driver or the node is
/// gone and the session cannot continue.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("driver ioctl failed with errno {0}")]
    Os(i32),

    #[error("driver produced {produced} bytes, expected {expected}")]
    ShortOutput { produced: usize, expected: usize },

    #[error("device channel closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Asynchronous handle to the monitor driver for one device
pub trait DeviceChannel: Clone + Send + Sync + 'static {
    /// Submit an ioctl and await its completion
    fn submit_ioctl(
        &self,
        req: DriverIoctl,
    ) -> impl Future<Output = Result<IoctlCompletion, ChannelError>> + Send;
}
