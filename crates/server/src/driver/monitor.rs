//! Monitor device node backend
//!
//! The real `DeviceChannel`. Ioctls on the device node block, so they run on
//! a small pool of dedicated worker threads; submissions travel over an
//! async-channel queue and completions come back on oneshot channels. Any
//! number of URBs may be queued; the pool size bounds how many the driver
//! sees concurrently.

use std::fs::OpenOptions;
use std::os::fd::{AsRawFd, OwnedFd};
use std::path::Path;
use std::sync::Arc;

use nix::{ioctl_readwrite_buf, ioctl_write_buf};
use tokio::sync::oneshot;
use tracing::{debug, error};

use super::channel::{ChannelError, DeviceChannel, DriverIoctl, IoctlCode, IoctlCompletion};

const USBMON_IOC_MAGIC: u8 = b'U';

ioctl_readwrite_buf!(usbmon_send_urb, USBMON_IOC_MAGIC, 0x01, u8);
ioctl_write_buf!(usbmon_set_config, USBMON_IOC_MAGIC, 0x02, u8);
ioctl_write_buf!(usbmon_select_interface, USBMON_IOC_MAGIC, 0x03, u8);
ioctl_write_buf!(usbmon_clear_endpoint, USBMON_IOC_MAGIC, 0x04, u8);
ioctl_write_buf!(usbmon_abort_endpoint, USBMON_IOC_MAGIC, 0x05, u8);

struct WorkItem {
    req: DriverIoctl,
    done: oneshot::Sender<Result<IoctlCompletion, ChannelError>>,
}

/// Handle to one captured device's monitor node
///
/// Cloning shares the node and worker pool; the node is closed when the last
/// clone and all workers are gone. The driver faults any URBs still in
/// flight when the node closes.
#[derive(Clone)]
pub struct MonitorChannel {
    tx: async_channel::Sender<WorkItem>,
}

impl MonitorChannel {
    /// Open a monitor device node and start its worker pool
    pub fn open(path: &Path, workers: usize) -> std::io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let fd: Arc<OwnedFd> = Arc::new(file.into());
        let (tx, rx) = async_channel::bounded::<WorkItem>(256);

        for i in 0..workers.max(1) {
            let fd = fd.clone();
            let rx = rx.clone();
            std::thread::Builder::new()
                .name(format!("usb-ioctl-{i}"))
                .spawn(move || worker_loop(fd, rx))
                .map_err(std::io::Error::other)?;
        }

        debug!("opened monitor node {}", path.display());
        Ok(Self { tx })
    }
}

impl DeviceChannel for MonitorChannel {
    async fn submit_ioctl(&self, req: DriverIoctl) -> Result<IoctlCompletion, ChannelError> {
        let (done, completion) = oneshot::channel();
        self.tx
            .send(WorkItem { req, done })
            .await
            .map_err(|_| ChannelError::Closed)?;
        completion.await.map_err(|_| ChannelError::Closed)?
    }
}

fn worker_loop(fd: Arc<OwnedFd>, rx: async_channel::Receiver<WorkItem>) {
    while let Ok(item) = rx.recv_blocking() {
        // a panic here would take the whole pool's queue down with it
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            perform_ioctl(&fd, item.req)
        }));
        let result = match result {
            Ok(res) => res,
            Err(panic) => {
                error!("panic in ioctl worker: {:?}", panic);
                Err(ChannelError::Closed)
            }
        };
        // receiver gone means the session died first; nothing to deliver
        let _ = item.done.send(result);
    }
}

fn perform_ioctl(fd: &OwnedFd, req: DriverIoctl) -> Result<IoctlCompletion, ChannelError> {
    let mut data = req.data;
    let raw = fd.as_raw_fd();
    let produced = match req.code {
        IoctlCode::SendUrb => unsafe { usbmon_send_urb(raw, &mut data) },
        IoctlCode::SetConfig => unsafe { usbmon_set_config(raw, &data) },
        IoctlCode::SelectInterface => unsafe { usbmon_select_interface(raw, &data) },
        IoctlCode::ClearEndpoint => unsafe { usbmon_clear_endpoint(raw, &data) },
        IoctlCode::AbortEndpoint => unsafe { usbmon_abort_endpoint(raw, &data) },
    }
    .map_err(|errno| ChannelError::Os(errno as i32))?;

    let produced = produced.max(0) as usize;
    if req.exact_output && produced != req.output_len {
        return Err(ChannelError::ShortOutput {
            produced,
            expected: req.output_len,
        });
    }
    Ok(IoctlCompletion { data, produced })
}
