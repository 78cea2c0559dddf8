//! Unlink engine
//!
//! CMD_UNLINK cancels one in-flight submit. Removing the pending entry is
//! the commit point: if the entry was still there, this side owns the reply
//! and the URB's eventual completion stays silent; if it was gone, the
//! submit already answered and the unlink reports nothing to cancel.

use protocol::{errno, CmdUnlink, HeaderBasic, RetUnlink};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use super::{Session, SessionError};
use crate::driver::{urb, DeviceChannel, DriverIoctl, IoctlCode};

impl<C, R, W> Session<C, R, W>
where
    C: DeviceChannel,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) async fn handle_unlink(
        &mut self,
        basic: HeaderBasic,
        unlink: CmdUnlink,
    ) -> Result<(), SessionError> {
        let cancelled = self.pending.remove(unlink.unlink_seqnum);
        if let Some(endpoint) = cancelled {
            debug!(
                seqnum = unlink.unlink_seqnum,
                endpoint, "unlinking pending submit"
            );
            // aborting the pipe is the only cancellation the driver offers;
            // it fails every URB queued on that endpoint
            self.channel
                .submit_ioctl(DriverIoctl::input_only(
                    IoctlCode::AbortEndpoint,
                    urb::encode_abort_endpoint(endpoint),
                ))
                .await?;
        }

        let status = if cancelled.is_some() {
            -errno::ECONNRESET
        } else {
            0
        };
        let header = RetUnlink { status }.encode(basic.seqnum);
        self.writer
            .send(&header, None, None)
            .await
            .map_err(SessionError::Stream)
    }
}
