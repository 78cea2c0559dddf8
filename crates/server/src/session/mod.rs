//! Attached-client session engine
//!
//! Once a device is claimed and attached, a session multiplexes URBs between
//! the client stream and the monitor driver. The receive path is strictly
//! serial: one command is fully consumed (header, payload, iso descriptors)
//! before the next header is read. Execution fans out — each accepted submit
//! runs its ioctls on its own task and replies through the shared
//! `ReplyWriter` whenever it completes, so replies may leave in any order
//! but never interleave.
//!
//! The session ends on client EOF, on any protocol violation, or on a hard
//! driver failure. In-band URB errors are reported to the client and do not
//! end the session.

pub mod pending;
pub mod reply;
mod submit;
mod unlink;

use std::sync::Arc;

use protocol::{codec, Command, ProtocolError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::driver::{ChannelError, DeviceChannel};
use crate::usb::EndpointClassifier;
pub use pending::PendingTable;
pub use reply::ReplyWriter;

/// Why a session ended
#[derive(Debug, Error)]
pub enum SessionError {
    /// The client broke the wire contract; no reply is attempted
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A submit reused an in-flight sequence number
    #[error("duplicate sequence number {0}")]
    DuplicateSeqnum(u32),

    /// A submit targeted an endpoint absent from the active configuration
    #[error("no endpoint {address:#04x} in the active configuration")]
    UnknownEndpoint { address: u8 },

    /// The driver or its node failed outright
    #[error("device channel failed: {0}")]
    Channel(#[from] ChannelError),

    /// Writing a reply failed
    #[error("stream failure: {0}")]
    Stream(#[source] std::io::Error),

    /// A completion task died without reporting
    #[error("completion task failed: {0}")]
    Completion(String),
}

/// One attached client's protocol state
pub struct Session<C, R, W> {
    pub(crate) channel: C,
    pub(crate) classifier: EndpointClassifier,
    pub(crate) reader: R,
    pub(crate) writer: ReplyWriter<W>,
    pub(crate) pending: Arc<PendingTable>,
    pub(crate) fatal_tx: mpsc::UnboundedSender<SessionError>,
    fatal_rx: mpsc::UnboundedReceiver<SessionError>,
}

impl<C, R, W> Session<C, R, W>
where
    C: DeviceChannel,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(channel: C, classifier: EndpointClassifier, reader: R, writer: W) -> Self {
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Self {
            channel,
            classifier,
            reader,
            writer: ReplyWriter::new(writer),
            pending: Arc::new(PendingTable::new()),
            fatal_tx,
            fatal_rx,
        }
    }

    /// Run the session until the stream closes or a terminal error occurs
    ///
    /// Completion tasks may still be draining their ioctls when this
    /// returns; closing the monitor node faults whatever the driver still
    /// holds, and their replies fail harmlessly against the dead stream.
    pub async fn run(mut self) -> Result<(), SessionError> {
        info!("session started");
        loop {
            tokio::select! {
                command = codec::read_command(&mut self.reader) => {
                    match command {
                        Ok(Command::Submit(basic, cmd)) => {
                            self.handle_submit(basic, cmd).await?;
                        }
                        Ok(Command::Unlink(basic, unlink)) => {
                            self.handle_unlink(basic, unlink).await?;
                        }
                        Err(ProtocolError::Io(err))
                            if err.kind() == std::io::ErrorKind::UnexpectedEof =>
                        {
                            debug!("client closed the stream");
                            return Ok(());
                        }
                        Err(err) => return Err(err.into()),
                    }
                }
                Some(err) = self.fatal_rx.recv() => {
                    return Err(err);
                }
            }
        }
    }
}
