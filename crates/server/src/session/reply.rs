//! Reply serialization
//!
//! All replies to one client funnel through a `ReplyWriter`. The underlying
//! tokio mutex is FIFO-fair and released on every exit path, so each reply
//! (header, optional payload, optional iso descriptors) reaches the stream
//! as one uninterrupted unit even though completions run on many tasks.

use std::io;
use std::sync::Arc;

use protocol::HEADER_SIZE;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, MutexGuard};

/// Shared, serialized handle to the write half of the client stream
pub struct ReplyWriter<W> {
    stream: Arc<Mutex<W>>,
}

impl<W> Clone for ReplyWriter<W> {
    fn clone(&self) -> Self {
        Self {
            stream: self.stream.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> ReplyWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream: Arc::new(Mutex::new(stream)),
        }
    }

    /// Acquire the stream for one reply
    ///
    /// Completion paths that may need to drop their reply (a lost unlink
    /// race) acquire first and decide under the guard.
    pub async fn lock(&self) -> ReplyGuard<'_, W> {
        ReplyGuard {
            stream: self.stream.lock().await,
        }
    }

    /// Write one complete reply
    pub async fn send(
        &self,
        header: &[u8; HEADER_SIZE],
        payload: Option<&[u8]>,
        descriptors: Option<&[u8]>,
    ) -> io::Result<()> {
        self.lock().await.send(header, payload, descriptors).await
    }
}

/// Exclusive access to the stream for the duration of one reply
pub struct ReplyGuard<'a, W> {
    stream: MutexGuard<'a, W>,
}

impl<W: AsyncWrite + Unpin + Send> ReplyGuard<'_, W> {
    pub async fn send(
        &mut self,
        header: &[u8; HEADER_SIZE],
        payload: Option<&[u8]>,
        descriptors: Option<&[u8]>,
    ) -> io::Result<()> {
        self.stream.write_all(header).await?;
        if let Some(payload) = payload {
            self.stream.write_all(payload).await?;
        }
        if let Some(descriptors) = descriptors {
            self.stream.write_all(descriptors).await?;
        }
        self.stream.flush().await
    }
}
