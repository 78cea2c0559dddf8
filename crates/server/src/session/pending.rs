//! Pending submit table
//!
//! Maps outstanding sequence numbers to the raw endpoint address their URB
//! targets. Whoever removes an entry first (completion or unlink) owns the
//! reply for it; the loser stays silent. The mutex is only ever held for the
//! map operation itself, never across I/O.

use std::collections::HashMap;
use std::sync::Mutex;

use thiserror::Error;

/// A CMD_SUBMIT reused a sequence number that is still in flight
#[derive(Debug, Error, PartialEq, Eq)]
#[error("duplicate sequence number {0}")]
pub struct DuplicateSeqnum(pub u32);

/// Seqnum → raw endpoint address of every submit without a reply yet
#[derive(Debug, Default)]
pub struct PendingTable {
    inner: Mutex<HashMap<u32, u8>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submit; fails if the seqnum is already in flight
    pub fn insert(&self, seqnum: u32, endpoint: u8) -> Result<(), DuplicateSeqnum> {
        let mut map = self.inner.lock().expect("pending table lock poisoned");
        if map.contains_key(&seqnum) {
            return Err(DuplicateSeqnum(seqnum));
        }
        map.insert(seqnum, endpoint);
        Ok(())
    }

    /// Claim a submit for reply; returns its endpoint, or None if the other
    /// side of the race got here first
    pub fn remove(&self, seqnum: u32) -> Option<u8> {
        self.inner
            .lock()
            .expect("pending table lock poisoned")
            .remove(&seqnum)
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .expect("pending table lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
