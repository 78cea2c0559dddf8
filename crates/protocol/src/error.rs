//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
///
/// Everything here except `Io` is a violation of the USB/IP wire contract
/// and is terminal for the connection that produced it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// I/O error on the underlying stream
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Command field of a stage-2 header was not CMD_SUBMIT or CMD_UNLINK
    #[error("unknown USB/IP command: {0:#010x}")]
    UnknownCommand(u32),

    /// Operation code of a stage-1 header was not a known OP_REQ_*
    #[error("unknown USB/IP operation: {0:#06x}")]
    UnknownOp(u16),

    /// Client announced a protocol version we do not speak
    #[error("unsupported USB/IP version {got:#06x} (expected {expected:#06x})")]
    VersionMismatch { got: u16, expected: u16 },

    /// An isochronous packet descriptor exceeds the representable length
    #[error("iso packet length {0} exceeds 65535")]
    IsoPacketTooLarge(u32),

    /// Iso packet lengths do not add up to the transfer buffer length
    #[error("iso packet lengths sum to {sum}, expected {expected}")]
    IsoLengthMismatch { sum: u64, expected: u32 },
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownCommand(0x42);
        let msg = format!("{}", err);
        assert!(msg.contains("unknown USB/IP command"));
        assert!(msg.contains("0x00000042"));
    }

    #[test]
    fn test_iso_mismatch_display() {
        let err = ProtocolError::IsoLengthMismatch {
            sum: 400,
            expected: 300,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("400"));
        assert!(msg.contains("300"));
    }
}
