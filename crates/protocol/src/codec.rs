//! Async wire codec
//!
//! Thin reads over an ordered byte stream. The codec buffers nothing itself:
//! each function reads exactly the bytes it needs, so the caller controls
//! when the next command may be parsed. The receive path is strictly serial;
//! a command's payload and iso descriptors are consumed before the next
//! header is read.

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::Result;
use crate::header::{Command, HEADER_SIZE};
use crate::iso::{self, IsoPacket, ISO_DESCRIPTOR_SIZE};
use crate::op::{OpHeader, OP_HEADER_SIZE};

/// Read and decode one stage-2 command header (48 bytes)
pub async fn read_command<R>(reader: &mut R) -> Result<Command>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; HEADER_SIZE];
    reader.read_exact(&mut buf).await?;
    Command::decode(&buf)
}

/// Read exactly `len` payload bytes
pub async fn read_exactly<R>(reader: &mut R, len: usize) -> Result<BytesMut>
where
    R: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Read a contiguous array of `n` iso packet descriptors
pub async fn read_iso_descriptors<R>(reader: &mut R, n: usize) -> Result<Vec<IsoPacket>>
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; n * ISO_DESCRIPTOR_SIZE];
    reader.read_exact(&mut buf).await?;
    Ok(iso::decode_array(&buf))
}

/// Read one stage-1 operation header (8 bytes)
pub async fn read_op_header<R>(reader: &mut R) -> Result<OpHeader>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; OP_HEADER_SIZE];
    reader.read_exact(&mut buf).await?;
    Ok(OpHeader::decode(&buf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{
        encode_cmd_submit, CmdSubmit, HeaderBasic, USBIP_CMD_SUBMIT, USBIP_DIR_OUT,
    };
    use crate::iso::encode_array;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_read_command_and_payload() {
        let basic = HeaderBasic {
            command: USBIP_CMD_SUBMIT,
            seqnum: 1,
            devid: 0,
            direction: USBIP_DIR_OUT,
            ep: 2,
        };
        let cmd = CmdSubmit {
            transfer_flags: 0,
            transfer_buffer_length: 4,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup: [0u8; 8],
        };

        let mut wire = Vec::new();
        wire.extend_from_slice(&encode_cmd_submit(&basic, &cmd));
        wire.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let mut cursor = Cursor::new(wire);
        let Command::Submit(b, c) = read_command(&mut cursor).await.unwrap() else {
            panic!("expected CMD_SUBMIT");
        };
        assert_eq!(b.seqnum, 1);
        assert_eq!(c.transfer_buffer_length, 4);

        let payload = read_exactly(&mut cursor, 4).await.unwrap();
        assert_eq!(&payload[..], &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[tokio::test]
    async fn test_read_iso_descriptors() {
        let packets = vec![
            IsoPacket {
                offset: 0,
                length: 100,
                actual_length: 0,
                status: 0,
            },
            IsoPacket {
                offset: 100,
                length: 50,
                actual_length: 0,
                status: 0,
            },
        ];
        let mut cursor = Cursor::new(encode_array(&packets));
        let decoded = read_iso_descriptors(&mut cursor, 2).await.unwrap();
        assert_eq!(decoded, packets);
    }

    #[tokio::test]
    async fn test_short_stream_is_io_error() {
        let mut cursor = Cursor::new(vec![0u8; 10]);
        let err = read_command(&mut cursor).await.unwrap_err();
        assert!(matches!(err, crate::ProtocolError::Io(_)));
    }
}
