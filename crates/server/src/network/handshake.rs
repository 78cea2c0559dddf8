//! Stage-1 attach handshake
//!
//! Answers OP_REQ_DEVLIST with the export list, and on OP_REQ_IMPORT claims
//! the requested device, opens its monitor node, and hands the connection
//! over to the session engine. After a successful import the same TCP
//! stream carries stage-2 URB traffic until either side closes it.

use std::sync::Arc;

use anyhow::{Context, Result};
use protocol::op::{self, BUSID_SIZE};
use protocol::{
    codec, OpHeader, ProtocolError, OP_REP_DEVLIST, OP_REP_IMPORT, OP_REQ_DEVLIST, OP_REQ_IMPORT,
    ST_NA, ST_OK,
};
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::driver::MonitorChannel;
use crate::registry::{ExportedDevice, Registry};
use crate::session::Session;
use crate::usb::EndpointClassifier;

/// Serve one client connection from handshake to session end
pub async fn handle_connection(
    stream: TcpStream,
    registry: Arc<Registry>,
    worker_threads: usize,
) -> Result<()> {
    stream.set_nodelay(true)?;
    let (mut reader, mut writer) = stream.into_split();

    let op = codec::read_op_header(&mut reader).await?;
    op.check_version()?;

    match op.code {
        OP_REQ_DEVLIST => send_device_list(&mut writer, &registry).await,
        OP_REQ_IMPORT => handle_import(reader, writer, &registry, worker_threads).await,
        other => Err(ProtocolError::UnknownOp(other).into()),
    }
}

async fn send_device_list<W>(writer: &mut W, registry: &Registry) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let devices = registry.devices();
    let mut reply = Vec::new();
    reply.extend_from_slice(&OpHeader::reply(OP_REP_DEVLIST, ST_OK).encode());
    reply.extend_from_slice(&(devices.len() as u32).to_be_bytes());
    for device in devices {
        reply.extend_from_slice(&device.device_record().encode());
        for interface in device.interface_records() {
            reply.extend_from_slice(&interface.encode());
        }
    }
    writer.write_all(&reply).await?;
    writer.flush().await?;
    Ok(())
}

async fn handle_import(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    registry: &Registry,
    worker_threads: usize,
) -> Result<()> {
    let mut busid_raw = [0u8; BUSID_SIZE];
    reader.read_exact(&mut busid_raw).await?;
    let busid = op::decode_busid(&busid_raw);

    let Some(device) = registry.find(&busid) else {
        warn!(%busid, "import request for unknown device");
        return refuse_import(&mut writer).await;
    };
    if !registry.claim(&busid) {
        warn!(%busid, "import request for already attached device");
        return refuse_import(&mut writer).await;
    }

    let result = attach(reader, writer, device, worker_threads).await;
    registry.release(&busid);
    result
}

async fn attach(
    reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    device: &ExportedDevice,
    worker_threads: usize,
) -> Result<()> {
    let channel = match MonitorChannel::open(&device.node, worker_threads) {
        Ok(channel) => channel,
        Err(err) => {
            warn!(busid = %device.busid, "failed to open monitor node: {err}");
            return refuse_import(&mut writer).await;
        }
    };

    let mut reply = OpHeader::reply(OP_REP_IMPORT, ST_OK).encode().to_vec();
    reply.extend_from_slice(&device.device_record().encode());
    writer.write_all(&reply).await?;
    writer.flush().await?;
    info!(busid = %device.busid, "device attached");

    let classifier = EndpointClassifier::with_configuration(
        device.configurations.clone(),
        device.configuration_value(),
    );
    Session::new(channel, classifier, reader, writer)
        .run()
        .await
        .context("session failed")
}

async fn refuse_import<W>(writer: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(&OpHeader::reply(OP_REP_IMPORT, ST_NA).encode())
        .await?;
    writer.flush().await?;
    Ok(())
}
