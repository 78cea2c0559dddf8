//! Submit engine
//!
//! Translates CMD_SUBMIT into driver URBs. The request phase (payload and
//! descriptor reads, trapped standard requests) runs inline on the receive
//! path; everything after the pending-table insert runs on a spawned
//! completion task so the session loop can read the next command while the
//! device works.

use std::sync::Arc;

use common::usb::{
    Direction, SetupPacket, TransferKind, FEATURE_ENDPOINT_HALT, REQUEST_CLEAR_FEATURE,
    REQUEST_SET_CONFIGURATION, REQUEST_SET_INTERFACE, RT_STANDARD_DEVICE_OUT,
    RT_STANDARD_ENDPOINT_OUT, RT_STANDARD_INTERFACE_OUT,
};
use protocol::{codec, iso, CmdSubmit, HeaderBasic, IsoPacket, ProtocolError, RetSubmit};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, trace};

use super::{PendingTable, ReplyWriter, Session, SessionError};
use crate::driver::urb::{
    self, UrbHeader, UrbIsoSlot, MAX_SPLIT_URB_BYTES, URB_MAX_ISO_PACKETS,
};
use crate::driver::{DeviceChannel, DriverIoctl, IoctlCode};

/// Control setup packet size, prepended to control transfer buffers
const SETUP_SIZE: usize = 8;

impl<C, R, W> Session<C, R, W>
where
    C: DeviceChannel,
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) async fn handle_submit(
        &mut self,
        basic: HeaderBasic,
        cmd: CmdSubmit,
    ) -> Result<(), SessionError> {
        let address = basic.endpoint_address();
        let kind = self
            .classifier
            .endpoint_kind(address)
            .ok_or(SessionError::UnknownEndpoint { address })?;
        trace!(
            seqnum = basic.seqnum,
            endpoint = address,
            ?kind,
            length = cmd.transfer_buffer_length,
            "CMD_SUBMIT"
        );

        if kind == TransferKind::Isochronous {
            return self.handle_submit_iso(basic, cmd).await;
        }

        let setup_len = if kind == TransferKind::Control {
            SETUP_SIZE
        } else {
            0
        };
        let mut buffer = vec![0u8; setup_len + cmd.transfer_buffer_length as usize];
        if setup_len != 0 {
            buffer[..SETUP_SIZE].copy_from_slice(&cmd.setup);
        }
        if !basic.is_in() && cmd.transfer_buffer_length > 0 {
            // receive-path read: must finish before the next command header
            self.reader
                .read_exact(&mut buffer[setup_len..])
                .await
                .map_err(ProtocolError::Io)?;
        }

        if basic.ep & 0x0f == 0 {
            let setup = SetupPacket::from_bytes(&cmd.setup);
            if let Some(trap) = trapped_request(&setup) {
                return self.run_trapped(basic.seqnum, trap).await;
            }
        }

        self.pending
            .insert(basic.seqnum, address)
            .map_err(|err| SessionError::DuplicateSeqnum(err.0))?;

        let direction = if basic.is_in() {
            Direction::In
        } else {
            Direction::Out
        };
        let short_ok = basic.is_in() && !cmd.short_not_ok();
        let block =
            UrbHeader::new((basic.ep & 0x0f) as u8, kind, direction, short_ok).encode_block(&buffer);

        let channel = self.channel.clone();
        let writer = self.writer.clone();
        let pending = self.pending.clone();
        let fatal = self.fatal_tx.clone();
        let seqnum = basic.seqnum;
        let is_in = basic.is_in();
        tokio::spawn(async move {
            let result =
                complete_submit(channel, writer, pending, seqnum, is_in, setup_len, block).await;
            if let Err(err) = result {
                let _ = fatal.send(err);
            }
        });
        Ok(())
    }

    /// Run a trapped standard request synchronously
    ///
    /// These mutate configuration state the driver must observe, so they
    /// complete before the next command is parsed and never touch the
    /// pending table.
    async fn run_trapped(
        &mut self,
        seqnum: u32,
        trap: TrappedRequest,
    ) -> Result<(), SessionError> {
        debug!(seqnum, ?trap, "trapped standard request");
        let ioctl = match trap {
            TrappedRequest::SetConfiguration { value } => DriverIoctl::input_only(
                IoctlCode::SetConfig,
                urb::encode_set_config(value),
            ),
            TrappedRequest::SetInterface { interface, alt_setting } => DriverIoctl::input_only(
                IoctlCode::SelectInterface,
                urb::encode_select_interface(interface, alt_setting),
            ),
            TrappedRequest::ClearHalt { endpoint } => DriverIoctl::input_only(
                IoctlCode::ClearEndpoint,
                urb::encode_clear_endpoint(endpoint),
            ),
        };
        self.channel.submit_ioctl(ioctl).await?;

        match trap {
            TrappedRequest::SetConfiguration { value } => {
                self.classifier.select_configuration(value);
            }
            TrappedRequest::SetInterface { interface, alt_setting } => {
                self.classifier.select_interface(interface, alt_setting);
            }
            TrappedRequest::ClearHalt { .. } => {}
        }

        let header = RetSubmit::default().encode(seqnum);
        self.writer
            .send(&header, None, None)
            .await
            .map_err(SessionError::Stream)
    }

    async fn handle_submit_iso(
        &mut self,
        basic: HeaderBasic,
        cmd: CmdSubmit,
    ) -> Result<(), SessionError> {
        let mut buffer = vec![0u8; cmd.transfer_buffer_length as usize];
        if !basic.is_in() && !buffer.is_empty() {
            self.reader
                .read_exact(&mut buffer)
                .await
                .map_err(ProtocolError::Io)?;
        }
        // the descriptor array follows in both directions; for IN it carries
        // the slot layout the device should fill
        let packets =
            codec::read_iso_descriptors(&mut self.reader, cmd.number_of_packets as usize).await?;
        iso::validate(&packets, cmd.transfer_buffer_length)?;

        let address = basic.endpoint_address();
        self.pending
            .insert(basic.seqnum, address)
            .map_err(|err| SessionError::DuplicateSeqnum(err.0))?;

        let channel = self.channel.clone();
        let writer = self.writer.clone();
        let pending = self.pending.clone();
        let fatal = self.fatal_tx.clone();
        let seqnum = basic.seqnum;
        let endpoint = (basic.ep & 0x0f) as u8;
        let is_in = basic.is_in();
        let start_frame = cmd.start_frame;
        tokio::spawn(async move {
            let result = complete_iso(
                channel, writer, pending, seqnum, endpoint, is_in, start_frame, buffer, packets,
            )
            .await;
            if let Err(err) = result {
                let _ = fatal.send(err);
            }
        });
        Ok(())
    }
}

/// Standard requests the server must observe before forwarding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrappedRequest {
    SetConfiguration { value: u8 },
    SetInterface { interface: u8, alt_setting: u8 },
    ClearHalt { endpoint: u8 },
}

fn trapped_request(setup: &SetupPacket) -> Option<TrappedRequest> {
    match (setup.request_type, setup.request) {
        (RT_STANDARD_DEVICE_OUT, REQUEST_SET_CONFIGURATION) => {
            Some(TrappedRequest::SetConfiguration {
                value: setup.value as u8,
            })
        }
        (RT_STANDARD_INTERFACE_OUT, REQUEST_SET_INTERFACE) => Some(TrappedRequest::SetInterface {
            interface: setup.index as u8,
            alt_setting: setup.value as u8,
        }),
        (RT_STANDARD_ENDPOINT_OUT, REQUEST_CLEAR_FEATURE)
            if setup.value == FEATURE_ENDPOINT_HALT =>
        {
            Some(TrappedRequest::ClearHalt {
                endpoint: setup.index as u8,
            })
        }
        _ => None,
    }
}

/// Await one non-iso URB and emit its RET_SUBMIT
async fn complete_submit<C, W>(
    channel: C,
    writer: ReplyWriter<W>,
    pending: Arc<PendingTable>,
    seqnum: u32,
    is_in: bool,
    setup_len: usize,
    block: Vec<u8>,
) -> Result<(), SessionError>
where
    C: DeviceChannel,
    W: AsyncWrite + Unpin + Send,
{
    let completion = channel
        .submit_ioctl(DriverIoctl::in_out(IoctlCode::SendUrb, block))
        .await?;
    let header = UrbHeader::decode(&completion.data);
    let data = urb::payload(&completion.data);
    let actual = (header.length as usize).min(data.len()).saturating_sub(setup_len);

    let ret = RetSubmit {
        status: urb::status_to_errno(header.status),
        actual_length: actual as u32,
        ..Default::default()
    }
    .encode(seqnum);

    let mut guard = writer.lock().await;
    if pending.remove(seqnum).is_none() {
        debug!(seqnum, "submit unlinked before completion, dropping reply");
        return Ok(());
    }
    let payload = is_in.then(|| &data[setup_len..setup_len + actual]);
    guard
        .send(&ret, payload, None)
        .await
        .map_err(SessionError::Stream)
}

/// One split URB's slice of an iso submit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct IsoUrbPlan {
    /// Index of the first packet in this URB
    first: usize,
    /// Number of packets in this URB
    count: usize,
    /// Buffer offset where this URB's payload starts
    offset: usize,
    /// Total payload bytes of this URB
    len: usize,
}

/// Greedily pack iso packets into driver URBs
///
/// Two limits apply per URB: at most URB_MAX_ISO_PACKETS packets, and the
/// URB-relative offset of every packet must fit in 16 bits, so cumulative
/// packet bytes within a URB stay at or below MAX_SPLIT_URB_BYTES.
fn plan_iso_urbs(lengths: &[u32]) -> Vec<IsoUrbPlan> {
    let mut plan = Vec::new();
    let mut first = 0usize;
    let mut offset = 0usize;
    let mut urb_len = 0usize;

    for (i, &length) in lengths.iter().enumerate() {
        let length = length as usize;
        let count = i - first;
        if count == URB_MAX_ISO_PACKETS || urb_len + length > MAX_SPLIT_URB_BYTES {
            plan.push(IsoUrbPlan {
                first,
                count,
                offset,
                len: urb_len,
            });
            first = i;
            offset += urb_len;
            urb_len = 0;
        }
        urb_len += length;
    }
    if first < lengths.len() {
        plan.push(IsoUrbPlan {
            first,
            count: lengths.len() - first,
            offset,
            len: urb_len,
        });
    }
    plan
}

/// Run every split URB of an iso submit, then emit one RET_SUBMIT
///
/// The transfer buffer stays owned here until the last split completes;
/// each split works on its own copy of its slice and is merged back on
/// completion.
#[allow(clippy::too_many_arguments)]
async fn complete_iso<C, W>(
    channel: C,
    writer: ReplyWriter<W>,
    pending: Arc<PendingTable>,
    seqnum: u32,
    endpoint: u8,
    is_in: bool,
    start_frame: u32,
    mut buffer: Vec<u8>,
    mut packets: Vec<IsoPacket>,
) -> Result<(), SessionError>
where
    C: DeviceChannel,
    W: AsyncWrite + Unpin + Send,
{
    let lengths: Vec<u32> = packets.iter().map(|p| p.length).collect();
    let plan = plan_iso_urbs(&lengths);
    debug!(seqnum, packets = packets.len(), urbs = plan.len(), "iso submit");

    let direction = if is_in { Direction::In } else { Direction::Out };
    let mut handles = Vec::with_capacity(plan.len());
    for urb in &plan {
        let mut header = UrbHeader::new(endpoint, TransferKind::Isochronous, direction, true);
        let mut rel = 0u16;
        header.packets = lengths[urb.first..urb.first + urb.count]
            .iter()
            .map(|&length| {
                let slot = UrbIsoSlot {
                    length: length as u16,
                    offset: rel,
                    status: 0,
                };
                rel += length as u16;
                slot
            })
            .collect();
        let block = header.encode_block(&buffer[urb.offset..urb.offset + urb.len]);
        let channel = channel.clone();
        handles.push(tokio::spawn(async move {
            channel
                .submit_ioctl(DriverIoctl::in_out(IoctlCode::SendUrb, block))
                .await
        }));
    }

    for (urb, handle) in plan.iter().zip(handles) {
        let completion = handle
            .await
            .map_err(|err| SessionError::Completion(err.to_string()))??;
        let header = UrbHeader::decode(&completion.data);
        let data = urb::payload(&completion.data);

        let mut pos = urb.offset;
        for k in 0..urb.count {
            let requested = lengths[urb.first + k] as usize;
            if let Some(slot) = header.packets.get(k) {
                let actual = (slot.length as usize).min(requested);
                let packet = &mut packets[urb.first + k];
                packet.actual_length = actual as u32;
                packet.status = urb::status_to_errno(slot.status as u32);
                if is_in && actual > 0 {
                    let rel = (slot.offset as usize).min(data.len());
                    let actual = actual.min(data.len() - rel);
                    buffer[pos..pos + actual].copy_from_slice(&data[rel..rel + actual]);
                }
            }
            pos += requested;
        }
    }

    let actual_total: u32 = packets.iter().map(|p| p.actual_length).sum();
    let error_count = packets.iter().filter(|p| p.status != 0).count() as u32;
    let ret = RetSubmit {
        status: 0,
        actual_length: actual_total,
        start_frame,
        number_of_packets: packets.len() as u32,
        error_count,
    }
    .encode(seqnum);
    let descriptors = iso::encode_array(&packets);

    let mut guard = writer.lock().await;
    if pending.remove(seqnum).is_none() {
        debug!(seqnum, "iso submit unlinked before completion, dropping reply");
        return Ok(());
    }
    let compacted;
    let payload = if is_in {
        if (actual_total as usize) < buffer.len() {
            compacted = compact_iso_payload(&buffer, &packets);
            Some(compacted.as_slice())
        } else {
            Some(buffer.as_slice())
        }
    } else {
        None
    };
    guard
        .send(&ret, payload, Some(&descriptors))
        .await
        .map_err(SessionError::Stream)
}

/// Concatenate each packet's actual bytes out of its original slot
fn compact_iso_payload(buffer: &[u8], packets: &[IsoPacket]) -> Vec<u8> {
    let total: usize = packets.iter().map(|p| p.actual_length as usize).sum();
    let mut out = Vec::with_capacity(total);
    let mut pos = 0usize;
    for packet in packets {
        let actual = (packet.actual_length as usize).min(buffer.len() - pos);
        out.extend_from_slice(&buffer[pos..pos + actual]);
        pos += packet.length as usize;
    }
    out
}
