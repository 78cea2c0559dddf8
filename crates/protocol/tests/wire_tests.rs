//! Wire-format tests against hand-written byte images
//!
//! The in-module tests cover encode/decode pairs; these pin the exact wire
//! layout so a refactor cannot silently reorder fields.
//!
//! Run with: `cargo test -p protocol --test wire_tests`

use proptest::prelude::*;
use protocol::header::{encode_cmd_submit, encode_cmd_unlink};
use protocol::{
    iso, CmdSubmit, CmdUnlink, Command, DeviceRecord, HeaderBasic, IsoPacket, OpHeader, RetSubmit,
    HEADER_SIZE, OP_REP_DEVLIST, USBIP_CMD_SUBMIT, USBIP_CMD_UNLINK, USBIP_DIR_IN, USBIP_DIR_OUT,
    USBIP_VERSION,
};

#[test]
fn cmd_submit_wire_image() {
    // CMD_SUBMIT seqnum=1, devid=0x00010002, OUT, ep=0, length=0,
    // setup = SET_CONFIGURATION(2)
    let basic = HeaderBasic {
        command: USBIP_CMD_SUBMIT,
        seqnum: 1,
        devid: 0x0001_0002,
        direction: USBIP_DIR_OUT,
        ep: 0,
    };
    let cmd = CmdSubmit {
        transfer_flags: 0,
        transfer_buffer_length: 0,
        start_frame: 0,
        number_of_packets: 0,
        interval: 0,
        setup: [0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00],
    };
    let buf = encode_cmd_submit(&basic, &cmd);

    #[rustfmt::skip]
    let expected: [u8; HEADER_SIZE] = [
        0x00, 0x00, 0x00, 0x01, // command
        0x00, 0x00, 0x00, 0x01, // seqnum
        0x00, 0x01, 0x00, 0x02, // devid
        0x00, 0x00, 0x00, 0x00, // direction
        0x00, 0x00, 0x00, 0x00, // ep
        0x00, 0x00, 0x00, 0x00, // transfer_flags
        0x00, 0x00, 0x00, 0x00, // transfer_buffer_length
        0x00, 0x00, 0x00, 0x00, // start_frame
        0x00, 0x00, 0x00, 0x00, // number_of_packets
        0x00, 0x00, 0x00, 0x00, // interval
        0x00, 0x09, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, // setup
    ];
    assert_eq!(buf, expected);
}

#[test]
fn ret_submit_wire_image() {
    let ret = RetSubmit {
        status: -104,
        actual_length: 64,
        start_frame: 0,
        number_of_packets: 0,
        error_count: 0,
    };
    let buf = ret.encode(2);

    assert_eq!(&buf[0..4], &[0x00, 0x00, 0x00, 0x03]);
    assert_eq!(&buf[4..8], &[0x00, 0x00, 0x00, 0x02]);
    // -104 big-endian two's complement
    assert_eq!(&buf[20..24], &[0xff, 0xff, 0xff, 0x98]);
    assert_eq!(&buf[24..28], &[0x00, 0x00, 0x00, 0x40]);
}

#[test]
fn iso_descriptor_wire_image() {
    let pkt = IsoPacket {
        offset: 0x100,
        length: 0x80,
        actual_length: 0x40,
        status: -75,
    };
    let bytes = iso::encode_array(&[pkt]);
    #[rustfmt::skip]
    let expected = [
        0x00, 0x00, 0x01, 0x00,
        0x00, 0x00, 0x00, 0x80,
        0x00, 0x00, 0x00, 0x40,
        0xff, 0xff, 0xff, 0xb5,
    ];
    assert_eq!(&bytes[..], &expected);
}

#[test]
fn op_devlist_reply_header_wire_image() {
    let buf = OpHeader::reply(OP_REP_DEVLIST, 0).encode();
    assert_eq!(buf, [0x01, 0x11, 0x00, 0x05, 0x00, 0x00, 0x00, 0x00]);
    assert_eq!(OpHeader::decode(&buf).version, USBIP_VERSION);
}

#[test]
fn device_record_field_offsets() {
    let record = DeviceRecord {
        path: "/usbipd/3-1".into(),
        busid: "3-1".into(),
        busnum: 3,
        devnum: 1,
        speed: 2,
        id_vendor: 0xabcd,
        id_product: 0xef01,
        bcd_device: 0x0203,
        device_class: 0xff,
        device_subclass: 0x01,
        device_protocol: 0x02,
        configuration_value: 1,
        num_configurations: 1,
        num_interfaces: 3,
    };
    let buf = record.encode();
    assert_eq!(buf.len(), 312);
    assert_eq!(&buf[256..259], b"3-1");
    assert_eq!(buf[259], 0);
    assert_eq!(&buf[288..292], &[0, 0, 0, 3]); // busnum
    assert_eq!(&buf[300..302], &[0xab, 0xcd]); // id_vendor
    assert_eq!(buf[311], 3); // num_interfaces
}

proptest! {
    #[test]
    fn submit_header_roundtrip(
        seqnum in any::<u32>(),
        devid in any::<u32>(),
        direction in 0u32..=1,
        ep in 0u32..=15,
        flags in any::<u32>(),
        length in any::<u32>(),
        setup in any::<[u8; 8]>(),
    ) {
        let basic = HeaderBasic {
            command: USBIP_CMD_SUBMIT,
            seqnum,
            devid,
            direction,
            ep,
        };
        let cmd = CmdSubmit {
            transfer_flags: flags,
            transfer_buffer_length: length,
            start_frame: 0,
            number_of_packets: 0,
            interval: 0,
            setup,
        };
        let buf = encode_cmd_submit(&basic, &cmd);
        let Command::Submit(b, c) = Command::decode(&buf).unwrap() else {
            panic!("expected CMD_SUBMIT");
        };
        prop_assert_eq!(b, basic);
        prop_assert_eq!(c, cmd);
    }

    #[test]
    fn unlink_header_roundtrip(seqnum in any::<u32>(), target in any::<u32>()) {
        let basic = HeaderBasic {
            command: USBIP_CMD_UNLINK,
            seqnum,
            devid: 0,
            direction: USBIP_DIR_IN,
            ep: 0,
        };
        let buf = encode_cmd_unlink(&basic, &CmdUnlink { unlink_seqnum: target });
        let Command::Unlink(b, u) = Command::decode(&buf).unwrap() else {
            panic!("expected CMD_UNLINK");
        };
        prop_assert_eq!(b.seqnum, seqnum);
        prop_assert_eq!(u.unlink_seqnum, target);
    }

    #[test]
    fn iso_array_roundtrip(lengths in proptest::collection::vec(0u32..=65_535, 0..32)) {
        let mut offset = 0u32;
        let packets: Vec<IsoPacket> = lengths
            .iter()
            .map(|&len| {
                let pkt = IsoPacket { offset, length: len, actual_length: 0, status: 0 };
                offset += len;
                pkt
            })
            .collect();
        let total: u64 = lengths.iter().map(|&l| u64::from(l)).sum();

        let bytes = iso::encode_array(&packets);
        prop_assert_eq!(iso::decode_array(&bytes), packets.clone());
        if let Ok(total) = u32::try_from(total) {
            prop_assert!(iso::validate(&packets, total).is_ok());
        }
    }
}
