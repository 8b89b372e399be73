use bytes::Bytes;

use super::*;

#[test]
fn test_packet_round_trip_basic() {
    let pkt = Packet {
        header: Header {
            version: 2,
            marker: true,
            payload_type: 96,
            sequence_number: 27023,
            timestamp: 3653407706,
            ssrc: 476325762,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x98, 0x36, 0xbe, 0x88, 0x9e]),
    };

    let data = pkt.marshal().expect("marshal");
    let decoded = Packet::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, pkt);
}

#[test]
fn test_packet_unmarshal_wire_form() {
    let mut data = Bytes::from_static(&[
        0x90, 0xe0, 0x69, 0x8f, // v=2, x=1, M=1, PT=96, seq=27023
        0xd9, 0xc2, 0x93, 0xda, // timestamp
        0x1c, 0x64, 0x27, 0x82, // ssrc
        0x00, 0x01, 0x00, 0x01, // profile ext 0x0001, length 1 word
        0xFF, 0xFF, 0xFF, 0xFF, // opaque extension word
        0x98, 0x36, 0xbe, 0x88, // payload
        0x9e,
    ]);

    let pkt = Packet::unmarshal(&mut data).expect("unmarshal");
    assert_eq!(pkt.header.version, 2);
    assert!(pkt.header.extension);
    assert_eq!(pkt.header.extension_profile, 0x0001);
    assert_eq!(pkt.header.sequence_number, 27023);
    assert_eq!(pkt.header.timestamp, 3653407706);
    assert_eq!(pkt.header.ssrc, 0x1c642782);
    assert_eq!(
        pkt.header.get_extension(0),
        Some(Bytes::from_static(&[0xFF, 0xFF, 0xFF, 0xFF]))
    );
    assert_eq!(
        pkt.payload,
        Bytes::from_static(&[0x98, 0x36, 0xbe, 0x88, 0x9e])
    );
}

#[test]
fn test_packet_with_padding() {
    let pkt = Packet {
        header: Header {
            version: 2,
            padding: true,
            payload_type: 0,
            sequence_number: 1,
            timestamp: 2,
            ssrc: 3,
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x01, 0x02, 0x03]),
    };

    let data = pkt.marshal().expect("marshal");
    // payload padded out to a word boundary, final octet is the pad count
    assert_eq!(data.len(), 16);
    assert_eq!(data[15], 1);

    let decoded = Packet::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded.payload, pkt.payload);
}

#[test]
fn test_packet_one_byte_extension_round_trip() {
    let mut header = Header {
        version: 2,
        payload_type: 96,
        sequence_number: 100,
        timestamp: 90000,
        ssrc: 0xdeadbeef,
        ..Default::default()
    };
    header
        .set_extension(5, Bytes::from_static(&[0xAA, 0xBB]))
        .expect("set_extension");
    header
        .set_extension(7, Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]))
        .expect("set_extension");

    let pkt = Packet {
        header,
        payload: Bytes::from_static(&[0x42]),
    };

    let data = pkt.marshal().expect("marshal");
    let decoded = Packet::unmarshal(&mut data.clone()).expect("unmarshal");

    assert_eq!(
        decoded.header.get_extension(5),
        Some(Bytes::from_static(&[0xAA, 0xBB]))
    );
    assert_eq!(
        decoded.header.get_extension(7),
        Some(Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]))
    );
    assert_eq!(decoded.payload, pkt.payload);
}

#[test]
fn test_packet_csrc_list() {
    let pkt = Packet {
        header: Header {
            version: 2,
            payload_type: 8,
            sequence_number: 9,
            timestamp: 10,
            ssrc: 11,
            csrc: vec![0x11111111, 0x22222222, 0x33333333],
            ..Default::default()
        },
        payload: Bytes::from_static(&[0x00, 0x01, 0x02, 0x03]),
    };

    let data = pkt.marshal().expect("marshal");
    assert_eq!(data[0] & 0x0F, 3, "csrc count");
    let decoded = Packet::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, pkt);
}

#[test]
fn test_packet_too_short() {
    let mut data = Bytes::from_static(&[0x80, 0x60, 0x01]);
    let got = Packet::unmarshal(&mut data);
    assert!(got.is_err());
    assert_eq!(Error::ErrHeaderSizeInsufficient, got.err().unwrap());
}
