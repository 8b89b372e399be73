use bytes::Bytes;

use super::*;

#[test]
fn test_raw_packet_round_trip() {
    // unknown PT 209 with arbitrary body
    let data = Bytes::from_static(&[
        0x80, 0xd1, 0x00, 0x02, // v=2, p=0, count=0, PT=209, len=2
        0x00, 0x00, 0x00, 0x01, //
        0x00, 0x00, 0x00, 0x02, //
    ]);

    let decoded = RawPacket::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded.0, data);
    assert_eq!(decoded.header().packet_type, PacketType::Unsupported);
    assert_eq!(decoded.header().length, 2);

    let encoded = decoded.marshal().expect("marshal");
    assert_eq!(encoded, data);
}

#[test]
fn test_raw_packet_too_short() {
    let mut data = Bytes::from_static(&[0x80]);
    let got = RawPacket::unmarshal(&mut data);
    assert!(got.is_err());
    assert_eq!(Error::PacketTooShort, got.err().unwrap());
}

#[test]
fn test_raw_packet_bad_version() {
    let mut data = Bytes::from_static(&[0x33, 0xd1, 0x00, 0x00]);
    let got = RawPacket::unmarshal(&mut data);
    assert!(got.is_err());
    assert_eq!(Error::BadVersion, got.err().unwrap());
}
