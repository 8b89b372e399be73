use bytes::Bytes;

use super::*;

#[test]
fn test_app_defined_round_trip() {
    let app = ApplicationDefined {
        sub_type: 5,
        ssrc: 0x902f9e2e,
        name: *b"MPRT",
        data: Bytes::from_static(&[0x01, 0x02, 0x03, 0x04]),
    };

    let data = app.marshal().expect("marshal");
    let decoded = ApplicationDefined::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, app);
    assert_eq!(decoded.header().count, 5);
    assert_eq!(decoded.destination_ssrc(), vec![0x902f9e2e]);
}

#[test]
fn test_app_defined_wire_form() {
    let data = Bytes::from_static(&[
        0x82, 0xcc, 0x0, 0x3, // v=2, p=0, subtype=2, APP, len=3
        0xde, 0xad, 0xbe, 0xef, // ssrc
        0x53, 0x54, 0x41, 0x54, // name="STAT"
        0x00, 0x00, 0x00, 0x2a, // data
    ]);

    let decoded = ApplicationDefined::unmarshal(&mut data.clone()).expect("unmarshal");
    let want = ApplicationDefined {
        sub_type: 2,
        ssrc: 0xdeadbeef,
        name: *b"STAT",
        data: Bytes::from_static(&[0x00, 0x00, 0x00, 0x2a]),
    };
    assert_eq!(decoded, want);

    let encoded = want.marshal().expect("marshal");
    assert_eq!(encoded, data);
}

#[test]
fn test_app_defined_bad_subtype() {
    let app = ApplicationDefined {
        sub_type: 32,
        ssrc: 1,
        name: *b"NAME",
        data: Bytes::new(),
    };
    let got = app.marshal();
    assert!(got.is_err());
    assert_eq!(Error::InvalidHeader, got.err().unwrap());
}

#[test]
fn test_app_defined_truncated() {
    let data = Bytes::from_static(&[
        0x80, 0xcc, 0x0, 0x2, // v=2, p=0, APP, len=2
        0xde, 0xad, 0xbe, 0xef, // ssrc only, name missing
    ]);
    let got = ApplicationDefined::unmarshal(&mut data.clone());
    assert!(got.is_err());
    assert_eq!(Error::PacketTooShort, got.err().unwrap());
}
