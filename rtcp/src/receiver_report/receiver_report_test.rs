use bytes::Bytes;

use super::*;

#[test]
fn test_receiver_report_wire_form() {
    let data = Bytes::from_static(&[
        0x81, 0xc9, 0x0, 0x7, // v=2, p=0, count=1, RR, len=7
        0x90, 0x2f, 0x9e, 0x2e, // ssrc=0x902f9e2e
        0xbc, 0x5e, 0x9a, 0x40, // ssrc=0xbc5e9a40
        0x0, 0x0, 0x0, 0x0, // fracLost=0, totalLost=0
        0x0, 0x0, 0x46, 0xe1, // lastSeq=0x46e1
        0x0, 0x0, 0x1, 0x11, // jitter=273
        0x9, 0xf3, 0x64, 0x32, // lsr=0x9f36432
        0x0, 0x2, 0x4a, 0x79, // delay=150137
    ]);

    let decoded = ReceiverReport::unmarshal(&mut data.clone()).expect("unmarshal");
    let want = ReceiverReport {
        ssrc: 0x902f9e2e,
        reports: vec![ReceptionReport {
            ssrc: 0xbc5e9a40,
            fraction_lost: 0,
            total_lost: 0,
            last_sequence_number: 0x46e1,
            jitter: 273,
            last_sender_report: 0x9f36432,
            delay: 150137,
        }],
        ..Default::default()
    };
    assert_eq!(decoded, want);

    let encoded = want.marshal().expect("marshal");
    assert_eq!(encoded, data);
}

#[test]
fn test_receiver_report_round_trip_many_blocks() {
    let rr = ReceiverReport {
        ssrc: 0x12345678,
        reports: (0..31u32)
            .map(|i| ReceptionReport {
                ssrc: 0x1000 + i,
                fraction_lost: (i * 3) as u8,
                total_lost: i * 7,
                last_sequence_number: 0x20000 + i,
                jitter: i,
                last_sender_report: i * 11,
                delay: i * 13,
            })
            .collect(),
        ..Default::default()
    };

    let data = rr.marshal().expect("marshal");
    let decoded = ReceiverReport::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, rr);
}

#[test]
fn test_receiver_report_too_many_reports() {
    let rr = ReceiverReport {
        ssrc: 1,
        reports: vec![ReceptionReport::default(); 32],
        ..Default::default()
    };
    let got = rr.marshal();
    assert!(got.is_err());
    assert_eq!(Error::TooManyReports, got.err().unwrap());
}

#[test]
fn test_receiver_report_wrong_type() {
    let data = Bytes::from_static(&[
        0x80, 0xc8, 0x0, 0x6, // v=2, p=0, count=0, SR, len=6
        0x90, 0x2f, 0x9e, 0x2e, // ssrc
        0xda, 0x8b, 0xd1, 0xfc, //
        0xdd, 0xdd, 0xa0, 0x5a, //
        0xaa, 0xf4, 0xed, 0xd5, //
        0x00, 0x00, 0x00, 0x01, //
        0x00, 0x00, 0x00, 0x02, //
    ]);

    let got = ReceiverReport::unmarshal(&mut data.clone());
    assert!(got.is_err());
    assert_eq!(Error::WrongType, got.err().unwrap());
}
