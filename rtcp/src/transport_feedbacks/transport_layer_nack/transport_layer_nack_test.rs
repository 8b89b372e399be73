use bytes::Bytes;

use super::*;

#[test]
fn test_transport_layer_nack_wire_form() {
    let data = Bytes::from_static(&[
        0x81, 0xcd, 0x0, 0x3, // v=2, p=0, fmt=1, TSFB, len=3
        0x90, 0x2f, 0x9e, 0x2e, // sender=0x902f9e2e
        0x90, 0x2f, 0x9e, 0x2e, // media=0x902f9e2e
        0x00, 0x69, 0x00, 0x05, // pid=105, blp=0b101
    ]);

    let decoded = TransportLayerNack::unmarshal(&mut data.clone()).expect("unmarshal");
    let want = TransportLayerNack {
        sender_ssrc: 0x902f9e2e,
        media_ssrc: 0x902f9e2e,
        nacks: vec![NackPair {
            packet_id: 105,
            lost_packets: 0x5,
        }],
    };
    assert_eq!(decoded, want);

    let encoded = want.marshal().expect("marshal");
    assert_eq!(encoded, data);
}

#[test]
fn test_nack_pair_packet_list() {
    let tests = vec![
        (NackPair::new(42), vec![42u16]),
        (
            NackPair {
                packet_id: 330,
                lost_packets: 0x5,
            },
            vec![330, 331, 333],
        ),
        (
            NackPair {
                packet_id: 0xFFFF,
                lost_packets: 0x1,
            },
            vec![0xFFFF, 0],
        ),
    ];

    for (pair, want) in tests {
        assert_eq!(pair.packet_list(), want);
    }
}

#[test]
fn test_nack_pairs_from_sequence_numbers() {
    let got = nack_pairs_from_sequence_numbers(&[100, 101, 105, 130]);
    assert_eq!(
        got,
        vec![
            NackPair {
                packet_id: 100,
                lost_packets: 0b1_0001,
            },
            NackPair::new(130),
        ]
    );

    // wrap around
    let got = nack_pairs_from_sequence_numbers(&[0xFFFE, 0x0001]);
    assert_eq!(
        got,
        vec![NackPair {
            packet_id: 0xFFFE,
            lost_packets: 0b100,
        }]
    );

    assert!(nack_pairs_from_sequence_numbers(&[]).is_empty());
}

#[test]
fn test_transport_layer_nack_wrong_fmt() {
    let data = Bytes::from_static(&[
        0x85, 0xcd, 0x0, 0x3, // v=2, p=0, fmt=5, TSFB, len=3
        0x90, 0x2f, 0x9e, 0x2e, //
        0x90, 0x2f, 0x9e, 0x2e, //
        0x00, 0x69, 0x00, 0x05, //
    ]);

    let got = TransportLayerNack::unmarshal(&mut data.clone());
    assert!(got.is_err());
    assert_eq!(Error::WrongType, got.err().unwrap());
}
