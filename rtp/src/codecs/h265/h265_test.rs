use bytes::Bytes;

use super::*;
use crate::packetizer::depacketize_group;

fn annexb(units: &[&[u8]]) -> Bytes {
    let mut out = vec![];
    for u in units {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(u);
    }
    Bytes::from(out)
}

/// builds a NAL unit with the given type, layer id and tid
fn nalu(nalu_type: u8, layer_id: u8, tid: u8, body: &[u8]) -> Vec<u8> {
    let header = ((nalu_type as u16 & 0x3F) << 9) | ((layer_id as u16 & 0x3F) << 3) | tid as u16;
    let mut out = vec![(header >> 8) as u8, header as u8];
    out.extend_from_slice(body);
    out
}

#[test]
fn test_nalu_header_fields() {
    let h = H265NaluHeader::new(0x40, 0x01); // VPS: type 32, layer 0, tid 1
    assert!(!h.f());
    assert_eq!(h.nalu_type(), 32);
    assert_eq!(h.layer_id(), 0);
    assert_eq!(h.tid(), 1);

    let retyped = h.with_type(H265NALU_FRAGMENTATION_UNIT_TYPE);
    assert_eq!(retyped.nalu_type(), 49);
    assert_eq!(retyped.layer_id(), 0);
    assert_eq!(retyped.tid(), 1);
}

#[test]
fn test_payload_aggregates_small_units() {
    let mut p = H265Payloader::default();
    let vps = nalu(32, 0, 0, &[0x0c, 0x01, 0xff, 0xff]);
    let sps = nalu(33, 0, 0, &[0xa0, 0x01]);
    let pps = nalu(34, 0, 0, &[0xc1]);

    let payloads = p
        .payload(1188, &annexb(&[&vps, &sps, &pps]))
        .expect("payload");
    assert_eq!(payloads.len(), 1);

    let ap_header = H265NaluHeader::new(payloads[0][0], payloads[0][1]);
    assert_eq!(ap_header.nalu_type(), H265NALU_AGGREGATION_PACKET_TYPE);

    let mut d = H265Packet::default();
    let out = d.depacketize(&payloads[0]).expect("depacketize");
    assert_eq!(out, annexb(&[&vps, &sps, &pps]));
}

#[test]
fn test_payload_fragments_large_units() {
    let mut p = H265Payloader::default();
    let big = nalu(19, 0, 0, &vec![0x33; 400]); // IDR slice

    let payloads = p.payload(100, &annexb(&[&big])).expect("payload");
    assert!(payloads.len() > 1);

    for (i, fragment) in payloads.iter().enumerate() {
        let header = H265NaluHeader::new(fragment[0], fragment[1]);
        assert_eq!(header.nalu_type(), H265NALU_FRAGMENTATION_UNIT_TYPE);
        assert!(fragment.len() <= 100);

        let fu_header = fragment[2];
        assert_eq!(fu_header & H265FU_TYPE_BITMASK, 19);
        if i == 0 {
            assert_ne!(fu_header & H265FU_START_BITMASK, 0);
        } else if i == payloads.len() - 1 {
            assert_ne!(fu_header & H265FU_END_BITMASK, 0);
        }
    }

    let mut d = H265Packet::default();
    let group = depacketize_group(&mut d, &payloads);
    assert_eq!(group.discarded, 0);
    assert_eq!(group.samples.len(), 1);
    assert_eq!(group.samples[0], annexb(&[&big]));
}

#[test]
fn test_depacketize_fragment_missing_start() {
    let mut d = H265Packet::default();
    let mid = {
        let mut v = nalu(49, 0, 0, &[]);
        v.push(19); // FU header: no S/E, type 19
        v.extend_from_slice(&[0xAA, 0xBB]);
        Bytes::from(v)
    };
    let got = d.depacketize(&mid);
    assert_eq!(got.err(), Some(Error::FragmentMissingStart));
}

#[test]
fn test_depacketize_fragment_type_mismatch() {
    let mut d = H265Packet::default();

    let start = {
        let mut v = nalu(49, 0, 0, &[]);
        v.push(H265FU_START_BITMASK | 19);
        v.extend_from_slice(&[0xAA]);
        Bytes::from(v)
    };
    assert_eq!(d.depacketize(&start).expect("start"), Bytes::new());

    let mid = {
        let mut v = nalu(49, 0, 0, &[]);
        v.push(21); // different fragmented type
        v.extend_from_slice(&[0xBB]);
        Bytes::from(v)
    };
    assert_eq!(
        d.depacketize(&mid).err(),
        Some(Error::FragmentTypeMismatch)
    );
}

#[test]
fn test_depacketize_rejects_forbidden_bit() {
    let mut d = H265Packet::default();
    let bad = Bytes::from_static(&[0x80, 0x01, 0x02]);
    assert_eq!(
        d.depacketize(&bad).err(),
        Some(Error::ErrH265CorruptedPacket)
    );
}

#[test]
fn test_depacketize_paci_unhandled() {
    let mut d = H265Packet::default();
    let paci = Bytes::from(nalu(50, 0, 0, &[0x00, 0x01]));
    assert_eq!(
        d.depacketize(&paci).err(),
        Some(Error::ErrInvalidH265PacketType)
    );
}
