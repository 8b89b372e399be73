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

#[test]
fn test_payload_empty_and_zero_mtu() {
    let mut p = H264Payloader::default();
    assert!(p.payload(1188, &Bytes::new()).expect("payload").is_empty());
    assert!(p
        .payload(0, &Bytes::from_static(&[0x65, 0x01]))
        .expect("payload")
        .is_empty());
}

#[test]
fn test_payload_single_nalu_passthrough() {
    let mut p = H264Payloader::default();
    // one large-ish slice alone still below mtu stays a single NAL payload
    let nalu = {
        let mut v = vec![0x65u8];
        v.extend_from_slice(&[0xAB; 100]);
        Bytes::from(v)
    };
    let payloads = p.payload(1188, &annexb(&[&nalu])).expect("payload");
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0], nalu);
}

#[test]
fn test_payload_aggregates_small_units() {
    let mut p = H264Payloader::default();
    let sps = [0x67u8, 0x42, 0x00, 0x1e];
    let pps = [0x68u8, 0xce, 0x3c, 0x80];
    let idr = {
        let mut v = vec![0x65u8];
        v.extend_from_slice(&[0x11; 20]);
        v
    };

    let payloads = p
        .payload(1188, &annexb(&[&sps, &pps, &idr]))
        .expect("payload");

    // all three fit one STAP-A
    assert_eq!(payloads.len(), 1);
    let stap_a = &payloads[0];
    assert_eq!(stap_a[0] & NALU_TYPE_BITMASK, STAPA_NALU_TYPE);

    // and depacketize back to the three units
    let mut d = H264Packet::default();
    let out = d.depacketize(stap_a).expect("depacketize");
    assert_eq!(out, annexb(&[&sps, &pps, &idr]));
}

#[test]
fn test_payload_fragments_large_units() {
    let mut p = H264Payloader::default();
    let mut big = vec![0x65u8];
    big.extend_from_slice(&vec![0x22; 300]);

    let payloads = p.payload(100, &annexb(&[&big])).expect("payload");
    assert!(payloads.len() > 1);

    for (i, fragment) in payloads.iter().enumerate() {
        assert_eq!(fragment[0] & NALU_TYPE_BITMASK, FUA_NALU_TYPE);
        assert!(fragment.len() <= 100);
        let header = fragment[1];
        if i == 0 {
            assert_ne!(header & FU_START_BITMASK, 0, "first fragment has S");
        } else if i == payloads.len() - 1 {
            assert_ne!(header & FU_END_BITMASK, 0, "last fragment has E");
        } else {
            assert_eq!(header & (FU_START_BITMASK | FU_END_BITMASK), 0);
        }
        assert_eq!(header & NALU_TYPE_BITMASK, 0x65 & NALU_TYPE_BITMASK);
    }

    // reassembles to the original unit
    let mut d = H264Packet::default();
    let group = depacketize_group(&mut d, &payloads);
    assert_eq!(group.discarded, 0);
    assert_eq!(group.samples.len(), 1);
    assert_eq!(group.samples[0], annexb(&[&big]));
}

#[test]
fn test_depacketize_fragment_missing_start() {
    let mut d = H264Packet::default();
    // middle fragment with no preceding start
    let mid = Bytes::from_static(&[FUA_NALU_TYPE, 0x05, 0xAA, 0xBB]);
    let got = d.depacketize(&mid);
    assert_eq!(got.err(), Some(Error::FragmentMissingStart));
}

#[test]
fn test_depacketize_fragment_type_mismatch() {
    let mut d = H264Packet::default();
    let start = Bytes::from_static(&[FUA_NALU_TYPE, FU_START_BITMASK | 0x05, 0xAA]);
    assert_eq!(d.depacketize(&start).expect("start"), Bytes::new());

    // continuation claims a different fragmented type
    let mid = Bytes::from_static(&[FUA_NALU_TYPE, 0x07, 0xBB]);
    let got = d.depacketize(&mid);
    assert_eq!(got.err(), Some(Error::FragmentTypeMismatch));

    // partial unit is gone: a further continuation has no start
    let tail = Bytes::from_static(&[FUA_NALU_TYPE, FU_END_BITMASK | 0x05, 0xCC]);
    assert_eq!(
        d.depacketize(&tail).err(),
        Some(Error::FragmentMissingStart)
    );
}

#[test]
fn test_depacketize_interrupted_fragment_is_dropped() {
    let mut d = H264Packet::default();
    let start = Bytes::from_static(&[FUA_NALU_TYPE, FU_START_BITMASK | 0x05, 0xAA]);
    assert_eq!(d.depacketize(&start).expect("start"), Bytes::new());

    // a plain NALU arrives before the fragment ended
    let single = Bytes::from_static(&[0x61, 0x01, 0x02]);
    let out = d.depacketize(&single).expect("single survives");
    assert_eq!(out, annexb(&[&[0x61, 0x01, 0x02]]));

    // the stale fragment state must not leak into a fresh sequence
    let tail = Bytes::from_static(&[FUA_NALU_TYPE, FU_END_BITMASK | 0x05, 0xCC]);
    assert_eq!(
        d.depacketize(&tail).err(),
        Some(Error::FragmentMissingStart)
    );
}

#[test]
fn test_depacketize_stapa_size_check() {
    let mut d = H264Packet::default();
    let bad = Bytes::from_static(&[STAPA_NALU_TYPE, 0x00, 0x10, 0x01, 0x02]);
    let got = d.depacketize(&bad);
    assert!(matches!(
        got.err(),
        Some(Error::AggregationSizeLargerThanBuffer(16, 2))
    ));
}

#[test]
fn test_depacketize_avc_output() {
    let mut d = H264Packet {
        is_avc: true,
        ..Default::default()
    };
    let single = Bytes::from_static(&[0x61, 0x01, 0x02]);
    let out = d.depacketize(&single).expect("depacketize");
    assert_eq!(
        out,
        Bytes::from_static(&[0x00, 0x00, 0x00, 0x03, 0x61, 0x01, 0x02])
    );
}

#[test]
fn test_partition_head_tail() {
    let d = H264Packet::default();
    assert!(d.is_partition_head(&Bytes::from_static(&[0x65, 0x01])));
    assert!(d.is_partition_head(&Bytes::from_static(&[
        FUA_NALU_TYPE,
        FU_START_BITMASK | 0x05
    ])));
    assert!(!d.is_partition_head(&Bytes::from_static(&[FUA_NALU_TYPE, 0x05])));
    assert!(d.is_partition_tail(true, &Bytes::from_static(&[0x65])));
    assert!(!d.is_partition_tail(false, &Bytes::from_static(&[0x65])));
}
