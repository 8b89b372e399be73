use bytes::Bytes;

use super::*;

fn annexb(units: &[&[u8]]) -> Bytes {
    let mut out = vec![];
    for u in units {
        out.extend_from_slice(&[0x00, 0x00, 0x00, 0x01]);
        out.extend_from_slice(u);
    }
    Bytes::from(out)
}

#[test]
fn test_svc_descriptor_round_trip() {
    let desc = SvcDescriptor {
        priority_id: 3,
        idr: true,
        dependency_id: 2,
        quality_id: 5,
        temporal_id: 1,
    };

    let raw = desc.marshal();
    let decoded = SvcDescriptor::unmarshal(&raw).expect("unmarshal");
    assert_eq!(decoded, desc);
}

#[test]
fn test_svc_payload_opens_with_pacsi() {
    let mut p = H264SvcPayloader::default();

    // an enhancement slice carrying its scalability header
    let mut slice_ext = vec![0x74u8]; // type 20
    slice_ext.extend_from_slice(&SvcDescriptor {
        dependency_id: 1,
        quality_id: 2,
        temporal_id: 3,
        ..Default::default()
    }.marshal());
    slice_ext.extend_from_slice(&[0x10; 16]);

    let payloads = p.payload(1188, &annexb(&[&slice_ext])).expect("payload");
    assert_eq!(payloads.len(), 1, "PACSI + slice fit one aggregate");
    assert_eq!(payloads[0][0] & NALU_TYPE_BITMASK, 24, "STAP-A leader");

    // first aggregated unit is the PACSI
    let first_unit_type = payloads[0][3] & NALU_TYPE_BITMASK;
    assert_eq!(first_unit_type, PACSI_NALU_TYPE);
}

#[test]
fn test_svc_depacketize_strips_pacsi_and_exposes_descriptor() {
    let mut p = H264SvcPayloader::default();

    let mut slice_ext = vec![0x74u8];
    slice_ext.extend_from_slice(&SvcDescriptor {
        dependency_id: 1,
        quality_id: 2,
        temporal_id: 3,
        ..Default::default()
    }.marshal());
    slice_ext.extend_from_slice(&[0x10; 16]);

    let original = annexb(&[&slice_ext]);
    let payloads = p.payload(1188, &original).expect("payload");

    let mut d = H264SvcPacket::default();
    let mut out = vec![];
    for payload in &payloads {
        let sample = d.depacketize(payload).expect("depacketize");
        if !sample.is_empty() {
            out.push(sample);
        }
    }

    assert_eq!(out.len(), 1);
    assert_eq!(out[0], original, "PACSI removed, slice intact");

    let desc = d.last_descriptor.expect("descriptor");
    assert_eq!(desc.dependency_id, 1);
    assert_eq!(desc.quality_id, 2);
    assert_eq!(desc.temporal_id, 3);
}

#[test]
fn test_descriptor_of_ignores_plain_slices() {
    assert!(descriptor_of(&Bytes::from_static(&[0x65, 0x01, 0x02, 0x03])).is_none());

    let mut prefix = vec![0x6eu8]; // type 14
    prefix.extend_from_slice(&SvcDescriptor::default().marshal());
    assert!(descriptor_of(&Bytes::from(prefix)).is_some());
}
