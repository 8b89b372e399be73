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

fn nalu(nalu_type: u8, layer_id: u8, tid: u8, body: &[u8]) -> Vec<u8> {
    let header = ((nalu_type as u16 & 0x3F) << 9) | ((layer_id as u16 & 0x3F) << 3) | tid as u16;
    let mut out = vec![(header >> 8) as u8, header as u8];
    out.extend_from_slice(body);
    out
}

#[test]
fn test_shvc_payloader_filters_layers() {
    let base = nalu(1, 0, 0, &[0x11; 8]);
    let enh = nalu(1, 1, 0, &[0x22; 8]);

    let mut p = H265ShvcPayloader::with_max_layer_id(0);
    let payloads = p.payload(1188, &annexb(&[&base, &enh])).expect("payload");

    // only the base layer survives, emitted as a single unit
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0], Bytes::from(base));
}

#[test]
fn test_shvc_round_trip_all_layers() {
    let base = nalu(1, 0, 0, &[0x11; 8]);
    let enh = nalu(1, 1, 0, &[0x22; 8]);
    let original = annexb(&[&base, &enh]);

    let mut p = H265ShvcPayloader::default();
    let payloads = p.payload(1188, &original).expect("payload");

    let mut d = H265ShvcPacket::default();
    let mut out = Vec::new();
    for payload in &payloads {
        let sample = d.depacketize(payload).expect("depacketize");
        if !sample.is_empty() {
            out.push(sample);
        }
    }

    assert_eq!(out.len(), 1);
    assert_eq!(out[0], original);
    assert_eq!(d.highest_layer_seen, 1);
}

#[test]
fn test_shvc_depacketizer_drops_enhancement_layers() {
    let base = nalu(1, 0, 0, &[0x11; 8]);
    let enh = nalu(1, 2, 0, &[0x22; 8]);

    let mut p = H265ShvcPayloader::default();
    let payloads = p
        .payload(1188, &annexb(&[&base, &enh]))
        .expect("payload");

    let mut d = H265ShvcPacket {
        max_layer_id: Some(0),
        ..Default::default()
    };
    let mut out = Vec::new();
    for payload in &payloads {
        let sample = d.depacketize(payload).expect("depacketize");
        if !sample.is_empty() {
            out.push(sample);
        }
    }

    assert_eq!(out.len(), 1);
    assert_eq!(out[0], annexb(&[&base]));
    assert_eq!(d.highest_layer_seen, 2, "dropped layers are still observed");
}
