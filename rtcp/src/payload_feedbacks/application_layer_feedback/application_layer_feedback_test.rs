use bytes::Bytes;

use super::*;

#[test]
fn test_application_layer_feedback_round_trip() {
    let alf = ApplicationLayerFeedback {
        sender_ssrc: 0x902f9e2e,
        media_ssrc: 0x4bc4fcb4,
        data: Bytes::from_static(b"REMB\x01\x02\x03\x04"),
    };

    let data = alf.marshal().expect("marshal");
    let decoded = ApplicationLayerFeedback::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, alf);
    assert_eq!(decoded.header().count, FORMAT_ALF);
}

#[test]
fn test_application_layer_feedback_empty_fci() {
    let alf = ApplicationLayerFeedback {
        sender_ssrc: 1,
        media_ssrc: 2,
        data: Bytes::new(),
    };

    let data = alf.marshal().expect("marshal");
    assert_eq!(data.len(), 12);
    let decoded = ApplicationLayerFeedback::unmarshal(&mut data.clone()).expect("unmarshal");
    assert_eq!(decoded, alf);
}
