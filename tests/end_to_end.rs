//! Whole-stack checks through the facade: two sessions wired over the
//! virtual transport, exercising media, reports and teardown together.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::time::timeout;

use mprtp::rtp::codecs::generic::{GenericDepacketizer, GenericPayloader};
use mprtp::session::endpoint::Endpoint;
use mprtp::session::parameters::{FeedbackMessage, SessionParameters};
use mprtp::session::transport::VirtualTransport;
use mprtp::{RtpSession, SessionConfig, SessionEvent};

fn params() -> SessionParameters {
    let mut p = SessionParameters {
        payload_types: vec![(96, "H264".to_owned())],
        session_bandwidth_kbps: 500,
        point_to_point: true,
        ..Default::default()
    };
    p.feedback_messages.push(FeedbackMessage::Nack);
    p.finalize().expect("finalize")
}

fn config(cname: &'static str, remote: Endpoint, ssrc: u32, seq: u16) -> SessionConfig {
    let mut c = SessionConfig::new(
        params(),
        Bytes::from_static(cname.as_bytes()),
        remote,
        Box::new(GenericPayloader),
        Box::new(GenericDepacketizer),
    );
    c.ssrc = Some(ssrc);
    c.initial_sequence = Some(seq);
    c
}

#[tokio::test]
async fn test_media_flows_and_peers_discover_each_other() {
    let a = Endpoint::new("192.0.2.1", 5004);
    let b = Endpoint::new("192.0.2.2", 5004);
    let (left, right) = VirtualTransport::pair(a.clone(), b.clone());

    let (sender, _sender_events) =
        RtpSession::start(config("alpha@test", b, 0xA1A1_0001, 100), Arc::new(left))
            .expect("start sender");
    let (receiver, mut receiver_events) =
        RtpSession::start(config("beta@test", a, 0xB2B2_0001, 200), Arc::new(right))
            .expect("start receiver");

    for i in 0..4u8 {
        sender
            .send_sample(Bytes::from(vec![i; 40]), 3000)
            .await
            .expect("send");
    }

    let group = timeout(Duration::from_secs(2), async {
        loop {
            match receiver_events.recv().await {
                Some(SessionEvent::IncomingMedia(group)) => break Some(group),
                Some(_) => continue,
                None => break None,
            }
        }
    })
    .await
    .expect("within deadline")
    .expect("media group");
    assert!(!group.samples.is_empty());
    assert_eq!(group.discarded, 0);

    let snapshot = receiver.snapshot().await.expect("snapshot");
    assert_eq!(snapshot.member_count, 2);
    assert_eq!(snapshot.sender_count, 1);
    assert_eq!(snapshot.assumed_lost, 0);

    sender.stop().await.expect("stop sender");
    receiver.stop().await.expect("stop receiver");
}
