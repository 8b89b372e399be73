use std::time::Duration;

use bytes::Bytes;
use rtcp::receiver_report::ReceiverReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::{SdesType, SourceDescription};
use rtp::header::Header;
use rtp::packet::Packet;
use util::MarshalSize;

use super::*;
use crate::endpoint::Endpoint;
use crate::parameters::{FeedbackMessage, SessionParameters};

fn now() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn params() -> SessionParameters {
    SessionParameters {
        payload_types: vec![(96, "H264".to_owned())],
        session_bandwidth_kbps: 500,
        ..Default::default()
    }
    .finalize()
    .expect("finalize")
}

fn avpf_params() -> SessionParameters {
    let mut p = SessionParameters {
        payload_types: vec![(96, "H264".to_owned())],
        session_bandwidth_kbps: 500,
        ..Default::default()
    };
    p.feedback_messages.push(FeedbackMessage::Nack);
    p.finalize().expect("finalize")
}

fn receiver_db(peer: u32) -> SessionDb {
    let mut db = SessionDb::new(0xAAAA_0001, 90_000);
    let ep = Endpoint::new("192.0.2.1", 5004);
    for seq in [100u16, 101] {
        let pkt = Packet {
            header: Header {
                version: 2,
                ssrc: peer,
                sequence_number: seq,
                timestamp: 0,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0u8; 50]),
        };
        db.on_media_packet(&pkt, &ep, now());
    }
    db
}

#[test]
fn test_scheduler_smooths_compound_size() {
    let mut s = RtcpScheduler::new(&params());
    let before = s.avg_compound_size();
    s.record_compound_size(before as usize + 160);
    let after = s.avg_compound_size();
    assert!((after - (before + 10.0)).abs() < 1.0);
}

#[test]
fn test_scheduler_interval_band() {
    let mut s = RtcpScheduler::new(&params());
    // AVP: the halved initial floor dominates a 2-member session
    let first = s.next_interval(false, 1, 2);
    let t_d = 2.5;
    assert!(first >= Duration::from_secs_f64(0.5 * t_d / 1.21828 - 1e-6));
    assert!(first <= Duration::from_secs_f64(1.5 * t_d / 1.21828 + 1e-6));

    // past the first report the full floor applies
    let second = s.next_interval(false, 1, 2);
    assert!(second >= Duration::from_secs_f64(0.5 * 5.0 / 1.21828 - 1e-6));
    assert!(second <= Duration::from_secs_f64(1.5 * 5.0 / 1.21828 + 1e-6));
}

#[test]
fn test_feedback_scheduler_initial_clamp() {
    let mut s = RtcpScheduler::new(&avpf_params());
    let first = s.next_interval(false, 1, 2);
    // 1 s clamp, randomized and compensated
    assert!(first >= Duration::from_secs_f64(0.5 / 1.21828 - 1e-6));
    assert!(first <= Duration::from_secs_f64(1.5 / 1.21828 + 1e-6));

    // afterwards the reduced minimum 360/500 governs
    let second = s.next_interval(false, 1, 2);
    assert!(second >= Duration::from_secs_f64(0.72 * 0.5 / 1.21828 - 1e-6));
    assert!(second <= Duration::from_secs_f64(0.72 * 1.5 / 1.21828 + 1e-6));
}

#[test]
fn test_early_feedback_once_per_interval() {
    let mut s = RtcpScheduler::new(&avpf_params());
    s.schedule(now(), false, 1, 2);

    assert!(s.try_early_feedback());
    assert!(!s.try_early_feedback(), "budget spent until the next round");

    s.schedule(now() + Duration::from_secs(1), false, 1, 2);
    assert!(s.try_early_feedback(), "new interval renews the budget");
}

#[test]
fn test_early_feedback_denied_without_feedback_profile() {
    let mut s = RtcpScheduler::new(&params());
    s.schedule(now(), false, 1, 2);
    assert!(!s.try_early_feedback());
}

#[test]
fn test_receiver_compound_shape() {
    let mut db = receiver_db(0xBBBB);
    let compound = build_compound(
        &mut db,
        &Bytes::from_static(b"me@host"),
        ReportOptions::default(),
        now() + Duration::from_secs(1),
    );

    compound.validate().expect("strict compound");

    let rr = compound.0[0]
        .as_any()
        .downcast_ref::<ReceiverReport>()
        .expect("leading RR");
    assert_eq!(rr.ssrc, db.own_ssrc());
    assert_eq!(rr.reports.len(), 1);
    assert_eq!(rr.reports[0].ssrc, 0xBBBB);
    assert_eq!(rr.reports[0].fraction_lost, 0);
    assert_eq!(rr.reports[0].total_lost, 0);

    let sdes = compound.0[1]
        .as_any()
        .downcast_ref::<SourceDescription>()
        .expect("SDES follows");
    assert_eq!(sdes.chunks[0].items[0].sdes_type, SdesType::SdesCname);
}

#[test]
fn test_sender_compound_uses_sr() {
    let mut db = receiver_db(0xBBBB);
    db.record_sent_packet(90_000, 1200, now());

    let compound = build_compound(
        &mut db,
        &Bytes::from_static(b"me@host"),
        ReportOptions::default(),
        now() + Duration::from_secs(1),
    );

    let sr = compound.0[0]
        .as_any()
        .downcast_ref::<SenderReport>()
        .expect("leading SR");
    assert_eq!(sr.packet_count, 1);
    assert_eq!(sr.octet_count, 1200);
    // one second at 90 kHz past the stamped instant
    assert_eq!(sr.rtp_time, 90_000 + 90_000);
}

#[test]
fn test_xr_blocks_attached() {
    let mut db = receiver_db(0xBBBB);
    let compound = build_compound(
        &mut db,
        &Bytes::from_static(b"me@host"),
        ReportOptions {
            receiver_reference_time: true,
            dlrr_echo: true,
        },
        now(),
    );

    let xr = compound
        .0
        .iter()
        .find_map(|p| p.as_any().downcast_ref::<ExtendedReport>())
        .expect("XR present");
    assert!(xr.reports.iter().any(|b| b
        .as_any()
        .downcast_ref::<ReceiverReferenceTimeReportBlock>()
        .is_some()));
}

#[test]
fn test_bye_compound_ends_with_goodbye() {
    let mut db = receiver_db(0xBBBB);
    let compound = build_bye_compound(&mut db, &Bytes::from_static(b"me@host"), "leaving", now());

    let bye = compound
        .0
        .last()
        .unwrap()
        .as_any()
        .downcast_ref::<Goodbye>()
        .expect("trailing BYE");
    assert_eq!(bye.sources, vec![db.own_ssrc()]);
    assert!(compound.marshal_size() > 0);
}

#[test]
fn test_multipath_compound_wraps_subflows() {
    use rtp::extension::subflow_extension::SubflowExtension;
    use util::Marshal;

    let mut db = SessionDb::new(0xAAAA_0001, 90_000);
    let ep = Endpoint::new("192.0.2.1", 5004);
    for (i, subflow) in [1u16, 2, 1, 2].iter().enumerate() {
        let mut pkt = Packet {
            header: Header {
                version: 2,
                ssrc: 0xBBBB,
                sequence_number: 100 + i as u16,
                timestamp: 0,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0u8; 50]),
        };
        pkt.header
            .set_extension(
                2,
                SubflowExtension {
                    subflow_id: *subflow,
                    subflow_sequence_number: 50 + (i / 2) as u16,
                }
                .marshal()
                .expect("marshal"),
            )
            .expect("set_extension");
        db.on_media_packet(&pkt, &ep, now());
    }

    let compound = build_multipath_compound(
        &mut db,
        &Bytes::from_static(b"me@host"),
        ReportOptions::default(),
        now(),
    );

    let mp = compound
        .0
        .last()
        .unwrap()
        .as_any()
        .downcast_ref::<MultipathReport>()
        .expect("multipath wrapper");
    assert_eq!(mp.blocks.len(), 2, "one block per subflow");
}
