use std::time::{Duration, SystemTime};

use super::super::{LossEvent, MultipathPolicy, PredictorKind};
use super::*;

fn t0() -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
}

fn at_ms(ms: u64) -> SystemTime {
    t0() + Duration::from_millis(ms)
}

#[test]
fn test_simple_detector_immediate_loss() {
    let mut d = LossDetector::new(PredictorKind::Simple, 0.05);

    for seq in 100..=104u16 {
        let events = d.on_packet_arrival(seq, at_ms((seq as u64 - 100) * 20));
        assert!(events.is_empty(), "no loss in order");
    }

    // 105 dropped: arrival of 106 raises the loss at once
    let events = d.on_packet_arrival(106, at_ms(120));
    assert_eq!(
        events,
        vec![
            LossEvent::AssumedLost(105),
            LossEvent::RetransmissionRequested(105),
        ]
    );
    assert_eq!(d.info.assumed_lost_count(), 1);
}

#[test]
fn test_simple_detector_every_gap_exactly_once() {
    let mut d = LossDetector::new(PredictorKind::Simple, 0.05);
    d.on_packet_arrival(10, at_ms(0));

    // 11, 12, 14 missing after jumping to 13 then 15
    let mut lost = vec![];
    for e in d.on_packet_arrival(13, at_ms(20)) {
        if let LossEvent::AssumedLost(seq) = e {
            lost.push(seq);
        }
    }
    for e in d.on_packet_arrival(15, at_ms(40)) {
        if let LossEvent::AssumedLost(seq) = e {
            lost.push(seq);
        }
    }
    assert_eq!(lost, vec![11, 12, 14]);
}

#[test]
fn test_moving_average_tolerance_delays_loss() {
    let mut d = LossDetector::new(PredictorKind::MovingAverage, 0.05);

    // 20 evenly alternating arrivals, mean 20 ms, sigma = 2 ms
    let mut now_ms = 0u64;
    for i in 0..20u16 {
        d.on_packet_arrival(100 + i, at_ms(now_ms));
        now_ms += if i % 2 == 0 { 18 } else { 22 };
    }
    let last_arrival_ms = now_ms - if 19 % 2 == 0 { 18 } else { 22 };

    // packet 120 lost; 121 arrives one interval later
    let events = d.on_packet_arrival(121, at_ms(last_arrival_ms + 20));
    assert!(
        !events.contains(&LossEvent::AssumedLost(120)),
        "must wait out mean + sigma*z"
    );
    assert_eq!(d.pending_count(), 1);

    // the deadline sits at least one mean interarrival past the last
    // arrival, plus the sigma*z tolerance
    let deadline = d.next_deadline().expect("pending deadline");
    assert!(deadline >= at_ms(last_arrival_ms + 19));

    // a moment before the deadline: still quiet
    assert!(d.poll(deadline - Duration::from_millis(1)).is_empty());

    // at the deadline the loss fires
    let events = d.poll(deadline);
    assert!(events.contains(&LossEvent::AssumedLost(120)));
    assert!(events.contains(&LossEvent::RetransmissionRequested(120)));
}

#[test]
fn test_false_positive_cancels_pending() {
    let mut d = LossDetector::new(PredictorKind::MovingAverage, 0.05);
    let mut now_ms = 0u64;
    for i in 0..10u16 {
        d.on_packet_arrival(100 + i, at_ms(now_ms));
        now_ms += 20;
    }

    // 110 and 111 transposed in the network: 111 shows up early,
    // revealing the gap before 110's deadline
    d.on_packet_arrival(111, at_ms(now_ms - 10));
    assert_eq!(d.pending_count(), 1);

    // the straggler shows up before the deadline
    let events = d.on_packet_arrival(110, at_ms(now_ms - 5));
    assert_eq!(events, vec![LossEvent::FalsePositive(110)]);
    assert_eq!(d.pending_count(), 0);
    assert_eq!(d.info.false_positive_count(), 1);
    assert_eq!(d.info.assumed_lost_count(), 0);
}

#[test]
fn test_retransmission_arrival_after_loss() {
    let mut d = LossDetector::new(PredictorKind::Simple, 0.05);
    d.on_packet_arrival(100, at_ms(0));
    d.on_packet_arrival(102, at_ms(20));
    assert_eq!(d.info.assumed_lost_count(), 1);

    let events = d.on_packet_arrival(101, at_ms(60));
    assert_eq!(
        events,
        vec![LossEvent::RetransmissionArrived {
            seq: 101,
            late: false
        }]
    );
    assert_eq!(d.info.received_rtx_count(), 1);
}

#[test]
fn test_late_arrival_notification() {
    let mut d = LossDetector::new(PredictorKind::Simple, 0.05);
    d.on_packet_arrival(100, at_ms(0));
    d.on_packet_arrival(102, at_ms(20));

    let events = d.on_late_arrival(101);
    assert_eq!(
        events,
        vec![LossEvent::RetransmissionArrived {
            seq: 101,
            late: true
        }]
    );
    assert_eq!(d.info.late_rtx_count(), 1);
}

#[test]
fn test_sequence_wrap_no_false_loss() {
    let mut d = LossDetector::new(PredictorKind::Simple, 0.05);
    d.on_packet_arrival(0xFFFE, at_ms(0));
    d.on_packet_arrival(0xFFFF, at_ms(20));
    let events = d.on_packet_arrival(0x0000, at_ms(40));
    assert!(events.is_empty(), "wrap is in order");
    let events = d.on_packet_arrival(0x0001, at_ms(60));
    assert!(events.is_empty());
}

#[test]
fn test_huge_jump_resets_model() {
    let mut d = LossDetector::new(PredictorKind::Simple, 0.05);
    d.on_packet_arrival(100, at_ms(0));
    let events = d.on_packet_arrival(20_000, at_ms(20));
    assert!(events.is_empty(), "reset, not thousands of losses");
    assert_eq!(d.info.assumed_lost_count(), 0);
}

#[test]
fn test_cancel_withdraws_request() {
    let mut d = LossDetector::new(PredictorKind::MovingAverage, 0.05);
    let mut now_ms = 0u64;
    for i in 0..10u16 {
        d.on_packet_arrival(100 + i, at_ms(now_ms));
        now_ms += 20;
    }
    d.on_packet_arrival(111, at_ms(now_ms - 10));
    assert_eq!(d.pending_count(), 1);

    d.cancel(110);
    assert_eq!(d.pending_count(), 0);
    assert_eq!(d.info.cancelled_rtx_count(), 1);
}

#[test]
fn test_multipath_single_policy_isolates_subflows() {
    let mut mp = MultipathLossDetector::new(PredictorKind::Simple, MultipathPolicy::Single, 0.05);

    mp.on_packet_arrival(1, 50, at_ms(0));
    mp.on_packet_arrival(2, 70, at_ms(5));
    mp.on_packet_arrival(1, 51, at_ms(20));
    mp.on_packet_arrival(2, 71, at_ms(25));

    // gap on subflow 1 only
    let events = mp.on_packet_arrival(1, 53, at_ms(40));
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.subflow_id == 1));
    assert!(events
        .iter()
        .any(|e| e.event == LossEvent::AssumedLost(52)));

    assert_eq!(mp.detector(2).unwrap().info.assumed_lost_count(), 0);
}

#[test]
fn test_multipath_crosspath_fires_peer_deadlines() {
    let mut mp =
        MultipathLossDetector::new(PredictorKind::MovingAverage, MultipathPolicy::Crosspath, 0.05);

    // warm both subflows
    let mut now_ms = 0u64;
    for i in 0..10u16 {
        mp.on_packet_arrival(1, 100 + i, at_ms(now_ms));
        mp.on_packet_arrival(2, 200 + i, at_ms(now_ms + 3));
        now_ms += 20;
    }

    // subflow 1 reveals a gap early enough that the deadline is pending
    mp.on_packet_arrival(1, 111, at_ms(now_ms - 5));
    assert!(mp.next_deadline().is_some());

    // much later traffic on subflow 2 drives subflow 1's deadline
    let events = mp.on_packet_arrival(2, 210, at_ms(now_ms + 2000));
    assert!(events
        .iter()
        .any(|e| e.subflow_id == 1 && e.event == LossEvent::AssumedLost(110)));
}

#[test]
fn test_multipath_compare_counts_divergence() {
    let mut mp =
        MultipathLossDetector::new(PredictorKind::MovingAverage, MultipathPolicy::Compare, 0.05);

    let mut now_ms = 0u64;
    for i in 0..10u16 {
        mp.on_packet_arrival(1, 100 + i, at_ms(now_ms));
        mp.on_packet_arrival(2, 200 + i, at_ms(now_ms + 3));
        now_ms += 20;
    }

    mp.on_packet_arrival(1, 111, at_ms(now_ms - 5));
    assert_eq!(mp.divergence(), 0);

    mp.on_packet_arrival(2, 210, at_ms(now_ms + 2000));
    assert!(mp.divergence() > 0, "cross-fired events are telemetry");
}
