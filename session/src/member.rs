use std::time::{Duration, SystemTime};

use bytes::Bytes;
use rtcp::reception_report::ReceptionReport;
use util::ntp::NtpTime;

use crate::MIN_SEQUENTIAL;

/// Sequence jumps below this are treated as in-order (with loss).
const MAX_DROPOUT: u16 = 3000;
/// Backwards jumps below this are treated as reordering, not a restart.
const MAX_MISORDER: u16 = 100;

/// Identity attributes attached to a source by SDES chunks.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SdesInfo {
    pub cname: Option<Bytes>,
    pub name: Option<Bytes>,
    pub email: Option<Bytes>,
    pub phone: Option<Bytes>,
    pub location: Option<Bytes>,
    pub tool: Option<Bytes>,
    pub note: Option<Bytes>,
    pub private: Option<Bytes>,
}

/// Member lifecycle. A new source proves itself with `MIN_SEQUENTIAL`
/// consecutive in-order packets before its statistics count; senders are a
/// sub-state of valid members, re-armed by traffic and cleared by silence.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemberState {
    Probation(u8),
    Valid,
    Sender,
    Inactive,
    Leaving,
}

/// The outcome of feeding one media packet to a member entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeqOutcome {
    /// Counted; statistics updated.
    InOrder,
    /// The packet that completed probation.
    Validated,
    /// Still on probation, not counted.
    Probation,
    /// Implausible jump; dropped and remembered for restart detection.
    Bad,
}

/// Per-source reception state: RFC 3550 appendix A sequence accounting,
/// the interarrival jitter estimate, sender-report echo state and the
/// extended-report round-trip state.
#[derive(Debug, Clone)]
pub struct MemberEntry {
    pub ssrc: u32,
    pub sdes: SdesInfo,
    pub state: MemberState,

    // sequence accounting
    base_seq: u16,
    max_seq: u16,
    /// count of sequence wraps, pre-shifted (cycles << 16)
    cycles: u32,
    bad_seq: Option<u16>,
    received: u32,
    expected_prior: u32,
    received_prior: u32,

    // interarrival jitter (RFC 3550 6.4.1), in timestamp units
    transit: Option<i64>,
    jitter: f64,

    // sender-report echo for round-trip computation
    last_sr_middle32: u32,
    last_sr_arrival: Option<SystemTime>,

    // extended-report receiver-reference-time echo
    last_rrt_middle32: u32,
    last_rrt_arrival: Option<SystemTime>,
    /// round-trip time as last measured through DLRR or RR echo
    pub round_trip_time: Option<Duration>,

    /// wall-clock ↔ media-clock mapping from the in-band sync extension
    pub last_wallclock_sync: Option<(NtpTime, u32)>,

    // liveness
    pub last_activity: Option<SystemTime>,
    pub last_sender_activity: Option<SystemTime>,
    pub bye_received_at: Option<SystemTime>,

    // counters carried into reports and statistics
    pub octets_received: u64,
    pub invalid_packets: u32,
}

impl MemberEntry {
    pub fn new(ssrc: u32) -> Self {
        MemberEntry {
            ssrc,
            sdes: SdesInfo::default(),
            state: MemberState::Probation(MIN_SEQUENTIAL),
            base_seq: 0,
            max_seq: 0,
            cycles: 0,
            bad_seq: None,
            received: 0,
            expected_prior: 0,
            received_prior: 0,
            transit: None,
            jitter: 0.0,
            last_sr_middle32: 0,
            last_sr_arrival: None,
            last_rrt_middle32: 0,
            last_rrt_arrival: None,
            round_trip_time: None,
            last_wallclock_sync: None,
            last_activity: None,
            last_sender_activity: None,
            bye_received_at: None,
            octets_received: 0,
            invalid_packets: 0,
        }
    }

    /// A member created from an SDES chunk (heard of, no media yet).
    pub fn from_sdes(ssrc: u32) -> Self {
        Self::new(ssrc)
    }

    fn init_seq(&mut self, seq: u16) {
        self.base_seq = seq;
        self.max_seq = seq;
        self.bad_seq = None;
        self.cycles = 0;
        self.received = 0;
        self.expected_prior = 0;
        self.received_prior = 0;
    }

    /// RFC 3550 appendix A.1, folded together with the probation machine.
    fn update_seq(&mut self, seq: u16) -> SeqOutcome {
        if let MemberState::Probation(n) = self.state {
            // first packet of a new source initializes the window
            if self.received == 0 && n == MIN_SEQUENTIAL {
                self.init_seq(seq);
                self.max_seq = seq;
                self.state = MemberState::Probation(n - 1);
                if n - 1 == 0 {
                    self.received = 1;
                    self.state = MemberState::Valid;
                    return SeqOutcome::Validated;
                }
                return SeqOutcome::Probation;
            }

            return if seq == self.max_seq.wrapping_add(1) {
                self.max_seq = seq;
                if n <= 1 {
                    // consecutive run complete: the source is genuine
                    self.init_seq(seq);
                    self.received = 1;
                    self.state = MemberState::Valid;
                    SeqOutcome::Validated
                } else {
                    self.state = MemberState::Probation(n - 1);
                    SeqOutcome::Probation
                }
            } else {
                // gap during probation rebases the run
                self.state = MemberState::Probation(MIN_SEQUENTIAL - 1);
                self.max_seq = seq;
                SeqOutcome::Probation
            };
        }

        let udelta = seq.wrapping_sub(self.max_seq);
        if udelta < MAX_DROPOUT {
            if seq < self.max_seq {
                // wrapped within the window
                self.cycles = self.cycles.wrapping_add(1 << 16);
            }
            self.max_seq = seq;
        } else if udelta <= u16::MAX - MAX_MISORDER {
            // the sequence number made a very large jump
            if Some(seq) == self.bad_seq {
                // two sequential packets: the other side restarted
                self.init_seq(seq);
            } else {
                self.bad_seq = Some(seq.wrapping_add(1));
                return SeqOutcome::Bad;
            }
        } else {
            // duplicate or reordered packet, counted but max_seq untouched
        }
        self.received = self.received.wrapping_add(1);
        SeqOutcome::InOrder
    }

    /// Feeds one validated media packet: sequence accounting, jitter and
    /// sender re-arming.
    pub fn on_media_packet(
        &mut self,
        seq: u16,
        rtp_timestamp: u32,
        payload_octets: usize,
        clock_rate: u32,
        now: SystemTime,
    ) -> SeqOutcome {
        let outcome = self.update_seq(seq);
        if matches!(outcome, SeqOutcome::Bad) {
            self.invalid_packets = self.invalid_packets.wrapping_add(1);
            return outcome;
        }

        self.last_activity = Some(now);

        if matches!(outcome, SeqOutcome::InOrder | SeqOutcome::Validated) {
            self.octets_received += payload_octets as u64;
            self.update_jitter(rtp_timestamp, clock_rate, now);

            // receiving media re-arms the sender sub-state
            self.last_sender_activity = Some(now);
            if self.state == MemberState::Valid {
                self.state = MemberState::Sender;
            }
        }

        outcome
    }

    /// J ← J + (|D| − J)/16, with D the transit-time delta in timestamp
    /// units (RFC 3550 6.4.1).
    fn update_jitter(&mut self, rtp_timestamp: u32, clock_rate: u32, now: SystemTime) {
        let arrival_ticks = (NtpTime::from(now).as_secs_f64() * clock_rate as f64) as i64;
        let transit = arrival_ticks - rtp_timestamp as i64;
        if let Some(last_transit) = self.transit {
            let d = (transit - last_transit).abs() as f64;
            self.jitter += (d - self.jitter) / 16.0;
        }
        self.transit = Some(transit);
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn is_sender(&self) -> bool {
        self.state == MemberState::Sender
    }

    pub fn is_valid(&self) -> bool {
        matches!(self.state, MemberState::Valid | MemberState::Sender)
    }

    /// Clears the sender sub-state after the configured silence.
    pub fn clear_sender_if_silent(&mut self, now: SystemTime, silence: Duration) {
        if self.state != MemberState::Sender {
            return;
        }
        let idle = self
            .last_sender_activity
            .and_then(|t| now.duration_since(t).ok())
            .unwrap_or_default();
        if idle >= silence {
            self.state = MemberState::Valid;
        }
    }

    pub fn mark_leaving(&mut self, now: SystemTime) {
        self.state = MemberState::Leaving;
        self.bye_received_at = Some(now);
    }

    pub fn mark_inactive(&mut self) {
        self.state = MemberState::Inactive;
    }

    /// cycle-extended highest sequence number received
    pub fn extended_highest_seq(&self) -> u32 {
        self.cycles | self.max_seq as u32
    }

    fn expected(&self) -> u32 {
        self.extended_highest_seq()
            .wrapping_sub(self.base_seq as u32)
            .wrapping_add(1)
    }

    pub fn packets_received(&self) -> u32 {
        self.received
    }

    /// Cumulative lost as the signed 24-bit wire form (RFC 3550 A.3).
    pub fn cumulative_lost(&self) -> u32 {
        let lost = self.expected() as i64 - self.received as i64;
        // clamp to the representable signed 24-bit range
        let clamped = lost.clamp(-0x80_0000 + 1, 0x7F_FFFF);
        (clamped as u32) & 0x00FF_FFFF
    }

    /// Fraction lost since the previous report, consuming the interval
    /// (RFC 3550 A.3).
    fn fraction_lost_since_report(&mut self) -> u8 {
        let expected = self.expected();
        let expected_interval = expected.wrapping_sub(self.expected_prior);
        let received_interval = self.received.wrapping_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.received;

        let lost_interval = expected_interval as i64 - received_interval as i64;
        if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            ((lost_interval << 8) / expected_interval as i64) as u8
        }
    }

    /// Records the wall-clock mapping a source published in its media
    /// packets.
    pub fn on_wallclock_sync(&mut self, ntp: NtpTime, media_timestamp: u32) {
        self.last_wallclock_sync = Some((ntp, media_timestamp));
    }

    /// Records the arrival of a sender report from this source.
    pub fn on_sender_report(&mut self, ntp_time: u64, now: SystemTime) {
        self.last_sr_middle32 = (ntp_time >> 16) as u32;
        self.last_sr_arrival = Some(now);
        self.last_activity = Some(now);
    }

    /// Records a reception report naming us; closes the RTT loop when the
    /// report echoes one of our sender reports.
    pub fn on_reception_report(&mut self, report: &ReceptionReport, now: SystemTime) {
        self.last_activity = Some(now);
        if report.last_sender_report == 0 {
            return;
        }

        let now_middle = NtpTime::from(now).middle_32();
        let rtt_units = now_middle
            .wrapping_sub(report.last_sender_report)
            .wrapping_sub(report.delay);
        // 1/65536 s units; implausibly large values mean an unsynchronized
        // clock and are dropped
        if rtt_units < (1 << 22) {
            self.round_trip_time = Some(Duration::from_secs_f64(rtt_units as f64 / 65536.0));
        }
    }

    /// Receiver side of the extended-report path: remember the reference
    /// time published by this source.
    pub fn on_receiver_reference_time(&mut self, ntp_timestamp: u64, now: SystemTime) {
        self.last_rrt_middle32 = (ntp_timestamp >> 16) as u32;
        self.last_rrt_arrival = Some(now);
        self.last_activity = Some(now);
    }

    /// Sender side of the extended-report path: a DLRR block echoing our
    /// reference time yields the round trip without us being a sender.
    pub fn on_dlrr(&mut self, last_rr: u32, delay: u32, now: SystemTime) {
        self.last_activity = Some(now);
        if last_rr == 0 {
            return;
        }
        let now_middle = NtpTime::from(now).middle_32();
        let rtt_units = now_middle.wrapping_sub(last_rr).wrapping_sub(delay);
        if rtt_units < (1 << 22) {
            self.round_trip_time = Some(Duration::from_secs_f64(rtt_units as f64 / 65536.0));
        }
    }

    /// The DLRR echo this member has earned: its last published reference
    /// time and the delay since it arrived.
    pub fn dlrr_echo(&self, now: SystemTime) -> Option<(u32, u32)> {
        let arrival = self.last_rrt_arrival?;
        let delay = now
            .duration_since(arrival)
            .unwrap_or_else(|_| Duration::from_secs(0));
        Some((
            self.last_rrt_middle32,
            (delay.as_secs_f64() * 65536.0) as u32,
        ))
    }

    /// Builds the reception report block describing this source.
    pub fn build_reception_report(&mut self, now: SystemTime) -> ReceptionReport {
        let fraction_lost = self.fraction_lost_since_report();
        let delay = match self.last_sr_arrival {
            Some(arrival) => match now.duration_since(arrival) {
                Ok(d) => (d.as_secs_f64() * 65536.0) as u32,
                Err(_) => 0,
            },
            None => 0,
        };

        ReceptionReport {
            ssrc: self.ssrc,
            fraction_lost,
            total_lost: self.cumulative_lost(),
            last_sequence_number: self.extended_highest_seq(),
            jitter: self.jitter as u32,
            last_sender_report: self.last_sr_middle32,
            delay,
        }
    }

    pub fn apply_sdes_item(&mut self, sdes_type: rtcp::source_description::SdesType, text: Bytes) {
        use rtcp::source_description::SdesType;
        match sdes_type {
            SdesType::SdesCname => self.sdes.cname = Some(text),
            SdesType::SdesName => self.sdes.name = Some(text),
            SdesType::SdesEmail => self.sdes.email = Some(text),
            SdesType::SdesPhone => self.sdes.phone = Some(text),
            SdesType::SdesLocation => self.sdes.location = Some(text),
            SdesType::SdesTool => self.sdes.tool = Some(text),
            SdesType::SdesNote => self.sdes.note = Some(text),
            SdesType::SdesPrivate => self.sdes.private = Some(text),
            SdesType::SdesEnd => {}
        }
    }
}
