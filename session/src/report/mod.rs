pub mod interval;
#[cfg(test)]
mod report_test;

use std::time::{Duration, SystemTime};

use bytes::Bytes;
use rtcp::compound_packet::CompoundPacket;
use rtcp::extended_report::{
    DlrrReport, DlrrReportBlock, ExtendedReport, ReceiverReferenceTimeReportBlock,
};
use rtcp::goodbye::Goodbye;
use rtcp::multipath_report::{MultipathBlock, MultipathReport, SubflowReport};
use rtcp::packet::Packet as RtcpPacket;
use rtcp::receiver_report::ReceiverReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescription;
use util::ntp::NtpTime;

use crate::database::SessionDb;
use crate::parameters::SessionParameters;

use interval::{feedback_interval_seconds, rtcp_interval_seconds};

/// RtcpScheduler decides when the next compound leaves, tracking the
/// smoothed compound size and the one-early-feedback-per-interval budget of
/// the feedback profile.
pub struct RtcpScheduler {
    feedback_profile: bool,
    reduced_minimum: bool,
    point_to_point: bool,
    session_bandwidth_kbps: u32,

    initial: bool,
    avg_rtcp_size: f64,
    prev_report_at: Option<SystemTime>,
    next_report_at: Option<SystemTime>,
    early_feedback_spent: bool,
}

impl RtcpScheduler {
    pub fn new(params: &SessionParameters) -> Self {
        RtcpScheduler {
            feedback_profile: params.is_feedback_profile(),
            reduced_minimum: params.reduced_size_rtcp,
            point_to_point: params.point_to_point,
            session_bandwidth_kbps: params.session_bandwidth_kbps,
            initial: true,
            avg_rtcp_size: 128.0,
            prev_report_at: None,
            next_report_at: None,
            early_feedback_spent: false,
        }
    }

    /// Folds one observed compound (sent or received) into the smoothed
    /// average size: avg ← size/16 + avg·15/16.
    pub fn record_compound_size(&mut self, octets: usize) {
        self.avg_rtcp_size = octets as f64 / 16.0 + self.avg_rtcp_size * (15.0 / 16.0);
    }

    pub fn avg_compound_size(&self) -> f64 {
        self.avg_rtcp_size
    }

    /// The next randomized interval. Consumes the initial flag.
    pub fn next_interval(&mut self, is_sender: bool, senders: u32, members: u32) -> Duration {
        let seconds = if self.feedback_profile {
            feedback_interval_seconds(
                is_sender,
                senders,
                members,
                self.avg_rtcp_size,
                self.session_bandwidth_kbps,
                self.initial,
                self.point_to_point,
                true,
            )
        } else {
            rtcp_interval_seconds(
                is_sender,
                senders,
                members,
                self.avg_rtcp_size,
                self.session_bandwidth_kbps,
                self.reduced_minimum,
                self.initial,
                true,
            )
        };
        self.initial = false;
        Duration::from_secs_f64(seconds)
    }

    /// Computes and stores the next report instant.
    pub fn schedule(
        &mut self,
        now: SystemTime,
        is_sender: bool,
        senders: u32,
        members: u32,
    ) -> SystemTime {
        let at = now + self.next_interval(is_sender, senders, members);
        self.prev_report_at = Some(now);
        self.next_report_at = Some(at);
        self.early_feedback_spent = false;
        at
    }

    pub fn next_report_at(&self) -> Option<SystemTime> {
        self.next_report_at
    }

    /// Whether an immediate feedback message may go out now. Granted at
    /// most once per deterministic interval and only on the feedback
    /// profile; further feedback waits for the scheduled instant.
    pub fn try_early_feedback(&mut self) -> bool {
        if !self.feedback_profile || self.early_feedback_spent {
            return false;
        }
        self.early_feedback_spent = true;
        true
    }
}

/// What a regular report round should carry besides the mandatory parts.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReportOptions {
    /// publish our receiver reference time (XR rrt attribute)
    pub receiver_reference_time: bool,
    /// echo reference times back as DLRR blocks
    pub dlrr_echo: bool,
}

impl ReportOptions {
    pub fn from_params(params: &SessionParameters) -> Self {
        let want = params.wants_receiver_rtt();
        ReportOptions {
            receiver_reference_time: want,
            dlrr_echo: want,
        }
    }
}

/// Builds the regular compound for this session: SR when we sent recently,
/// RR otherwise, then the SDES with our CNAME, then any extended reports.
pub fn build_compound(
    db: &mut SessionDb,
    cname: &Bytes,
    options: ReportOptions,
    now: SystemTime,
) -> CompoundPacket {
    let own_ssrc = db.own_ssrc();
    let reports = db.build_reception_reports(now);

    let mut packets: Vec<Box<dyn RtcpPacket + Send + Sync>> = vec![];

    if db.we_sent() {
        let (packet_count, octet_count) = db.sent_counts();
        packets.push(Box::new(SenderReport {
            ssrc: own_ssrc,
            ntp_time: NtpTime::from(now).as_u64(),
            rtp_time: db.rtp_time_at(now),
            packet_count,
            octet_count,
            reports,
            ..Default::default()
        }));
    } else {
        packets.push(Box::new(ReceiverReport {
            ssrc: own_ssrc,
            reports,
            ..Default::default()
        }));
    }

    packets.push(Box::new(SourceDescription::with_cname(
        own_ssrc,
        cname.clone(),
    )));

    if options.receiver_reference_time || options.dlrr_echo {
        let mut blocks: Vec<Box<dyn RtcpPacket + Send + Sync>> = vec![];
        if options.receiver_reference_time {
            blocks.push(Box::new(ReceiverReferenceTimeReportBlock {
                ntp_timestamp: NtpTime::from(now).as_u64(),
            }));
        }
        if options.dlrr_echo {
            let echoes: Vec<DlrrReport> = db
                .members()
                .filter_map(|m| {
                    m.dlrr_echo(now)
                        .map(|(last_rr, dlrr)| DlrrReport {
                            ssrc: m.ssrc,
                            last_rr,
                            dlrr,
                        })
                })
                .collect();
            if !echoes.is_empty() {
                blocks.push(Box::new(DlrrReportBlock { reports: echoes }));
            }
        }
        if !blocks.is_empty() {
            packets.push(Box::new(ExtendedReport {
                sender_ssrc: own_ssrc,
                reports: blocks,
            }));
        }
    }

    CompoundPacket(packets)
}

/// Builds the leaving compound: the regular report closed with a BYE.
pub fn build_bye_compound(
    db: &mut SessionDb,
    cname: &Bytes,
    reason: &str,
    now: SystemTime,
) -> CompoundPacket {
    let mut compound = build_compound(db, cname, ReportOptions::default(), now);
    compound.0.push(Box::new(Goodbye {
        sources: vec![db.own_ssrc()],
        reason: Bytes::copy_from_slice(reason.as_bytes()),
    }));
    compound
}

/// Wraps the session compound plus a per-subflow report for every known
/// subflow into the multipath wrapper, per the compounding rule: one
/// datagram reports for all subflows.
pub fn build_multipath_compound(
    db: &mut SessionDb,
    cname: &Bytes,
    options: ReportOptions,
    now: SystemTime,
) -> CompoundPacket {
    let own_ssrc = db.own_ssrc();
    let mut compound = build_compound(db, cname, options, now);

    let mut blocks = vec![];
    for subflow_id in db.subflow_ids() {
        let reports = db.build_subflow_reception_reports(subflow_id, now);
        if reports.is_empty() {
            continue;
        }
        let rr = ReceiverReport {
            ssrc: own_ssrc,
            reports,
            ..Default::default()
        };
        blocks.push(MultipathBlock::Report(SubflowReport {
            subflow_id,
            packets: vec![Box::new(rr)],
        }));
    }

    if !blocks.is_empty() {
        compound.0.push(Box::new(MultipathReport {
            ssrc: own_ssrc,
            blocks,
        }));
    }

    compound
}
