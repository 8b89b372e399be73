use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use rtcp::extended_report::{DlrrReportBlock, ExtendedReport, ReceiverReferenceTimeReportBlock};
use rtcp::goodbye::Goodbye;
use rtcp::multipath_report::{MultipathBlock, MultipathReport};
use rtcp::packet::Packet as RtcpPacket;
use rtcp::receiver_report::ReceiverReport;
use rtcp::sender_report::SenderReport;
use rtcp::source_description::SourceDescription;
use rtp::extension::subflow_extension::SubflowExtension;
use rtp::packet::Packet;
use util::Unmarshal;

use crate::endpoint::Endpoint;
use crate::member::{MemberEntry, MemberState, SeqOutcome};
use crate::{BYE_TIMEOUT_SECONDS, IMMEDIATE_BYE_LIMIT, MEMBER_TIMEOUT_INTERVALS, SENDER_TIMEOUT_INTERVALS};

/// State changes of interest to the session runtime, returned by the
/// database instead of being called back into it. The runtime owns the
/// dispatch; the database stays acyclic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberUpdate {
    Joined(u32),
    Validated(u32),
    ByeReceived(u32),
    Left(u32),
    TimedOut(u32),
    SenderExpired(u32),
    CollisionResolved { old_ssrc: u32, new_ssrc: u32 },
}

/// Counters for traffic the database refused.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InvalidCounters {
    pub bad_version: u32,
    pub bad_sequence: u32,
    pub bad_extension: u32,
    pub unparseable_control: u32,
}

/// SessionDb tracks every participant of one session: validation,
/// statistics, jitter, round-trip state, BYE handling and, for multipath
/// sessions, the per-subflow reception state of each member.
pub struct SessionDb {
    own_ssrc: u32,
    clock_rate: u32,
    members: HashMap<u32, MemberEntry>,
    /// per-subflow reception state, keyed by (ssrc, subflow id)
    subflow_members: HashMap<(u32, u16), MemberEntry>,
    pub invalid: InvalidCounters,

    // own sender statistics
    packets_sent: u32,
    octets_sent: u32,
    last_sent_rtp_time: u32,
    last_sent_wallclock: Option<SystemTime>,
}

impl SessionDb {
    pub fn new(own_ssrc: u32, clock_rate: u32) -> Self {
        SessionDb {
            own_ssrc,
            clock_rate,
            members: HashMap::new(),
            subflow_members: HashMap::new(),
            invalid: InvalidCounters::default(),
            packets_sent: 0,
            octets_sent: 0,
            last_sent_rtp_time: 0,
            last_sent_wallclock: None,
        }
    }

    pub fn own_ssrc(&self) -> u32 {
        self.own_ssrc
    }

    /// Total membership including ourselves.
    pub fn member_count(&self) -> usize {
        1 + self
            .members
            .values()
            .filter(|m| m.is_valid() || matches!(m.state, MemberState::Probation(_)))
            .count()
    }

    pub fn sender_count(&self) -> usize {
        let own = usize::from(self.we_sent());
        own + self.members.values().filter(|m| m.is_sender()).count()
    }

    pub fn we_sent(&self) -> bool {
        self.packets_sent > 0
    }

    pub fn members(&self) -> impl Iterator<Item = &MemberEntry> {
        self.members.values()
    }

    pub fn member(&self, ssrc: u32) -> Option<&MemberEntry> {
        self.members.get(&ssrc)
    }

    pub fn member_mut(&mut self, ssrc: u32) -> Option<&mut MemberEntry> {
        self.members.get_mut(&ssrc)
    }

    pub fn subflow_member(&self, ssrc: u32, subflow_id: u16) -> Option<&MemberEntry> {
        self.subflow_members.get(&(ssrc, subflow_id))
    }

    pub fn subflow_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.subflow_members.keys().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    /// Accounts one sent packet so sender reports and the sender flag stay
    /// truthful.
    pub fn record_sent_packet(&mut self, rtp_timestamp: u32, payload_octets: usize, now: SystemTime) {
        self.packets_sent = self.packets_sent.wrapping_add(1);
        self.octets_sent = self.octets_sent.wrapping_add(payload_octets as u32);
        self.last_sent_rtp_time = rtp_timestamp;
        self.last_sent_wallclock = Some(now);
    }

    pub fn sent_counts(&self) -> (u32, u32) {
        (self.packets_sent, self.octets_sent)
    }

    /// Media timestamp corresponding to `now`, extrapolated from the last
    /// send instant, for stamping sender reports.
    pub fn rtp_time_at(&self, now: SystemTime) -> u32 {
        match self.last_sent_wallclock {
            Some(then) => {
                let elapsed = now.duration_since(then).unwrap_or_default();
                self.last_sent_rtp_time
                    .wrapping_add(util::ntp::duration_to_ticks(elapsed, self.clock_rate))
            }
            None => self.last_sent_rtp_time,
        }
    }

    /// Validates and accounts one received media packet, reading the
    /// subflow tag off the header when it is still attached.
    pub fn on_media_packet(
        &mut self,
        packet: &Packet,
        from: &Endpoint,
        arrival: SystemTime,
    ) -> Vec<MemberUpdate> {
        let tag = subflow_tag(packet);
        self.on_media_packet_tagged(packet, from, tag, arrival)
    }

    /// Same as [`SessionDb::on_media_packet`] for callers that already
    /// stripped the subflow tag; the tag also feeds the per-subflow entry
    /// for the source.
    pub fn on_media_packet_tagged(
        &mut self,
        packet: &Packet,
        _from: &Endpoint,
        tag: Option<SubflowExtension>,
        arrival: SystemTime,
    ) -> Vec<MemberUpdate> {
        let mut updates = vec![];

        if packet.header.version != 2 {
            self.invalid.bad_version = self.invalid.bad_version.wrapping_add(1);
            return updates;
        }

        let ssrc = packet.header.ssrc;

        // our own identity arriving from elsewhere is a collision
        if ssrc == self.own_ssrc {
            let old_ssrc = self.own_ssrc;
            let new_ssrc = regenerate_ssrc(old_ssrc, &self.members);
            self.own_ssrc = new_ssrc;
            log::warn!("ssrc collision on {old_ssrc:#010x}, reallocated to {new_ssrc:#010x}");
            updates.push(MemberUpdate::CollisionResolved { old_ssrc, new_ssrc });
            return updates;
        }

        let clock_rate = self.clock_rate;
        let is_new = !self.members.contains_key(&ssrc);
        if is_new {
            updates.push(MemberUpdate::Joined(ssrc));
        }
        let entry = self
            .members
            .entry(ssrc)
            .or_insert_with(|| MemberEntry::new(ssrc));

        let outcome = entry.on_media_packet(
            packet.header.sequence_number,
            packet.header.timestamp,
            packet.payload.len(),
            clock_rate,
            arrival,
        );
        match outcome {
            SeqOutcome::Validated => updates.push(MemberUpdate::Validated(ssrc)),
            SeqOutcome::Bad => {
                self.invalid.bad_sequence = self.invalid.bad_sequence.wrapping_add(1)
            }
            _ => {}
        }

        // subflow-specific accounting uses the subflow's own sequence space
        if let Some(tag) = tag {
            let sub = self
                .subflow_members
                .entry((ssrc, tag.subflow_id))
                .or_insert_with(|| MemberEntry::new(ssrc));
            sub.on_media_packet(
                tag.subflow_sequence_number,
                packet.header.timestamp,
                packet.payload.len(),
                clock_rate,
                arrival,
            );
        }

        updates
    }

    /// Feeds one parsed control packet. Compound handling is a loop over
    /// this at the call site so the multipath wrapper can recurse.
    pub fn on_control_packet(
        &mut self,
        packet: &(dyn RtcpPacket + Send + Sync),
        now: SystemTime,
    ) -> Vec<MemberUpdate> {
        let mut updates = vec![];
        let any = packet.as_any();

        if let Some(sr) = any.downcast_ref::<SenderReport>() {
            let is_new = !self.members.contains_key(&sr.ssrc);
            if is_new && sr.ssrc != self.own_ssrc {
                updates.push(MemberUpdate::Joined(sr.ssrc));
            }
            let entry = self
                .members
                .entry(sr.ssrc)
                .or_insert_with(|| MemberEntry::new(sr.ssrc));
            entry.on_sender_report(sr.ntp_time, now);
            let own = self.own_ssrc;
            for report in &sr.reports {
                if report.ssrc == own {
                    if let Some(entry) = self.members.get_mut(&sr.ssrc) {
                        entry.on_reception_report(report, now);
                    }
                }
            }
        } else if let Some(rr) = any.downcast_ref::<ReceiverReport>() {
            let is_new = !self.members.contains_key(&rr.ssrc);
            if is_new && rr.ssrc != self.own_ssrc {
                updates.push(MemberUpdate::Joined(rr.ssrc));
            }
            let own = self.own_ssrc;
            let entry = self
                .members
                .entry(rr.ssrc)
                .or_insert_with(|| MemberEntry::new(rr.ssrc));
            entry.last_activity = Some(now);
            for report in &rr.reports {
                if report.ssrc == own {
                    entry.on_reception_report(report, now);
                }
            }
        } else if let Some(sdes) = any.downcast_ref::<SourceDescription>() {
            for chunk in &sdes.chunks {
                if chunk.source == self.own_ssrc {
                    continue;
                }
                let is_new = !self.members.contains_key(&chunk.source);
                if is_new {
                    updates.push(MemberUpdate::Joined(chunk.source));
                }
                let entry = self
                    .members
                    .entry(chunk.source)
                    .or_insert_with(|| MemberEntry::from_sdes(chunk.source));
                entry.last_activity = Some(now);
                for item in &chunk.items {
                    entry.apply_sdes_item(item.sdes_type, item.text.clone());
                }
            }
        } else if let Some(bye) = any.downcast_ref::<Goodbye>() {
            let member_count = self.member_count();
            for &ssrc in &bye.sources {
                if !self.members.contains_key(&ssrc) {
                    continue;
                }
                updates.push(MemberUpdate::ByeReceived(ssrc));
                if member_count < IMMEDIATE_BYE_LIMIT {
                    self.members.remove(&ssrc);
                    self.subflow_members.retain(|(s, _), _| *s != ssrc);
                    updates.push(MemberUpdate::Left(ssrc));
                } else if let Some(entry) = self.members.get_mut(&ssrc) {
                    // reconsideration: keep the entry until the delay ran
                    entry.mark_leaving(now);
                }
            }
        } else if let Some(xr) = any.downcast_ref::<ExtendedReport>() {
            let is_new = !self.members.contains_key(&xr.sender_ssrc);
            if is_new && xr.sender_ssrc != self.own_ssrc {
                updates.push(MemberUpdate::Joined(xr.sender_ssrc));
            }
            let own = self.own_ssrc;
            let entry = self
                .members
                .entry(xr.sender_ssrc)
                .or_insert_with(|| MemberEntry::new(xr.sender_ssrc));
            entry.last_activity = Some(now);
            for block in &xr.reports {
                if let Some(rrt) = block
                    .as_any()
                    .downcast_ref::<ReceiverReferenceTimeReportBlock>()
                {
                    entry.on_receiver_reference_time(rrt.ntp_timestamp, now);
                } else if let Some(dlrr) = block.as_any().downcast_ref::<DlrrReportBlock>() {
                    for report in &dlrr.reports {
                        if report.ssrc == own {
                            entry.on_dlrr(report.last_rr, report.dlrr, now);
                        }
                    }
                }
            }
        } else if let Some(mp) = any.downcast_ref::<MultipathReport>() {
            updates.extend(self.on_multipath_report(mp, now));
        }

        updates
    }

    /// Demultiplexes a multipath wrapper: nested packets update both the
    /// aggregate member state and the addressed subflow entry.
    fn on_multipath_report(&mut self, mp: &MultipathReport, now: SystemTime) -> Vec<MemberUpdate> {
        let mut updates = vec![];
        for block in &mp.blocks {
            if let MultipathBlock::Report(report) = block {
                for nested in &report.packets {
                    updates.extend(self.on_control_packet(nested.as_ref(), now));

                    // subflow view of the same report
                    if let Some(sr) = nested.as_any().downcast_ref::<SenderReport>() {
                        let sub = self
                            .subflow_members
                            .entry((sr.ssrc, report.subflow_id))
                            .or_insert_with(|| MemberEntry::new(sr.ssrc));
                        sub.on_sender_report(sr.ntp_time, now);
                    }
                }
            }
        }
        updates
    }

    /// Periodic housekeeping, run once per report interval: sender-flag
    /// expiry, inactivity timeout, BYE reconsideration expiry.
    pub fn sweep(&mut self, now: SystemTime, report_interval: Duration) -> Vec<MemberUpdate> {
        let mut updates = vec![];

        let sender_silence = report_interval * SENDER_TIMEOUT_INTERVALS;
        let member_silence = report_interval * MEMBER_TIMEOUT_INTERVALS;
        let bye_linger = Duration::from_secs(BYE_TIMEOUT_SECONDS);

        let mut remove = vec![];
        for (ssrc, entry) in self.members.iter_mut() {
            match entry.state {
                MemberState::Leaving => {
                    let since = entry
                        .bye_received_at
                        .and_then(|t| now.duration_since(t).ok())
                        .unwrap_or_default();
                    if since >= bye_linger {
                        remove.push(*ssrc);
                        updates.push(MemberUpdate::Left(*ssrc));
                    }
                }
                MemberState::Inactive => {
                    // second pass over an inactive member removes it
                    remove.push(*ssrc);
                    updates.push(MemberUpdate::Left(*ssrc));
                }
                _ => {
                    let was_sender = entry.is_sender();
                    entry.clear_sender_if_silent(now, sender_silence);
                    if was_sender && !entry.is_sender() {
                        updates.push(MemberUpdate::SenderExpired(*ssrc));
                    }

                    let idle = entry
                        .last_activity
                        .and_then(|t| now.duration_since(t).ok())
                        .unwrap_or_default();
                    if idle >= member_silence {
                        entry.mark_inactive();
                        updates.push(MemberUpdate::TimedOut(*ssrc));
                    }
                }
            }
        }

        for ssrc in remove {
            self.members.remove(&ssrc);
            self.subflow_members.retain(|(s, _), _| *s != ssrc);
        }

        updates
    }

    /// Reception report blocks for every active sender we hear.
    pub fn build_reception_reports(&mut self, now: SystemTime) -> Vec<rtcp::reception_report::ReceptionReport> {
        self.members
            .values_mut()
            .filter(|m| m.is_sender())
            .map(|m| m.build_reception_report(now))
            .collect()
    }

    /// Per-subflow reception report blocks for one subflow.
    pub fn build_subflow_reception_reports(
        &mut self,
        subflow_id: u16,
        now: SystemTime,
    ) -> Vec<rtcp::reception_report::ReceptionReport> {
        self.subflow_members
            .iter_mut()
            .filter(|(key, m)| key.1 == subflow_id && m.is_valid())
            .map(|(_, m)| m.build_reception_report(now))
            .collect()
    }
}

/// Reads the multipath subflow tag off a packet, by convention mapped to
/// the extension id the session negotiated; the database accepts any
/// element that parses as one.
fn subflow_tag(packet: &Packet) -> Option<SubflowExtension> {
    for ext in &packet.header.extensions {
        if ext.payload.len() == rtp::extension::subflow_extension::SUBFLOW_EXTENSION_SIZE {
            if let Ok(tag) = SubflowExtension::unmarshal(&mut ext.payload.clone()) {
                return Some(tag);
            }
        }
    }
    None
}

fn regenerate_ssrc(old: u32, members: &HashMap<u32, MemberEntry>) -> u32 {
    loop {
        let candidate = rand::random::<u32>();
        if candidate != old && !members.contains_key(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use rtp::header::Header;
    use util::Marshal;

    use super::*;

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    fn media_packet(ssrc: u32, seq: u16, ts: u32) -> Packet {
        Packet {
            header: Header {
                version: 2,
                ssrc,
                sequence_number: seq,
                timestamp: ts,
                payload_type: 96,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0u8; 100]),
        }
    }

    fn ep() -> Endpoint {
        Endpoint::new("192.0.2.1", 5004)
    }

    fn validated_db_with(ssrc: u32) -> SessionDb {
        let mut db = SessionDb::new(0xAAAA_0001, 90_000);
        db.on_media_packet(&media_packet(ssrc, 100, 0), &ep(), now());
        db.on_media_packet(&media_packet(ssrc, 101, 0), &ep(), now());
        db
    }

    #[test]
    fn test_member_created_and_validated() {
        let mut db = SessionDb::new(0xAAAA_0001, 90_000);

        let updates = db.on_media_packet(&media_packet(0xBBBB, 100, 0), &ep(), now());
        assert_eq!(updates, vec![MemberUpdate::Joined(0xBBBB)]);
        assert_eq!(db.member_count(), 2);

        let updates = db.on_media_packet(&media_packet(0xBBBB, 101, 0), &ep(), now());
        assert_eq!(updates, vec![MemberUpdate::Validated(0xBBBB)]);
        assert!(db.member(0xBBBB).unwrap().is_sender());
        assert_eq!(db.sender_count(), 1);
    }

    #[test]
    fn test_bad_version_dropped() {
        let mut db = SessionDb::new(1, 90_000);
        let mut pkt = media_packet(0xBBBB, 100, 0);
        pkt.header.version = 1;
        let updates = db.on_media_packet(&pkt, &ep(), now());
        assert!(updates.is_empty());
        assert_eq!(db.invalid.bad_version, 1);
        assert_eq!(db.member_count(), 1);
    }

    #[test]
    fn test_collision_regenerates_own_ssrc() {
        let mut db = SessionDb::new(0xDEAD_BEEF, 90_000);
        let updates = db.on_media_packet(&media_packet(0xDEAD_BEEF, 5, 0), &ep(), now());

        assert_eq!(updates.len(), 1);
        match updates[0] {
            MemberUpdate::CollisionResolved { old_ssrc, new_ssrc } => {
                assert_eq!(old_ssrc, 0xDEAD_BEEF);
                assert_ne!(new_ssrc, 0xDEAD_BEEF);
                assert_eq!(db.own_ssrc(), new_ssrc);
            }
            ref other => panic!("unexpected update {other:?}"),
        }
    }

    #[test]
    fn test_bye_removes_immediately_in_small_session() {
        let mut db = validated_db_with(0xBBBB);

        let bye = Goodbye {
            sources: vec![0xBBBB],
            ..Default::default()
        };
        let updates = db.on_control_packet(&bye, now());
        assert_eq!(
            updates,
            vec![MemberUpdate::ByeReceived(0xBBBB), MemberUpdate::Left(0xBBBB)]
        );
        assert_eq!(db.member_count(), 1);
    }

    #[test]
    fn test_bye_reconsidered_in_large_session() {
        let mut db = SessionDb::new(1, 90_000);
        // grow past the immediate-BYE limit
        for i in 0..IMMEDIATE_BYE_LIMIT as u32 + 5 {
            let ssrc = 0x1000 + i;
            db.on_media_packet(&media_packet(ssrc, 10, 0), &ep(), now());
            db.on_media_packet(&media_packet(ssrc, 11, 0), &ep(), now());
        }

        let bye = Goodbye {
            sources: vec![0x1000],
            ..Default::default()
        };
        let updates = db.on_control_packet(&bye, now());
        assert_eq!(updates, vec![MemberUpdate::ByeReceived(0x1000)]);
        assert!(db.member(0x1000).is_some(), "kept until the delay runs");

        // the linger expires at the next sweep past BYE_TIMEOUT
        let later = now() + Duration::from_secs(BYE_TIMEOUT_SECONDS + 1);
        let updates = db.sweep(later, Duration::from_secs(100));
        assert!(updates.contains(&MemberUpdate::Left(0x1000)));
        assert!(db.member(0x1000).is_none());
    }

    #[test]
    fn test_sdes_creates_and_describes_member() {
        use rtcp::source_description::{
            SdesType, SourceDescriptionChunk, SourceDescriptionItem,
        };

        let mut db = SessionDb::new(1, 90_000);
        let sdes = SourceDescription {
            chunks: vec![SourceDescriptionChunk {
                source: 0xCCCC,
                items: vec![SourceDescriptionItem {
                    sdes_type: SdesType::SdesCname,
                    text: Bytes::from_static(b"peer@example"),
                }],
            }],
        };

        let updates = db.on_control_packet(&sdes, now());
        assert_eq!(updates, vec![MemberUpdate::Joined(0xCCCC)]);
        assert_eq!(
            db.member(0xCCCC).unwrap().sdes.cname,
            Some(Bytes::from_static(b"peer@example"))
        );
    }

    #[test]
    fn test_inactivity_timeout_two_phase() {
        let mut db = validated_db_with(0xBBBB);
        let interval = Duration::from_secs(5);

        // five silent intervals mark the member inactive
        let later = now() + interval * MEMBER_TIMEOUT_INTERVALS;
        let updates = db.sweep(later, interval);
        assert!(updates.contains(&MemberUpdate::TimedOut(0xBBBB)));
        assert!(db.member(0xBBBB).is_some());

        // the next sweep removes it
        let updates = db.sweep(later + interval, interval);
        assert!(updates.contains(&MemberUpdate::Left(0xBBBB)));
        assert!(db.member(0xBBBB).is_none());
    }

    #[test]
    fn test_sender_flag_expires() {
        let mut db = validated_db_with(0xBBBB);
        let interval = Duration::from_secs(5);
        assert_eq!(db.sender_count(), 1);

        let later = now() + interval * SENDER_TIMEOUT_INTERVALS;
        let updates = db.sweep(later, interval);
        assert!(updates.contains(&MemberUpdate::SenderExpired(0xBBBB)));
        assert_eq!(db.sender_count(), 0);
        assert!(db.member(0xBBBB).unwrap().is_valid());
    }

    #[test]
    fn test_subflow_entries_track_their_own_sequences() {
        let mut db = SessionDb::new(1, 90_000);

        for (i, (subflow, sub_seq)) in
            [(1u16, 50u16), (2, 70), (1, 51), (2, 71)].iter().enumerate()
        {
            let mut pkt = media_packet(0xBBBB, 100 + i as u16, 0);
            pkt.header
                .set_extension(
                    2,
                    SubflowExtension {
                        subflow_id: *subflow,
                        subflow_sequence_number: *sub_seq,
                    }
                    .marshal()
                    .expect("marshal"),
                )
                .expect("set_extension");
            db.on_media_packet(&pkt, &ep(), now());
        }

        assert_eq!(db.subflow_ids(), vec![1, 2]);
        let flow1 = db.subflow_member(0xBBBB, 1).expect("flow 1");
        assert_eq!(flow1.extended_highest_seq(), 51);
        let flow2 = db.subflow_member(0xBBBB, 2).expect("flow 2");
        assert_eq!(flow2.extended_highest_seq(), 71);
    }

    #[test]
    fn test_sender_report_echo_state() {
        let mut db = validated_db_with(0xBBBB);

        let sr = SenderReport {
            ssrc: 0xBBBB,
            ntp_time: 0x0102_0304_0506_0708,
            rtp_time: 90_000,
            packet_count: 2,
            octet_count: 200,
            ..Default::default()
        };
        db.on_control_packet(&sr, now());

        let reports = db.build_reception_reports(now() + Duration::from_secs(1));
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].last_sender_report, 0x0304_0506);
    }
}
