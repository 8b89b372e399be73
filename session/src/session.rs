
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use util::{Marshal, Unmarshal};

use media::playout::PlayoutBuffer;
use rtcp::compound_packet::{CompoundPacket, ValidationMode};
use rtcp::transport_feedbacks::transport_layer_nack::{
    nack_pairs_from_sequence_numbers, TransportLayerNack,
};
use rtp::packet::Packet;
use rtp::packetizer::{depacketize_group, new_packetizer, Depacketizer, Packetizer, Payloader};
use rtp::sequence::{new_fixed_sequencer, new_random_sequencer, Sequencer};

use crate::database::{MemberUpdate, SessionDb};
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::mprtp::{MultipathTranslator, PathScheduler, RoundRobinScheduler};
use crate::parameters::{FeedbackMessage, SessionParameters};
use crate::report::{
    build_bye_compound, build_compound, build_multipath_compound, ReportOptions, RtcpScheduler,
};
use crate::rto::estimator::SubflowLossEvent;
use crate::rto::{
    LossDetector, LossEvent, MultipathLossDetector, MultipathPolicy, PredictorKind,
    DEFAULT_PREMATURE_TIMEOUT_PROBABILITY,
};
use crate::transport::PacketTransport;
use crate::IMMEDIATE_BYE_LIMIT;

/// A reassembled presentation-time group handed to the caller.
#[derive(Debug, Clone)]
pub struct MediaGroup {
    pub timestamp: u32,
    pub samples: Vec<Bytes>,
    /// units dropped inside the group for fragment inconsistencies
    pub discarded: usize,
}

/// A loss-detector event; multipath sessions tag the raising subflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLossEvent {
    pub subflow_id: Option<u16>,
    pub event: LossEvent,
}

/// Everything a session surfaces to its caller. Delivered in executor
/// order on the event channel; no callback re-enters the session.
#[derive(Debug)]
pub enum SessionEvent {
    IncomingMedia(MediaGroup),
    IncomingControl {
        packets: Vec<Box<dyn rtcp::packet::Packet + Send + Sync>>,
        from: Endpoint,
    },
    MemberUpdate(MemberUpdate),
    Loss(SessionLossEvent),
    TransportFault(String),
}

/// A point-in-time copy of the counters a caller may want mid-session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub own_ssrc: u32,
    pub member_count: usize,
    pub sender_count: usize,
    pub packets_sent: u32,
    pub octets_sent: u32,
    pub assumed_lost: usize,
    pub false_positives: usize,
    pub invalid_packets: u32,
}

/// How a session is built. The parameter record must already be finalized.
pub struct SessionConfig {
    pub parameters: SessionParameters,
    pub cname: Bytes,
    /// remote endpoint of the single path, or the control path when
    /// multipath is active
    pub remote: Endpoint,
    /// per-subflow remote endpoints for multipath sessions
    pub subflow_remotes: HashMap<u16, Endpoint>,
    pub payloader: Box<dyn Payloader + Send + Sync>,
    pub depacketizer: Box<dyn Depacketizer + Send + Sync>,
    pub predictor: PredictorKind,
    pub multipath_policy: MultipathPolicy,
    pub premature_timeout_probability: f64,
    /// fixed identity/sequence for reproducible tests; random otherwise
    pub ssrc: Option<u32>,
    pub initial_sequence: Option<u16>,
    pub playout_group_lifetime: Duration,
}

impl SessionConfig {
    pub fn new(
        parameters: SessionParameters,
        cname: Bytes,
        remote: Endpoint,
        payloader: Box<dyn Payloader + Send + Sync>,
        depacketizer: Box<dyn Depacketizer + Send + Sync>,
    ) -> Self {
        SessionConfig {
            parameters,
            cname,
            remote,
            subflow_remotes: HashMap::new(),
            payloader,
            depacketizer,
            predictor: PredictorKind::Simple,
            multipath_policy: MultipathPolicy::Single,
            premature_timeout_probability: DEFAULT_PREMATURE_TIMEOUT_PROBABILITY,
            ssrc: None,
            initial_sequence: None,
            playout_group_lifetime: Duration::from_millis(200),
        }
    }
}

enum Command {
    SendSample {
        data: Bytes,
        duration_ticks: u32,
        done: oneshot::Sender<Result<usize>>,
    },
    SendAccessUnit {
        samples: Vec<Bytes>,
        duration_ticks: u32,
        done: oneshot::Sender<Result<usize>>,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Stop {
        done: oneshot::Sender<()>,
    },
}

/// RtpSession is the send/receive facade over one per-session executor.
/// All session state lives on a single task; the handle posts onto it, so
/// the caller never contends with the receive path.
pub struct RtpSession {
    cmd_tx: mpsc::Sender<Command>,
}

impl RtpSession {
    /// Starts the session: identity, database, control-report tick and the
    /// transport receive path.
    pub fn start(
        config: SessionConfig,
        transport: Arc<dyn PacketTransport + Send + Sync>,
    ) -> Result<(RtpSession, mpsc::Receiver<SessionEvent>)> {
        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(256);

        let inner = SessionInner::new(config, transport, event_tx)?;
        tokio::spawn(inner.run(cmd_rx));

        Ok((RtpSession { cmd_tx }, event_rx))
    }

    /// Packetizes and transmits one sample. Resolves with the number of
    /// packets sent.
    pub async fn send_sample(&self, data: Bytes, duration_ticks: u32) -> Result<usize> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendSample {
                data,
                duration_ticks,
                done,
            })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    /// Packetizes and transmits an access unit: every sample shares the
    /// presentation time, the group advances the clock once.
    pub async fn send_access_unit(
        &self,
        samples: Vec<Bytes>,
        duration_ticks: u32,
    ) -> Result<usize> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::SendAccessUnit {
                samples,
                duration_ticks,
                done,
            })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)?
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }

    /// Emits the BYE (reconsidered when the session is large), drains
    /// pending work and releases the executor.
    pub async fn stop(&self) -> Result<()> {
        let (done, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Stop { done })
            .await
            .map_err(|_| Error::SessionClosed)?;
        rx.await.map_err(|_| Error::SessionClosed)
    }
}

struct SessionInner {
    params: SessionParameters,
    cname: Bytes,
    remote: Endpoint,
    subflow_remotes: HashMap<u16, Endpoint>,

    db: SessionDb,
    scheduler: RtcpScheduler,
    playout: PlayoutBuffer,
    packetizer: Box<dyn Packetizer + Send + Sync>,
    depacketizer: Box<dyn Depacketizer + Send + Sync>,
    detector: LossDetector,
    mp_detector: Option<MultipathLossDetector>,
    translator: Option<MultipathTranslator>,

    transport: Arc<dyn PacketTransport + Send + Sync>,
    event_tx: mpsc::Sender<SessionEvent>,

    report_at: Option<SystemTime>,
    sweep_at: SystemTime,
    current_interval: Duration,
    pending_nacks: Vec<u16>,
}

impl SessionInner {
    fn new(
        config: SessionConfig,
        transport: Arc<dyn PacketTransport + Send + Sync>,
        event_tx: mpsc::Sender<SessionEvent>,
    ) -> Result<Self> {
        let params = config.parameters;
        if params.clock_rate == 0 {
            return Err(Error::ConfigurationFault("missing clock rate".into()));
        }
        if params.multipath && config.subflow_remotes.is_empty() {
            return Err(Error::ConfigurationFault(
                "multipath without subflow endpoints".into(),
            ));
        }

        let own_ssrc = config.ssrc.unwrap_or_else(rand::random::<u32>);
        let sequencer: Box<dyn Sequencer + Send + Sync> = match config.initial_sequence {
            Some(seq) => Box::new(new_fixed_sequencer(seq)),
            None => Box::new(new_random_sequencer()),
        };

        let payload_type = params.payload_types.first().map(|(pt, _)| *pt).unwrap_or(96);
        let mut packetizer: Box<dyn Packetizer + Send + Sync> = new_packetizer(
            params.mtu,
            payload_type,
            own_ssrc,
            config.payloader,
            sequencer,
            params.clock_rate,
        )
        .clone_to();
        if let Some(id) = params
            .header_extensions
            .id(rtp::extension::EXTENSION_URI_NTP_64)
        {
            packetizer.enable_wallclock_sync(id);
        }

        let translator = if params.multipath {
            let extension_id = params
                .header_extensions
                .id(rtp::extension::EXTENSION_URI_SUBFLOW)
                .unwrap_or(2);
            let mut subflows: Vec<u16> = config.subflow_remotes.keys().copied().collect();
            subflows.sort_unstable();
            let scheduler: Box<dyn PathScheduler> = Box::new(RoundRobinScheduler::new(subflows));
            Some(MultipathTranslator::new(extension_id, scheduler))
        } else {
            None
        };

        let mp_detector = params.multipath.then(|| {
            MultipathLossDetector::new(
                config.predictor,
                config.multipath_policy,
                config.premature_timeout_probability,
            )
        });

        let scheduler = RtcpScheduler::new(&params);
        let db = SessionDb::new(own_ssrc, params.clock_rate);

        Ok(SessionInner {
            cname: config.cname,
            remote: config.remote,
            subflow_remotes: config.subflow_remotes,
            db,
            scheduler,
            playout: PlayoutBuffer::new(config.playout_group_lifetime),
            packetizer,
            depacketizer: config.depacketizer,
            detector: LossDetector::new(config.predictor, config.premature_timeout_probability),
            mp_detector,
            translator,
            transport,
            event_tx,
            report_at: None,
            sweep_at: SystemTime::now() + Duration::from_secs(5),
            current_interval: Duration::from_secs(5),
            pending_nacks: vec![],
            params,
        })
    }

    async fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event).await;
    }

    fn schedule_first_report(&mut self) {
        let now = SystemTime::now();
        let is_sender = self.db.we_sent();
        let senders = self.db.sender_count() as u32;
        let members = self.db.member_count() as u32;
        self.report_at = Some(self.scheduler.schedule(now, is_sender, senders, members));
        self.current_interval = self
            .report_at
            .and_then(|at| at.duration_since(now).ok())
            .unwrap_or(Duration::from_secs(5));
        self.sweep_at = now + self.current_interval;
    }

    /// The earliest timer among report tick, loss deadline, playout
    /// deadline and inactivity sweep.
    fn next_timer(&self) -> SystemTime {
        let mut deadline = self.sweep_at;
        if let Some(at) = self.report_at {
            deadline = deadline.min(at);
        }
        if let Some(at) = self.detector.next_deadline() {
            deadline = deadline.min(at);
        }
        if let Some(mp) = &self.mp_detector {
            if let Some(at) = mp.next_deadline() {
                deadline = deadline.min(at);
            }
        }
        if let Some(at) = self.playout.next_deadline() {
            deadline = deadline.min(at);
        }
        deadline
    }

    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>) {
        self.schedule_first_report();

        loop {
            let now = SystemTime::now();
            let delay = self
                .next_timer()
                .duration_since(now)
                .unwrap_or(Duration::from_millis(0));
            let transport = Arc::clone(&self.transport);

            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::SendSample { data, duration_ticks, done }) => {
                            let _ = done.send(self.send_payloads(&[data], duration_ticks).await);
                        }
                        Some(Command::SendAccessUnit { samples, duration_ticks, done }) => {
                            let _ = done.send(self.send_payloads(&samples, duration_ticks).await);
                        }
                        Some(Command::Snapshot { reply }) => {
                            let _ = reply.send(self.snapshot());
                        }
                        Some(Command::Stop { done }) => {
                            self.shutdown().await;
                            let _ = done.send(());
                            return;
                        }
                        None => {
                            self.shutdown().await;
                            return;
                        }
                    }
                }
                received = transport.recv() => {
                    match received {
                        Ok(pkt) => self.on_datagram(pkt.payload, pkt.from, pkt.arrival).await,
                        Err(e) => {
                            self.emit(SessionEvent::TransportFault(e.to_string())).await;
                            // the receive path is gone; only timers and
                            // commands remain meaningful
                            tokio::time::sleep(Duration::from_millis(50)).await;
                        }
                    }
                }
                _ = tokio::time::sleep(delay) => {
                    self.on_timers().await;
                }
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        let (packets_sent, octets_sent) = self.db.sent_counts();
        let (assumed_lost, false_positives) = match &self.mp_detector {
            Some(mp) => {
                let mut lost = self.detector.info.assumed_lost_count();
                let mut fps = self.detector.info.false_positive_count();
                for id in self.db.subflow_ids() {
                    if let Some(d) = mp.detector(id) {
                        lost += d.info.assumed_lost_count();
                        fps += d.info.false_positive_count();
                    }
                }
                (lost, fps)
            }
            None => (
                self.detector.info.assumed_lost_count(),
                self.detector.info.false_positive_count(),
            ),
        };
        SessionSnapshot {
            own_ssrc: self.db.own_ssrc(),
            member_count: self.db.member_count(),
            sender_count: self.db.sender_count(),
            packets_sent,
            octets_sent,
            assumed_lost,
            false_positives,
            invalid_packets: self.db.invalid.bad_version + self.db.invalid.bad_sequence,
        }
    }

    /// Packetize, stamp, tag (multipath) and transmit one group of sample
    /// payloads sharing a presentation time.
    async fn send_payloads(&mut self, samples: &[Bytes], duration_ticks: u32) -> Result<usize> {
        let packets = self
            .packetizer
            .packetize_access_unit(samples, duration_ticks)?;
        let now = SystemTime::now();

        let mut sent = 0;
        for mut packet in packets {
            let to = match &mut self.translator {
                Some(translator) => {
                    let subflow_id = translator.tag(&mut packet)?;
                    self.subflow_remotes
                        .get(&subflow_id)
                        .cloned()
                        .unwrap_or_else(|| self.remote.clone())
                }
                None => self.remote.clone(),
            };

            let payload_octets = packet.payload.len();
            let raw = packet.marshal()?;
            self.transport.send(raw, &to).await?;
            self.db
                .record_sent_packet(packet.header.timestamp, payload_octets, now);
            sent += 1;
        }
        Ok(sent)
    }

    /// Classifies one datagram. The control range of payload-type octets
    /// (RFC 5761) splits the two protocols on a shared port.
    async fn on_datagram(&mut self, payload: Bytes, from: Endpoint, arrival: SystemTime) {
        if payload.len() < 2 {
            return;
        }
        let second = payload[1];
        if (192..=223).contains(&second) {
            self.on_control(payload, from, arrival).await;
        } else {
            self.on_media(payload, from, arrival).await;
        }
    }

    async fn on_media(&mut self, payload: Bytes, from: Endpoint, arrival: SystemTime) {
        let mut packet = match Packet::unmarshal(&mut payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("dropping unparseable media packet: {e}");
                self.db.invalid.bad_version = self.db.invalid.bad_version.wrapping_add(1);
                return;
            }
        };

        // the subflow tag is consumed here; everything downstream sees the
        // single-path shape
        let tag = self
            .translator
            .as_ref()
            .and_then(|t| t.strip(&mut packet));

        let sync = self.read_wallclock_sync(&packet);

        let updates = self.db.on_media_packet_tagged(&packet, &from, tag, arrival);
        if let Some((ntp, media_timestamp)) = sync {
            if let Some(member) = self.db.member_mut(packet.header.ssrc) {
                member.on_wallclock_sync(ntp, media_timestamp);
            }
        }
        let mut new_ssrc_bye: Option<(u32, u32)> = None;
        for update in updates {
            if let MemberUpdate::CollisionResolved { old_ssrc, new_ssrc } = update {
                new_ssrc_bye = Some((old_ssrc, new_ssrc));
            }
            self.emit(SessionEvent::MemberUpdate(update)).await;
        }
        if let Some((old_ssrc, _new_ssrc)) = new_ssrc_bye {
            self.send_collision_bye(old_ssrc).await;
            return;
        }

        // loss detection: per subflow when tagged, flow level otherwise
        let seq = packet.header.sequence_number;
        match (&mut self.mp_detector, tag) {
            (Some(mp), Some(tag)) => {
                let events = mp.on_packet_arrival(
                    tag.subflow_id,
                    tag.subflow_sequence_number,
                    arrival,
                );
                self.emit_subflow_loss(events).await;
            }
            _ => {
                let events = self.detector.on_packet_arrival(seq, arrival);
                self.emit_loss(events).await;
            }
        }

        // playout ordering and group release
        let outcome = self.playout.insert(packet, arrival);
        if let Some(late) = outcome.late {
            let events = self.detector.on_late_arrival(late.header.sequence_number);
            self.emit_loss(events).await;
        }
        for group in outcome.flushed {
            self.deliver_group(group).await;
        }
    }

    /// Reads the wall-clock sync element when one was negotiated. The
    /// 56-bit form and malformed lengths are wire-format discards of the
    /// element only; the packet itself stays.
    fn read_wallclock_sync(&mut self, packet: &Packet) -> Option<(util::ntp::NtpTime, u32)> {
        let id = self
            .params
            .header_extensions
            .id(rtp::extension::EXTENSION_URI_NTP_64)
            .or_else(|| {
                self.params
                    .header_extensions
                    .id(rtp::extension::EXTENSION_URI_NTP_56)
            })?;
        let raw = packet.header.get_extension(id)?;
        match rtp::extension::ntp_time_extension::NtpTimeExtension::unmarshal(&mut raw.clone()) {
            Ok(sync) => Some((sync.timestamp, packet.header.timestamp)),
            Err(e) => {
                log::warn!("discarding wall-clock sync element: {e}");
                self.db.invalid.bad_extension = self.db.invalid.bad_extension.wrapping_add(1);
                None
            }
        }
    }

    async fn deliver_group(&mut self, group: media::playout::PlayoutGroup) {
        let payloads = group.payloads();
        let out = depacketize_group(self.depacketizer.as_mut(), &payloads);
        self.emit(SessionEvent::IncomingMedia(MediaGroup {
            timestamp: group.timestamp,
            samples: out.samples,
            discarded: out.discarded,
        }))
        .await;
    }

    async fn on_control(&mut self, payload: Bytes, from: Endpoint, arrival: SystemTime) {
        let total_len = payload.len();
        let packets = match rtcp::packet::unmarshal(&mut payload.clone()) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("dropping unparseable control packet: {e}");
                self.db.invalid.unparseable_control =
                    self.db.invalid.unparseable_control.wrapping_add(1);
                return;
            }
        };

        // strict compounds unless reduced-size reporting was negotiated
        let compound = CompoundPacket(packets.clone());
        let mode = if self.params.reduced_size_rtcp {
            ValidationMode::ReducedSize
        } else {
            ValidationMode::Strict
        };
        if compound.validate_with(mode).is_err() || compound.validate_length(total_len).is_err() {
            self.db.invalid.unparseable_control =
                self.db.invalid.unparseable_control.wrapping_add(1);
            return;
        }

        self.scheduler.record_compound_size(total_len);

        for packet in &compound.0 {
            let updates = self.db.on_control_packet(packet.as_ref(), arrival);
            for update in updates {
                self.emit(SessionEvent::MemberUpdate(update)).await;
            }
        }

        self.emit(SessionEvent::IncomingControl { packets, from }).await;
    }

    async fn emit_loss(&mut self, events: Vec<LossEvent>) {
        for event in events {
            if let LossEvent::RetransmissionRequested(seq) = event {
                self.request_retransmission(seq).await;
            }
            self.emit(SessionEvent::Loss(SessionLossEvent {
                subflow_id: None,
                event,
            }))
            .await;
        }
    }

    async fn emit_subflow_loss(&mut self, events: Vec<SubflowLossEvent>) {
        for e in events {
            if let LossEvent::RetransmissionRequested(seq) = e.event {
                self.request_retransmission(seq).await;
            }
            self.emit(SessionEvent::Loss(SessionLossEvent {
                subflow_id: Some(e.subflow_id),
                event: e.event,
            }))
            .await;
        }
    }

    /// NACK the missing number, immediately when the feedback budget
    /// allows, with the next regular compound otherwise.
    async fn request_retransmission(&mut self, seq: u16) {
        if !self.params.negotiated(FeedbackMessage::Nack) {
            return;
        }
        self.pending_nacks.push(seq);
        if self.scheduler.try_early_feedback() {
            self.send_nacks().await;
        }
    }

    fn build_nack(&mut self) -> Option<TransportLayerNack> {
        if self.pending_nacks.is_empty() {
            return None;
        }
        let mut seqs = std::mem::take(&mut self.pending_nacks);
        seqs.sort_unstable();
        seqs.dedup();

        let media_ssrc = self
            .db
            .members()
            .find(|m| m.is_sender())
            .map(|m| m.ssrc)
            .unwrap_or(0);

        Some(TransportLayerNack {
            sender_ssrc: self.db.own_ssrc(),
            media_ssrc,
            nacks: nack_pairs_from_sequence_numbers(&seqs),
        })
    }

    /// The early feedback packet: reduced-size when negotiated, a minimal
    /// strict compound otherwise.
    async fn send_nacks(&mut self) {
        let Some(nack) = self.build_nack() else {
            return;
        };

        let raw = if self.params.reduced_size_rtcp {
            nack.marshal()
        } else {
            let mut compound = build_compound(
                &mut self.db,
                &self.cname,
                ReportOptions::default(),
                SystemTime::now(),
            );
            compound.0.push(Box::new(nack));
            compound.marshal()
        };

        match raw {
            Ok(raw) => {
                self.scheduler.record_compound_size(raw.len());
                let remote = self.remote.clone();
                if let Err(e) = self.transport.send(raw, &remote).await {
                    self.emit(SessionEvent::TransportFault(e.to_string())).await;
                }
            }
            Err(e) => log::warn!("failed to marshal feedback: {e}"),
        }
    }

    async fn on_timers(&mut self) {
        let now = SystemTime::now();

        // loss deadlines
        let events = self.detector.poll(now);
        self.emit_loss(events).await;
        if let Some(mp) = &mut self.mp_detector {
            let events = mp.poll(now);
            self.emit_subflow_loss(events).await;
        }

        // playout deadlines
        for group in self.playout.poll_expired(now) {
            self.deliver_group(group).await;
        }

        // inactivity sweep
        if now >= self.sweep_at {
            let updates = self.db.sweep(now, self.current_interval);
            for update in updates {
                self.emit(SessionEvent::MemberUpdate(update)).await;
            }
            self.sweep_at = now + self.current_interval;

            // refresh the playout deadline from the current round-trip and
            // jitter view of the active sender
            let estimate = self
                .db
                .members()
                .find(|m| m.is_sender())
                .and_then(|m| m.round_trip_time.map(|rtt| (rtt, m.jitter())));
            if let Some((rtt, jitter_ticks)) = estimate {
                let jitter =
                    util::ntp::ticks_to_duration(jitter_ticks as u32, self.params.clock_rate);
                let lifetime = (rtt + jitter * 2).max(Duration::from_millis(50));
                self.playout.set_group_lifetime(lifetime);
            }
        }

        // scheduled report instant
        if let Some(at) = self.report_at {
            if now >= at {
                self.send_report(now).await;
            }
        }
    }

    async fn send_report(&mut self, now: SystemTime) {
        let options = ReportOptions::from_params(&self.params);
        let mut compound = if self.params.multipath {
            build_multipath_compound(&mut self.db, &self.cname, options, now)
        } else {
            build_compound(&mut self.db, &self.cname, options, now)
        };

        // a deferred NACK rides along
        if self.params.negotiated(FeedbackMessage::Nack) {
            if let Some(nack) = self.build_nack() {
                compound.0.push(Box::new(nack));
            }
        }

        match compound.marshal() {
            Ok(raw) => {
                self.scheduler.record_compound_size(raw.len());
                let remote = self.remote.clone();
                if let Err(e) = self.transport.send(raw, &remote).await {
                    self.emit(SessionEvent::TransportFault(e.to_string())).await;
                }
            }
            Err(e) => log::warn!("failed to marshal report compound: {e}"),
        }

        let is_sender = self.db.we_sent();
        let senders = self.db.sender_count() as u32;
        let members = self.db.member_count() as u32;
        self.report_at = Some(self.scheduler.schedule(now, is_sender, senders, members));
        self.current_interval = self
            .report_at
            .and_then(|at| at.duration_since(now).ok())
            .unwrap_or(self.current_interval);
    }

    /// BYE for the identity we abandoned in a collision.
    async fn send_collision_bye(&mut self, old_ssrc: u32) {
        let mut compound = build_compound(
            &mut self.db,
            &self.cname,
            ReportOptions::default(),
            SystemTime::now(),
        );
        compound.0.push(Box::new(rtcp::goodbye::Goodbye {
            sources: vec![old_ssrc],
            reason: Bytes::from_static(b"ssrc collision"),
        }));
        if let Ok(raw) = compound.marshal() {
            let remote = self.remote.clone();
            if let Err(e) = self.transport.send(raw, &remote).await {
                self.emit(SessionEvent::TransportFault(e.to_string())).await;
            }
        }
    }

    async fn shutdown(&mut self) {
        // large sessions reconsider the BYE instant to avoid a storm
        if self.db.member_count() >= IMMEDIATE_BYE_LIMIT {
            let is_sender = self.db.we_sent();
            let senders = self.db.sender_count() as u32;
            let members = self.db.member_count() as u32;
            let delay = self.scheduler.next_interval(is_sender, senders, members);
            tokio::time::sleep(delay).await;
        }

        let now = SystemTime::now();
        let compound = build_bye_compound(&mut self.db, &self.cname, "teardown", now);
        if let Ok(raw) = compound.marshal() {
            let remote = self.remote.clone();
            let _ = self.transport.send(raw, &remote).await;
        }

        // drain whatever the playout buffer still holds
        for group in self.playout.flush_all() {
            self.deliver_group(group).await;
        }

        let _ = self.transport.close().await;
    }
}
