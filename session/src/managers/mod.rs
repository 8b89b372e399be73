
use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use util::sync::Mutex;
use util::{Marshal, Unmarshal};

use rtp::packet::Packet;
use rtp::packetizer::Payloader;

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::mprtp::{MultipathTranslator, PathScheduler};
use crate::parameters::MediaType;
use crate::session::{MediaGroup, RtpSession, SessionConfig, SessionEvent};
use crate::transport::PacketTransport;

/// MediaSink receives reassembled media from a forwarding session. The
/// session owns the pacing; the sink must not block the executor for long.
#[async_trait]
pub trait MediaSink: Send + Sync {
    async fn deliver(&self, group: MediaGroup) -> Result<()>;
}

/// ForwardingSession drives a plain session and hands every reassembled
/// group to an externally supplied sink instead of an event channel.
pub struct ForwardingSession {
    pub session: RtpSession,
}

impl ForwardingSession {
    pub fn start(
        config: SessionConfig,
        transport: Arc<dyn PacketTransport + Send + Sync>,
        sink: Arc<dyn MediaSink>,
    ) -> Result<ForwardingSession> {
        let (session, mut events) = RtpSession::start(config, transport)?;
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if let SessionEvent::IncomingMedia(group) = event {
                    if sink.deliver(group).await.is_err() {
                        break;
                    }
                }
            }
        });
        Ok(ForwardingSession { session })
    }

    pub async fn stop(&self) -> Result<()> {
        self.session.stop().await
    }
}

/// One packetization decision: how a sample was spread over payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketizationRecord {
    pub sample_octets: usize,
    pub payload_octets: Vec<usize>,
}

/// PacketizationAudit collects per-sample packetization offsets for
/// instrumentation.
#[derive(Default, Clone)]
pub struct PacketizationAudit {
    records: Arc<Mutex<Vec<PacketizationRecord>>>,
}

impl PacketizationAudit {
    pub fn new() -> Self {
        PacketizationAudit::default()
    }

    pub fn records(&self) -> Vec<PacketizationRecord> {
        self.records.lock().clone()
    }

    fn record(&self, sample_octets: usize, payload_octets: Vec<usize>) {
        self.records.lock().push(PacketizationRecord {
            sample_octets,
            payload_octets,
        });
    }

    /// Wraps a payloader so every packetization decision is recorded.
    pub fn wrap(
        &self,
        inner: Box<dyn Payloader + Send + Sync>,
    ) -> Box<dyn Payloader + Send + Sync> {
        Box::new(AuditingPayloader {
            inner,
            audit: self.clone(),
        })
    }
}

#[derive(Clone)]
struct AuditingPayloader {
    inner: Box<dyn Payloader + Send + Sync>,
    audit: PacketizationAudit,
}

impl std::fmt::Debug for AuditingPayloader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditingPayloader").finish()
    }
}

impl Payloader for AuditingPayloader {
    fn payload(&mut self, mtu: usize, b: &Bytes) -> std::result::Result<Vec<Bytes>, rtp::Error> {
        let payloads = self.inner.payload(mtu, b)?;
        self.audit
            .record(b.len(), payloads.iter().map(|p| p.len()).collect());
        Ok(payloads)
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(self.clone())
    }
}

/// PacketizationAuditSession is a plain session whose payloader is
/// instrumented; the audit handle stays with the caller.
pub struct PacketizationAuditSession {
    pub session: RtpSession,
    pub audit: PacketizationAudit,
}

impl PacketizationAuditSession {
    pub fn start(
        mut config: SessionConfig,
        transport: Arc<dyn PacketTransport + Send + Sync>,
    ) -> Result<(PacketizationAuditSession, mpsc::Receiver<SessionEvent>)> {
        let audit = PacketizationAudit::new();
        let payloader = std::mem::replace(
            &mut config.payloader,
            Box::new(rtp::codecs::generic::GenericPayloader),
        );
        config.payloader = audit.wrap(payloader);

        let (session, events) = RtpSession::start(config, transport)?;
        Ok((PacketizationAuditSession { session, audit }, events))
    }
}

/// Reception timing observations for offline analysis.
#[derive(Debug, Default, Clone)]
pub struct AnalysisStats {
    pub groups: usize,
    /// wall-clock deltas between consecutive group deliveries
    pub interarrival: Vec<std::time::Duration>,
    /// media-timestamp deltas between consecutive groups
    pub presentation_deltas: Vec<u32>,
}

/// AnalysisSession records inter-arrival and presentation-time deltas of
/// everything it receives.
pub struct AnalysisSession {
    pub session: RtpSession,
    stats: Arc<Mutex<AnalysisStats>>,
}

impl AnalysisSession {
    pub fn start(
        config: SessionConfig,
        transport: Arc<dyn PacketTransport + Send + Sync>,
    ) -> Result<AnalysisSession> {
        let stats = Arc::new(Mutex::new(AnalysisStats::default()));
        let (session, mut events) = RtpSession::start(config, transport)?;

        let sink = Arc::clone(&stats);
        tokio::spawn(async move {
            let mut last: Option<(SystemTime, u32)> = None;
            while let Some(event) = events.recv().await {
                if let SessionEvent::IncomingMedia(group) = event {
                    let now = SystemTime::now();
                    let mut stats = sink.lock();
                    stats.groups += 1;
                    if let Some((then, prev_ts)) = last {
                        if let Ok(delta) = now.duration_since(then) {
                            stats.interarrival.push(delta);
                        }
                        stats
                            .presentation_deltas
                            .push(group.timestamp.wrapping_sub(prev_ts));
                    }
                    last = Some((now, group.timestamp));
                }
            }
        });

        Ok(AnalysisSession { session, stats })
    }

    pub fn stats(&self) -> AnalysisStats {
        self.stats.lock().clone()
    }
}

/// TranslatorSession bridges a single-path leg and a multipath leg: media
/// going toward the multipath leg gains the subflow tag, media coming back
/// loses it, and multipath control wrappers are unwrapped before they reach
/// the single-path peer. Routing between the audio and video legs keys on
/// the media type, not the payload type.
pub struct TranslatorSession {
    close_tx: mpsc::Sender<()>,
}

impl TranslatorSession {
    pub fn start(
        media_type: MediaType,
        single_leg: Arc<dyn PacketTransport + Send + Sync>,
        multipath_leg: Arc<dyn PacketTransport + Send + Sync>,
        extension_id: u8,
        scheduler: Box<dyn PathScheduler + Send + Sync>,
        subflow_remotes: HashMap<u16, Endpoint>,
        single_remote: Endpoint,
    ) -> TranslatorSession {
        let (close_tx, mut close_rx) = mpsc::channel::<()>(1);
        let mut translator = MultipathTranslator::new(extension_id, scheduler);

        tokio::spawn(async move {
            log::debug!("translator for {media_type:?} leg running");
            loop {
                tokio::select! {
                    received = single_leg.recv() => {
                        let Ok(pkt) = received else { break };
                        if let Some(raw) = translate_to_multipath(&mut translator, &pkt.payload) {
                            let (payload, subflow_id) = raw;
                            let to = subflow_id
                                .and_then(|id| subflow_remotes.get(&id).cloned())
                                .unwrap_or_else(|| single_remote.clone());
                            if multipath_leg.send(payload, &to).await.is_err() {
                                break;
                            }
                        }
                    }
                    received = multipath_leg.recv() => {
                        let Ok(pkt) = received else { break };
                        if let Some(payload) = translate_to_single(&translator, &pkt.payload) {
                            if single_leg.send(payload, &single_remote).await.is_err() {
                                break;
                            }
                        }
                    }
                    _ = close_rx.recv() => break,
                }
            }
        });

        TranslatorSession { close_tx }
    }

    pub async fn close(&self) {
        let _ = self.close_tx.send(()).await;
    }
}

fn is_control(payload: &Bytes) -> bool {
    payload.len() >= 2 && (192..=223).contains(&payload[1])
}

/// single → multipath: media gains the subflow tag; control passes as is.
fn translate_to_multipath(
    translator: &mut MultipathTranslator,
    payload: &Bytes,
) -> Option<(Bytes, Option<u16>)> {
    if is_control(payload) {
        return Some((payload.clone(), None));
    }

    let mut packet = Packet::unmarshal(&mut payload.clone()).ok()?;
    let subflow_id = translator.tag(&mut packet).ok()?;
    let raw = packet.marshal().ok()?;
    Some((raw, Some(subflow_id)))
}

/// multipath → single: the tag is stripped and multipath control wrappers
/// are replaced by their nested compounds.
fn translate_to_single(translator: &MultipathTranslator, payload: &Bytes) -> Option<Bytes> {
    if is_control(payload) {
        let packets = rtcp::packet::unmarshal(&mut payload.clone()).ok()?;
        let mut out: Vec<Box<dyn rtcp::packet::Packet + Send + Sync>> = vec![];
        for p in packets {
            if let Some(mp) = p
                .as_any()
                .downcast_ref::<rtcp::multipath_report::MultipathReport>()
            {
                for block in &mp.blocks {
                    if let rtcp::multipath_report::MultipathBlock::Report(report) = block {
                        out.extend(report.packets.iter().cloned());
                    }
                }
            } else {
                out.push(p);
            }
        }
        if out.is_empty() {
            return None;
        }
        return rtcp::packet::marshal(&out).ok();
    }

    let mut packet = Packet::unmarshal(&mut payload.clone()).ok()?;
    translator.strip(&mut packet);
    packet.marshal().ok()
}
