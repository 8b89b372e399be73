
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use bytes::{Bytes, BytesMut};
use util::marshal::{Marshal, MarshalSize};

use crate::error::Result;
use crate::extension::ntp_time_extension::NtpTimeExtension;
use crate::header::*;
use crate::packet::*;
use crate::sequence::*;

/// Payloader fragments or aggregates one encoded sample into RTP payloads
/// that fit the transmission unit.
pub trait Payloader: fmt::Debug {
    fn payload(&mut self, mtu: usize, b: &Bytes) -> Result<Vec<Bytes>>;
    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync>;
}

impl Clone for Box<dyn Payloader + Send + Sync> {
    fn clone(&self) -> Box<dyn Payloader + Send + Sync> {
        self.clone_to()
    }
}

/// Packetizer turns samples and access units into sequenced, timestamped
/// RTP packets.
pub trait Packetizer: fmt::Debug {
    /// Attach a wall-clock synchronization header extension (ntp-64) with the
    /// given negotiated id to the last packet of each access unit.
    fn enable_wallclock_sync(&mut self, id: u8);
    /// Packetize one sample; `samples` is the media-clock advance to apply
    /// afterwards.
    fn packetize(&mut self, payload: &Bytes, samples: u32) -> Result<Vec<Packet>>;
    /// Packetize a group of samples sharing one presentation time. The
    /// marker bit is set on the final packet of the group.
    fn packetize_access_unit(&mut self, payloads: &[Bytes], samples: u32) -> Result<Vec<Packet>>;
    /// skip_samples causes a gap in the media clock between packetize calls.
    fn skip_samples(&mut self, skipped_samples: u32);
    fn clone_to(&self) -> Box<dyn Packetizer + Send + Sync>;
}

impl Clone for Box<dyn Packetizer + Send + Sync> {
    fn clone(&self) -> Box<dyn Packetizer + Send + Sync> {
        self.clone_to()
    }
}

/// Depacketizer strips the payload-format framing from one RTP payload,
/// reassembling fragmentation units across calls.
pub trait Depacketizer {
    fn depacketize(&mut self, b: &Bytes) -> Result<Bytes>;

    /// Checks if the packet is at the beginning of a partition. Returns
    /// false if that could not be determined, in which case the caller
    /// detects timestamp discontinuities instead.
    fn is_partition_head(&self, payload: &Bytes) -> bool;

    /// Checks if the packet is at the end of a partition.
    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool;
}

/// The result of depacketizing one playout group.
#[derive(Debug, Default)]
pub struct DepacketizedGroup {
    /// Reconstructed samples, in transmission order.
    pub samples: Vec<Bytes>,
    /// Units discarded because a fragment sequence was incomplete or
    /// inconsistent; the caller reports these as losses.
    pub discarded: usize,
}

/// depacketize_group runs a group of packets sharing one media timestamp
/// through `depacketizer` in sequence-number order. A fragmentation unit
/// that does not start with a start bit, end with an end bit, or that
/// changes type mid-stream is dropped and counted, never surfaced.
pub fn depacketize_group<D: Depacketizer + ?Sized>(
    depacketizer: &mut D,
    payloads: &[Bytes],
) -> DepacketizedGroup {
    let mut group = DepacketizedGroup::default();
    for payload in payloads {
        match depacketizer.depacketize(payload) {
            Ok(sample) => {
                if !sample.is_empty() {
                    group.samples.push(sample);
                }
            }
            Err(_) => group.discarded += 1,
        }
    }
    group
}

/// FnTimeGen provides the current wall clock, overridable in tests.
pub type FnTimeGen = Arc<dyn (Fn() -> SystemTime) + Send + Sync>;

#[derive(Clone)]
pub(crate) struct PacketizerImpl {
    pub(crate) mtu: usize,
    pub(crate) payload_type: u8,
    pub(crate) ssrc: u32,
    pub(crate) payloader: Box<dyn Payloader + Send + Sync>,
    pub(crate) sequencer: Box<dyn Sequencer + Send + Sync>,
    pub(crate) timestamp: u32,
    pub(crate) clock_rate: u32,
    pub(crate) wallclock_sync_id: u8,
    pub(crate) time_gen: Option<FnTimeGen>,
}

impl fmt::Debug for PacketizerImpl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketizerImpl")
            .field("mtu", &self.mtu)
            .field("payload_type", &self.payload_type)
            .field("ssrc", &self.ssrc)
            .field("timestamp", &self.timestamp)
            .field("clock_rate", &self.clock_rate)
            .field("wallclock_sync_id", &self.wallclock_sync_id)
            .finish()
    }
}

pub fn new_packetizer(
    mtu: usize,
    payload_type: u8,
    ssrc: u32,
    payloader: Box<dyn Payloader + Send + Sync>,
    sequencer: Box<dyn Sequencer + Send + Sync>,
    clock_rate: u32,
) -> impl Packetizer {
    PacketizerImpl {
        mtu,
        payload_type,
        ssrc,
        payloader,
        sequencer,
        timestamp: rand::random::<u32>(),
        clock_rate,
        wallclock_sync_id: 0,
        time_gen: None,
    }
}

impl PacketizerImpl {
    fn build_packets(&mut self, payloads: Vec<Bytes>) -> Result<Vec<Packet>> {
        let payloads_len = payloads.len();
        let mut packets = Vec::with_capacity(payloads_len);
        for (i, payload) in payloads.into_iter().enumerate() {
            packets.push(Packet {
                header: Header {
                    version: 2,
                    padding: false,
                    extension: false,
                    marker: i == payloads_len - 1,
                    payload_type: self.payload_type,
                    sequence_number: self.sequencer.next_sequence_number(),
                    timestamp: self.timestamp,
                    ssrc: self.ssrc,
                    ..Default::default()
                },
                payload,
            });
        }

        if payloads_len != 0 && self.wallclock_sync_id != 0 {
            let st = if let Some(fn_time_gen) = &self.time_gen {
                fn_time_gen()
            } else {
                SystemTime::now()
            };
            let sync = NtpTimeExtension::new(st);
            let mut raw = BytesMut::with_capacity(sync.marshal_size());
            raw.resize(sync.marshal_size(), 0);
            let _ = sync.marshal_to(&mut raw)?;
            packets[payloads_len - 1]
                .header
                .set_extension(self.wallclock_sync_id, raw.freeze())?;
        }

        Ok(packets)
    }
}

impl Packetizer for PacketizerImpl {
    fn enable_wallclock_sync(&mut self, id: u8) {
        self.wallclock_sync_id = id;
    }

    fn packetize(&mut self, payload: &Bytes, samples: u32) -> Result<Vec<Packet>> {
        let payloads = self.payloader.payload(self.mtu - 12, payload)?;
        let packets = self.build_packets(payloads)?;

        self.timestamp = self.timestamp.wrapping_add(samples);

        Ok(packets)
    }

    fn packetize_access_unit(&mut self, payloads: &[Bytes], samples: u32) -> Result<Vec<Packet>> {
        let mut wire_payloads = vec![];
        for payload in payloads {
            wire_payloads.extend(self.payloader.payload(self.mtu - 12, payload)?);
        }
        let packets = self.build_packets(wire_payloads)?;

        self.timestamp = self.timestamp.wrapping_add(samples);

        Ok(packets)
    }

    /// skip_samples causes a gap in sample count between packetize requests
    /// so the RTP payloads produced have a gap in timestamps
    fn skip_samples(&mut self, skipped_samples: u32) {
        self.timestamp = self.timestamp.wrapping_add(skipped_samples);
    }

    fn clone_to(&self) -> Box<dyn Packetizer + Send + Sync> {
        Box::new(self.clone())
    }
}
