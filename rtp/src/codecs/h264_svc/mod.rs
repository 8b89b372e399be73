#[cfg(test)]
mod h264_svc_test;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codecs::h264::{
    split_nalus, H264Packet, H264Payloader, ANNEXB_NALUSTART_CODE, NALU_TYPE_BITMASK,
};
use crate::error::{Error, Result};
use crate::packetizer::{Depacketizer, Payloader};

/// Prefix NAL unit (RFC 6190): carries the scalability header for the base
/// layer slice that follows it.
pub const PREFIX_NALU_TYPE: u8 = 14;
/// Coded slice extension: an enhancement-layer slice with the three-octet
/// scalability header inline.
pub const SLICE_EXT_NALU_TYPE: u8 = 20;
/// Payload content scalability information NAL unit (RFC 6190, 4.9): the
/// aggregation leader describing every unit that follows it.
pub const PACSI_NALU_TYPE: u8 = 30;

pub const SVC_HEADER_SIZE: usize = 3;

/// The scalable-video extension descriptor: which dependency, quality and
/// temporal layer the payload belongs to.
///
///  +---------------+---------------+---------------+
///  |0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|0|1|2|3|4|5|6|7|
///  +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///  |R|I|   PRID    |N| DID |  QID  | TID |U|D|O| RR|
///  +---------------+---------------+---------------+
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct SvcDescriptor {
    pub priority_id: u8,
    pub idr: bool,
    pub dependency_id: u8,
    pub quality_id: u8,
    pub temporal_id: u8,
}

impl SvcDescriptor {
    pub fn marshal(&self) -> [u8; SVC_HEADER_SIZE] {
        let b0 = 0x80 | ((self.idr as u8) << 6) | (self.priority_id & 0x3F);
        let b1 = ((self.dependency_id & 0x07) << 4) | (self.quality_id & 0x0F);
        let b2 = ((self.temporal_id & 0x07) << 5) | 0x03;
        [b0, b1, b2]
    }

    pub fn unmarshal(buf: &[u8]) -> Result<Self> {
        if buf.len() < SVC_HEADER_SIZE {
            return Err(Error::ErrShortPacket);
        }
        Ok(SvcDescriptor {
            priority_id: buf[0] & 0x3F,
            idr: buf[0] & 0x40 != 0,
            dependency_id: (buf[1] >> 4) & 0x07,
            quality_id: buf[1] & 0x0F,
            temporal_id: (buf[2] >> 5) & 0x07,
        })
    }
}

/// Reads the scalability descriptor of a NAL unit, if it carries one. Prefix
/// and slice-extension units embed it after the one-octet NAL header.
pub fn descriptor_of(nalu: &Bytes) -> Option<SvcDescriptor> {
    let nalu_type = nalu.first()? & NALU_TYPE_BITMASK;
    if nalu_type != PREFIX_NALU_TYPE && nalu_type != SLICE_EXT_NALU_TYPE {
        return None;
    }
    SvcDescriptor::unmarshal(&nalu[1..]).ok()
}

/// H264SvcPayloader extends the AVC payloader for scalable streams: every
/// aggregation opens with a PACSI unit carrying the descriptor of the
/// strongest layer in the aggregate, so a media-aware element can drop
/// layers without parsing slice data.
#[derive(Default, Debug, Clone)]
pub struct H264SvcPayloader {
    inner: H264Payloader,
}

impl H264SvcPayloader {
    fn pacsi(descriptor: &SvcDescriptor) -> Bytes {
        let mut out = BytesMut::with_capacity(1 + SVC_HEADER_SIZE);
        out.put_u8(PACSI_NALU_TYPE);
        out.put_slice(&descriptor.marshal());
        out.freeze()
    }
}

impl Payloader for H264SvcPayloader {
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        // the descriptor announced in the PACSI leader is the first one
        // found in the access unit
        let descriptor = split_nalus(payload)
            .iter()
            .find_map(descriptor_of)
            .unwrap_or_default();

        let mut buf = BytesMut::new();
        buf.put(&*ANNEXB_NALUSTART_CODE);
        buf.put(Self::pacsi(&descriptor));
        buf.put(&*payload.clone());

        self.inner.payload(mtu, &buf.freeze())
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(self.clone())
    }
}

/// H264SvcPacket depacketizes scalable AVC payloads: PACSI leaders are
/// consumed into the exposed descriptor, everything else follows the AVC
/// rules (including prefix and slice-extension units, which pass through).
#[derive(Debug, Default, Clone)]
pub struct H264SvcPacket {
    inner: H264Packet,
    /// descriptor of the current aggregate, from its PACSI leader
    pub last_descriptor: Option<SvcDescriptor>,
}

impl Depacketizer for H264SvcPacket {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        // a PACSI travelling outside an aggregate is pure signalling
        if packet.len() > 1 && packet[0] & NALU_TYPE_BITMASK == PACSI_NALU_TYPE {
            self.last_descriptor = SvcDescriptor::unmarshal(&packet[1..]).ok();
            return Ok(Bytes::new());
        }

        let out = self.inner.depacketize(packet)?;
        if out.is_empty() {
            return Ok(out);
        }

        // strip PACSI units from the reconstructed stream
        let mut cleaned = BytesMut::new();
        for nalu in split_nalus(&out) {
            if nalu.is_empty() {
                continue;
            }
            let nalu_type = nalu[0] & NALU_TYPE_BITMASK;
            if nalu_type == PACSI_NALU_TYPE {
                self.last_descriptor = SvcDescriptor::unmarshal(&nalu[1..]).ok();
                continue;
            }
            cleaned.put(&*ANNEXB_NALUSTART_CODE);
            cleaned.put(nalu);
        }

        Ok(cleaned.freeze())
    }

    fn is_partition_head(&self, payload: &Bytes) -> bool {
        self.inner.is_partition_head(payload)
    }

    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool {
        self.inner.is_partition_tail(marker, payload)
    }
}
