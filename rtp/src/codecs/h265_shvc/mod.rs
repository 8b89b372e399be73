#[cfg(test)]
mod h265_shvc_test;

use bytes::{BufMut, Bytes, BytesMut};

use crate::codecs::h264::ANNEXB_NALUSTART_CODE;
use crate::codecs::h265::{split_h265_nalus, H265NaluHeader, H265Packet, H265Payloader};
use crate::error::Result;
use crate::packetizer::{Depacketizer, Payloader};

/// H265ShvcPayloader packetizes scalable HEVC streams. It reuses the HEVC
/// aggregation and fragmentation rules but is layer aware: units above the
/// configured `nuh_layer_id` ceiling are dropped before packetization, so a
/// sender can serve a reduced operation point without re-encoding.
#[derive(Default, Debug, Clone)]
pub struct H265ShvcPayloader {
    inner: H265Payloader,
    /// highest nuh_layer_id to transmit; None sends every layer
    pub max_layer_id: Option<u8>,
}

impl H265ShvcPayloader {
    pub fn with_max_layer_id(max_layer_id: u8) -> Self {
        H265ShvcPayloader {
            inner: H265Payloader::default(),
            max_layer_id: Some(max_layer_id),
        }
    }
}

impl Payloader for H265ShvcPayloader {
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        let Some(max_layer_id) = self.max_layer_id else {
            return self.inner.payload(mtu, payload);
        };

        let mut filtered = BytesMut::new();
        for nalu in split_h265_nalus(payload) {
            let Ok(header) = H265NaluHeader::from_nalu(&nalu) else {
                continue;
            };
            if header.layer_id() > max_layer_id {
                continue;
            }
            filtered.put(&*ANNEXB_NALUSTART_CODE);
            filtered.put(nalu);
        }

        if filtered.is_empty() {
            return Ok(vec![]);
        }
        self.inner.payload(mtu, &filtered.freeze())
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(self.clone())
    }
}

/// H265ShvcPacket depacketizes scalable HEVC payloads, tracking the layers
/// seen and optionally discarding enhancement layers above a ceiling.
#[derive(Default, Debug, Clone)]
pub struct H265ShvcPacket {
    inner: H265Packet,
    /// highest nuh_layer_id to keep; None keeps every layer
    pub max_layer_id: Option<u8>,
    /// highest nuh_layer_id observed since creation
    pub highest_layer_seen: u8,
}

impl Depacketizer for H265ShvcPacket {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        let out = self.inner.depacketize(packet)?;
        if out.is_empty() {
            return Ok(out);
        }

        let mut kept = BytesMut::new();
        for nalu in split_h265_nalus(&out) {
            let Ok(header) = H265NaluHeader::from_nalu(&nalu) else {
                continue;
            };
            let layer_id = header.layer_id();
            self.highest_layer_seen = self.highest_layer_seen.max(layer_id);

            if let Some(max) = self.max_layer_id {
                if layer_id > max {
                    continue;
                }
            }
            kept.put(&*ANNEXB_NALUSTART_CODE);
            kept.put(nalu);
        }

        Ok(kept.freeze())
    }

    fn is_partition_head(&self, payload: &Bytes) -> bool {
        self.inner.is_partition_head(payload)
    }

    fn is_partition_tail(&self, marker: bool, payload: &Bytes) -> bool {
        self.inner.is_partition_tail(marker, payload)
    }
}
