
use bytes::Bytes;

use crate::error::Result;
use crate::packetizer::{Depacketizer, Payloader};

/// GenericPayloader maps each sample one-to-one into an RTP payload. Codecs
/// whose samples always fit the transmission unit (and every audio format
/// this stack carries) use this path.
#[derive(Default, Debug, Clone)]
pub struct GenericPayloader;

impl Payloader for GenericPayloader {
    /// Payload emits the sample as a single RTP payload, unchanged.
    fn payload(&mut self, mtu: usize, payload: &Bytes) -> Result<Vec<Bytes>> {
        if payload.is_empty() || mtu == 0 {
            return Ok(vec![]);
        }

        Ok(vec![payload.clone()])
    }

    fn clone_to(&self) -> Box<dyn Payloader + Send + Sync> {
        Box::new(self.clone())
    }
}

/// GenericDepacketizer mirrors GenericPayloader: the payload is the sample.
#[derive(Default, Debug, Clone)]
pub struct GenericDepacketizer;

impl Depacketizer for GenericDepacketizer {
    fn depacketize(&mut self, packet: &Bytes) -> Result<Bytes> {
        Ok(packet.clone())
    }

    fn is_partition_head(&self, _payload: &Bytes) -> bool {
        true
    }

    fn is_partition_tail(&self, marker: bool, _payload: &Bytes) -> bool {
        marker
    }
}
