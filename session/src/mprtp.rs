use std::collections::HashMap;

use rand::Rng;
use rtp::extension::subflow_extension::SubflowExtension;
use rtp::packet::Packet;
use util::{Marshal, Unmarshal};

use crate::error::{Error, Result};

/// PathScheduler picks the subflow each outgoing packet rides on.
pub trait PathScheduler: Send + Sync {
    fn next_subflow(&mut self) -> Option<u16>;
    fn subflows(&self) -> &[u16];
}

/// Cycles through the subflows in order.
pub struct RoundRobinScheduler {
    subflows: Vec<u16>,
    next: usize,
}

impl RoundRobinScheduler {
    pub fn new(subflows: Vec<u16>) -> Self {
        RoundRobinScheduler { subflows, next: 0 }
    }
}

impl PathScheduler for RoundRobinScheduler {
    fn next_subflow(&mut self) -> Option<u16> {
        if self.subflows.is_empty() {
            return None;
        }
        let id = self.subflows[self.next % self.subflows.len()];
        self.next = (self.next + 1) % self.subflows.len();
        Some(id)
    }

    fn subflows(&self) -> &[u16] {
        &self.subflows
    }
}

/// Picks a subflow uniformly at random.
pub struct RandomScheduler {
    subflows: Vec<u16>,
}

impl RandomScheduler {
    pub fn new(subflows: Vec<u16>) -> Self {
        RandomScheduler { subflows }
    }
}

impl PathScheduler for RandomScheduler {
    fn next_subflow(&mut self) -> Option<u16> {
        if self.subflows.is_empty() {
            return None;
        }
        let i = rand::thread_rng().gen_range(0..self.subflows.len());
        Some(self.subflows[i])
    }

    fn subflows(&self) -> &[u16] {
        &self.subflows
    }
}

/// MultipathTranslator moves packets between the single-path and multipath
/// representations: on send it schedules a subflow and tags the packet with
/// the subflow id and a subflow-specific sequence number; on receive it
/// strips the tag and reports it so the per-subflow member state can be
/// updated.
pub struct MultipathTranslator {
    extension_id: u8,
    scheduler: Box<dyn PathScheduler + Send + Sync>,
    /// next subflow-specific sequence number per subflow
    subflow_seq: HashMap<u16, u16>,
}

impl MultipathTranslator {
    pub fn new(extension_id: u8, scheduler: Box<dyn PathScheduler + Send + Sync>) -> Self {
        MultipathTranslator {
            extension_id,
            scheduler,
            subflow_seq: HashMap::new(),
        }
    }

    pub fn subflows(&self) -> &[u16] {
        self.scheduler.subflows()
    }

    /// Tags the packet for its scheduled subflow. Returns the chosen id.
    pub fn tag(&mut self, packet: &mut Packet) -> Result<u16> {
        let subflow_id = self
            .scheduler
            .next_subflow()
            .ok_or_else(|| Error::ConfigurationFault("no subflows configured".into()))?;
        self.tag_onto(packet, subflow_id)?;
        Ok(subflow_id)
    }

    /// Tags the packet onto a specific subflow, advancing that subflow's
    /// own sequence space.
    pub fn tag_onto(&mut self, packet: &mut Packet, subflow_id: u16) -> Result<u16> {
        let seq = self.subflow_seq.entry(subflow_id).or_insert(0);
        let subflow_sequence_number = *seq;
        *seq = seq.wrapping_add(1);

        let ext = SubflowExtension {
            subflow_id,
            subflow_sequence_number,
        };
        packet
            .header
            .set_extension(self.extension_id, ext.marshal()?)?;
        Ok(subflow_id)
    }

    /// Strips the subflow tag off a received packet, restoring the
    /// single-path representation.
    pub fn strip(&self, packet: &mut Packet) -> Option<SubflowExtension> {
        let raw = packet.header.get_extension(self.extension_id)?;
        let tag = SubflowExtension::unmarshal(&mut raw.clone()).ok()?;
        let _ = packet.header.del_extension(self.extension_id);
        if packet.header.extensions.is_empty() {
            packet.header.extension = false;
            packet.header.extension_profile = 0;
        }
        Some(tag)
    }

    /// Reads the tag without modifying the packet.
    pub fn peek(&self, packet: &Packet) -> Option<SubflowExtension> {
        let raw = packet.header.get_extension(self.extension_id)?;
        SubflowExtension::unmarshal(&mut raw.clone()).ok()
    }
}

#[cfg(test)]
mod test {
    use bytes::Bytes;
    use rtp::header::Header;

    use super::*;

    fn packet(seq: u16) -> Packet {
        Packet {
            header: Header {
                version: 2,
                sequence_number: seq,
                timestamp: 90_000,
                ssrc: 0x1234,
                ..Default::default()
            },
            payload: Bytes::from_static(&[0xAB; 10]),
        }
    }

    #[test]
    fn test_round_robin_order() {
        let mut s = RoundRobinScheduler::new(vec![1, 2, 3]);
        let picks: Vec<u16> = (0..6).map(|_| s.next_subflow().unwrap()).collect();
        assert_eq!(picks, vec![1, 2, 3, 1, 2, 3]);
    }

    #[test]
    fn test_random_scheduler_stays_in_set() {
        let mut s = RandomScheduler::new(vec![7, 9]);
        for _ in 0..50 {
            let id = s.next_subflow().unwrap();
            assert!(id == 7 || id == 9);
        }
    }

    #[test]
    fn test_tag_strip_round_trip() {
        let mut t = MultipathTranslator::new(2, Box::new(RoundRobinScheduler::new(vec![1, 2])));

        let mut pkt = packet(100);
        let id = t.tag(&mut pkt).expect("tag");
        assert_eq!(id, 1);
        assert!(pkt.header.extension);

        let tag = t.strip(&mut pkt).expect("tag present");
        assert_eq!(tag.subflow_id, 1);
        assert_eq!(tag.subflow_sequence_number, 0);
        assert!(!pkt.header.extension, "single-path shape restored");
        assert!(t.strip(&mut pkt).is_none());
    }

    #[test]
    fn test_subflow_sequences_monotone_per_subflow() {
        let mut t = MultipathTranslator::new(2, Box::new(RoundRobinScheduler::new(vec![1, 2])));

        let mut per_flow: HashMap<u16, Vec<u16>> = HashMap::new();
        for seq in 0..8u16 {
            let mut pkt = packet(seq);
            t.tag(&mut pkt).expect("tag");
            let tag = t.peek(&pkt).expect("peek");
            per_flow
                .entry(tag.subflow_id)
                .or_default()
                .push(tag.subflow_sequence_number);
        }

        assert_eq!(per_flow[&1], vec![0, 1, 2, 3]);
        assert_eq!(per_flow[&2], vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_tag_without_subflows_is_config_fault() {
        let mut t = MultipathTranslator::new(2, Box::new(RoundRobinScheduler::new(vec![])));
        let mut pkt = packet(1);
        assert!(matches!(
            t.tag(&mut pkt),
            Err(Error::ConfigurationFault(_))
        ));
    }
}
