
use std::time::{Duration, SystemTime};

use rtp::packet::Packet;
use util::ntp::{seq_newer, timestamp_newer};

/// A PlayoutGroup is the set of packets sharing one media timestamp,
/// ordered by sequence number, handed to depacketization as a unit.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PlayoutGroup {
    pub timestamp: u32,
    pub packets: Vec<Packet>,
}

impl PlayoutGroup {
    pub fn payloads(&self) -> Vec<bytes::Bytes> {
        self.packets.iter().map(|p| p.payload.clone()).collect()
    }
}

/// What happened to a packet handed to [`PlayoutBuffer::insert`].
#[derive(Debug, Default)]
pub struct InsertOutcome {
    /// Groups released by this insertion, oldest first.
    pub flushed: Vec<PlayoutGroup>,
    /// Set when the packet belongs to a group that was already released.
    /// It is dropped from the playout path; the loss detector still wants
    /// to hear about it to settle its false-positive accounting.
    pub late: Option<Packet>,
    /// Set when a packet with this sequence number was already buffered.
    pub duplicate: bool,
}

struct PendingGroup {
    timestamp: u32,
    deadline: SystemTime,
    packets: Vec<Packet>,
}

/// PlayoutBuffer orders incoming media packets by sequence number within
/// presentation-time groups and releases each group when a later group
/// arrives or its deadline passes.
pub struct PlayoutBuffer {
    /// pending groups, oldest timestamp first (modular order)
    pending: Vec<PendingGroup>,
    last_flushed_timestamp: Option<u32>,
    group_lifetime: Duration,
}

impl PlayoutBuffer {
    pub fn new(group_lifetime: Duration) -> Self {
        PlayoutBuffer {
            pending: vec![],
            last_flushed_timestamp: None,
            group_lifetime,
        }
    }

    /// Updates the per-group timeout; the session derives it from the
    /// wall-clock mapping of the last sender report plus its current
    /// round-trip and jitter estimate.
    pub fn set_group_lifetime(&mut self, lifetime: Duration) {
        self.group_lifetime = lifetime;
    }

    pub fn group_lifetime(&self) -> Duration {
        self.group_lifetime
    }

    /// Earliest pending deadline, for scheduling the next playout timer.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.pending.iter().map(|g| g.deadline).min()
    }

    pub fn pending_groups(&self) -> usize {
        self.pending.len()
    }

    /// Accepts a packet, ordering it into its presentation-time group.
    /// Inserting a packet with a newer timestamp releases every strictly
    /// older group, in timestamp order.
    pub fn insert(&mut self, packet: Packet, now: SystemTime) -> InsertOutcome {
        let mut outcome = InsertOutcome::default();
        let ts = packet.header.timestamp;

        if let Some(last) = self.last_flushed_timestamp {
            if !timestamp_newer(ts, last) {
                outcome.late = Some(packet);
                return outcome;
            }
        }

        match self.pending.iter_mut().find(|g| g.timestamp == ts) {
            Some(group) => {
                let seq = packet.header.sequence_number;
                if group
                    .packets
                    .iter()
                    .any(|p| p.header.sequence_number == seq)
                {
                    outcome.duplicate = true;
                    return outcome;
                }
                let pos = group
                    .packets
                    .iter()
                    .position(|p| seq_newer(p.header.sequence_number, seq))
                    .unwrap_or(group.packets.len());
                group.packets.insert(pos, packet);
            }
            None => {
                let group = PendingGroup {
                    timestamp: ts,
                    deadline: now + self.group_lifetime,
                    packets: vec![packet],
                };
                let pos = self
                    .pending
                    .iter()
                    .position(|g| timestamp_newer(g.timestamp, ts))
                    .unwrap_or(self.pending.len());
                self.pending.insert(pos, group);
            }
        }

        // every group older than the newest one is complete by arrival order
        while self.pending.len() > 1 {
            let group = self.pending.remove(0);
            self.last_flushed_timestamp = Some(group.timestamp);
            outcome.flushed.push(PlayoutGroup {
                timestamp: group.timestamp,
                packets: group.packets,
            });
        }

        outcome
    }

    /// Releases every group whose deadline has passed, oldest first.
    pub fn poll_expired(&mut self, now: SystemTime) -> Vec<PlayoutGroup> {
        let mut flushed = vec![];
        while let Some(first) = self.pending.first() {
            if first.deadline > now {
                break;
            }
            let group = self.pending.remove(0);
            self.last_flushed_timestamp = Some(group.timestamp);
            flushed.push(PlayoutGroup {
                timestamp: group.timestamp,
                packets: group.packets,
            });
        }
        flushed
    }

    /// Releases everything still pending, oldest first. Used at teardown.
    pub fn flush_all(&mut self) -> Vec<PlayoutGroup> {
        let mut flushed = vec![];
        while !self.pending.is_empty() {
            let group = self.pending.remove(0);
            self.last_flushed_timestamp = Some(group.timestamp);
            flushed.push(PlayoutGroup {
                timestamp: group.timestamp,
                packets: group.packets,
            });
        }
        flushed
    }
}
