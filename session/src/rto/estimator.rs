#[cfg(test)]
mod estimator_test;

use std::collections::HashMap;
use std::time::SystemTime;

use util::ntp::seq_newer;

use super::{
    new_predictor, InterarrivalPredictor, LossEvent, MultipathPolicy, PredictorKind,
    RetransmissionInfo,
};

/// Gaps wider than this reset the model instead of scheduling deadlines.
const MAX_TRACKED_GAP: u16 = 512;

struct PendingLoss {
    seq: u16,
    deadline: SystemTime,
    /// Deadline timers race their cancellation; the generation stamp lets
    /// a stale firing be recognized and ignored.
    generation: u64,
}

/// LossDetector turns an (arrival time, sequence number) stream into
/// assumed-loss decisions with a quantified false-positive tolerance.
///
/// On a detected gap, every missing number is scheduled to be declared
/// lost at `previous arrival + predicted delta + tolerance`. An arrival
/// before that instant cancels the deadline as a false positive; the
/// firing emits `AssumedLost` and asks for a retransmission.
pub struct LossDetector {
    kind: PredictorKind,
    predictor: Box<dyn InterarrivalPredictor + Send + Sync>,
    highest_seq: Option<u16>,
    last_arrival: Option<SystemTime>,
    pending: Vec<PendingLoss>,
    generation: u64,
    pub info: RetransmissionInfo,
}

impl LossDetector {
    pub fn new(kind: PredictorKind, premature_timeout_probability: f64) -> Self {
        LossDetector {
            kind,
            predictor: new_predictor(kind, premature_timeout_probability),
            highest_seq: None,
            last_arrival: None,
            pending: vec![],
            generation: 0,
            info: RetransmissionInfo::default(),
        }
    }

    pub fn kind(&self) -> PredictorKind {
        self.kind
    }

    /// Resets the model. Called when the other party restarts (BYE).
    pub fn reset(&mut self) {
        self.predictor.reset();
        self.highest_seq = None;
        self.last_arrival = None;
        self.pending.clear();
        self.generation += 1;
    }

    /// Earliest scheduled loss deadline, for the runtime timer.
    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.pending.iter().map(|p| p.deadline).min()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one arrival. Returns the events it settles immediately,
    /// including deadline firings that are already due.
    pub fn on_packet_arrival(&mut self, seq: u16, arrival: SystemTime) -> Vec<LossEvent> {
        let mut events = vec![];

        // an arrival can settle a pending deadline as a false positive
        if let Some(pos) = self.pending.iter().position(|p| p.seq == seq) {
            self.pending.remove(pos);
            self.info.false_positive(seq);
            events.push(LossEvent::FalsePositive(seq));
            return events;
        }

        // an arrival of something already declared lost is the
        // retransmission (or the original, very late)
        if self.info.is_packet_assumed_lost(seq) {
            self.info.rtx_received(seq);
            events.push(LossEvent::RetransmissionArrived { seq, late: false });
            return events;
        }

        let (Some(highest), Some(last_arrival)) = (self.highest_seq, self.last_arrival) else {
            self.highest_seq = Some(seq);
            self.last_arrival = Some(arrival);
            return events;
        };

        if !seq_newer(seq, highest) {
            // old duplicate or reordering with no deadline outstanding
            return events;
        }

        let distance = seq.wrapping_sub(highest);
        if distance > MAX_TRACKED_GAP {
            log::warn!("sequence jump of {distance}, resetting loss model");
            self.reset();
            self.highest_seq = Some(seq);
            self.last_arrival = Some(arrival);
            return events;
        }

        // learn the per-packet delta covered by this arrival
        if let Ok(delta) = arrival.duration_since(last_arrival) {
            self.predictor.insert(delta / distance.max(1) as u32);
        }

        // schedule the numbers this arrival revealed as missing; a model
        // still warming up degrades to the immediate (simple) behavior
        if distance > 1 {
            let predicted = self.predictor.predict().unwrap_or_default();
            let deadline = last_arrival + predicted + self.predictor.tolerance();
            let mut missing = highest.wrapping_add(1);
            while missing != seq {
                self.pending.push(PendingLoss {
                    seq: missing,
                    deadline,
                    generation: self.generation,
                });
                missing = missing.wrapping_add(1);
            }
        }

        self.highest_seq = Some(seq);
        self.last_arrival = Some(arrival);

        // anything already overdue fires now
        events.extend(self.poll(arrival));
        events
    }

    /// Fires every deadline at or before `now`. A deadline stamped by an
    /// earlier model generation lost its race against a reset and is
    /// dropped unfired.
    pub fn poll(&mut self, now: SystemTime) -> Vec<LossEvent> {
        let mut events = vec![];
        let generation = self.generation;
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].generation != generation {
                self.pending.remove(i);
            } else if self.pending[i].deadline <= now {
                let p = self.pending.remove(i);
                self.info.assume_packet_lost(p.seq);
                events.push(LossEvent::AssumedLost(p.seq));
                events.push(LossEvent::RetransmissionRequested(p.seq));
            } else {
                i += 1;
            }
        }
        events
    }

    /// The playout buffer saw an arrival too late for its group; the
    /// detector still accounts it.
    pub fn on_late_arrival(&mut self, seq: u16) -> Vec<LossEvent> {
        let mut events = vec![];
        if let Some(pos) = self.pending.iter().position(|p| p.seq == seq) {
            self.pending.remove(pos);
            self.info.false_positive(seq);
            events.push(LossEvent::FalsePositive(seq));
        } else if self.info.is_packet_assumed_lost(seq) {
            self.info.rtx_late(seq);
            events.push(LossEvent::RetransmissionArrived { seq, late: true });
        }
        events
    }

    /// Withdraws an outstanding request (the group it belonged to was
    /// abandoned).
    pub fn cancel(&mut self, seq: u16) {
        if let Some(pos) = self.pending.iter().position(|p| p.seq == seq) {
            self.pending.remove(pos);
            self.info.rtx_cancelled(seq);
        }
    }
}

/// Loss events of a multipath session carry the subflow that raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubflowLossEvent {
    pub subflow_id: u16,
    pub event: LossEvent,
}

/// MultipathLossDetector holds one predictor per subflow, fed with
/// subflow-specific sequence numbers.
pub struct MultipathLossDetector {
    kind: PredictorKind,
    policy: MultipathPolicy,
    premature_timeout_probability: f64,
    detectors: HashMap<u16, LossDetector>,
    /// events the crosspath view raised that the single view would not
    /// have, kept for telemetry under the compare policy
    divergence: u64,
}

impl MultipathLossDetector {
    pub fn new(
        kind: PredictorKind,
        policy: MultipathPolicy,
        premature_timeout_probability: f64,
    ) -> Self {
        MultipathLossDetector {
            kind,
            policy,
            premature_timeout_probability,
            detectors: HashMap::new(),
            divergence: 0,
        }
    }

    pub fn policy(&self) -> MultipathPolicy {
        self.policy
    }

    pub fn divergence(&self) -> u64 {
        self.divergence
    }

    pub fn detector(&self, subflow_id: u16) -> Option<&LossDetector> {
        self.detectors.get(&subflow_id)
    }

    fn detector_mut(&mut self, subflow_id: u16) -> &mut LossDetector {
        let kind = self.kind;
        let p = self.premature_timeout_probability;
        self.detectors
            .entry(subflow_id)
            .or_insert_with(|| LossDetector::new(kind, p))
    }

    /// Feeds a subflow-tagged arrival to its own predictor; under the
    /// crosspath policies the shared arrival clock also advances the peer
    /// subflows' deadlines.
    pub fn on_packet_arrival(
        &mut self,
        subflow_id: u16,
        subflow_seq: u16,
        arrival: SystemTime,
    ) -> Vec<SubflowLossEvent> {
        let mut events: Vec<SubflowLossEvent> = self
            .detector_mut(subflow_id)
            .on_packet_arrival(subflow_seq, arrival)
            .into_iter()
            .map(|event| SubflowLossEvent { subflow_id, event })
            .collect();

        if self.policy != MultipathPolicy::Single {
            // under crosspath, traffic on one subflow advances the peers'
            // deadlines; compare does the same and keeps count of what the
            // single policy would have left unfired at this instant
            let mut cross_fired = 0;
            for (&id, detector) in self.detectors.iter_mut() {
                if id == subflow_id {
                    continue;
                }
                let fired = detector.poll(arrival);
                cross_fired += fired.len() as u64;
                events.extend(fired.into_iter().map(|event| SubflowLossEvent {
                    subflow_id: id,
                    event,
                }));
            }
            if self.policy == MultipathPolicy::Compare {
                self.divergence += cross_fired;
            }
        }

        events
    }

    pub fn next_deadline(&self) -> Option<SystemTime> {
        self.detectors.values().filter_map(|d| d.next_deadline()).min()
    }

    /// Fires due deadlines across every subflow.
    pub fn poll(&mut self, now: SystemTime) -> Vec<SubflowLossEvent> {
        let mut events = vec![];
        for (&id, detector) in self.detectors.iter_mut() {
            events.extend(detector.poll(now).into_iter().map(|event| SubflowLossEvent {
                subflow_id: id,
                event,
            }));
        }
        events
    }

    pub fn reset(&mut self) {
        for detector in self.detectors.values_mut() {
            detector.reset();
        }
    }
}
