pub mod ar2;
pub mod estimator;
pub mod moving_average;
pub mod normal;

use std::collections::HashSet;
use std::time::Duration;

pub use ar2::Ar2Predictor;
pub use estimator::{LossDetector, MultipathLossDetector};
pub use moving_average::MovingAveragePredictor;

/// Which interarrival model drives loss detection.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum PredictorKind {
    /// any sequence gap is an immediate loss
    #[default]
    Simple,
    /// mean of a bounded window of deltas
    MovingAverage,
    /// second-order autoregression
    Ar2,
}

/// How subflow predictors cooperate in a multipath session.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub enum MultipathPolicy {
    /// each subflow's predictor only acts on its own traffic
    #[default]
    Single,
    /// traffic on any subflow also drives the peers' deadlines
    Crosspath,
    /// run both and record their divergence for telemetry
    Compare,
}

/// Default tolerated probability of declaring a packet lost that would
/// still have arrived.
pub const DEFAULT_PREMATURE_TIMEOUT_PROBABILITY: f64 = 0.05;

/// An interarrival-time model. New predictors plug in here without
/// touching the retransmission state machine.
pub trait InterarrivalPredictor: Send + Sync {
    fn insert(&mut self, delta: Duration);
    /// Predicted next interarrival delta; None while warming up.
    fn predict(&self) -> Option<Duration>;
    /// Slack added on top of the prediction before a packet is presumed
    /// lost.
    fn tolerance(&self) -> Duration;
    fn reset(&mut self);
}

pub(crate) fn new_predictor(
    kind: PredictorKind,
    premature_timeout_probability: f64,
) -> Box<dyn InterarrivalPredictor + Send + Sync> {
    match kind {
        PredictorKind::Simple => Box::new(SimplePredictor),
        PredictorKind::MovingAverage => Box::new(MovingAveragePredictor::new(
            20,
            5,
            premature_timeout_probability,
        )),
        PredictorKind::Ar2 => Box::new(Ar2Predictor::new(premature_timeout_probability)),
    }
}

/// The no-model predictor: a gap is lost the instant it is seen.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimplePredictor;

impl InterarrivalPredictor for SimplePredictor {
    fn insert(&mut self, _delta: Duration) {}

    fn predict(&self) -> Option<Duration> {
        Some(Duration::from_secs(0))
    }

    fn tolerance(&self) -> Duration {
        Duration::from_secs(0)
    }

    fn reset(&mut self) {}
}

/// Events raised by loss detection. `AssumedLost` is a normal event, not an
/// error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossEvent {
    AssumedLost(u16),
    RetransmissionRequested(u16),
    RetransmissionArrived { seq: u16, late: bool },
    FalsePositive(u16),
}

/// Books every retransmission-related outcome so a session can report how
/// its estimator behaved.
#[derive(Debug, Default, Clone)]
pub struct RetransmissionInfo {
    lost: HashSet<u16>,
    false_positives: Vec<u16>,
    received_rtx: Vec<u16>,
    late_rtx: Vec<u16>,
    redundant_rtx: Vec<u16>,
    cancelled_rtx: Vec<u16>,
}

impl RetransmissionInfo {
    pub fn assume_packet_lost(&mut self, seq: u16) {
        self.lost.insert(seq);
    }

    pub fn is_packet_assumed_lost(&self, seq: u16) -> bool {
        self.lost.contains(&seq)
    }

    pub fn false_positive(&mut self, seq: u16) {
        self.false_positives.push(seq);
    }

    pub fn rtx_received(&mut self, seq: u16) {
        self.received_rtx.push(seq);
    }

    pub fn rtx_late(&mut self, seq: u16) {
        self.late_rtx.push(seq);
    }

    /// The packet arrived normally before any retransmission did.
    pub fn rtx_redundant(&mut self, seq: u16) {
        self.redundant_rtx.push(seq);
    }

    /// The request was withdrawn before a retransmission went out.
    pub fn rtx_cancelled(&mut self, seq: u16) {
        self.cancelled_rtx.push(seq);
    }

    pub fn assumed_lost_count(&self) -> usize {
        self.lost.len()
    }

    pub fn false_positive_count(&self) -> usize {
        self.false_positives.len()
    }

    pub fn received_rtx_count(&self) -> usize {
        self.received_rtx.len()
    }

    pub fn late_rtx_count(&self) -> usize {
        self.late_rtx.len()
    }

    pub fn redundant_rtx_count(&self) -> usize {
        self.redundant_rtx.len()
    }

    pub fn cancelled_rtx_count(&self) -> usize {
        self.cancelled_rtx.len()
    }
}
