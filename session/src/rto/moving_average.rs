use std::collections::VecDeque;
use std::time::Duration;

use super::normal::z_score;
use super::InterarrivalPredictor;

/// A bounded queue maintaining the running mean and standard deviation of
/// its contents.
#[derive(Debug, Default, Clone)]
pub(crate) struct RunningAverageQueue {
    values: VecDeque<f64>,
    capacity: usize,
}

impl RunningAverageQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        RunningAverageQueue {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn insert(&mut self, value: f64) {
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }

    pub(crate) fn average(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    pub(crate) fn standard_deviation(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.average();
        let var = self
            .values
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / self.values.len() as f64;
        var.sqrt()
    }
}

/// MovingAveragePredictor predicts the next interarrival time as the mean
/// of the last `capacity` observed deltas. The tolerance uses the normal
/// quantile of the configured premature-timeout probability: with the mean
/// centered, an extra σ·Z(1−p) absorbs all but a p share of on-time
/// packets.
#[derive(Debug, Clone)]
pub struct MovingAveragePredictor {
    queue: RunningAverageQueue,
    min_required: usize,
    premature_timeout_probability: f64,
}

impl MovingAveragePredictor {
    pub fn new(capacity: usize, min_required: usize, premature_timeout_probability: f64) -> Self {
        let p = if !(0.001..1.0).contains(&premature_timeout_probability) {
            log::warn!(
                "invalid premature timeout probability {premature_timeout_probability}, using 0.05"
            );
            0.05
        } else {
            premature_timeout_probability
        };
        MovingAveragePredictor {
            queue: RunningAverageQueue::new(capacity),
            min_required,
            premature_timeout_probability: p,
        }
    }
}

impl Default for MovingAveragePredictor {
    fn default() -> Self {
        Self::new(20, 5, 0.05)
    }
}

impl InterarrivalPredictor for MovingAveragePredictor {
    fn insert(&mut self, delta: Duration) {
        self.queue.insert(delta.as_secs_f64());
    }

    fn predict(&self) -> Option<Duration> {
        if self.queue.len() < self.min_required {
            return None;
        }
        Some(Duration::from_secs_f64(self.queue.average().max(0.0)))
    }

    fn tolerance(&self) -> Duration {
        let sigma = self.queue.standard_deviation();
        let z = z_score(1.0 - self.premature_timeout_probability);
        Duration::from_secs_f64((sigma * z).max(0.0))
    }

    fn reset(&mut self) {
        self.queue.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_predicts_mean_of_window() {
        let mut p = MovingAveragePredictor::new(10, 3, 0.05);
        assert!(p.predict().is_none(), "not ready before min_required");

        for _ in 0..5 {
            p.insert(Duration::from_millis(20));
        }
        let predicted = p.predict().expect("ready");
        assert!((predicted.as_secs_f64() - 0.020).abs() < 1e-9);
        assert_eq!(p.tolerance(), Duration::from_secs(0), "no spread, no slack");
    }

    #[test]
    fn test_tolerance_tracks_spread() {
        let mut p = MovingAveragePredictor::new(20, 5, 0.05);
        // alternate 18 / 22 ms: σ = 2 ms
        for i in 0..20 {
            p.insert(Duration::from_millis(if i % 2 == 0 { 18 } else { 22 }));
        }
        let tolerance = p.tolerance().as_secs_f64();
        // σ·Z(0.95) = 0.002 · 1.6449
        assert!((tolerance - 0.002 * 1.6449).abs() < 1e-4, "{tolerance}");
    }

    #[test]
    fn test_window_is_bounded() {
        let mut p = MovingAveragePredictor::new(4, 2, 0.05);
        for _ in 0..4 {
            p.insert(Duration::from_millis(10));
        }
        for _ in 0..4 {
            p.insert(Duration::from_millis(30));
        }
        // old samples aged out entirely
        assert!((p.predict().unwrap().as_secs_f64() - 0.030).abs() < 1e-9);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut p = MovingAveragePredictor::new(10, 3, 0.05);
        for _ in 0..5 {
            p.insert(Duration::from_millis(20));
        }
        p.reset();
        assert!(p.predict().is_none());
    }

    #[test]
    fn test_invalid_probability_falls_back() {
        let p = MovingAveragePredictor::new(10, 3, 7.5);
        assert!((p.premature_timeout_probability - 0.05).abs() < f64::EPSILON);
    }
}
