use std::collections::VecDeque;
use std::time::Duration;

use super::normal::z_score;
use super::InterarrivalPredictor;

const AR2_WINDOW: usize = 50;
const AR2_MIN_SAMPLES: usize = 4;

/// Ar2Predictor models the interarrival process as a second-order
/// autoregression y(n) = a1·y(n−1) + a2·y(n−2), refitting the coefficients
/// over a sliding window with the Yule-Walker equations. The tolerance uses
/// the running standard deviation of its own one-step prediction errors.
#[derive(Debug, Clone)]
pub struct Ar2Predictor {
    samples: VecDeque<f64>,
    errors: VecDeque<f64>,
    premature_timeout_probability: f64,
}

impl Ar2Predictor {
    pub fn new(premature_timeout_probability: f64) -> Self {
        let p = if !(0.001..1.0).contains(&premature_timeout_probability) {
            log::warn!(
                "invalid premature timeout probability {premature_timeout_probability}, using 0.05"
            );
            0.05
        } else {
            premature_timeout_probability
        };
        Ar2Predictor {
            samples: VecDeque::with_capacity(AR2_WINDOW),
            errors: VecDeque::with_capacity(AR2_WINDOW),
            premature_timeout_probability: p,
        }
    }

    /// Autocovariance of the window at the given lag.
    fn autocovariance(&self, lag: usize) -> f64 {
        let n = self.samples.len();
        if n <= lag {
            return 0.0;
        }
        let mean = self.samples.iter().sum::<f64>() / n as f64;
        let mut acc = 0.0;
        for i in lag..n {
            acc += (self.samples[i] - mean) * (self.samples[i - lag] - mean);
        }
        acc / n as f64
    }

    /// Yule-Walker fit of (a1, a2) over the current window.
    fn coefficients(&self) -> Option<(f64, f64)> {
        if self.samples.len() < AR2_MIN_SAMPLES {
            return None;
        }
        let r0 = self.autocovariance(0);
        let r1 = self.autocovariance(1);
        let r2 = self.autocovariance(2);

        let det = r0 * r0 - r1 * r1;
        if det.abs() < 1e-18 {
            // a degenerate (constant) window predicts itself
            return Some((1.0, 0.0));
        }
        let a1 = (r1 * (r0 - r2)) / det;
        let a2 = (r0 * r2 - r1 * r1) / det;
        Some((a1, a2))
    }

    fn predict_value(&self) -> Option<f64> {
        let (a1, a2) = self.coefficients()?;
        let n = self.samples.len();
        let mean = self.samples.iter().sum::<f64>() / n as f64;
        let y1 = self.samples[n - 1] - mean;
        let y2 = self.samples[n - 2] - mean;
        Some(mean + a1 * y1 + a2 * y2)
    }

    fn error_standard_deviation(&self) -> f64 {
        let n = self.errors.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.errors.iter().sum::<f64>() / n as f64;
        let var = self
            .errors
            .iter()
            .map(|e| (e - mean) * (e - mean))
            .sum::<f64>()
            / n as f64;
        var.sqrt()
    }
}

impl Default for Ar2Predictor {
    fn default() -> Self {
        Self::new(0.05)
    }
}

impl InterarrivalPredictor for Ar2Predictor {
    fn insert(&mut self, delta: Duration) {
        let value = delta.as_secs_f64();

        // score the previous prediction before the sample enters the window
        if let Some(predicted) = self.predict_value() {
            if self.errors.len() == AR2_WINDOW {
                self.errors.pop_front();
            }
            self.errors.push_back(value - predicted);
        }

        if self.samples.len() == AR2_WINDOW {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    fn predict(&self) -> Option<Duration> {
        self.predict_value()
            .map(|v| Duration::from_secs_f64(v.max(0.0)))
    }

    fn tolerance(&self) -> Duration {
        let sigma = self.error_standard_deviation();
        let z = z_score(1.0 - self.premature_timeout_probability);
        Duration::from_secs_f64((sigma * z).max(0.0))
    }

    fn reset(&mut self) {
        self.samples.clear();
        self.errors.clear();
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_constant_stream_predicts_itself() {
        let mut p = Ar2Predictor::default();
        for _ in 0..10 {
            p.insert(Duration::from_millis(20));
        }
        let predicted = p.predict().expect("ready").as_secs_f64();
        assert!((predicted - 0.020).abs() < 1e-6, "{predicted}");
        assert!(p.tolerance().as_secs_f64() < 1e-6);
    }

    #[test]
    fn test_not_ready_until_min_samples() {
        let mut p = Ar2Predictor::default();
        p.insert(Duration::from_millis(20));
        p.insert(Duration::from_millis(20));
        assert!(p.predict().is_none());
    }

    #[test]
    fn test_alternating_stream_tracks_pattern() {
        let mut p = Ar2Predictor::default();
        // strict alternation 10/30 ms has lag-1 autocovariance < 0; the
        // model should predict closer to 10 after a 30 than the plain mean
        for i in 0..40 {
            p.insert(Duration::from_millis(if i % 2 == 0 { 10 } else { 30 }));
        }
        // window ends on a 30 ms sample
        let predicted = p.predict().expect("ready").as_secs_f64();
        assert!(
            predicted < 0.020,
            "expected below-mean prediction, got {predicted}"
        );
    }

    #[test]
    fn test_tolerance_grows_with_noise() {
        let mut quiet = Ar2Predictor::default();
        let mut noisy = Ar2Predictor::default();
        for i in 0..40u64 {
            quiet.insert(Duration::from_millis(20));
            noisy.insert(Duration::from_millis(10 + (i * 7) % 23));
        }
        assert!(noisy.tolerance() > quiet.tolerance());
    }

    #[test]
    fn test_reset() {
        let mut p = Ar2Predictor::default();
        for _ in 0..10 {
            p.insert(Duration::from_millis(20));
        }
        p.reset();
        assert!(p.predict().is_none());
    }
}
