//! Wall-clock to stream-time smoother.
//!
//! Ingest feeds `(wall-clock, bytes-written-as-time)` pairs in strictly
//! increasing wall-clock order; the smoother turns those noisy samples
//! into a stable monotone mapping that the drift compensator reads at
//! retune time. Estimation is a linear fit over a sliding history
//! window, with extrapolation limited to a fixed horizon so a stalled
//! stream does not run the estimate off into the future.

use std::collections::VecDeque;
use std::time::Duration;

/// Sliding window of samples the fit is computed over.
pub const DEFAULT_HISTORY: Duration = Duration::from_secs(5);

/// How far past the newest sample the fit may extrapolate.
pub const DEFAULT_HORIZON: Duration = Duration::from_secs(2);

/// Monotone piecewise estimator mapping wall-clock to stream time.
///
/// Both axes are in microseconds.
pub struct Smoother {
    // ---
    history_us: u64,
    horizon_us: u64,

    /// `(x, y)` samples inside the history window, x strictly increasing.
    samples: VecDeque<(u64, u64)>,

    /// Floor for future estimates; keeps the mapping monotone.
    last_estimate: u64,
}

impl Smoother {
    // ---
    pub fn new(history: Duration, horizon: Duration) -> Self {
        // ---
        Self {
            history_us: history.as_micros() as u64,
            horizon_us: horizon.as_micros() as u64,
            samples: VecDeque::new(),
            last_estimate: 0,
        }
    }

    /// Records a sample. Samples must arrive in increasing `x` order;
    /// out-of-order samples are ignored.
    pub fn put(&mut self, x_us: u64, y_us: u64) {
        // ---
        if let Some(&(last_x, _)) = self.samples.back() {
            if x_us <= last_x {
                return;
            }
        }

        self.samples.push_back((x_us, y_us));
        while let Some(&(front_x, _)) = self.samples.front() {
            if front_x + self.history_us < x_us && self.samples.len() > 2 {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    /// Estimates the stream time corresponding to wall-clock `x_us`.
    ///
    /// With fewer than two samples the newest sample's value (or zero)
    /// is returned. The estimate never decreases between calls.
    pub fn estimate(&mut self, x_us: u64) -> u64 {
        // ---
        let raw = match (self.samples.front(), self.samples.back()) {
            (Some(&(x0, y0)), Some(&(x1, y1))) if x1 > x0 => {
                let slope = (y1 as f64 - y0 as f64) / (x1 as f64 - x0 as f64);
                let slope = slope.max(0.0);

                // Clamp how far we run ahead of real data.
                let x = x_us.min(x1 + self.horizon_us);
                let dx = x as f64 - x1 as f64;
                let y = y1 as f64 + slope * dx;
                if y <= 0.0 {
                    0
                } else {
                    y as u64
                }
            }
            (_, Some(&(_, y))) => y,
            _ => 0,
        };

        self.last_estimate = self.last_estimate.max(raw);
        self.last_estimate
    }
}

impl Default for Smoother {
    fn default() -> Self {
        // ---
        Self::new(DEFAULT_HISTORY, DEFAULT_HORIZON)
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_empty_estimates_zero() {
        // ---
        let mut s = Smoother::default();
        assert_eq!(s.estimate(1_000_000), 0);
    }

    #[test]
    fn test_linear_feed_is_tracked_exactly() {
        // ---
        let mut s = Smoother::default();
        for i in 0..10u64 {
            s.put(i * 100_000, i * 100_000);
        }
        assert_eq!(s.estimate(900_000), 900_000);
        assert_eq!(s.estimate(1_000_000), 1_000_000);
    }

    #[test]
    fn test_slow_sender_clock() {
        // ---
        // Sender produces 0.5 us of audio per us of wall clock.
        let mut s = Smoother::default();
        for i in 0..=10u64 {
            s.put(i * 100_000, i * 50_000);
        }
        let est = s.estimate(1_200_000);
        assert!((590_000..=610_000).contains(&est), "est = {est}");
    }

    #[test]
    fn test_estimate_is_monotone() {
        // ---
        let mut s = Smoother::default();
        s.put(0, 0);
        s.put(100_000, 200_000);
        s.put(200_000, 150_000); // y regression in the input

        let a = s.estimate(200_000);
        let b = s.estimate(250_000);
        let c = s.estimate(300_000);
        assert!(a <= b && b <= c);
    }

    #[test]
    fn test_horizon_caps_extrapolation() {
        // ---
        let mut s = Smoother::default();
        s.put(0, 0);
        s.put(1_000_000, 1_000_000);

        // An hour with no samples: the estimate stops at the horizon.
        let est = s.estimate(3_600_000_000);
        assert_eq!(est, 1_000_000 + DEFAULT_HORIZON.as_micros() as u64);
    }

    #[test]
    fn test_out_of_order_sample_ignored() {
        // ---
        let mut s = Smoother::default();
        s.put(100_000, 100_000);
        s.put(50_000, 999_999);
        assert_eq!(s.samples.len(), 1);
    }

    #[test]
    fn test_history_window_trims() {
        // ---
        let mut s = Smoother::new(Duration::from_secs(1), DEFAULT_HORIZON);
        for i in 0..100u64 {
            s.put(i * 100_000, i * 100_000);
        }
        // Roughly one second of samples retained.
        assert!(s.samples.len() <= 12);
    }
}
