//! Two-state Kalman filter (velocity model)
//!
//! State: position = instantaneous access rate (events/sec), velocity =
//! rate-of-change-of-rate. Constant-velocity transition with unit
//! timestep, scalar measurement of the position. A well-defined
//! recurrence, not a library dependency: the filter is small enough that
//! owning it beats pulling in a linear-algebra stack.

use serde::{Deserialize, Serialize};

/// A stateful position/velocity estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KalmanFilter {
    /// Estimated rate.
    position: f64,
    /// Estimated rate-of-change.
    velocity: f64,
    /// Error covariance matrix, row-major 2×2.
    p: [[f64; 2]; 2],
    /// Process noise intensity.
    q: f64,
    /// Measurement noise variance.
    r: f64,
    /// Measurements processed.
    observations: u64,
}

impl KalmanFilter {
    /// New filter with the given noise parameters.
    ///
    /// `process_noise` models how quickly the true rate drifts between
    /// observations; `measurement_noise` models how noisy each observed
    /// rate is. Both must be positive.
    pub fn new(process_noise: f64, measurement_noise: f64) -> Self {
        KalmanFilter {
            position: 0.0,
            velocity: 0.0,
            // Large initial uncertainty: the first measurements dominate.
            p: [[1.0, 0.0], [0.0, 1.0]],
            q: process_noise.max(f64::MIN_POSITIVE),
            r: measurement_noise.max(f64::MIN_POSITIVE),
            observations: 0,
        }
    }

    /// Estimated rate.
    pub fn position(&self) -> f64 {
        self.position
    }

    /// Estimated rate-of-change.
    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Position-estimate variance. Shrinks as observations accumulate.
    pub fn uncertainty(&self) -> f64 {
        self.p[0][0]
    }

    /// Measurements processed so far.
    pub fn observations(&self) -> u64 {
        self.observations
    }

    /// Incorporate one measurement of the rate.
    pub fn process(&mut self, measurement: f64) {
        // Predict: x = F x, P = F P Fᵀ + Q with F = [[1,1],[0,1]].
        let pred_pos = self.position + self.velocity;
        let pred_vel = self.velocity;

        let p00 = self.p[0][0] + self.p[1][0] + self.p[0][1] + self.p[1][1] + self.q * 0.25;
        let p01 = self.p[0][1] + self.p[1][1] + self.q * 0.5;
        let p10 = self.p[1][0] + self.p[1][1] + self.q * 0.5;
        let p11 = self.p[1][1] + self.q;

        // Update with scalar measurement z of the position (H = [1, 0]).
        let innovation = measurement - pred_pos;
        let s = p00 + self.r;
        let k0 = p00 / s;
        let k1 = p10 / s;

        self.position = pred_pos + k0 * innovation;
        self.velocity = pred_vel + k1 * innovation;

        self.p[0][0] = (1.0 - k0) * p00;
        self.p[0][1] = (1.0 - k0) * p01;
        self.p[1][0] = p10 - k1 * p00;
        self.p[1][1] = p11 - k1 * p01;

        self.observations += 1;
    }

    /// Run the state transition forward `n` steps without new
    /// measurements, returning the projected position. Does not mutate
    /// the filter.
    pub fn predict_ahead(&self, n: u32) -> f64 {
        self.position + self.velocity * n as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> KalmanFilter {
        KalmanFilter::new(0.01, 0.1)
    }

    #[test]
    fn test_converges_to_constant_signal() {
        let mut f = filter();
        for _ in 0..100 {
            f.process(5.0);
        }
        assert!((f.position() - 5.0).abs() < 0.1, "position {}", f.position());
        assert!(f.velocity().abs() < 0.05, "velocity {}", f.velocity());
    }

    #[test]
    fn test_tracks_linear_trend() {
        let mut f = filter();
        // Rate grows by 1.0 per step.
        for i in 0..200 {
            f.process(i as f64);
        }
        assert!((f.velocity() - 1.0).abs() < 0.1, "velocity {}", f.velocity());
        let projected = f.predict_ahead(10);
        assert!((projected - 209.0).abs() < 5.0, "projected {}", projected);
    }

    #[test]
    fn test_uncertainty_shrinks_with_observations() {
        let mut f = filter();
        let initial = f.uncertainty();
        for _ in 0..50 {
            f.process(1.0);
        }
        assert!(f.uncertainty() < initial);
    }

    #[test]
    fn test_predict_ahead_does_not_mutate() {
        let mut f = filter();
        f.process(3.0);
        f.process(3.0);
        let before = (f.position(), f.velocity(), f.uncertainty());
        let _ = f.predict_ahead(100);
        assert_eq!(before, (f.position(), f.velocity(), f.uncertainty()));
    }

    #[test]
    fn test_smooths_noise() {
        let mut f = filter();
        // Alternating measurements around 2.0.
        for i in 0..100 {
            let noise = if i % 2 == 0 { 0.5 } else { -0.5 };
            f.process(2.0 + noise);
        }
        assert!((f.position() - 2.0).abs() < 0.5);
    }

    #[test]
    fn test_observation_count() {
        let mut f = filter();
        assert_eq!(f.observations(), 0);
        f.process(1.0);
        f.process(1.0);
        assert_eq!(f.observations(), 2);
    }
}
