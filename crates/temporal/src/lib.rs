//! Temporal access tracking for NornicDB
//!
//! Per node: a Kalman velocity filter smooths the access-rate series, a
//! ring buffer keeps recent access timestamps, and hour/day histograms
//! accumulate periodicity. Predictions run the filter forward and clamp
//! the implied interval to `[1 s, 30 d]`.
//!
//! The memory-tier decay math also lives here so the inference engine's
//! decay sweep and the tracker share one set of half-life curves.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod decay;
pub mod kalman;
pub mod tracker;

pub use decay::{decay_score, DecayState};
pub use kalman::KalmanFilter;
pub use tracker::{AccessHistory, AccessTracker, Prediction, TrackerConfig, Trend};
