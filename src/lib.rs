//! Remote photoplethysmography engine
//!
//! Recovers the instantaneous heart rate of a subject from a live face
//! video stream: a detected and tracked forehead region is sampled into a
//! rolling color-mean time series, demixed into a pulsatile signal and
//! converted to BPM through its power spectrum.
//!
//! This crate re-exports the public surface of the pipeline crates; see
//! [`Engine`] for the per-frame entry point.

pub use rppg_common::{Clock, ManualClock, Point, Rect, SystemClock};
pub use rppg_core::{
    annotate, extract_signal, smoothing_passes, BpmStats, Engine, EngineConfig, EngineError,
    HeartRateEstimator, RppgAlgorithm, SignalBuffer,
};
pub use rppg_dsp::{
    band_limits, bandpass, denoise, detrend, estimate_fps, frequency_to_time, moving_average,
    normalize, pca_component, power_spectrum, time_to_frequency, HIGH_BPM, LOW_BPM,
};
pub use rppg_face_detection::{
    nearest_box, FaceDetAlgorithm, FaceDetect, FaceDetectionConfig, FaceDetectionError,
    FaceDetector,
};
pub use rppg_face_tracking::{FaceTracker, TrackedPose, TrackingConfig, TrackingError};

pub use rppg_common::prepare_gray;
