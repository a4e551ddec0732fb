//! Core rPPG pipeline: signal buffer, extractors, heart-rate estimation
//! and the per-frame engine façade
//!
//! The engine couples the face acquisition and tracking crates to the DSP
//! primitives: every accepted frame contributes one ROI color mean to a
//! rolling buffer; once enough signal is buffered, the configured
//! extractor produces a filtered pulse signal whose spectral peak inside
//! the physiological band yields the instantaneous heart rate.
//!
//! # Example
//! ```no_run
//! use rppg_core::{Engine, EngineConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut engine = Engine::load(EngineConfig::default())?;
//! # let (rgb, gray) = (image::RgbImage::new(640, 480), image::GrayImage::new(640, 480));
//! // Per frame, in timestamp order:
//! let bpm = engine.process_frame(&rgb, &gray);
//! println!("mean BPM: {bpm:.0}");
//! # Ok(())
//! # }
//! ```

mod annotate;
mod buffer;
mod engine;
mod estimate;
mod extract;

pub use annotate::annotate;
pub use buffer::SignalBuffer;
pub use engine::{Engine, EngineConfig, EngineError, InfoSink};
pub use estimate::{BpmStats, HeartRateEstimator};
pub use extract::{extract_signal, smoothing_passes, RppgAlgorithm, DETREND_LAMBDA};
