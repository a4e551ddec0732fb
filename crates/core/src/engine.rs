//! The per-frame engine façade
//!
//! Owns all mutable pipeline state and advances it one frame at a time:
//! detect-or-track, fps update, buffer eviction and append, band update,
//! pulse extraction and heart-rate estimation. Single-threaded by design;
//! the caller serializes `process_frame` invocations.

use image::{GrayImage, RgbImage};
use ndarray::Array1;
use rppg_common::{Clock, Point, Rect, SystemClock};
use rppg_face_detection::{
    nearest_box, FaceDetAlgorithm, FaceDetect, FaceDetectionConfig, FaceDetectionError,
    FaceDetector,
};
use rppg_face_tracking::{FaceTracker, TrackingConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, info};

use crate::annotate::annotate;
use crate::buffer::SignalBuffer;
use crate::estimate::{BpmStats, HeartRateEstimator};
use crate::extract::{extract_signal, RppgAlgorithm};

/// Engine errors surfaced at load time. The per-frame hot path never
/// fails; recoverable conditions collapse into state transitions.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Detection(#[from] FaceDetectionError),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown rPPG algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// Engine configuration. Defaults mirror the reference deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Pulse extraction variant.
    pub algorithm: RppgAlgorithm,
    /// Face detector variant.
    pub detector: FaceDetAlgorithm,
    /// Cascade classifier model file.
    pub cascade_model_path: PathBuf,
    /// SSD face detector ONNX model file.
    pub dnn_model_path: PathBuf,
    /// How often to re-detect while tracking, in Hz.
    pub rescan_frequency: f64,
    /// How often to flush the BPM history, in Hz.
    pub sampling_frequency: f64,
    /// Rolling-buffer horizon in seconds.
    pub max_signal_size: f64,
    /// Minimum buffered seconds before estimation begins.
    pub min_signal_size: f64,
    /// Process every Nth frame.
    pub downsample: u32,
    /// Seconds per timestamp unit (0.001 for millisecond timestamps).
    pub time_base: f64,
    /// Render an annotated copy of each processed frame.
    pub gui_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            algorithm: RppgAlgorithm::G,
            detector: FaceDetAlgorithm::Cascade,
            cascade_model_path: PathBuf::from("seeta_fd_frontal_v1.0.bin"),
            dnn_model_path: PathBuf::from("res10_300x300_ssd.onnx"),
            rescan_frequency: 1.0,
            sampling_frequency: 1.0,
            max_signal_size: 15.0,
            min_signal_size: 5.0,
            downsample: 1,
            time_base: 0.001,
            gui_mode: false,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.downsample == 0 {
            return Err(EngineError::InvalidConfig("downsample must be >= 1".into()));
        }
        if self.rescan_frequency <= 0.0 || self.sampling_frequency <= 0.0 {
            return Err(EngineError::InvalidConfig(
                "rescan and sampling frequencies must be positive".into(),
            ));
        }
        if self.min_signal_size <= 0.0 || self.max_signal_size < self.min_signal_size {
            return Err(EngineError::InvalidConfig(
                "signal sizes must satisfy 0 < min <= max".into(),
            ));
        }
        if self.time_base <= 0.0 {
            return Err(EngineError::InvalidConfig("time base must be positive".into()));
        }
        Ok(())
    }
}

/// Sink for human-readable status strings.
pub type InfoSink = Box<dyn FnMut(&str)>;

/// The rPPG engine. All mutable state lives here; frames are borrowed.
pub struct Engine {
    config: EngineConfig,
    detector: Box<dyn FaceDetect>,
    tracker: FaceTracker,
    clock: Box<dyn Clock>,
    info_sink: Option<InfoSink>,

    buffer: SignalBuffer,
    estimator: HeartRateEstimator,
    filtered: Array1<f64>,
    power_spectrum: Array1<f64>,

    face_valid: bool,
    rescan_flag: bool,
    face_box: Rect,
    roi: Rect,
    fps: f64,
    low: usize,
    high: usize,
    process_time: i64,
    last_scan_time: i64,
    frame_counter: u64,

    last_frame_gray: Option<GrayImage>,
    annotated: Option<RgbImage>,
}

impl Engine {
    /// Validate the configuration, load the configured face detector and
    /// initialize all state.
    ///
    /// Missing or unreadable model files fail here with a diagnostic;
    /// the engine is unusable in that case.
    pub fn load(config: EngineConfig) -> Result<Self, EngineError> {
        let detection_config = FaceDetectionConfig {
            algorithm: config.detector,
            cascade_model_path: config.cascade_model_path.clone(),
            dnn_model_path: config.dnn_model_path.clone(),
            ..Default::default()
        };
        let detector = FaceDetector::new(&detection_config)?;
        Self::from_parts(config, Box::new(detector), Box::new(SystemClock::new()))
    }

    /// Assemble an engine over any detector and clock implementation.
    ///
    /// This is the seam used for offline replay and scenario tests; the
    /// production path is [`Engine::load`].
    pub fn from_parts(
        config: EngineConfig,
        detector: Box<dyn FaceDetect>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        info!(algorithm = ?config.algorithm, detector = ?config.detector, "engine initialized");
        let estimator = HeartRateEstimator::new(config.sampling_frequency, config.time_base);
        Ok(Self {
            config,
            detector,
            tracker: FaceTracker::new(TrackingConfig::default()),
            clock,
            info_sink: None,
            buffer: SignalBuffer::new(),
            estimator,
            filtered: Array1::zeros(0),
            power_spectrum: Array1::zeros(0),
            face_valid: false,
            rescan_flag: false,
            face_box: Rect::default(),
            roi: Rect::default(),
            fps: 0.0,
            low: 0,
            high: 0,
            process_time: 0,
            last_scan_time: 0,
            frame_counter: 0,
            last_frame_gray: None,
            annotated: None,
        })
    }

    /// Attach the status-string sink.
    pub fn set_info_sink(&mut self, sink: InfoSink) {
        self.info_sink = Some(sink);
    }

    /// Process one frame and return the latest mean BPM (0 until the
    /// first sampling-period flush).
    ///
    /// `frame_rgb` and `frame_gray` must share dimensions; `frame_gray`
    /// is expected to be histogram-equalized by the ingestion layer.
    pub fn process_frame(&mut self, frame_rgb: &RgbImage, frame_gray: &GrayImage) -> f64 {
        let frame_index = self.frame_counter;
        self.frame_counter += 1;
        if frame_index % u64::from(self.config.downsample) != 0 {
            return self.estimator.mean_bpm();
        }

        let (width, height) = frame_gray.dimensions();
        if width == 0 || height == 0 || frame_rgb.dimensions() != (width, height) {
            self.emit_info("Skipping invalid frame");
            return self.estimator.mean_bpm();
        }

        // A resolution change restarts acquisition.
        if let Some(last) = &self.last_frame_gray {
            if last.dimensions() != (width, height) {
                debug!("frame geometry changed, reinitializing tracker");
                self.tracker.reset();
                self.invalidate_face();
                self.last_frame_gray = None;
            }
        }

        let now = match self.clock.now_ms() {
            Some(now) => now,
            None => {
                self.emit_info("Tick count overflow, reusing last frame time");
                self.process_time
            }
        };
        self.process_time = now;

        if !self.face_valid {
            self.last_scan_time = now;
            self.scan(frame_rgb, frame_gray, width, height);
        } else if (now - self.last_scan_time) as f64 * self.config.time_base
            >= 1.0 / self.config.rescan_frequency
        {
            self.last_scan_time = now;
            self.scan(frame_rgb, frame_gray, width, height);
            if self.face_valid {
                self.rescan_flag = true;
            }
        } else {
            self.track(frame_gray, width, height);
        }

        if self.face_valid {
            // fps from the pre-append buffer drives eviction; the band is
            // recomputed from the post-append state.
            self.fps =
                rppg_dsp::estimate_fps(self.buffer.timestamps(), self.config.time_base, self.fps);
            if self.fps > 0.0 {
                self.buffer
                    .evict_to_limit(self.fps * self.config.max_signal_size);
            }

            let means = roi_channel_means(frame_rgb, self.roi.clamp_to(width, height));
            self.buffer.push(means, now, self.rescan_flag);

            self.fps =
                rppg_dsp::estimate_fps(self.buffer.timestamps(), self.config.time_base, self.fps);
            let (low, high) = rppg_dsp::band_limits(self.buffer.len(), self.fps);
            self.low = low;
            self.high = high;

            if self.fps > 0.0
                && self.buffer.len() as f64 >= self.fps * self.config.min_signal_size
            {
                let matrix = self.buffer.signal_matrix();
                self.filtered = extract_signal(
                    self.config.algorithm,
                    &matrix,
                    self.buffer.rescans(),
                    self.fps,
                    low,
                    high,
                );
                self.power_spectrum =
                    self.estimator
                        .estimate(&self.filtered, self.fps, low, high, now);
            }

            if self.config.gui_mode {
                self.annotated = Some(annotate(
                    frame_rgb,
                    self.face_box,
                    self.roi,
                    self.tracker.corners(),
                    &self.filtered,
                ));
            }
        }

        self.rescan_flag = false;
        self.last_frame_gray = Some(frame_gray.clone());
        self.estimator.mean_bpm()
    }

    /// Detect-and-seed: pick the nearest candidate, seed corners and
    /// derive the forehead ROI.
    fn scan(&mut self, frame_rgb: &RgbImage, frame_gray: &GrayImage, width: u32, height: u32) {
        match self.detector.detect(frame_rgb, frame_gray) {
            Ok(boxes) => match nearest_box(&boxes, self.face_box) {
                Some(best) => {
                    self.face_box = best.clamp_to(width, height);
                    self.tracker.seed_corners(frame_gray, self.face_box);
                    self.roi = forehead_roi(self.face_box).clamp_to(width, height);
                    self.face_valid = true;
                }
                None => {
                    debug!("no face candidates");
                    self.invalidate_face();
                }
            },
            Err(err) => {
                self.emit_info(&format!("Face detection failed: {err}"));
                self.invalidate_face();
            }
        }
    }

    /// Advance box and ROI with the feature tracker.
    fn track(&mut self, frame_gray: &GrayImage, width: u32, height: u32) {
        let Some(last_gray) = self.last_frame_gray.take() else {
            self.invalidate_face();
            return;
        };
        match self
            .tracker
            .track(&last_gray, frame_gray, self.face_box, self.roi)
        {
            Ok(pose) => {
                self.face_box = pose.face_box.clamp_to(width, height);
                self.roi = pose.roi.clamp_to(width, height);
            }
            Err(err) => {
                debug!(%err, "tracking lost the face");
                self.invalidate_face();
            }
        }
        self.last_frame_gray = Some(last_gray);
    }

    /// Drop the rolling signal state; the next frame re-detects.
    fn invalidate_face(&mut self) {
        self.buffer.clear();
        self.filtered = Array1::zeros(0);
        self.power_spectrum = Array1::zeros(0);
        self.face_valid = false;
    }

    fn emit_info(&mut self, message: &str) {
        info!("{message}");
        if let Some(sink) = self.info_sink.as_mut() {
            sink(message);
        }
    }

    // Accessors

    #[must_use]
    pub fn mean_bpm(&self) -> f64 {
        self.estimator.mean_bpm()
    }

    #[must_use]
    pub fn bpm_stats(&self) -> BpmStats {
        self.estimator.stats()
    }

    /// BPM picks accumulated since the last sampling-period flush.
    #[must_use]
    pub fn pending_estimates(&self) -> usize {
        self.estimator.pending()
    }

    #[must_use]
    pub fn face_valid(&self) -> bool {
        self.face_valid
    }

    #[must_use]
    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Current spectral band indices `(low, high)`.
    #[must_use]
    pub fn band(&self) -> (usize, usize) {
        (self.low, self.high)
    }

    #[must_use]
    pub fn signal_len(&self) -> usize {
        self.buffer.len()
    }

    #[must_use]
    pub fn filtered_signal(&self) -> &Array1<f64> {
        &self.filtered
    }

    #[must_use]
    pub fn power_spectrum(&self) -> &Array1<f64> {
        &self.power_spectrum
    }

    #[must_use]
    pub fn face_box(&self) -> Rect {
        self.face_box
    }

    #[must_use]
    pub fn roi(&self) -> Rect {
        self.roi
    }

    #[must_use]
    pub fn corners(&self) -> &[Point] {
        self.tracker.corners()
    }

    /// The annotated copy of the most recent frame, when `gui_mode` is on.
    #[must_use]
    pub fn annotated_frame(&self) -> Option<&RgbImage> {
        self.annotated.as_ref()
    }
}

/// Forehead strip of the face box.
fn forehead_roi(face_box: Rect) -> Rect {
    let x = face_box.x as f32;
    let y = face_box.y as f32;
    let w = face_box.width as f32;
    let h = face_box.height as f32;
    Rect::from_points(
        Point::new(x + 0.3 * w, y + 0.1 * h),
        Point::new(x + 0.7 * w, y + 0.25 * h),
    )
}

/// Per-channel means inside the ROI, in B, G, R column order.
fn roi_channel_means(frame: &RgbImage, roi: Rect) -> [f64; 3] {
    if roi.is_empty() {
        return [0.0; 3];
    }
    let mut sums = [0.0f64; 3];
    let mut count = 0.0f64;
    for y in roi.y..roi.y + roi.height {
        for x in roi.x..roi.x + roi.width {
            let pixel = frame.get_pixel(x as u32, y as u32);
            sums[0] += f64::from(pixel[2]); // B
            sums[1] += f64::from(pixel[1]); // G
            sums[2] += f64::from(pixel[0]); // R
            count += 1.0;
        }
    }
    [sums[0] / count, sums[1] / count, sums[2] / count]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forehead_roi_inside_box() {
        let face_box = Rect::new(100, 50, 200, 240);
        let roi = forehead_roi(face_box);
        assert_eq!(roi, Rect::new(160, 74, 80, 36));
        assert!(roi.x >= face_box.x && roi.y >= face_box.y);
        assert!(roi.x + roi.width <= face_box.x + face_box.width);
        assert!(roi.y + roi.height <= face_box.y + face_box.height);
    }

    #[test]
    fn test_roi_means_channel_order() {
        // R=10, G=20, B=30 everywhere: columns come out as B, G, R.
        let frame = RgbImage::from_pixel(40, 40, image::Rgb([10, 20, 30]));
        let means = roi_channel_means(&frame, Rect::new(5, 5, 10, 10));
        assert_eq!(means, [30.0, 20.0, 10.0]);
    }

    #[test]
    fn test_roi_means_empty_roi() {
        let frame = RgbImage::from_pixel(40, 40, image::Rgb([10, 20, 30]));
        assert_eq!(roi_channel_means(&frame, Rect::default()), [0.0; 3]);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig {
            downsample: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        config.downsample = 1;
        assert!(config.validate().is_ok());

        config.min_signal_size = 20.0;
        assert!(config.validate().is_err());
    }
}
