//! Face acquisition for the rPPG engine
//!
//! Two detector variants behind one seam: a classical cascade classifier
//! operating on the grayscale frame (via `rustface`) and an SSD-style deep
//! detector run through ONNX Runtime. Both return candidate face boxes in
//! source-frame coordinates; the engine picks one with the nearest-box
//! rule and seeds tracking from it.
//!
//! # Example
//! ```no_run
//! use rppg_face_detection::{FaceDetectionConfig, FaceDetector, FaceDetect};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FaceDetectionConfig::default();
//! let mut detector = FaceDetector::new(&config)?;
//!
//! let rgb = image::open("frame.png")?.to_rgb8();
//! let gray = rppg_common::prepare_gray(&rgb);
//! let boxes = detector.detect(&rgb, &gray)?;
//! println!("{} candidate faces", boxes.len());
//! # Ok(())
//! # }
//! ```

use image::{GrayImage, RgbImage};
use ndarray::Array4;
use ort::{session::Session, value::TensorRef};
use rppg_common::Rect;
use rustface::ImageData;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, info};

/// Minimum face side length as a fraction of `min(width, height)`.
pub const REL_MIN_FACE_SIZE: f64 = 0.4;

/// SSD input resolution.
const DNN_INPUT_SIZE: u32 = 300;
/// Per-channel means subtracted from the SSD input, in B, G, R order.
const DNN_MEAN_BGR: [f32; 3] = [104.0, 177.0, 123.0];
/// Detections below this confidence are discarded.
const DNN_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// Detector variant selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FaceDetAlgorithm {
    /// Classical cascade classifier on the grayscale frame.
    Cascade,
    /// SSD face detector via ONNX Runtime.
    Deep,
}

impl FromStr for FaceDetAlgorithm {
    type Err = FaceDetectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "haar" | "cascade" => Ok(FaceDetAlgorithm::Cascade),
            "deep" | "dnn" => Ok(FaceDetAlgorithm::Deep),
            other => Err(FaceDetectionError::UnknownAlgorithm(other.to_string())),
        }
    }
}

/// Configuration for face acquisition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceDetectionConfig {
    /// Which detector variant to run.
    pub algorithm: FaceDetAlgorithm,
    /// Cascade classifier model file.
    pub cascade_model_path: PathBuf,
    /// SSD face detector ONNX model file.
    pub dnn_model_path: PathBuf,
    /// Minimum face side as a fraction of the smaller frame dimension.
    pub min_face_fraction: f64,
    /// Cascade score threshold.
    pub cascade_score_threshold: f64,
    /// Deep detector confidence threshold.
    pub confidence_threshold: f32,
}

impl Default for FaceDetectionConfig {
    fn default() -> Self {
        Self {
            algorithm: FaceDetAlgorithm::Cascade,
            cascade_model_path: PathBuf::from("seeta_fd_frontal_v1.0.bin"),
            dnn_model_path: PathBuf::from("res10_300x300_ssd.onnx"),
            min_face_fraction: REL_MIN_FACE_SIZE,
            cascade_score_threshold: 2.0,
            confidence_threshold: DNN_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Errors that can occur during face detection.
#[derive(Debug, Error)]
pub enum FaceDetectionError {
    #[error("Face classifier model not found: {0}")]
    CascadeModelNotFound(PathBuf),

    #[error("DNN model file not found: {0}")]
    DnnModelNotFound(PathBuf),

    #[error("Failed to load cascade model: {0}")]
    CascadeLoad(String),

    #[error("Failed to load ONNX model: {0}")]
    ModelLoad(String),

    #[error("Failed to run inference: {0}")]
    Inference(String),

    #[error("Unexpected detector output shape: {0}")]
    OutputShape(String),

    #[error("Empty input frame")]
    EmptyFrame,

    #[error("Unknown face detection algorithm: {0}")]
    UnknownAlgorithm(String),
}

/// The seam the engine is built over: one call per frame, candidate boxes out.
pub trait FaceDetect {
    fn detect(
        &mut self,
        frame_rgb: &RgbImage,
        frame_gray: &GrayImage,
    ) -> Result<Vec<Rect>, FaceDetectionError>;
}

/// Tagged detector choice; the loaded model is the variant payload.
pub enum FaceDetector {
    Cascade {
        detector: Box<dyn rustface::Detector>,
        min_face_fraction: f64,
    },
    Deep {
        session: Session,
        confidence_threshold: f32,
    },
}

impl FaceDetector {
    /// Validate the configured model files and load the chosen variant.
    ///
    /// Both model paths are checked up front regardless of the chosen
    /// variant, so a misconfigured deployment fails at load rather than
    /// on a later variant switch.
    pub fn new(config: &FaceDetectionConfig) -> Result<Self, FaceDetectionError> {
        ensure_readable(&config.cascade_model_path)
            .map_err(|_| FaceDetectionError::CascadeModelNotFound(config.cascade_model_path.clone()))?;
        ensure_readable(&config.dnn_model_path)
            .map_err(|_| FaceDetectionError::DnnModelNotFound(config.dnn_model_path.clone()))?;

        match config.algorithm {
            FaceDetAlgorithm::Cascade => {
                info!(path = %config.cascade_model_path.display(), "loading cascade face model");
                let mut detector =
                    rustface::create_detector(&config.cascade_model_path.to_string_lossy())
                        .map_err(|e| FaceDetectionError::CascadeLoad(e.to_string()))?;
                detector.set_score_thresh(config.cascade_score_threshold);
                // Pyramid scale mirroring the classical 1.1 scale step.
                detector.set_pyramid_scale_factor(1.0 / 1.1);
                detector.set_slide_window_step(4, 4);
                Ok(FaceDetector::Cascade {
                    detector,
                    min_face_fraction: config.min_face_fraction,
                })
            }
            FaceDetAlgorithm::Deep => {
                info!(path = %config.dnn_model_path.display(), "loading SSD face model");
                let session = Session::builder()
                    .map_err(|e| FaceDetectionError::ModelLoad(e.to_string()))?
                    .commit_from_file(&config.dnn_model_path)
                    .map_err(|e| FaceDetectionError::ModelLoad(e.to_string()))?;
                Ok(FaceDetector::Deep {
                    session,
                    confidence_threshold: config.confidence_threshold,
                })
            }
        }
    }

    fn detect_cascade(
        detector: &mut dyn rustface::Detector,
        min_face_fraction: f64,
        frame_gray: &GrayImage,
    ) -> Result<Vec<Rect>, FaceDetectionError> {
        let (width, height) = frame_gray.dimensions();
        if width == 0 || height == 0 {
            return Err(FaceDetectionError::EmptyFrame);
        }

        let min_side = (f64::from(width.min(height)) * min_face_fraction) as u32;
        detector.set_min_face_size(min_side.max(20));

        let image = ImageData::new(frame_gray.as_raw(), width, height);
        let faces = detector.detect(&image);
        debug!(count = faces.len(), "cascade detections");

        Ok(faces
            .iter()
            .map(|face| {
                let bbox = face.bbox();
                Rect::new(bbox.x(), bbox.y(), bbox.width() as i32, bbox.height() as i32)
            })
            .collect())
    }

    fn detect_deep(
        session: &mut Session,
        confidence_threshold: f32,
        frame_rgb: &RgbImage,
    ) -> Result<Vec<Rect>, FaceDetectionError> {
        let (width, height) = frame_rgb.dimensions();
        if width == 0 || height == 0 {
            return Err(FaceDetectionError::EmptyFrame);
        }

        let input = preprocess_ssd_input(frame_rgb);
        let input_tensor = TensorRef::from_array_view(input.view())
            .map_err(|e| FaceDetectionError::Inference(e.to_string()))?;
        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| FaceDetectionError::Inference(e.to_string()))?;

        let (_, value) = outputs
            .iter()
            .next()
            .ok_or_else(|| FaceDetectionError::OutputShape("no output tensor".into()))?;
        let (shape, data) = value
            .try_extract_tensor::<f32>()
            .map_err(|e| FaceDetectionError::Inference(e.to_string()))?;

        // SSD detection output: rows of [image_id, label, confidence, x1, y1, x2, y2].
        if shape.last().copied() != Some(7) {
            return Err(FaceDetectionError::OutputShape(format!("{shape:?}")));
        }

        let mut boxes = Vec::new();
        for det in data.chunks_exact(7) {
            let confidence = det[2];
            if confidence < confidence_threshold {
                continue;
            }
            let x1 = det[3] * width as f32;
            let y1 = det[4] * height as f32;
            let x2 = det[5] * width as f32;
            let y2 = det[6] * height as f32;
            let rect = Rect::new(
                x1 as i32,
                y1 as i32,
                (x2 - x1) as i32,
                (y2 - y1) as i32,
            );
            if !rect.is_empty() {
                boxes.push(rect);
            }
        }
        debug!(count = boxes.len(), "deep detections");
        Ok(boxes)
    }
}

impl FaceDetect for FaceDetector {
    fn detect(
        &mut self,
        frame_rgb: &RgbImage,
        frame_gray: &GrayImage,
    ) -> Result<Vec<Rect>, FaceDetectionError> {
        match self {
            FaceDetector::Cascade {
                detector,
                min_face_fraction,
            } => Self::detect_cascade(detector.as_mut(), *min_face_fraction, frame_gray),
            FaceDetector::Deep {
                session,
                confidence_threshold,
            } => Self::detect_deep(session, *confidence_threshold, frame_rgb),
        }
    }
}

/// Resize to 300x300 and build the NCHW tensor the SSD model expects:
/// BGR channel order with per-channel means subtracted.
fn preprocess_ssd_input(frame_rgb: &RgbImage) -> Array4<f32> {
    let resized = image::imageops::resize(
        frame_rgb,
        DNN_INPUT_SIZE,
        DNN_INPUT_SIZE,
        image::imageops::FilterType::Triangle,
    );

    let side = DNN_INPUT_SIZE as usize;
    let mut input = Array4::<f32>::zeros((1, 3, side, side));
    for y in 0..side {
        for x in 0..side {
            let pixel = resized.get_pixel(x as u32, y as u32);
            input[[0, 0, y, x]] = f32::from(pixel[2]) - DNN_MEAN_BGR[0]; // B
            input[[0, 1, y, x]] = f32::from(pixel[1]) - DNN_MEAN_BGR[1]; // G
            input[[0, 2, y, x]] = f32::from(pixel[0]) - DNN_MEAN_BGR[2]; // R
        }
    }
    input
}

/// Pick the candidate whose top-left corner is nearest to the previously
/// tracked box. With a zero previous box (first detection) this degrades
/// to the candidate closest to the origin.
#[must_use]
pub fn nearest_box(candidates: &[Rect], previous: Rect) -> Option<Rect> {
    candidates
        .iter()
        .min_by_key(|candidate| candidate.tl_distance_sq(&previous))
        .copied()
}

fn ensure_readable(path: &Path) -> std::io::Result<()> {
    std::fs::File::open(path).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!(
            "haar".parse::<FaceDetAlgorithm>().unwrap(),
            FaceDetAlgorithm::Cascade
        );
        assert_eq!(
            "cascade".parse::<FaceDetAlgorithm>().unwrap(),
            FaceDetAlgorithm::Cascade
        );
        assert_eq!(
            "deep".parse::<FaceDetAlgorithm>().unwrap(),
            FaceDetAlgorithm::Deep
        );
        assert!("frontal".parse::<FaceDetAlgorithm>().is_err());
    }

    #[test]
    fn test_missing_model_files_reported() {
        let config = FaceDetectionConfig {
            cascade_model_path: PathBuf::from("/nonexistent/cascade.bin"),
            ..Default::default()
        };
        let err = FaceDetector::new(&config)
            .err()
            .expect("load should fail on a missing cascade model");
        match err {
            FaceDetectionError::CascadeModelNotFound(path) => {
                assert_eq!(path, PathBuf::from("/nonexistent/cascade.bin"));
            }
            other => panic!("expected CascadeModelNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_nearest_box_rule() {
        let previous = Rect::new(100, 100, 50, 50);
        let candidates = vec![
            Rect::new(0, 0, 60, 60),
            Rect::new(104, 98, 52, 48),
            Rect::new(300, 20, 40, 40),
        ];
        assert_eq!(nearest_box(&candidates, previous), Some(candidates[1]));
    }

    #[test]
    fn test_nearest_box_empty() {
        assert_eq!(nearest_box(&[], Rect::default()), None);
    }

    #[test]
    fn test_nearest_box_first_detection_prefers_first_on_tie() {
        let a = Rect::new(10, 0, 30, 30);
        let b = Rect::new(0, 10, 30, 30);
        assert_eq!(nearest_box(&[a, b], Rect::default()), Some(a));
    }

    #[test]
    fn test_ssd_preprocess_shape_and_mean() {
        let rgb = RgbImage::from_pixel(640, 480, image::Rgb([123, 177, 104]));
        let input = preprocess_ssd_input(&rgb);
        assert_eq!(input.shape(), &[1, 3, 300, 300]);
        // R=123, G=177, B=104 minus the BGR means leaves zeros everywhere.
        assert!(input.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    #[ignore] // Requires a downloaded model: cargo test -p rppg-face-detection -- --ignored
    fn test_cascade_detection_with_real_model() {
        let model_path = std::env::var("RPPG_CASCADE_MODEL")
            .unwrap_or_else(|_| "models/seeta_fd_frontal_v1.0.bin".to_string());
        if !std::path::Path::new(&model_path).exists() {
            println!("Model not found at {model_path}, skipping");
            return;
        }

        let config = FaceDetectionConfig {
            cascade_model_path: PathBuf::from(&model_path),
            dnn_model_path: PathBuf::from(&model_path),
            ..Default::default()
        };
        let mut detector = FaceDetector::new(&config).expect("failed to load model");

        let rgb = RgbImage::from_pixel(320, 240, image::Rgb([128, 128, 128]));
        let gray = rppg_common::prepare_gray(&rgb);
        let boxes = detector.detect(&rgb, &gray).expect("detection failed");
        // A flat frame must not hallucinate faces.
        assert!(boxes.is_empty());
    }
}
