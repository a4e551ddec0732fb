//! Face tracking for the rPPG engine
//!
//! Keeps a face box and its forehead ROI locked between detector runs:
//! Shi-Tomasi corners are seeded inside a trapezoidal mask over the face,
//! tracked frame-to-frame with pyramidal Lucas-Kanade optical flow, and
//! validated with a forward-backward consistency check. The surviving
//! matches drive a rigid affine estimate that warps both rectangles.
//!
//! # Example
//! ```no_run
//! use rppg_face_tracking::{FaceTracker, TrackingConfig};
//! use rppg_common::Rect;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut tracker = FaceTracker::new(TrackingConfig::default());
//! # let (last_gray, gray) = (image::GrayImage::new(64, 64), image::GrayImage::new(64, 64));
//! let face_box = Rect::new(100, 80, 200, 200);
//! tracker.seed_corners(&gray, face_box);
//! // On the next frame:
//! let pose = tracker.track(&last_gray, &gray, face_box, Rect::new(160, 100, 80, 30))?;
//! println!("box moved to {:?}", pose.face_box);
//! # Ok(())
//! # }
//! ```

mod affine;
mod corners;
mod flow;

pub use affine::{estimate_rigid, RigidTransform};

use image::GrayImage;
use rppg_common::{Point, Rect};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Tracking errors; every variant means the face must be re-acquired.
#[derive(Debug, Error)]
pub enum TrackingError {
    #[error("Tracking failed: only {kept} corners survived the consistency check")]
    CornersLost { kept: usize },

    #[error("Degenerate rigid transform estimate")]
    DegenerateTransform,
}

/// Tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Maximum number of corners to seed (default: 12)
    pub max_corners: usize,
    /// Below this many corners the tracker re-seeds, and below it after
    /// filtering the face is lost (default: 3)
    pub min_corners: usize,
    /// Corner quality as a fraction of the strongest response (default: 0.01)
    pub quality_level: f64,
    /// Minimum spacing between seeded corners in pixels (default: 20)
    pub min_distance: f32,
    /// Structure-tensor window side for corner seeding (default: 3)
    pub block_size: usize,
    /// Optical-flow pyramid levels (default: 3)
    pub pyramid_levels: usize,
    /// Half-width of the flow window (default: 10, i.e. 21x21)
    pub window_radius: usize,
    /// Iteration cap per pyramid level (default: 30)
    pub max_iterations: usize,
    /// Convergence threshold on the per-iteration update (default: 0.01)
    pub epsilon: f32,
    /// Forward-backward round-trip tolerance in pixels (default: 2.0)
    pub forward_backward_threshold: f32,
    /// Minimum normalized eigenvalue of the gradient matrix (default: 1e-3)
    pub min_eigen_threshold: f64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            max_corners: 12,
            min_corners: 3,
            quality_level: 0.01,
            min_distance: 20.0,
            block_size: 3,
            pyramid_levels: 3,
            window_radius: 10,
            max_iterations: 30,
            epsilon: 0.01,
            forward_backward_threshold: 2.0,
            min_eigen_threshold: 1e-3,
        }
    }
}

/// Updated face box and ROI after a successful tracking step.
#[derive(Debug, Clone, Copy)]
pub struct TrackedPose {
    pub face_box: Rect,
    pub roi: Rect,
}

/// Sparse feature tracker over the forehead region.
pub struct FaceTracker {
    config: TrackingConfig,
    corners: Vec<Point>,
}

impl FaceTracker {
    #[must_use]
    pub fn new(config: TrackingConfig) -> Self {
        Self {
            config,
            corners: Vec::new(),
        }
    }

    /// Currently tracked corner positions.
    #[must_use]
    pub fn corners(&self) -> &[Point] {
        &self.corners
    }

    /// Drop all tracked state (frame geometry changed or face lost).
    pub fn reset(&mut self) {
        self.corners.clear();
    }

    /// Seed fresh corners inside the trapezoidal mask over `face_box`.
    pub fn seed_corners(&mut self, gray: &GrayImage, face_box: Rect) {
        self.corners = corners::detect_corners(gray, face_box, &self.config);
    }

    /// Advance the face box and ROI by one frame.
    ///
    /// Re-seeds if too few corners remain, runs forward and backward
    /// Lucas-Kanade flow, keeps round-trip-consistent corners, and warps
    /// both rectangles by the estimated rigid transform.
    pub fn track(
        &mut self,
        last_gray: &GrayImage,
        gray: &GrayImage,
        face_box: Rect,
        roi: Rect,
    ) -> Result<TrackedPose, TrackingError> {
        if self.corners.len() < self.config.min_corners {
            self.seed_corners(gray, face_box);
        }
        if self.corners.is_empty() {
            return Err(TrackingError::CornersLost { kept: 0 });
        }

        let prev_pyramid = flow::Pyramid::build(last_gray, &self.config);
        let next_pyramid = flow::Pyramid::build(gray, &self.config);

        let (forward, forward_status) =
            flow::lk_flow(&prev_pyramid, &next_pyramid, &self.corners, &self.config);
        let (backward, backward_status) =
            flow::lk_flow(&next_pyramid, &prev_pyramid, &forward, &self.config);

        let mut kept_prev = Vec::with_capacity(self.corners.len());
        let mut kept_next = Vec::with_capacity(self.corners.len());
        for i in 0..self.corners.len() {
            let round_trip = self.corners[i].distance(&backward[i]);
            if forward_status[i]
                && backward_status[i]
                && round_trip < self.config.forward_backward_threshold
            {
                kept_prev.push(self.corners[i]);
                kept_next.push(forward[i]);
            } else {
                debug!(corner = i, round_trip, "corner rejected");
            }
        }

        if kept_next.len() < self.config.min_corners {
            let kept = kept_next.len();
            self.corners = kept_next;
            return Err(TrackingError::CornersLost { kept });
        }

        self.corners = kept_next.clone();

        let transform =
            estimate_rigid(&kept_prev, &kept_next).ok_or(TrackingError::DegenerateTransform)?;

        Ok(TrackedPose {
            face_box: transform.apply_rect(face_box),
            roi: transform.apply_rect(roi),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkerboard(width: u32, height: u32, cell: u32, shift_x: i32, shift_y: i32) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let gx = (x as i32 - shift_x).div_euclid(cell as i32);
            let gy = (y as i32 - shift_y).div_euclid(cell as i32);
            if (gx + gy).rem_euclid(2) == 0 {
                image::Luma([200u8])
            } else {
                image::Luma([30u8])
            }
        })
    }

    #[test]
    fn test_track_static_scene() {
        let gray = checkerboard(200, 200, 16, 0, 0);
        let mut tracker = FaceTracker::new(TrackingConfig::default());
        let face_box = Rect::new(30, 30, 140, 140);
        let roi = Rect::new(72, 44, 56, 21);

        tracker.seed_corners(&gray, face_box);
        assert!(tracker.corners().len() >= 3);

        let pose = tracker.track(&gray, &gray, face_box, roi).unwrap();
        assert_eq!(pose.face_box, face_box);
        assert_eq!(pose.roi, roi);
    }

    #[test]
    fn test_track_translation_moves_boxes() {
        let a = checkerboard(200, 200, 16, 0, 0);
        let b = checkerboard(200, 200, 16, 4, 3);
        let mut tracker = FaceTracker::new(TrackingConfig::default());
        let face_box = Rect::new(30, 30, 140, 140);
        let roi = Rect::new(72, 44, 56, 21);

        tracker.seed_corners(&a, face_box);
        let pose = tracker.track(&a, &b, face_box, roi).unwrap();

        assert!((pose.face_box.x - (face_box.x + 4)).abs() <= 1);
        assert!((pose.face_box.y - (face_box.y + 3)).abs() <= 1);
        assert!((pose.face_box.width - face_box.width).abs() <= 1);
        assert!((pose.roi.x - (roi.x + 4)).abs() <= 1);
    }

    #[test]
    fn test_track_fails_on_flat_frame() {
        let a = checkerboard(200, 200, 16, 0, 0);
        let flat = GrayImage::from_pixel(200, 200, image::Luma([128u8]));
        let mut tracker = FaceTracker::new(TrackingConfig::default());
        let face_box = Rect::new(30, 30, 140, 140);

        tracker.seed_corners(&a, face_box);
        assert!(tracker.corners().len() >= 3);

        let result = tracker.track(&a, &flat, face_box, Rect::new(72, 44, 56, 21));
        assert!(matches!(result, Err(TrackingError::CornersLost { .. })));
    }

    #[test]
    fn test_track_reseeds_when_corners_missing() {
        let gray = checkerboard(200, 200, 16, 0, 0);
        let mut tracker = FaceTracker::new(TrackingConfig::default());
        let face_box = Rect::new(30, 30, 140, 140);

        // No explicit seeding: track() must re-seed on its own.
        let pose = tracker.track(&gray, &gray, face_box, Rect::new(72, 44, 56, 21));
        assert!(pose.is_ok());
        assert!(tracker.corners().len() >= 3);
    }

    #[test]
    fn test_track_without_texture_reports_zero_corners() {
        let flat = GrayImage::from_pixel(200, 200, image::Luma([128u8]));
        let mut tracker = FaceTracker::new(TrackingConfig::default());
        let result = tracker.track(&flat, &flat, Rect::new(30, 30, 140, 140), Rect::default());
        assert!(matches!(result, Err(TrackingError::CornersLost { kept: 0 })));
    }
}
