//! Common types and utilities shared across the rPPG pipeline
//!
//! Integer rectangles and float points used by the detector, the tracker
//! and the engine, plus the monotonic clock seam and frame preparation
//! helpers for ingestion collaborators.

use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::time::Instant;

/// Axis-aligned integer rectangle in frame coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    #[must_use]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build a rectangle from two arbitrary corner points.
    #[must_use]
    pub fn from_points(a: Point, b: Point) -> Self {
        let x0 = a.x.min(b.x).round() as i32;
        let y0 = a.y.min(b.y).round() as i32;
        let x1 = a.x.max(b.x).round() as i32;
        let y1 = a.y.max(b.y).round() as i32;
        Self {
            x: x0,
            y: y0,
            width: x1 - x0,
            height: y1 - y0,
        }
    }

    /// Top-left corner.
    #[must_use]
    #[inline]
    pub fn tl(&self) -> Point {
        Point::new(self.x as f32, self.y as f32)
    }

    /// Bottom-right corner.
    #[must_use]
    #[inline]
    pub fn br(&self) -> Point {
        Point::new((self.x + self.width) as f32, (self.y + self.height) as f32)
    }

    #[must_use]
    #[inline]
    pub fn area(&self) -> i64 {
        self.width.max(0) as i64 * self.height.max(0) as i64
    }

    #[must_use]
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Intersect with the frame `[0, width) x [0, height)`.
    ///
    /// The result may be empty (zero width or height) when the rectangle
    /// lies entirely outside the frame.
    #[must_use]
    pub fn clamp_to(&self, frame_width: u32, frame_height: u32) -> Self {
        let x0 = self.x.clamp(0, frame_width as i32);
        let y0 = self.y.clamp(0, frame_height as i32);
        let x1 = (self.x + self.width).clamp(0, frame_width as i32);
        let y1 = (self.y + self.height).clamp(0, frame_height as i32);
        Self {
            x: x0,
            y: y0,
            width: (x1 - x0).max(0),
            height: (y1 - y0).max(0),
        }
    }

    /// Squared distance between the top-left corners of two rectangles.
    #[must_use]
    #[inline]
    pub fn tl_distance_sq(&self, other: &Rect) -> i64 {
        let dx = (self.x - other.x) as i64;
        let dy = (self.y - other.y) as i64;
        dx * dx + dy * dy
    }
}

/// 2-D point with float coordinates (sub-pixel feature positions).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    #[must_use]
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    #[inline]
    pub fn distance(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Monotonic millisecond time source.
///
/// Returns `None` when the tick count no longer fits the millisecond
/// representation; callers substitute a safe fallback and report the
/// condition through their info sink.
pub trait Clock {
    fn now_ms(&self) -> Option<i64>;
}

/// Wall clock backed by [`std::time::Instant`], starting at zero.
#[derive(Debug)]
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Option<i64> {
        i64::try_from(self.start.elapsed().as_millis()).ok()
    }
}

/// Scripted clock for offline replay and tests.
///
/// Every read returns the current value and then advances it by `step_ms`,
/// so one `process_frame` call observes one deterministic timestamp.
#[derive(Debug)]
pub struct ManualClock {
    current: Cell<i64>,
    step_ms: i64,
}

impl ManualClock {
    #[must_use]
    pub fn with_step(start_ms: i64, step_ms: i64) -> Self {
        Self {
            current: Cell::new(start_ms),
            step_ms,
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Option<i64> {
        let now = self.current.get();
        self.current.set(now.saturating_add(self.step_ms));
        Some(now)
    }
}

/// Convert an RGB frame to the histogram-equalized grayscale frame the
/// engine expects alongside it.
#[must_use]
pub fn prepare_gray(frame_rgb: &RgbImage) -> GrayImage {
    let gray = image::imageops::grayscale(frame_rgb);
    imageproc::contrast::equalize_histogram(&gray)
}
