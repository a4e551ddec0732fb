//! Shi-Tomasi corner seeding inside the trapezoidal forehead mask

use image::{GrayImage, Luma};
use imageproc::drawing::draw_polygon_mut;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use rppg_common::{Point, Rect};
use tracing::debug;

use crate::TrackingConfig;

/// Trapezoid vertices of the feature-tracking region, relative to the
/// face box: a band across the upper face, narrowing toward the cheeks.
pub(crate) fn tracking_region(face_box: Rect) -> [Point; 4] {
    let x = face_box.x as f32;
    let y = face_box.y as f32;
    let w = face_box.width as f32;
    let h = face_box.height as f32;
    [
        Point::new(x + 0.22 * w, y + 0.21 * h),
        Point::new(x + 0.78 * w, y + 0.21 * h),
        Point::new(x + 0.70 * w, y + 0.65 * h),
        Point::new(x + 0.30 * w, y + 0.65 * h),
    ]
}

/// Detect up to `max_corners` Shi-Tomasi corners inside the trapezoidal
/// mask derived from the face box.
///
/// Min-eigenvalue response over a `block_size` window, thresholded at
/// `quality_level` of the strongest response, 3x3 local maxima only,
/// then greedy acceptance at `min_distance` spacing, strongest first.
pub(crate) fn detect_corners(
    gray: &GrayImage,
    face_box: Rect,
    config: &TrackingConfig,
) -> Vec<Point> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 || face_box.is_empty() {
        return Vec::new();
    }

    let polygon = tracking_region(face_box);
    let mut mask = GrayImage::new(width, height);
    let vertices: Vec<imageproc::point::Point<i32>> = polygon
        .iter()
        .map(|p| imageproc::point::Point::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    if vertices[0] == vertices[3] || vertices[1] == vertices[2] {
        return Vec::new();
    }
    draw_polygon_mut(&mut mask, &vertices, Luma([255u8]));

    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);

    // Region of interest: polygon bounding box clamped inside the frame
    // with a one-pixel border for the response window.
    let radius = (config.block_size / 2).max(1) as i32;
    let min_x = polygon.iter().fold(f32::MAX, |m, p| m.min(p.x)).floor() as i32;
    let max_x = polygon.iter().fold(f32::MIN, |m, p| m.max(p.x)).ceil() as i32;
    let min_y = polygon.iter().fold(f32::MAX, |m, p| m.min(p.y)).floor() as i32;
    let max_y = polygon.iter().fold(f32::MIN, |m, p| m.max(p.y)).ceil() as i32;
    let x0 = min_x.max(radius);
    let x1 = max_x.min(width as i32 - 1 - radius);
    let y0 = min_y.max(radius);
    let y1 = max_y.min(height as i32 - 1 - radius);
    if x1 <= x0 || y1 <= y0 {
        return Vec::new();
    }

    let region_w = (x1 - x0 + 1) as usize;
    let region_h = (y1 - y0 + 1) as usize;
    let mut response = vec![0.0f64; region_w * region_h];
    let mut max_response = 0.0f64;

    for y in y0..=y1 {
        for x in x0..=x1 {
            if mask.get_pixel(x as u32, y as u32)[0] == 0 {
                continue;
            }
            let mut sxx = 0.0f64;
            let mut sxy = 0.0f64;
            let mut syy = 0.0f64;
            for dy in -radius..=radius {
                for dx in -radius..=radius {
                    let px = (x + dx) as u32;
                    let py = (y + dy) as u32;
                    let ix = f64::from(gx.get_pixel(px, py)[0]);
                    let iy = f64::from(gy.get_pixel(px, py)[0]);
                    sxx += ix * ix;
                    sxy += ix * iy;
                    syy += iy * iy;
                }
            }
            let trace = sxx + syy;
            let det = sxx * syy - sxy * sxy;
            let min_eigen = (trace - (trace * trace - 4.0 * det).max(0.0).sqrt()) / 2.0;
            response[(y - y0) as usize * region_w + (x - x0) as usize] = min_eigen;
            max_response = max_response.max(min_eigen);
        }
    }

    if max_response <= 0.0 {
        return Vec::new();
    }
    let threshold = config.quality_level * max_response;

    // 3x3 local maxima above the quality threshold.
    let mut candidates: Vec<(f64, i32, i32)> = Vec::new();
    for ry in 0..region_h as i32 {
        for rx in 0..region_w as i32 {
            let r = response[ry as usize * region_w + rx as usize];
            if r < threshold || r <= 0.0 {
                continue;
            }
            let mut is_max = true;
            'nms: for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = rx + dx;
                    let ny = ry + dy;
                    if nx < 0 || ny < 0 || nx >= region_w as i32 || ny >= region_h as i32 {
                        continue;
                    }
                    if response[ny as usize * region_w + nx as usize] > r {
                        is_max = false;
                        break 'nms;
                    }
                }
            }
            if is_max {
                candidates.push((r, x0 + rx, y0 + ry));
            }
        }
    }

    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut corners: Vec<Point> = Vec::with_capacity(config.max_corners);
    for (_, x, y) in candidates {
        let candidate = Point::new(x as f32, y as f32);
        let far_enough = corners
            .iter()
            .all(|c| c.distance(&candidate) >= config.min_distance);
        if far_enough {
            corners.push(candidate);
            if corners.len() >= config.max_corners {
                break;
            }
        }
    }

    debug!(count = corners.len(), "seeded corners");
    corners
}
