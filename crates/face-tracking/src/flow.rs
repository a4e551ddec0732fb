//! Pyramidal Lucas-Kanade sparse optical flow

use image::GrayImage;
use rppg_common::Point;

use crate::TrackingConfig;

/// Grayscale image as f32 with bilinear sampling and border clamp.
pub(crate) struct FloatImage {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl FloatImage {
    fn from_gray(image: &GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width: width as usize,
            height: height as usize,
            data: image.as_raw().iter().map(|&p| f32::from(p)).collect(),
        }
    }

    /// Downsample by two with 2x2 averaging.
    fn half(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let x0 = (2 * x).min(self.width - 1);
                let x1 = (2 * x + 1).min(self.width - 1);
                let y0 = (2 * y).min(self.height - 1);
                let y1 = (2 * y + 1).min(self.height - 1);
                let sum = self.get(x0, y0) + self.get(x1, y0) + self.get(x0, y1) + self.get(x1, y1);
                data.push(sum * 0.25);
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    #[inline]
    fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear sample with coordinates clamped to the image.
    fn sample(&self, x: f32, y: f32) -> f32 {
        let x = x.clamp(0.0, (self.width - 1) as f32);
        let y = y.clamp(0.0, (self.height - 1) as f32);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x - x0 as f32;
        let fy = y - y0 as f32;
        let top = self.get(x0, y0) * (1.0 - fx) + self.get(x1, y0) * fx;
        let bottom = self.get(x0, y1) * (1.0 - fx) + self.get(x1, y1) * fx;
        top * (1.0 - fy) + bottom * fy
    }
}

/// Image pyramid, finest level first.
pub(crate) struct Pyramid {
    levels: Vec<FloatImage>,
}

impl Pyramid {
    pub(crate) fn build(image: &GrayImage, config: &TrackingConfig) -> Self {
        let window = 2 * config.window_radius + 3;
        let mut levels = vec![FloatImage::from_gray(image)];
        while levels.len() < config.pyramid_levels {
            let next = levels[levels.len() - 1].half();
            if next.width < window || next.height < window {
                break;
            }
            levels.push(next);
        }
        Self { levels }
    }
}

/// Track each point from `prev` into `next`; returns new positions and
/// per-point status flags (false when the local gradient structure is
/// unusable or the point leaves the frame).
pub(crate) fn lk_flow(
    prev: &Pyramid,
    next: &Pyramid,
    points: &[Point],
    config: &TrackingConfig,
) -> (Vec<Point>, Vec<bool>) {
    let mut tracked = Vec::with_capacity(points.len());
    let mut status = Vec::with_capacity(points.len());
    for point in points {
        let (q, ok) = track_point(prev, next, *point, config);
        tracked.push(q);
        status.push(ok);
    }
    (tracked, status)
}

fn track_point(prev: &Pyramid, next: &Pyramid, p: Point, config: &TrackingConfig) -> (Point, bool) {
    let levels = prev.levels.len().min(next.levels.len());
    let radius = config.window_radius as isize;
    let window_area = ((2 * radius + 1) * (2 * radius + 1)) as f64;

    let mut gx = 0.0f32;
    let mut gy = 0.0f32;
    let mut well_conditioned = false;

    let mut ix = vec![0.0f32; ((2 * radius + 1) * (2 * radius + 1)) as usize];
    let mut iy = vec![0.0f32; ix.len()];
    let mut iv = vec![0.0f32; ix.len()];

    for level in (0..levels).rev() {
        let scale = (1 << level) as f32;
        let px = p.x / scale;
        let py = p.y / scale;
        let prev_img = &prev.levels[level];
        let next_img = &next.levels[level];

        // Spatial gradient matrix over the window in the previous frame.
        let mut gxx = 0.0f64;
        let mut gxy = 0.0f64;
        let mut gyy = 0.0f64;
        let mut idx = 0;
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                let x = px + dx as f32;
                let y = py + dy as f32;
                let dix = (prev_img.sample(x + 1.0, y) - prev_img.sample(x - 1.0, y)) * 0.5;
                let diy = (prev_img.sample(x, y + 1.0) - prev_img.sample(x, y - 1.0)) * 0.5;
                ix[idx] = dix;
                iy[idx] = diy;
                iv[idx] = prev_img.sample(x, y);
                gxx += f64::from(dix) * f64::from(dix);
                gxy += f64::from(dix) * f64::from(diy);
                gyy += f64::from(diy) * f64::from(diy);
                idx += 1;
            }
        }

        let trace = gxx + gyy;
        let det = gxx * gyy - gxy * gxy;
        let min_eigen = (trace - (trace * trace - 4.0 * det).max(0.0).sqrt()) / 2.0;
        let usable = min_eigen / window_area > config.min_eigen_threshold;
        if level == 0 {
            well_conditioned = usable;
        }

        let mut dx_total = 0.0f32;
        let mut dy_total = 0.0f32;
        if usable {
            for _ in 0..config.max_iterations {
                let mut bx = 0.0f64;
                let mut by = 0.0f64;
                let mut idx = 0;
                for dy in -radius..=radius {
                    for dx in -radius..=radius {
                        let x = px + dx as f32;
                        let y = py + dy as f32;
                        let diff = iv[idx]
                            - next_img.sample(x + gx + dx_total, y + gy + dy_total);
                        bx += f64::from(diff) * f64::from(ix[idx]);
                        by += f64::from(diff) * f64::from(iy[idx]);
                        idx += 1;
                    }
                }
                let step_x = ((gyy * bx - gxy * by) / det) as f32;
                let step_y = ((gxx * by - gxy * bx) / det) as f32;
                dx_total += step_x;
                dy_total += step_y;
                if step_x * step_x + step_y * step_y < config.epsilon * config.epsilon {
                    break;
                }
            }
        }

        if level > 0 {
            gx = 2.0 * (gx + dx_total);
            gy = 2.0 * (gy + dy_total);
        } else {
            gx += dx_total;
            gy += dy_total;
        }
    }

    let tracked = Point::new(p.x + gx, p.y + gy);
    let width = next.levels[0].width as f32;
    let height = next.levels[0].height as f32;
    let in_bounds =
        tracked.x >= 0.0 && tracked.y >= 0.0 && tracked.x <= width - 1.0 && tracked.y <= height - 1.0;
    (tracked, well_conditioned && in_bounds)
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
    fn test_flow_recovers_translation() {
        let config = TrackingConfig::default();
        let a = checkerboard(160, 160, 16, 0, 0);
        let b = checkerboard(160, 160, 16, 3, 2);
        let prev = Pyramid::build(&a, &config);
        let next = Pyramid::build(&b, &config);

        let points = vec![Point::new(48.0, 48.0), Point::new(80.0, 64.0)];
        let (tracked, status) = lk_flow(&prev, &next, &points, &config);
        for (i, point) in points.iter().enumerate() {
            assert!(status[i], "point {i} lost");
            assert!((tracked[i].x - (point.x + 3.0)).abs() < 0.5, "x: {}", tracked[i].x);
            assert!((tracked[i].y - (point.y + 2.0)).abs() < 0.5, "y: {}", tracked[i].y);
        }
    }

    #[test]
    fn test_flow_static_scene_is_identity() {
        let config = TrackingConfig::default();
        let a = checkerboard(128, 128, 16, 0, 0);
        let prev = Pyramid::build(&a, &config);
        let next = Pyramid::build(&a, &config);

        let points = vec![Point::new(64.0, 64.0)];
        let (tracked, status) = lk_flow(&prev, &next, &points, &config);
        assert!(status[0]);
        assert!(tracked[0].distance(&points[0]) < 0.1);
    }

    #[test]
    fn test_flow_rejects_flat_region() {
        let config = TrackingConfig::default();
        let flat = GrayImage::from_pixel(128, 128, image::Luma([100u8]));
        let prev = Pyramid::build(&flat, &config);
        let next = Pyramid::build(&flat, &config);

        let (_, status) = lk_flow(&prev, &next, &[Point::new(64.0, 64.0)], &config);
        assert!(!status[0], "flat region must fail the eigenvalue check");
    }

    #[test]
    fn test_pyramid_respects_window_size() {
        let config = TrackingConfig::default();
        let small = GrayImage::from_pixel(40, 40, image::Luma([0u8]));
        let pyramid = Pyramid::build(&small, &config);
        // 40 / 2 = 20 is smaller than the 23-pixel window, so only the
        // base level survives.
        assert_eq!(pyramid.levels.len(), 1);
    }
}
