//! Frame annotation: face box, ROI, tracked corners and the pulse trace

use image::{Rgb, RgbImage};
use imageproc::drawing::{
    draw_cross_mut, draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut,
};
use ndarray::Array1;
use rppg_common::{Point, Rect};

const BOX_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const ROI_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const CORNER_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const TRACE_COLOR: Rgb<u8> = Rgb([255, 0, 100]);
const TRACE_BACKDROP: Rgb<u8> = Rgb([32, 32, 32]);
const TRACE_MIDLINE: Rgb<u8> = Rgb([0, 128, 0]);

/// Render a copy of the frame with the tracking overlay and the filtered
/// pulse trace above the face box.
#[must_use]
pub fn annotate(
    frame: &RgbImage,
    face_box: Rect,
    roi: Rect,
    corners: &[Point],
    pulse: &Array1<f64>,
) -> RgbImage {
    let mut canvas = frame.clone();
    let (width, height) = canvas.dimensions();

    draw_rect(&mut canvas, face_box.clamp_to(width, height), BOX_COLOR);
    draw_rect(&mut canvas, roi.clamp_to(width, height), ROI_COLOR);

    for corner in corners {
        let x = corner.x.round() as i32;
        let y = corner.y.round() as i32;
        if x > 2 && y > 2 && (x as u32) < width - 2 && (y as u32) < height - 2 {
            draw_cross_mut(&mut canvas, CORNER_COLOR, x, y);
        }
    }

    draw_pulse_trace(&mut canvas, face_box, pulse);
    canvas
}

fn draw_rect(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    if rect.width > 0 && rect.height > 0 {
        let r = imageproc::rect::Rect::at(rect.x, rect.y)
            .of_size(rect.width as u32, rect.height as u32);
        draw_hollow_rect_mut(canvas, r, color);
    }
}

/// Pulse trace in a backdrop strip above the face box, with a midline.
fn draw_pulse_trace(canvas: &mut RgbImage, face_box: Rect, pulse: &Array1<f64>) {
    if pulse.len() < 2 {
        return;
    }
    let (width, height) = canvas.dimensions();

    let area = Rect::new(
        face_box.x + face_box.width / 10,
        face_box.y - face_box.height / 2 - 10,
        face_box.width * 8 / 10,
        face_box.height / 2,
    )
    .clamp_to(width, height);
    if area.width < 4 || area.height < 4 {
        return;
    }

    let vmin = pulse.iter().copied().fold(f64::INFINITY, f64::min);
    let vmax = pulse.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(vmax > vmin) {
        return;
    }

    draw_filled_rect_mut(
        canvas,
        imageproc::rect::Rect::at(area.x, area.y).of_size(area.width as u32, area.height as u32),
        TRACE_BACKDROP,
    );
    let mid_y = (area.y + area.height / 2) as f32;
    draw_line_segment_mut(
        canvas,
        (area.x as f32, mid_y),
        ((area.x + area.width) as f32, mid_y),
        TRACE_MIDLINE,
    );

    let height_scale = area.height as f64 / (vmax - vmin);
    let width_scale = area.width as f64 / (pulse.len() - 1) as f64;
    let mut previous = (
        area.x as f32,
        (area.y as f64 + (vmax - pulse[0]) * height_scale) as f32,
    );
    for (i, value) in pulse.iter().enumerate().skip(1) {
        let current = (
            (area.x as f64 + i as f64 * width_scale) as f32,
            (area.y as f64 + (vmax - value) * height_scale) as f32,
        );
        draw_line_segment_mut(canvas, previous, current, TRACE_COLOR);
        previous = current;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_leaves_input_untouched() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([50, 50, 50]));
        let pulse = Array1::from_iter((0..100).map(|i| (i as f64 * 0.3).sin()));
        let out = annotate(
            &frame,
            Rect::new(100, 120, 80, 80),
            Rect::new(124, 128, 32, 12),
            &[Point::new(130.0, 150.0)],
            &pulse,
        );
        assert_eq!(out.dimensions(), frame.dimensions());
        // The source frame is untouched, the overlay differs.
        assert_eq!(frame.get_pixel(0, 0), &Rgb([50, 50, 50]));
        assert_ne!(out.get_pixel(100, 120), &Rgb([50, 50, 50]));
    }

    #[test]
    fn test_annotate_handles_degenerate_geometry() {
        let frame = RgbImage::from_pixel(64, 64, Rgb([0, 0, 0]));
        let out = annotate(
            &frame,
            Rect::new(-10, -10, 5, 5),
            Rect::default(),
            &[],
            &Array1::zeros(0),
        );
        assert_eq!(out.dimensions(), (64, 64));
    }

    #[test]
    fn test_trace_backdrop_is_painted() {
        let frame = RgbImage::from_pixel(320, 240, Rgb([200, 200, 200]));
        let pulse = Array1::from_iter((0..60).map(|i| (i as f64 * 0.5).sin()));
        let face_box = Rect::new(100, 120, 100, 100);
        let out = annotate(&frame, face_box, Rect::default(), &[], &pulse);
        // Middle of the expected trace strip above the box.
        let probe = out.get_pixel(150, 90);
        assert_ne!(probe, &Rgb([200, 200, 200]));
    }
}
