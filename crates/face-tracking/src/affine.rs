//! Rigid (rotation + translation) transform estimation from point pairs

use rppg_common::{Point, Rect};

/// 2-D rigid transform: rotation followed by translation, no scale.
#[derive(Debug, Clone, Copy)]
pub struct RigidTransform {
    pub cos: f32,
    pub sin: f32,
    pub tx: f32,
    pub ty: f32,
}

impl RigidTransform {
    #[must_use]
    #[inline]
    pub fn apply(&self, p: Point) -> Point {
        Point::new(
            self.cos * p.x - self.sin * p.y + self.tx,
            self.sin * p.x + self.cos * p.y + self.ty,
        )
    }

    /// Warp a rectangle by transforming its two defining corners.
    #[must_use]
    pub fn apply_rect(&self, rect: Rect) -> Rect {
        Rect::from_points(self.apply(rect.tl()), self.apply(rect.br()))
    }
}

/// Least-squares rigid transform mapping `from` onto `to`.
///
/// Closed form: rotation from the cross/dot sums of the demeaned pairs,
/// translation from the centroids. Returns `None` when the point sets
/// are too small or collapse to a single location.
#[must_use]
pub fn estimate_rigid(from: &[Point], to: &[Point]) -> Option<RigidTransform> {
    let n = from.len().min(to.len());
    if n < 2 {
        return None;
    }

    let inv = 1.0 / n as f32;
    let c0 = from.iter().take(n).fold(Point::default(), |acc, p| {
        Point::new(acc.x + p.x * inv, acc.y + p.y * inv)
    });
    let c1 = to.iter().take(n).fold(Point::default(), |acc, p| {
        Point::new(acc.x + p.x * inv, acc.y + p.y * inv)
    });

    let mut dot = 0.0f64;
    let mut cross = 0.0f64;
    for i in 0..n {
        let a = Point::new(from[i].x - c0.x, from[i].y - c0.y);
        let b = Point::new(to[i].x - c1.x, to[i].y - c1.y);
        dot += f64::from(a.x * b.x + a.y * b.y);
        cross += f64::from(a.x * b.y - a.y * b.x);
    }

    let norm = (dot * dot + cross * cross).sqrt();
    if norm < 1e-9 {
        return None;
    }
    let cos = (dot / norm) as f32;
    let sin = (cross / norm) as f32;

    Some(RigidTransform {
        cos,
        sin,
        tx: c1.x - (cos * c0.x - sin * c0.y),
        ty: c1.y - (sin * c0.x + cos * c0.y),
    })
}
