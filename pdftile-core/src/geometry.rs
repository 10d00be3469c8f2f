use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Floating point rectangle, `x0 <= x1` and `y0 <= y1` when non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    pub const fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        !(self.x0 < self.x1 && self.y0 < self.y1)
    }

    /// Hit test with all four edges included.
    pub fn contains_inclusive(&self, point: Point) -> bool {
        point.x >= self.x0 && point.x <= self.x1 && point.y >= self.y0 && point.y <= self.y1
    }

    pub fn intersect(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    pub fn center(&self) -> Point {
        Point::new((self.x0 + self.x1) * 0.5, (self.y0 + self.y1) * 0.5)
    }

    /// Snap outwards to whole device pixels. The 0.001 slack keeps values
    /// that are integral up to float noise from growing by a pixel.
    pub fn round(&self) -> IRect {
        IRect {
            x0: (self.x0 + 0.001).floor() as i32,
            y0: (self.y0 + 0.001).floor() as i32,
            x1: (self.x1 - 0.001).ceil() as i32,
            y1: (self.y1 - 0.001).ceil() as i32,
        }
    }

    pub fn from_points<I: IntoIterator<Item = Point>>(points: I) -> Rect {
        let mut iter = points.into_iter();
        let Some(first) = iter.next() else {
            return Rect::default();
        };
        iter.fold(
            Rect::new(first.x, first.y, first.x, first.y),
            |acc, p| Rect {
                x0: acc.x0.min(p.x),
                y0: acc.y0.min(p.y),
                x1: acc.x1.max(p.x),
                y1: acc.y1.max(p.y),
            },
        )
    }
}

/// Integer device rectangle. Used both for a full page raster and for a tile
/// inside that raster; both share one coordinate space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IRect {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl IRect {
    pub const fn new(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    pub const fn from_origin_size(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x0: x,
            y0: y,
            x1: x + width,
            y1: y + height,
        }
    }

    /// Like [`IRect::from_origin_size`], but `None` when a far edge overflows.
    pub fn checked_from_origin_size(x: i32, y: i32, width: i32, height: i32) -> Option<Self> {
        Some(Self {
            x0: x,
            y0: y,
            x1: x.checked_add(width)?,
            y1: y.checked_add(height)?,
        })
    }

    pub fn width(&self) -> i32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> i32 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        self.x0 >= self.x1 || self.y0 >= self.y1
    }

    /// Pixel count, zero for empty or inverted rectangles.
    pub fn area(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            self.width() as usize * self.height() as usize
        }
    }

    pub fn intersect(&self, other: &IRect) -> IRect {
        IRect {
            x0: self.x0.max(other.x0),
            y0: self.y0.max(other.y0),
            x1: self.x1.min(other.x1),
            y1: self.y1.min(other.y1),
        }
    }

    pub fn translate(&self, dx: i32, dy: i32) -> IRect {
        IRect {
            x0: self.x0 + dx,
            y0: self.y0 + dy,
            x1: self.x1 + dx,
            y1: self.y1 + dy,
        }
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x0 && x < self.x1 && y >= self.y0 && y < self.y1
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(
            self.x0 as f32,
            self.y0 as f32,
            self.x1 as f32,
            self.y1 as f32,
        )
    }
}

/// 2D affine transform. Maps `(x, y)` to `(a*x + c*y + e, b*x + d*y + f)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        e: 0.0,
        f: 0.0,
    };

    pub const fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub const fn translate(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub const fn scale(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    /// Rotation by `degrees`. Quarter turns are exact so that page transforms
    /// never pick up sin/cos residue.
    pub fn rotate(degrees: f32) -> Self {
        let theta = degrees.rem_euclid(360.0);
        let (s, c) = if theta.abs() < f32::EPSILON {
            (0.0, 1.0)
        } else if (theta - 90.0).abs() < f32::EPSILON {
            (1.0, 0.0)
        } else if (theta - 180.0).abs() < f32::EPSILON {
            (0.0, -1.0)
        } else if (theta - 270.0).abs() < f32::EPSILON {
            (-1.0, 0.0)
        } else {
            theta.to_radians().sin_cos()
        };
        Self::new(c, s, -s, c, 0.0, 0.0)
    }

    /// Composition that applies `self` first, then `next`.
    pub fn concat(&self, next: &Matrix) -> Matrix {
        Matrix {
            a: self.a * next.a + self.b * next.c,
            b: self.a * next.b + self.b * next.d,
            c: self.c * next.a + self.d * next.c,
            d: self.c * next.b + self.d * next.d,
            e: self.e * next.a + self.f * next.c + next.e,
            f: self.e * next.b + self.f * next.d + next.f,
        }
    }

    pub fn post_translate(&self, tx: f32, ty: f32) -> Matrix {
        self.concat(&Matrix::translate(tx, ty))
    }

    pub fn post_scale(&self, sx: f32, sy: f32) -> Matrix {
        self.concat(&Matrix::scale(sx, sy))
    }

    pub fn post_rotate(&self, degrees: f32) -> Matrix {
        self.concat(&Matrix::rotate(degrees))
    }

    pub fn determinant(&self) -> f32 {
        self.a * self.d - self.b * self.c
    }

    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if !det.is_finite() || det.abs() < f32::EPSILON * f32::EPSILON {
            return None;
        }
        let rdet = 1.0 / det;
        let a = self.d * rdet;
        let b = -self.b * rdet;
        let c = -self.c * rdet;
        let d = self.a * rdet;
        Some(Matrix {
            a,
            b,
            c,
            d,
            e: -self.e * a - self.f * c,
            f: -self.e * b - self.f * d,
        })
    }

    pub fn transform_point(&self, p: Point) -> Point {
        Point {
            x: p.x * self.a + p.y * self.c + self.e,
            y: p.x * self.b + p.y * self.d + self.f,
        }
    }

    pub fn transform_vector(&self, p: Point) -> Point {
        Point {
            x: p.x * self.a + p.y * self.c,
            y: p.x * self.b + p.y * self.d,
        }
    }

    /// Bounding box of the four transformed corners.
    pub fn transform_rect(&self, r: &Rect) -> Rect {
        if r.is_empty() {
            let p = self.transform_point(Point::new(r.x0, r.y0));
            return Rect::new(p.x, p.y, p.x, p.y);
        }
        Rect::from_points([
            self.transform_point(Point::new(r.x0, r.y0)),
            self.transform_point(Point::new(r.x1, r.y0)),
            self.transform_point(Point::new(r.x0, r.y1)),
            self.transform_point(Point::new(r.x1, r.y1)),
        ])
    }
}
