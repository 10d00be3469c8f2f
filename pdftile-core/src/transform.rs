//! Document-to-device transform composition.
//!
//! Every transform is built in the same order: move the page's top-left
//! corner to the origin, scale by the resolution-derived zoom with a vertical
//! flip, rotate by the page rotation, re-anchor the rotated raster at (0, 0)
//! and finally, for fitted transforms, stretch to the requested device size.
//! Rendering, text extraction and link hit testing all go through
//! [`PageTransform`], so glyph boxes and link taps line up with pixels.

use serde::{Deserialize, Serialize};

use crate::error::GeometryError;
use crate::geometry::{IRect, Matrix, Point, Rect};

pub const POINTS_PER_INCH: f32 = 72.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Zero,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    /// Normalizes any page rotation value, snapping to the nearest quarter turn.
    pub fn from_degrees(degrees: i32) -> Self {
        let quarter_turns = (degrees as f32 / 90.0).round() as i32;
        match quarter_turns.rem_euclid(4) {
            1 => Rotation::Quarter,
            2 => Rotation::Half,
            3 => Rotation::ThreeQuarter,
            _ => Rotation::Zero,
        }
    }

    pub fn degrees(self) -> i32 {
        match self {
            Rotation::Zero => 0,
            Rotation::Quarter => 90,
            Rotation::Half => 180,
            Rotation::ThreeQuarter => 270,
        }
    }
}

/// Native bounds and rotation of one page.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub bounds: Rect,
    pub rotation: Rotation,
}

impl PageGeometry {
    pub fn new(bounds: Rect, rotation: Rotation) -> Self {
        let bounds = Rect::new(
            bounds.x0.min(bounds.x1),
            bounds.y0.min(bounds.y1),
            bounds.x0.max(bounds.x1),
            bounds.y0.max(bounds.y1),
        );
        Self { bounds, rotation }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Whole-pixel logical size, never below 1x1.
    pub fn to_pixels(self) -> (i32, i32) {
        (
            (self.width.round() as i32).max(1),
            (self.height.round() as i32).max(1),
        )
    }
}

pub fn zoom_for_resolution(resolution: f32) -> Result<f32, GeometryError> {
    if !(resolution.is_finite() && resolution > 0.0) {
        return Err(GeometryError::InvalidResolution(resolution));
    }
    Ok(resolution / POINTS_PER_INCH)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    pub ctm: Matrix,
    pub bbox: IRect,
}

impl PageTransform {
    /// Transform at the resolution-derived zoom only. The resulting raster
    /// always starts at (0, 0) and is at least 1x1.
    pub fn natural(geometry: &PageGeometry, resolution: f32) -> Result<Self, GeometryError> {
        let zoom = zoom_for_resolution(resolution)?;
        let media = geometry.bounds;
        let ctm = Matrix::translate(-media.x0, -media.y1)
            .post_scale(zoom, -zoom)
            .post_rotate(geometry.rotation.degrees() as f32);
        let raw = ctm.transform_rect(&media).round();
        let ctm = ctm.post_translate(-raw.x0 as f32, -raw.y0 as f32);
        let bbox = IRect::new(0, 0, raw.width().max(1), raw.height().max(1));
        Ok(Self { ctm, bbox })
    }

    /// Natural transform stretched so the page raster measures
    /// `width` x `height` device pixels.
    pub fn fitted(
        geometry: &PageGeometry,
        resolution: f32,
        width: i32,
        height: i32,
    ) -> Result<Self, GeometryError> {
        if width <= 0 || height <= 0 {
            return Err(GeometryError::EmptyTarget { width, height });
        }
        let natural = Self::natural(geometry, resolution)?;
        let xscale = width as f32 / natural.bbox.width() as f32;
        let yscale = height as f32 / natural.bbox.height() as f32;
        let ctm = natural.ctm.post_scale(xscale, yscale);
        let bbox = ctm.transform_rect(&geometry.bounds).round();
        Ok(Self { ctm, bbox })
    }

    pub fn size(&self) -> PageSize {
        PageSize::new(self.bbox.width() as f32, self.bbox.height() as f32)
    }

    pub fn inverse(&self) -> Result<Matrix, GeometryError> {
        self.ctm.invert().ok_or(GeometryError::Singular)
    }

    pub fn device_to_page(&self, point: Point) -> Result<Point, GeometryError> {
        Ok(self.inverse()?.transform_point(point))
    }

    pub fn page_to_device(&self, point: Point) -> Point {
        self.ctm.transform_point(point)
    }
}
