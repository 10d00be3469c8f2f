//! Fitting a (possibly cropped) page onto a viewer screen.

use serde::{Deserialize, Serialize};

use crate::geometry::{IRect, Point};
use crate::session::TileRequest;
use crate::transform::PageSize;

/// Visible part of a page, in natural raster pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CropBox {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl CropBox {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left: left.min(right),
            top: top.min(bottom),
            right: left.max(right),
            bottom: top.max(bottom),
        }
    }

    /// The whole natural raster.
    pub fn full(natural: PageSize) -> Self {
        Self::new(0, 0, natural.width as i32, natural.height as i32)
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PageLayout {
    pub scale: f32,
    pub border: i32,
    logical: (i32, i32),
    tile: IRect,
}

impl PageLayout {
    /// Scales the crop box onto a `screen` inset by `border` on every side.
    ///
    /// Landscape screens fit the crop width; portrait screens fit whichever
    /// side keeps the whole crop visible. Returns `None` when either the crop
    /// or the inset screen is empty.
    pub fn fit(
        natural: PageSize,
        crop: Option<CropBox>,
        screen: (i32, i32),
        border: i32,
    ) -> Option<Self> {
        let page_width = natural.width as i32;
        let page_height = natural.height as i32;
        let crop = crop.unwrap_or(CropBox::full(natural));
        let inner_width = screen.0 - border * 2;
        let inner_height = screen.1 - border * 2;
        if crop.width() <= 0 || crop.height() <= 0 || inner_width <= 0 || inner_height <= 0 {
            return None;
        }

        let scale_x = inner_width as f32 / crop.width() as f32;
        let scale_y = inner_height as f32 / crop.height() as f32;
        let scale = if inner_width < inner_height {
            scale_x.min(scale_y)
        } else {
            scale_x
        };

        let scaled = |value: i32| (value as f32 * scale).round() as i32;
        let logical = (scaled(page_width).max(1), scaled(page_height).max(1));
        let tile = IRect::from_origin_size(
            scaled(crop.left),
            scaled(crop.top),
            scaled(crop.width()).max(1),
            scaled(crop.height()).max(1),
        );
        Some(Self {
            scale,
            border,
            logical,
            tile,
        })
    }

    /// Device size of the whole scaled page.
    pub fn logical_size(&self) -> (i32, i32) {
        self.logical
    }

    /// The cropped region of the scaled page; this is what goes on screen.
    pub fn tile(&self) -> IRect {
        self.tile
    }

    /// Vertical space the page takes on screen, borders included.
    pub fn screen_height(&self) -> i32 {
        self.tile.height() + self.border * 2
    }

    pub fn request(&self) -> TileRequest {
        TileRequest::new(self.logical, self.tile)
    }

    /// Maps a point relative to the displayed tile into page device space,
    /// ready for link lookup at [`Self::logical_size`].
    pub fn device_point(&self, local: Point) -> Point {
        Point::new(local.x + self.tile.x0 as f32, local.y + self.tile.y0 as f32)
    }
}
