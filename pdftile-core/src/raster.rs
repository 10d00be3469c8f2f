//! Tile rasterizer on top of tiny-skia.
//!
//! Pixels are produced in fixed blocks aligned to the page raster origin and
//! then copied into the caller's tile. A given pixel always comes out of the
//! same block replay, whichever tile asks for it, so any tiling of a page
//! raster stitches into exactly the single-tile result, antialiasing included.

use std::sync::Arc;

use tiny_skia::{FilterQuality, Paint, PathBuilder, Pixmap, PixmapPaint, Transform};
use tracing::warn;

use crate::display::{
    Color, Device, DisplayList, FillRule, Image, Path, PathSegment, RasterSource, TextSpan,
};
use crate::geometry::{IRect, Matrix, Point};

/// Edge length of a render block in device pixels.
pub const BLOCK_SIZE: i32 = 256;

// Rasters requested from a `RasterSource` are clamped to this many pixels
// per side.
const MAX_RASTER_SIDE: f32 = 16_384.0;

/// Caller-owned tile buffer of packed `0xAARRGGBB` pixels (BGRA in memory on
/// little-endian hosts), addressed in page raster coordinates.
#[derive(Debug)]
pub struct PixmapMut<'a> {
    area: IRect,
    pixels: &'a mut [u32],
}

impl<'a> PixmapMut<'a> {
    pub fn new(area: IRect, pixels: &'a mut [u32]) -> Option<Self> {
        if area.is_empty() || pixels.len() != area.area() {
            return None;
        }
        Some(Self { area, pixels })
    }

    pub fn area(&self) -> IRect {
        self.area
    }

    fn index(&self, x: i32, y: i32) -> usize {
        (y - self.area.y0) as usize * self.area.width() as usize + (x - self.area.x0) as usize
    }

    /// Copies the part of `block`, a rendered [`BLOCK_SIZE`] square at
    /// `origin`, that overlaps this tile.
    fn copy_block(&mut self, block: &Pixmap, origin: IRect) {
        let overlap = origin.intersect(&self.area);
        if overlap.is_empty() {
            return;
        }
        let stride = block.width() as usize;
        let source = block.pixels();
        for y in overlap.y0..overlap.y1 {
            let row = (y - origin.y0) as usize * stride;
            let start = self.index(overlap.x0, y);
            for (offset, x) in (overlap.x0..overlap.x1).enumerate() {
                let color = source[row + (x - origin.x0) as usize].demultiply();
                self.pixels[start + offset] =
                    u32::from_be_bytes([color.alpha(), color.red(), color.green(), color.blue()]);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterOptions {
    /// Packed `0xAARRGGBB` the page is painted on.
    pub background: u32,
    pub anti_alias: bool,
}

/// Replays `list` through `ctm` into `target`.
pub fn rasterize(
    list: &DisplayList,
    ctm: &Matrix,
    target: &mut PixmapMut<'_>,
    options: RasterOptions,
) {
    let Some(mut block) = Pixmap::new(BLOCK_SIZE as u32, BLOCK_SIZE as u32) else {
        warn!("failed to allocate render block");
        return;
    };
    let [a, r, g, b] = options.background.to_be_bytes();
    let background = tiny_skia::Color::from_rgba8(r, g, b, a);

    let area = target.area();
    let columns = area.x0.div_euclid(BLOCK_SIZE)..=(area.x1 - 1).div_euclid(BLOCK_SIZE);
    let rows = area.y0.div_euclid(BLOCK_SIZE)..=(area.y1 - 1).div_euclid(BLOCK_SIZE);
    for row in rows {
        for column in columns.clone() {
            let x0 = column * BLOCK_SIZE;
            let y0 = row * BLOCK_SIZE;
            let origin = IRect::new(
                x0,
                y0,
                x0.saturating_add(BLOCK_SIZE),
                y0.saturating_add(BLOCK_SIZE),
            );
            block.fill(background);
            let mut device = DrawDevice::new(&mut block, (x0, y0), options.anti_alias);
            list.run(&mut device, ctm, origin);
            target.copy_block(&block, origin);
        }
    }
}

/// Device drawing into a tiny-skia pixmap whose top-left pixel sits at
/// `origin` in page raster coordinates.
pub struct DrawDevice<'p> {
    pixmap: &'p mut Pixmap,
    origin: (i32, i32),
    anti_alias: bool,
}

impl<'p> DrawDevice<'p> {
    pub fn new(pixmap: &'p mut Pixmap, origin: (i32, i32), anti_alias: bool) -> Self {
        Self {
            pixmap,
            origin,
            anti_alias,
        }
    }

    fn transform(&self, ctm: &Matrix) -> Transform {
        let m = ctm.post_translate(-self.origin.0 as f32, -self.origin.1 as f32);
        Transform::from_row(m.a, m.b, m.c, m.d, m.e, m.f)
    }

    fn paint(&self, color: Color) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color_rgba8(color.r, color.g, color.b, 0xff);
        paint.anti_alias = self.anti_alias;
        paint
    }

    fn fill(&mut self, path: &Path, rule: FillRule, ctm: &Matrix, paint: &Paint<'_>) {
        let Some(path) = skia_path(path) else {
            return;
        };
        let rule = match rule {
            FillRule::NonZero => tiny_skia::FillRule::Winding,
            FillRule::EvenOdd => tiny_skia::FillRule::EvenOdd,
        };
        let transform = self.transform(ctm);
        self.pixmap.fill_path(&path, paint, rule, transform, None);
    }
}

impl Device for DrawDevice<'_> {
    fn fill_path(&mut self, path: &Path, rule: FillRule, ctm: &Matrix, color: Color) {
        let paint = self.paint(color);
        self.fill(path, rule, ctm, &paint);
    }

    fn fill_image(&mut self, image: &Image, ctm: &Matrix) {
        let texels = Matrix::scale(1.0 / image.width() as f32, 1.0 / image.height() as f32);
        let transform = self.transform(&texels.concat(ctm));
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap
            .draw_pixmap(0, 0, image.pixmap(), &paint, transform, None);
    }

    fn fill_raster(&mut self, source: &Arc<dyn RasterSource>, ctm: &Matrix) {
        let (width, height) = raster_size(ctm);
        match source.render(width, height) {
            Ok(image) => self.fill_image(&image, ctm),
            Err(err) => warn!(?err, width, height, "failed to render page raster"),
        }
    }

    fn fill_text(&mut self, text: &TextSpan, ctm: &Matrix, color: Color) {
        let paint = self.paint(color);
        for glyph in &text.glyphs {
            if let Some(outline) = &glyph.outline {
                self.fill(outline, FillRule::NonZero, ctm, &paint);
            }
        }
    }
}

/// Device pixels spanned by the unit square's edges under `ctm`. Depends on
/// the linear part only, so every block of a replay asks for the same size.
pub fn raster_size(ctm: &Matrix) -> (u32, u32) {
    let side = |v: Point| v.x.hypot(v.y).round().clamp(1.0, MAX_RASTER_SIDE) as u32;
    (
        side(ctm.transform_vector(Point::new(1.0, 0.0))),
        side(ctm.transform_vector(Point::new(0.0, 1.0))),
    )
}

fn skia_path(path: &Path) -> Option<tiny_skia::Path> {
    let mut builder = PathBuilder::new();
    for segment in path.segments() {
        match *segment {
            PathSegment::MoveTo(p) => builder.move_to(p.x, p.y),
            PathSegment::LineTo(p) => builder.line_to(p.x, p.y),
            PathSegment::CubicTo(c1, c2, end) => {
                builder.cubic_to(c1.x, c1.y, c2.x, c2.y, end.x, end.y)
            }
            PathSegment::Close => builder.close(),
        }
    }
    builder.finish()
}
