//! Resolution independent drawing model.
//!
//! A document engine describes a page by calling into a [`Device`]. Recording
//! those calls with a [`ListDevice`] yields a [`DisplayList`] that can be
//! replayed any number of times, against any transform, into a pixel sink or
//! a text collector.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use tiny_skia::{ColorU8, Pixmap, PixmapRef};

use crate::geometry::{IRect, Matrix, Point, Rect};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Color {
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillRule {
    #[default]
    NonZero,
    EvenOdd,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathSegment {
    MoveTo(Point),
    LineTo(Point),
    CubicTo(Point, Point, Point),
    Close,
}

/// Outline made of lines and cubic curves. Subpaths are implicitly closed
/// for filling.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Path {
    segments: Vec<PathSegment>,
    current: Option<Point>,
    start: Option<Point>,
}

impl Path {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rect(rect: Rect) -> Self {
        let mut path = Path::new();
        path.move_to(rect.x0, rect.y0)
            .line_to(rect.x1, rect.y0)
            .line_to(rect.x1, rect.y1)
            .line_to(rect.x0, rect.y1)
            .close();
        path
    }

    pub fn move_to(&mut self, x: f32, y: f32) -> &mut Self {
        let point = Point::new(x, y);
        self.segments.push(PathSegment::MoveTo(point));
        self.current = Some(point);
        self.start = Some(point);
        self
    }

    /// Without a current point this starts a subpath at `(x, y)`.
    pub fn line_to(&mut self, x: f32, y: f32) -> &mut Self {
        if self.current.is_none() {
            return self.move_to(x, y);
        }
        let point = Point::new(x, y);
        self.segments.push(PathSegment::LineTo(point));
        self.current = Some(point);
        self
    }

    pub fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) -> &mut Self {
        if self.current.is_none() {
            return self.move_to(x, y);
        }
        let end = Point::new(x, y);
        self.segments.push(PathSegment::CubicTo(
            Point::new(x1, y1),
            Point::new(x2, y2),
            end,
        ));
        self.current = Some(end);
        self
    }

    /// Ends the current subpath and returns to its first point.
    pub fn close(&mut self) -> &mut Self {
        if self.current.is_some() {
            self.segments.push(PathSegment::Close);
            self.current = self.start;
        }
        self
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// True when nothing would be drawn: no line or curve segments.
    pub fn is_empty(&self) -> bool {
        !self
            .segments
            .iter()
            .any(|s| matches!(s, PathSegment::LineTo(_) | PathSegment::CubicTo(..)))
    }

    /// Bounds of all points, control points included.
    pub fn bounds(&self) -> Rect {
        let mut points = Vec::with_capacity(self.segments.len());
        for segment in &self.segments {
            match *segment {
                PathSegment::MoveTo(p) | PathSegment::LineTo(p) => points.push(p),
                PathSegment::CubicTo(c1, c2, end) => points.extend([c1, c2, end]),
                PathSegment::Close => {}
            }
        }
        Rect::from_points(points)
    }
}

/// Raster image drawn into the unit square of its placement matrix: `(0, 0)`
/// is the top-left texel corner and `(1, 1)` the bottom-right one.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pixmap: Pixmap,
}

impl Image {
    /// `pixels` are packed `0xAARRGGBB`, row-major, not premultiplied.
    pub fn from_argb(width: u32, height: u32, pixels: Vec<u32>) -> Option<Self> {
        let expected = (width as usize).checked_mul(height as usize)?;
        if pixels.len() != expected {
            return None;
        }
        let mut pixmap = Pixmap::new(width, height)?;
        for (texel, argb) in pixmap.pixels_mut().iter_mut().zip(pixels) {
            let [a, r, g, b] = argb.to_be_bytes();
            *texel = ColorU8::from_rgba(r, g, b, a).premultiply();
        }
        Some(Self { pixmap })
    }

    pub fn width(&self) -> u32 {
        self.pixmap.width()
    }

    pub fn height(&self) -> u32 {
        self.pixmap.height()
    }

    pub(crate) fn pixmap(&self) -> PixmapRef<'_> {
        self.pixmap.as_ref()
    }
}

/// Page content an engine can only deliver as pixels. It is rendered when a
/// replay needs it, at the pixel size the replay transform gives the unit
/// square, and placed like an [`Image`].
pub trait RasterSource: Send + Sync + fmt::Debug {
    fn render(&self, width: u32, height: u32) -> Result<Arc<Image>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Glyph {
    pub ch: char,
    pub bbox: Rect,
    pub outline: Option<Path>,
}

impl Glyph {
    pub fn new(ch: char, bbox: Rect) -> Self {
        Self {
            ch,
            bbox,
            outline: None,
        }
    }

    pub fn with_outline(mut self, outline: Path) -> Self {
        self.outline = Some(outline);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextSpan {
    pub glyphs: Vec<Glyph>,
}

impl TextSpan {
    pub fn new(glyphs: Vec<Glyph>) -> Self {
        Self { glyphs }
    }

    pub fn bounds(&self) -> Rect {
        self.glyphs
            .iter()
            .fold(Rect::default(), |acc, g| acc.union(&g.bbox))
    }
}

/// Sink for page drawing operations. Every method defaults to a no-op so a
/// device only implements what it consumes.
pub trait Device {
    fn fill_path(&mut self, _path: &Path, _rule: FillRule, _ctm: &Matrix, _color: Color) {}

    fn fill_image(&mut self, _image: &Image, _ctm: &Matrix) {}

    fn fill_raster(&mut self, _source: &Arc<dyn RasterSource>, _ctm: &Matrix) {}

    fn fill_text(&mut self, _text: &TextSpan, _ctm: &Matrix, _color: Color) {}

    /// Text that is present on the page but not painted.
    fn ignore_text(&mut self, _text: &TextSpan, _ctm: &Matrix) {}
}

#[derive(Debug, Clone)]
enum DisplayItem {
    FillPath {
        path: Path,
        rule: FillRule,
        ctm: Matrix,
        color: Color,
    },
    FillImage {
        image: Arc<Image>,
        ctm: Matrix,
    },
    FillRaster {
        source: Arc<dyn RasterSource>,
        ctm: Matrix,
    },
    FillText {
        text: TextSpan,
        ctm: Matrix,
        color: Color,
    },
    IgnoreText {
        text: TextSpan,
        ctm: Matrix,
    },
}

#[derive(Debug, Clone)]
struct Entry {
    item: DisplayItem,
    // Page-space bounds used for culling.
    bounds: Rect,
}

#[derive(Debug, Clone, Default)]
pub struct DisplayList {
    entries: Vec<Entry>,
}

impl DisplayList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replays the recorded operations through `ctm`, skipping items whose
    /// device bounds miss `area`.
    pub fn run(&self, device: &mut dyn Device, ctm: &Matrix, area: IRect) {
        let area = area.to_rect();
        for entry in &self.entries {
            let bounds = ctm.transform_rect(&entry.bounds);
            let bounds = Rect::new(
                bounds.x0 - 1.0,
                bounds.y0 - 1.0,
                bounds.x1 + 1.0,
                bounds.y1 + 1.0,
            );
            if bounds.intersect(&area).is_empty() {
                continue;
            }
            match &entry.item {
                DisplayItem::FillPath {
                    path,
                    rule,
                    ctm: item_ctm,
                    color,
                } => device.fill_path(path, *rule, &item_ctm.concat(ctm), *color),
                DisplayItem::FillImage {
                    image,
                    ctm: item_ctm,
                } => device.fill_image(image, &item_ctm.concat(ctm)),
                DisplayItem::FillRaster {
                    source,
                    ctm: item_ctm,
                } => device.fill_raster(source, &item_ctm.concat(ctm)),
                DisplayItem::FillText {
                    text,
                    ctm: item_ctm,
                    color,
                } => device.fill_text(text, &item_ctm.concat(ctm), *color),
                DisplayItem::IgnoreText {
                    text,
                    ctm: item_ctm,
                } => device.ignore_text(text, &item_ctm.concat(ctm)),
            }
        }
    }
}

/// Records device calls into a [`DisplayList`].
#[derive(Debug, Default)]
pub struct ListDevice {
    list: DisplayList,
}

impl ListDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn finish(self) -> DisplayList {
        self.list
    }

    fn push(&mut self, item: DisplayItem, bounds: Rect) {
        self.list.entries.push(Entry { item, bounds });
    }
}

const UNIT_SQUARE: Rect = Rect::new(0.0, 0.0, 1.0, 1.0);

impl Device for ListDevice {
    fn fill_path(&mut self, path: &Path, rule: FillRule, ctm: &Matrix, color: Color) {
        if path.is_empty() {
            return;
        }
        let bounds = ctm.transform_rect(&path.bounds());
        self.push(
            DisplayItem::FillPath {
                path: path.clone(),
                rule,
                ctm: *ctm,
                color,
            },
            bounds,
        );
    }

    fn fill_image(&mut self, image: &Image, ctm: &Matrix) {
        self.push(
            DisplayItem::FillImage {
                image: Arc::new(image.clone()),
                ctm: *ctm,
            },
            ctm.transform_rect(&UNIT_SQUARE),
        );
    }

    fn fill_raster(&mut self, source: &Arc<dyn RasterSource>, ctm: &Matrix) {
        self.push(
            DisplayItem::FillRaster {
                source: Arc::clone(source),
                ctm: *ctm,
            },
            ctm.transform_rect(&UNIT_SQUARE),
        );
    }

    fn fill_text(&mut self, text: &TextSpan, ctm: &Matrix, color: Color) {
        if text.glyphs.is_empty() {
            return;
        }
        let bounds = ctm.transform_rect(&text.bounds());
        self.push(
            DisplayItem::FillText {
                text: text.clone(),
                ctm: *ctm,
                color,
            },
            bounds,
        );
    }

    fn ignore_text(&mut self, text: &TextSpan, ctm: &Matrix) {
        if text.glyphs.is_empty() {
            return;
        }
        let bounds = ctm.transform_rect(&text.bounds());
        self.push(
            DisplayItem::IgnoreText {
                text: text.clone(),
                ctm: *ctm,
            },
            bounds,
        );
    }
}
