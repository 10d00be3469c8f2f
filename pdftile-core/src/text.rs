//! Text collection co-registered with a rendered tile.

use serde::{Deserialize, Serialize};

use crate::display::{Color, Device, TextSpan};
use crate::geometry::{IRect, Matrix, Point, Rect};

/// Tile-relative glyph box. Line breaks are marked by [`GlyphBox::LINE_BREAK`]
/// so that boxes stay index-aligned with the characters of [`TileText::text`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlyphBox {
    pub x0: i32,
    pub y0: i32,
    pub x1: i32,
    pub y1: i32,
}

impl GlyphBox {
    pub const LINE_BREAK: GlyphBox = GlyphBox {
        x0: i32::MIN,
        y0: i32::MIN,
        x1: i32::MIN,
        y1: i32::MIN,
    };

    pub fn is_line_break(&self) -> bool {
        *self == Self::LINE_BREAK
    }

    pub fn to_irect(self) -> IRect {
        IRect::new(self.x0, self.y0, self.x1, self.y1)
    }
}

impl From<IRect> for GlyphBox {
    fn from(r: IRect) -> Self {
        GlyphBox {
            x0: r.x0,
            y0: r.y0,
            x1: r.x1,
            y1: r.y1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileText {
    pub text: String,
    pub boxes: Vec<GlyphBox>,
}

/// One line of a tile's text with the union of its glyph boxes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineArea {
    pub text: String,
    pub bounds: IRect,
    pub boxes: Vec<GlyphBox>,
}

impl TileText {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Characters with their boxes, line breaks excluded.
    pub fn glyphs(&self) -> impl Iterator<Item = (char, GlyphBox)> + '_ {
        self.text
            .chars()
            .zip(self.boxes.iter().copied())
            .filter(|(_, b)| !b.is_line_break())
    }

    pub fn lines(&self) -> Vec<LineArea> {
        let mut lines = Vec::new();
        let mut text = String::new();
        let mut boxes: Vec<GlyphBox> = Vec::new();
        for (ch, glyph_box) in self.text.chars().zip(self.boxes.iter().copied()) {
            if glyph_box.is_line_break() {
                if !boxes.is_empty() {
                    let bounds = boxes
                        .iter()
                        .skip(1)
                        .fold(boxes[0].to_irect(), |acc, b| union(acc, b.to_irect()));
                    lines.push(LineArea {
                        text: std::mem::take(&mut text),
                        bounds,
                        boxes: std::mem::take(&mut boxes),
                    });
                }
                continue;
            }
            text.push(ch);
            boxes.push(glyph_box);
        }
        lines
    }
}

fn union(a: IRect, b: IRect) -> IRect {
    IRect::new(a.x0.min(b.x0), a.y0.min(b.y0), a.x1.max(b.x1), a.y1.max(b.y1))
}

fn overlaps(a: &Rect, b: &Rect) -> bool {
    a.x0 < b.x1 && a.x1 > b.x0 && a.y0 < b.y1 && a.y1 > b.y0
}

#[derive(Debug, Clone, Copy)]
struct CollectedChar {
    ch: char,
    bbox: Rect,
    center: Point,
    // Extent across the text direction.
    size: f32,
}

/// Gathers painted and invisible glyphs into lines, in device space.
pub struct TextDevice {
    tile: IRect,
    page: IRect,
    lines: Vec<Vec<CollectedChar>>,
}

impl TextDevice {
    /// Keeps glyphs that intersect `tile`; boxes are clamped to the `page`
    /// raster.
    pub fn new(tile: IRect, page: IRect) -> Self {
        Self {
            tile,
            page,
            lines: Vec::new(),
        }
    }

    fn collect(&mut self, text: &TextSpan, ctm: &Matrix) {
        let tile = self.tile.to_rect();
        let page = self.page.to_rect();
        let direction = normalized(ctm.transform_vector(Point::new(1.0, 0.0)));
        let across = Point::new(-direction.y, direction.x);

        for glyph in &text.glyphs {
            let bbox = ctm.transform_rect(&glyph.bbox);
            if !overlaps(&bbox, &tile) || !overlaps(&bbox, &page) {
                continue;
            }
            let collected = CollectedChar {
                ch: glyph.ch,
                bbox: bbox.intersect(&page),
                center: bbox.center(),
                size: (bbox.width() * across.x.abs() + bbox.height() * across.y.abs()).max(1e-3),
            };
            let starts_line = match self.lines.last().and_then(|line| line.last()) {
                None => true,
                Some(previous) => {
                    let delta = Point::new(
                        collected.center.x - previous.center.x,
                        collected.center.y - previous.center.y,
                    );
                    let limit = collected.size.max(previous.size);
                    let off_line = (delta.x * across.x + delta.y * across.y).abs() > limit * 0.5;
                    let backwards = delta.x * direction.x + delta.y * direction.y < -limit;
                    off_line || backwards
                }
            };
            if starts_line {
                self.lines.push(Vec::new());
            }
            if let Some(line) = self.lines.last_mut() {
                line.push(collected);
            }
        }
    }

    /// Flattens the collected lines into text and tile-relative boxes. Each
    /// line ends with `'\n'` paired with [`GlyphBox::LINE_BREAK`]; control
    /// characters are replaced by `'?'` but keep their box.
    pub fn finish(self) -> TileText {
        let mut output = TileText::default();
        for line in &self.lines {
            for c in line {
                output.text.push(if c.ch.is_control() { '?' } else { c.ch });
                let device = c.bbox.round();
                output
                    .boxes
                    .push(device.translate(-self.tile.x0, -self.tile.y0).into());
            }
            output.text.push('\n');
            output.boxes.push(GlyphBox::LINE_BREAK);
        }
        output
    }
}

fn normalized(v: Point) -> Point {
    let length = (v.x * v.x + v.y * v.y).sqrt();
    if length <= f32::EPSILON {
        Point::new(1.0, 0.0)
    } else {
        Point::new(v.x / length, v.y / length)
    }
}

impl Device for TextDevice {
    fn fill_text(&mut self, text: &TextSpan, ctm: &Matrix, _color: Color) {
        self.collect(text, ctm);
    }

    fn ignore_text(&mut self, text: &TextSpan, ctm: &Matrix) {
        self.collect(text, ctm);
    }
}
