//! In-memory document engine for session tests.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;

use crate::display::{
    Color, Device, FillRule, Glyph, Image, Path as DrawPath, RasterSource, TextSpan,
};
use crate::engine::{DocumentEngine, EngineDocument, EnginePage, LinkTarget, PageLink};
use crate::geometry::{Matrix, Point, Rect};

pub const LETTER: Rect = Rect::new(0.0, 0.0, 612.0, 792.0);

#[derive(Debug, Clone)]
enum Shape {
    Fill(Rect, Color),
    Picture(Rect),
    Word(String, Point),
    Raster(Arc<dyn RasterSource>),
}

#[derive(Debug, Clone)]
pub struct FakePage {
    bounds: Rect,
    rotation: i32,
    shapes: Vec<Shape>,
    links: Vec<PageLink>,
    fails: bool,
}

impl FakePage {
    pub fn letter() -> Self {
        Self {
            bounds: LETTER,
            rotation: 0,
            shapes: Vec::new(),
            links: Vec::new(),
            fails: false,
        }
    }

    pub fn with_bounds(mut self, bounds: Rect) -> Self {
        self.bounds = bounds;
        self
    }

    pub fn with_rotation(mut self, degrees: i32) -> Self {
        self.rotation = degrees;
        self
    }

    /// Covers the whole page with pixels from `source`.
    pub fn with_raster(mut self, source: Arc<dyn RasterSource>) -> Self {
        self.shapes.push(Shape::Raster(source));
        self
    }

    pub fn failing(mut self) -> Self {
        self.fails = true;
        self
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.shapes.push(Shape::Fill(rect, Color::BLACK));
        self
    }

    /// 8x12 point glyphs starting at `origin`, laid out left to right.
    pub fn with_word(mut self, word: &str, origin: Point) -> Self {
        self.shapes.push(Shape::Word(word.to_string(), origin));
        self
    }

    pub fn with_link(mut self, rect: Rect, target: LinkTarget) -> Self {
        self.links.push(PageLink { rect, target });
        self
    }

    /// A mix of paths, an image and text spread over the page.
    pub fn with_content(self) -> Self {
        self.with_rect(Rect::new(36.3, 40.7, 300.2, 90.1))
            .with_rect(Rect::new(250.0, 380.5, 610.9, 402.25))
            .with_word("Tiles", Point::new(90.0, 700.0))
            .with_word("stitch", Point::new(301.5, 333.3))
            .with_picture(Rect::new(400.0, 500.0, 560.0, 690.0))
    }

    fn with_picture(mut self, rect: Rect) -> Self {
        self.shapes.push(Shape::Picture(rect));
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoadCounter(Arc<AtomicUsize>);

impl LoadCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct FakeEngine {
    pages: Arc<Vec<FakePage>>,
    loads: LoadCounter,
}

impl FakeEngine {
    pub fn new(pages: Vec<FakePage>) -> Self {
        Self {
            pages: Arc::new(pages),
            loads: LoadCounter::default(),
        }
    }

    pub fn load_counter(&self) -> LoadCounter {
        self.loads.clone()
    }
}

impl DocumentEngine for FakeEngine {
    fn open_document(
        &self,
        path: &Path,
        _password: Option<&str>,
    ) -> Result<Box<dyn EngineDocument>> {
        if path.file_name().is_some_and(|name| name == "missing.pdf") {
            bail!("no such file");
        }
        Ok(Box::new(FakeDocument {
            pages: self.pages.clone(),
            loads: self.loads.clone(),
        }))
    }
}

struct FakeDocument {
    pages: Arc<Vec<FakePage>>,
    loads: LoadCounter,
}

impl EngineDocument for FakeDocument {
    fn page_count(&self) -> usize {
        self.pages.len()
    }

    fn load_page(&self, index: usize) -> Result<Box<dyn EnginePage + '_>> {
        self.loads.0.fetch_add(1, Ordering::SeqCst);
        match self.pages.get(index) {
            Some(page) if page.fails => bail!("page {index} is corrupt"),
            Some(page) => Ok(Box::new(page)),
            None => bail!("page {index} out of range"),
        }
    }
}

impl EnginePage for &FakePage {
    fn bounds(&self) -> Rect {
        self.bounds
    }

    fn rotation_degrees(&self) -> i32 {
        self.rotation
    }

    fn links(&self) -> Result<Vec<PageLink>> {
        Ok(self.links.clone())
    }

    fn run(&self, device: &mut dyn Device, ctm: &Matrix) -> Result<()> {
        for shape in &self.shapes {
            match shape {
                Shape::Fill(rect, color) => {
                    device.fill_path(&DrawPath::rect(*rect), FillRule::NonZero, ctm, *color)
                }
                Shape::Picture(rect) => {
                    let checker = Image::from_argb(
                        2,
                        2,
                        vec![0xFF20_40C0, 0x8000_0000, 0xFFC0_4020, 0xFF00_0000],
                    )
                    .ok_or_else(|| anyhow!("bad image"))?;
                    // Unit square to `rect`, first texel row at the top.
                    let placement =
                        Matrix::new(rect.width(), 0.0, 0.0, -rect.height(), rect.x0, rect.y1);
                    device.fill_image(&checker, &placement.concat(ctm));
                }
                Shape::Word(word, origin) => {
                    let glyphs = word
                        .chars()
                        .enumerate()
                        .map(|(i, ch)| {
                            let x0 = origin.x + i as f32 * 8.0;
                            let bbox = Rect::new(x0, origin.y, x0 + 8.0, origin.y + 12.0);
                            let stem = Rect::new(x0 + 1.0, origin.y, x0 + 3.0, origin.y + 10.0);
                            Glyph::new(ch, bbox).with_outline(DrawPath::rect(stem))
                        })
                        .collect();
                    device.fill_text(&TextSpan::new(glyphs), ctm, Color::BLACK);
                }
                Shape::Raster(source) => {
                    let b = self.bounds;
                    let placement = Matrix::new(b.width(), 0.0, 0.0, -b.height(), b.x0, b.y1);
                    device.fill_raster(source, &placement.concat(ctm));
                }
            }
        }
        Ok(())
    }
}

pub const GATE_COLOR: u32 = 0xFF30_A050;

/// Raster source whose first render reports that it started and then blocks
/// until released.
#[derive(Debug)]
pub struct Gate {
    started: Mutex<Option<Sender<()>>>,
    release: Mutex<Option<Receiver<()>>>,
}

impl Gate {
    /// The gate, a receiver that fires when rendering starts and a sender
    /// that lets it finish.
    pub fn new() -> (Arc<Self>, Receiver<()>, Sender<()>) {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let gate = Self {
            started: Mutex::new(Some(started_tx)),
            release: Mutex::new(Some(release_rx)),
        };
        (Arc::new(gate), started_rx, release_tx)
    }
}

impl RasterSource for Gate {
    fn render(&self, width: u32, height: u32) -> Result<Arc<Image>> {
        if let Some(started) = self.started.lock().take() {
            started.send(())?;
        }
        let release = self.release.lock().take();
        if let Some(release) = release {
            release.recv()?;
        }
        let pixels = vec![GATE_COLOR; width as usize * height as usize];
        Image::from_argb(width, height, pixels)
            .map(Arc::new)
            .ok_or_else(|| anyhow!("empty raster"))
    }
}
