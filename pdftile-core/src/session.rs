//! The render session: one open document, one cached page.
//!
//! Navigation records the page's drawing operations into a [`DisplayList`]
//! once. Tile renders, text extraction and batch renders replay an `Arc`
//! snapshot of that list, so a concurrent navigate or close never pulls the
//! list out from under an in-flight render. Link lookups load their page
//! independently and never touch the cached state.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::config::RenderConfig;
use crate::display::{DisplayList, ListDevice};
use crate::engine::{DocumentEngine, EngineDocument, PageLink};
use crate::error::SessionError;
use crate::geometry::{IRect, Matrix, Point};
use crate::raster::{rasterize, PixmapMut, RasterOptions};
use crate::text::{TextDevice, TileText};
use crate::transform::{PageGeometry, PageSize, PageTransform};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRequest {
    /// Device size of the whole page the tile belongs to.
    pub logical: (i32, i32),
    /// Tile rectangle in the page raster's device space.
    pub tile: IRect,
    pub collect_text: bool,
}

impl TileRequest {
    pub fn new(logical: (i32, i32), tile: IRect) -> Self {
        Self {
            logical,
            tile,
            collect_text: false,
        }
    }

    pub fn with_text(mut self) -> Self {
        self.collect_text = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TileStatus {
    Rendered { page: usize, generation: u64 },
    /// No page was ready; the buffer holds the pending fill.
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TileOutput {
    pub status: TileStatus,
    pub text: Option<TileText>,
}

impl TileOutput {
    fn pending() -> Self {
        Self {
            status: TileStatus::Pending,
            text: None,
        }
    }

    pub fn is_rendered(&self) -> bool {
        matches!(self.status, TileStatus::Rendered { .. })
    }
}

#[derive(Debug, Clone)]
pub struct RenderedTile {
    pub tile: IRect,
    pub pixels: Vec<u32>,
    pub output: TileOutput,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Navigation {
    pub page: usize,
    pub size: PageSize,
    pub generation: u64,
}

struct OpenDocument {
    path: PathBuf,
    document: Box<dyn EngineDocument>,
    page_count: usize,
}

#[derive(Clone)]
struct LoadedPage {
    index: usize,
    geometry: PageGeometry,
    list: Arc<DisplayList>,
}

struct PageState {
    current: Option<LoadedPage>,
    size: PageSize,
    generation: u64,
}

struct Snapshot {
    page: LoadedPage,
    generation: u64,
}

pub struct RenderSession {
    engine: Arc<dyn DocumentEngine>,
    config: RenderConfig,
    // Lock order: `document` before `page`.
    document: RwLock<Option<OpenDocument>>,
    page: RwLock<PageState>,
}

impl RenderSession {
    pub fn new(engine: Arc<dyn DocumentEngine>, config: RenderConfig) -> Self {
        let size = config.fallback_size;
        Self {
            engine,
            config,
            document: RwLock::new(None),
            page: RwLock::new(PageState {
                current: None,
                size,
                generation: 0,
            }),
        }
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Opens `path`, replacing any open document, and returns its page count.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub fn open(&self, path: &Path) -> Result<usize, SessionError> {
        let document = self
            .engine
            .open_document(path, self.config.password.as_deref())
            .map_err(|source| SessionError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        let page_count = document.page_count();
        if page_count == 0 {
            return Err(SessionError::EmptyDocument {
                path: path.to_path_buf(),
            });
        }

        let mut slot = self.document.write();
        self.discard_page();
        *slot = Some(OpenDocument {
            path: path.to_path_buf(),
            document,
            page_count,
        });
        info!(page_count, "opened document");
        Ok(page_count)
    }

    pub fn page_count(&self) -> Result<usize, SessionError> {
        self.document
            .read()
            .as_ref()
            .map(|open| open.page_count)
            .ok_or(SessionError::Closed)
    }

    pub fn current_page(&self) -> Option<usize> {
        self.page.read().current.as_ref().map(|page| page.index)
    }

    pub fn generation(&self) -> u64 {
        self.page.read().generation
    }

    /// Size of the current page's natural raster, or the fallback size when
    /// no page is loaded.
    pub fn current_size(&self) -> PageSize {
        self.page.read().size
    }

    /// Loads `index` (clamped to the document) as the current page.
    ///
    /// The previous page is dropped before loading starts. On failure the
    /// session keeps no page and reports the fallback size.
    #[instrument(skip(self))]
    pub fn navigate(&self, index: usize) -> Result<Navigation, SessionError> {
        let guard = self.document.read();
        let open = guard.as_ref().ok_or(SessionError::Closed)?;
        let index = index.min(open.page_count - 1);
        let generation = self.discard_page();

        let (loaded, size) = self.load(open.document.as_ref(), index)?;

        let mut state = self.page.write();
        if state.generation != generation {
            // A newer navigate or close won; its state stands.
            debug!(page = index, generation, "dropping superseded page load");
            return Ok(Navigation {
                page: index,
                size,
                generation,
            });
        }
        state.current = Some(loaded);
        state.size = size;
        info!(page = index, width = size.width, height = size.height, generation, "page ready");
        Ok(Navigation {
            page: index,
            size,
            generation,
        })
    }

    fn load(
        &self,
        document: &dyn EngineDocument,
        index: usize,
    ) -> Result<(LoadedPage, PageSize), SessionError> {
        let page = document.load_page(index).map_err(|source| {
            warn!(?source, page = index, "failed to load page");
            SessionError::Load {
                page: index,
                source,
            }
        })?;
        let geometry = page.geometry();
        let natural = PageTransform::natural(&geometry, self.config.resolution)?;

        let mut recorder = ListDevice::new();
        page.run(&mut recorder, &Matrix::IDENTITY)
            .map_err(|source| SessionError::Load {
                page: index,
                source,
            })?;
        let list = recorder.finish();
        debug!(page = index, items = list.len(), "recorded display list");

        Ok((
            LoadedPage {
                index,
                geometry,
                list: Arc::new(list),
            },
            natural.size(),
        ))
    }

    /// Drops the cached page, bumps the generation and returns the new one.
    fn discard_page(&self) -> u64 {
        let mut state = self.page.write();
        state.current = None;
        state.size = self.config.fallback_size;
        state.generation += 1;
        state.generation
    }

    /// Drops the cached page and the document handle.
    #[instrument(skip(self))]
    pub fn close(&self) {
        let mut slot = self.document.write();
        self.discard_page();
        if let Some(open) = slot.take() {
            info!(path = %open.path.display(), "closed document");
        }
    }

    fn snapshot(&self) -> Option<Snapshot> {
        let state = self.page.read();
        state.current.clone().map(|page| Snapshot {
            page,
            generation: state.generation,
        })
    }

    fn tile_transform(
        &self,
        page: &LoadedPage,
        logical: (i32, i32),
    ) -> Result<PageTransform, SessionError> {
        Ok(PageTransform::fitted(
            &page.geometry,
            self.config.resolution,
            logical.0,
            logical.1,
        )?)
    }

    /// Renders one tile of the current page into `out`, which must hold
    /// exactly `tile.width() * tile.height()` pixels. Without a current page
    /// the buffer is filled with the pending color and `Pending` is reported.
    #[instrument(level = "debug", skip(self, out))]
    pub fn render_tile(
        &self,
        request: &TileRequest,
        out: &mut [u32],
    ) -> Result<TileOutput, SessionError> {
        let snapshot = self.snapshot();
        self.render_snapshot(snapshot.as_ref(), request, out)
    }

    /// Like [`Self::render_tile`], but reports `Pending` unless the current
    /// page still belongs to `generation`.
    #[instrument(level = "debug", skip(self, out))]
    pub fn render_tile_if_current(
        &self,
        request: &TileRequest,
        generation: u64,
        out: &mut [u32],
    ) -> Result<TileOutput, SessionError> {
        let snapshot = self
            .snapshot()
            .filter(|snapshot| snapshot.generation == generation);
        self.render_snapshot(snapshot.as_ref(), request, out)
    }

    /// Renders independent tiles of the current page in parallel, all from
    /// the same page snapshot.
    #[instrument(level = "debug", skip(self, tiles), fields(count = tiles.len()))]
    pub fn render_tiles(
        &self,
        logical: (i32, i32),
        tiles: &[IRect],
    ) -> Result<Vec<RenderedTile>, SessionError> {
        let snapshot = self.snapshot();
        tiles
            .par_iter()
            .map(|&tile| {
                let request = TileRequest::new(logical, tile);
                let mut pixels = vec![0; tile.area()];
                let output = self.render_snapshot(snapshot.as_ref(), &request, &mut pixels)?;
                Ok(RenderedTile {
                    tile,
                    pixels,
                    output,
                })
            })
            .collect()
    }

    fn render_snapshot(
        &self,
        snapshot: Option<&Snapshot>,
        request: &TileRequest,
        out: &mut [u32],
    ) -> Result<TileOutput, SessionError> {
        let tile = request.tile;
        if tile.is_empty() {
            return Err(SessionError::EmptyTile {
                width: tile.width(),
                height: tile.height(),
            });
        }
        if out.len() != tile.area() {
            return Err(SessionError::BufferSize {
                expected: tile.area(),
                actual: out.len(),
            });
        }

        let Some(snapshot) = snapshot else {
            out.fill(self.config.pending_color);
            return Ok(TileOutput::pending());
        };
        let transform = match self.tile_transform(&snapshot.page, request.logical) {
            Ok(transform) => transform,
            Err(err) => {
                out.fill(self.config.pending_color);
                return Err(err);
            }
        };

        let mut pixmap = PixmapMut::new(tile, out).ok_or(SessionError::BufferSize {
            expected: tile.area(),
            actual: 0,
        })?;
        let options = RasterOptions {
            background: self.config.background_color,
            anti_alias: self.config.anti_alias,
        };
        rasterize(&snapshot.page.list, &transform.ctm, &mut pixmap, options);

        let text = request
            .collect_text
            .then(|| collect_text(&snapshot.page.list, &transform, tile));
        Ok(TileOutput {
            status: TileStatus::Rendered {
                page: snapshot.page.index,
                generation: snapshot.generation,
            },
            text,
        })
    }

    /// Text and tile-relative glyph boxes for `tile`, using the same
    /// transform a render of that tile uses. `None` when no page is loaded.
    #[instrument(level = "debug", skip(self))]
    pub fn extract_text(
        &self,
        logical: (i32, i32),
        tile: IRect,
    ) -> Result<Option<TileText>, SessionError> {
        if self.document.read().is_none() {
            return Err(SessionError::Closed);
        }
        let Some(snapshot) = self.snapshot() else {
            return Ok(None);
        };
        let transform = self.tile_transform(&snapshot.page, logical)?;
        Ok(Some(collect_text(&snapshot.page.list, &transform, tile)))
    }

    /// Destination page of the link under `point`, a device position on
    /// page `page` laid out at `logical` size.
    pub fn find_link(&self, page: usize, logical: (i32, i32), point: Point) -> Option<usize> {
        self.hit_test(page, logical, point)
            .and_then(|(_, destination)| destination)
    }

    /// The link under `point`, whatever its target.
    pub fn link_at(&self, page: usize, logical: (i32, i32), point: Point) -> Option<PageLink> {
        self.hit_test(page, logical, point).map(|(link, _)| link)
    }

    #[instrument(level = "debug", skip(self))]
    fn hit_test(
        &self,
        page_index: usize,
        logical: (i32, i32),
        point: Point,
    ) -> Option<(PageLink, Option<usize>)> {
        let guard = self.document.read();
        let open = guard.as_ref()?;
        if page_index >= open.page_count {
            debug!(page = page_index, "link lookup outside document");
            return None;
        }
        let page = match open.document.load_page(page_index) {
            Ok(page) => page,
            Err(err) => {
                warn!(?err, page = page_index, "failed to load page for link lookup");
                return None;
            }
        };
        let transform =
            PageTransform::fitted(&page.geometry(), self.config.resolution, logical.0, logical.1)
                .ok()?;
        let native = transform.device_to_page(point).ok()?;
        let links = match page.links() {
            Ok(links) => links,
            Err(err) => {
                warn!(?err, page = page_index, "failed to read page links");
                return None;
            }
        };
        let link = links
            .into_iter()
            .find(|link| link.rect.contains_inclusive(native))?;
        let destination = open.document.resolve_link(&link.target);
        debug!(page = page_index, ?destination, "link hit");
        Some((link, destination))
    }
}

fn collect_text(list: &DisplayList, transform: &PageTransform, tile: IRect) -> TileText {
    let mut device = TextDevice::new(tile, transform.bbox);
    list.run(&mut device, &transform.ctm, tile);
    device.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::LinkTarget;
    use crate::geometry::Rect;
    use crate::test_support::{FakeEngine, FakePage, Gate, GATE_COLOR};
    use crate::text::GlyphBox;
    use crate::transform::Rotation;

    fn is_ink(argb: u32) -> bool {
        (argb >> 16) & 0xff < 0x10
    }

    fn is_paper(argb: u32) -> bool {
        (argb >> 16) & 0xff > 0xf0
    }

    fn session(engine: FakeEngine) -> RenderSession {
        RenderSession::new(Arc::new(engine), RenderConfig::default())
    }

    fn opened(engine: FakeEngine) -> RenderSession {
        let session = session(engine);
        session.open(Path::new("/docs/sample.pdf")).unwrap();
        session
    }

    fn render(session: &RenderSession, logical: (i32, i32), tile: IRect) -> (Vec<u32>, TileOutput) {
        let mut pixels = vec![0; tile.area()];
        let output = session
            .render_tile(&TileRequest::new(logical, tile), &mut pixels)
            .unwrap();
        (pixels, output)
    }

    #[test]
    fn tile_before_navigate_is_pending_fill() {
        let session = opened(FakeEngine::new(vec![FakePage::letter()]));
        let (pixels, output) = render(&session, (100, 100), IRect::new(0, 0, 10, 10));
        assert_eq!(output.status, TileStatus::Pending);
        assert!(pixels.iter().all(|&p| p == 0xFFD0D0D0));
    }

    #[test]
    fn open_reports_page_count_and_engine_failures() {
        let session = session(FakeEngine::new(vec![FakePage::letter(); 3]));
        assert_eq!(session.open(Path::new("/docs/sample.pdf")).unwrap(), 3);
        assert_eq!(session.page_count().unwrap(), 3);

        let err = session.open(Path::new("/docs/missing.pdf")).unwrap_err();
        assert!(matches!(err, SessionError::Open { .. }));

        let empty = RenderSession::new(Arc::new(FakeEngine::new(vec![])), RenderConfig::default());
        assert!(matches!(
            empty.open(Path::new("/docs/empty.pdf")),
            Err(SessionError::EmptyDocument { .. })
        ));
    }

    #[test]
    fn navigate_reports_natural_size() {
        let session = opened(FakeEngine::new(vec![FakePage::letter()]));
        assert_eq!(session.current_size(), PageSize::new(100.0, 100.0));
        let nav = session.navigate(0).unwrap();
        assert_eq!(nav.size, PageSize::new(1360.0, 1760.0));
        assert_eq!(session.current_size(), nav.size);
        assert_eq!(session.current_page(), Some(0));
    }

    #[test]
    fn navigate_clamps_index() {
        let session = opened(FakeEngine::new(vec![FakePage::letter(); 3]));
        assert_eq!(session.navigate(7).unwrap().page, 2);
        assert_eq!(session.current_page(), Some(2));
    }

    #[test]
    fn failed_navigate_leaves_fallback_and_no_stale_page() {
        let session = opened(FakeEngine::new(vec![
            FakePage::letter(),
            FakePage::letter().failing(),
        ]));
        session.navigate(0).unwrap();
        let err = session.navigate(1).unwrap_err();
        assert!(matches!(err, SessionError::Load { page: 1, .. }));
        assert_eq!(session.current_size(), PageSize::new(100.0, 100.0));
        assert_eq!(session.current_page(), None);
        let (_, output) = render(&session, (1360, 1760), IRect::new(0, 0, 4, 4));
        assert_eq!(output.status, TileStatus::Pending);
    }

    #[test]
    fn navigate_without_document_is_closed() {
        let session = session(FakeEngine::new(vec![FakePage::letter()]));
        assert!(matches!(session.navigate(0), Err(SessionError::Closed)));
    }

    #[test]
    fn tiles_stitch_to_the_full_raster() {
        let session = opened(FakeEngine::new(vec![FakePage::letter().with_content()]));
        session.navigate(0).unwrap();
        let logical = (612, 792);
        let full_rect = IRect::new(0, 0, 612, 792);
        let (full, _) = render(&session, logical, full_rect);

        let mut stitched = vec![0u32; full.len()];
        for tile in [
            IRect::new(0, 0, 250, 333),
            IRect::new(250, 0, 612, 333),
            IRect::new(0, 333, 101, 792),
            IRect::new(101, 333, 612, 792),
        ] {
            let (pixels, output) = render(&session, logical, tile);
            assert!(output.is_rendered());
            for y in tile.y0..tile.y1 {
                for x in tile.x0..tile.x1 {
                    let src = ((y - tile.y0) * tile.width() + (x - tile.x0)) as usize;
                    stitched[(y * 612 + x) as usize] = pixels[src];
                }
            }
        }
        assert_eq!(stitched, full);
        assert!(full.iter().any(|&p| p != 0xFFFFFFFF));
    }

    #[test]
    fn half_size_tile_scales_content() {
        let quadrant = Rect::new(0.0, 396.0, 306.0, 792.0);
        let session = opened(FakeEngine::new(vec![FakePage::letter().with_rect(quadrant)]));
        session.navigate(0).unwrap();

        let (pixels, output) = render(&session, (680, 880), IRect::new(0, 0, 680, 880));
        assert!(output.is_rendered());
        let at = |x: usize, y: usize| pixels[y * 680 + x];
        assert!(is_ink(at(0, 0)));
        assert!(is_ink(at(339, 439)));
        assert!(is_paper(at(340, 439)));
        assert!(is_paper(at(339, 440)));
    }

    #[test]
    fn repeated_tiles_reuse_the_display_list() {
        let engine = FakeEngine::new(vec![FakePage::letter().with_content()]);
        let loads = engine.load_counter();
        let session = opened(engine);
        session.navigate(0).unwrap();
        for y in 0..4 {
            render(&session, (1360, 1760), IRect::from_origin_size(0, y * 64, 64, 64));
        }
        session
            .extract_text((1360, 1760), IRect::new(0, 0, 1360, 1760))
            .unwrap();
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn navigating_twice_renders_identically() {
        let session = opened(FakeEngine::new(vec![FakePage::letter().with_content()]));
        let first_nav = session.navigate(0).unwrap();
        let (first, _) = render(&session, (306, 396), IRect::new(0, 0, 306, 396));
        let second_nav = session.navigate(0).unwrap();
        let (second, _) = render(&session, (306, 396), IRect::new(0, 0, 306, 396));
        assert_eq!(first, second);
        assert!(second_nav.generation > first_nav.generation);
    }

    #[test]
    fn stale_generation_renders_pending() {
        let session = opened(FakeEngine::new(vec![FakePage::letter(); 2]));
        let old = session.navigate(0).unwrap().generation;
        let current = session.navigate(1).unwrap().generation;
        let request = TileRequest::new((100, 100), IRect::new(0, 0, 5, 5));
        let mut pixels = vec![0; 25];

        let output = session
            .render_tile_if_current(&request, old, &mut pixels)
            .unwrap();
        assert_eq!(output.status, TileStatus::Pending);
        assert!(pixels.iter().all(|&p| p == 0xFFD0D0D0));

        let output = session
            .render_tile_if_current(&request, current, &mut pixels)
            .unwrap();
        assert_eq!(
            output.status,
            TileStatus::Rendered {
                page: 1,
                generation: current
            }
        );
    }

    #[test]
    fn text_boxes_are_tile_relative_and_inside_the_page() {
        let session = opened(FakeEngine::new(vec![FakePage::letter().with_word(
            "Hi",
            Point::new(72.0, 700.0),
        )]));
        session.navigate(0).unwrap();
        let tile = IRect::new(100, 150, 400, 400);
        let mut pixels = vec![0; tile.area()];
        let output = session
            .render_tile(&TileRequest::new((1360, 1760), tile).with_text(), &mut pixels)
            .unwrap();
        let text = output.text.unwrap();
        assert_eq!(text.text, "Hi\n");
        assert_eq!(text.boxes[0], GlyphBox::from(IRect::new(60, 27, 78, 55)));
        assert!(text.boxes[2].is_line_break());

        let page = IRect::new(0, 0, 1360, 1760);
        for (_, glyph_box) in text.glyphs() {
            let absolute = glyph_box.to_irect().translate(tile.x0, tile.y0);
            assert_eq!(absolute.intersect(&page), absolute);
        }

        let extracted = session.extract_text((1360, 1760), tile).unwrap().unwrap();
        assert_eq!(extracted, text);
    }

    #[test]
    fn render_without_text_skips_extraction() {
        let session = opened(FakeEngine::new(vec![FakePage::letter().with_word(
            "Hi",
            Point::new(72.0, 700.0),
        )]));
        session.navigate(0).unwrap();
        let (_, output) = render(&session, (1360, 1760), IRect::new(0, 0, 8, 8));
        assert!(output.text.is_none());
    }

    fn linked_page() -> FakePage {
        FakePage::letter()
            .with_link(Rect::new(100.0, 700.0, 200.0, 750.0), LinkTarget::Page { index: 2 })
            .with_link(
                Rect::new(300.0, 100.0, 400.0, 150.0),
                LinkTarget::Uri {
                    uri: "https://example.com".into(),
                },
            )
    }

    #[test]
    fn find_link_hits_and_misses() {
        let session = opened(FakeEngine::new(vec![linked_page(), FakePage::letter(), FakePage::letter()]));
        // Native (150, 725) and (50, 650) at 160 dpi.
        assert_eq!(session.find_link(0, (1360, 1760), Point::new(333.0, 149.0)), Some(2));
        assert_eq!(session.find_link(0, (1360, 1760), Point::new(111.0, 316.0)), None);
    }

    #[test]
    fn find_link_is_scale_invariant() {
        let session = opened(FakeEngine::new(vec![linked_page(), FakePage::letter(), FakePage::letter()]));
        for (logical, scale) in [((1360, 1760), 1.0), ((680, 880), 0.5), ((2720, 3520), 2.0)] {
            let point = Point::new(333.3 * scale, 148.9 * scale);
            assert_eq!(session.find_link(0, logical, point), Some(2), "at {logical:?}");
        }
    }

    #[test]
    fn uri_links_do_not_resolve_to_pages() {
        let session = opened(FakeEngine::new(vec![linked_page()]));
        // Native (350, 125).
        let point = Point::new(777.8, 1482.2);
        assert_eq!(session.find_link(0, (1360, 1760), point), None);
        let link = session.link_at(0, (1360, 1760), point).unwrap();
        assert!(matches!(link.target, LinkTarget::Uri { .. }));
    }

    #[test]
    fn link_lookup_failures_are_no_link() {
        let session = opened(FakeEngine::new(vec![linked_page().failing()]));
        assert_eq!(session.find_link(0, (1360, 1760), Point::new(333.0, 149.0)), None);
        assert_eq!(session.find_link(5, (1360, 1760), Point::new(333.0, 149.0)), None);
        session.close();
        assert_eq!(session.find_link(0, (1360, 1760), Point::new(333.0, 149.0)), None);
    }

    #[test]
    fn close_discards_page_and_document() {
        let session = opened(FakeEngine::new(vec![FakePage::letter()]));
        session.navigate(0).unwrap();
        session.close();
        assert!(matches!(session.page_count(), Err(SessionError::Closed)));
        assert!(matches!(
            session.extract_text((10, 10), IRect::new(0, 0, 10, 10)),
            Err(SessionError::Closed)
        ));
        assert_eq!(session.current_size(), PageSize::new(100.0, 100.0));
        let (_, output) = render(&session, (10, 10), IRect::new(0, 0, 10, 10));
        assert_eq!(output.status, TileStatus::Pending);
    }

    #[test]
    fn parallel_batch_matches_single_tiles() {
        let session = opened(FakeEngine::new(vec![FakePage::letter().with_content()]));
        session.navigate(0).unwrap();
        let tiles: Vec<IRect> = (0..6)
            .map(|i| IRect::from_origin_size((i % 3) * 120, (i / 3) * 200, 120, 200))
            .collect();
        let batch = session.render_tiles((612, 792), &tiles).unwrap();
        assert_eq!(batch.len(), tiles.len());
        for rendered in batch {
            let (single, _) = render(&session, (612, 792), rendered.tile);
            assert_eq!(rendered.pixels, single);
            assert!(rendered.output.is_rendered());
        }
    }

    const SHIFTED: Rect = Rect::new(50.0, 20.0, 662.0, 812.0);

    #[test]
    fn glyph_boxes_cover_painted_pixels_on_rotated_pages() {
        for degrees in [0, 90, 180, 270] {
            let page = FakePage::letter()
                .with_bounds(SHIFTED)
                .with_rotation(degrees)
                .with_word("Hi", Point::new(150.0, 600.0));
            let session = opened(FakeEngine::new(vec![page]));
            let logical = session.navigate(0).unwrap().size.to_pixels();
            let tile = IRect::new(0, 0, logical.0, logical.1);
            let mut pixels = vec![0; tile.area()];
            let output = session
                .render_tile(&TileRequest::new(logical, tile).with_text(), &mut pixels)
                .unwrap();
            let text = output.text.unwrap();
            assert_eq!(text.text, "Hi\n", "at {degrees} degrees");

            let boxes: Vec<IRect> = text.glyphs().map(|(_, b)| b.to_irect()).collect();
            let mut ink = 0;
            for y in 0..tile.height() {
                for x in 0..tile.width() {
                    if is_ink(pixels[(y * tile.width() + x) as usize]) {
                        ink += 1;
                        assert!(
                            boxes.iter().any(|b| b.contains(x, y)),
                            "ink at ({x}, {y}) outside glyph boxes at {degrees} degrees"
                        );
                    }
                }
            }
            assert!(ink > 0, "nothing painted at {degrees} degrees");
            for glyph_box in &boxes {
                let inked = (glyph_box.y0..glyph_box.y1).any(|y| {
                    (glyph_box.x0..glyph_box.x1)
                        .any(|x| is_ink(pixels[(y * tile.width() + x) as usize]))
                });
                assert!(inked, "empty glyph box {glyph_box:?} at {degrees} degrees");
            }
        }
    }

    #[test]
    fn find_link_on_a_quarter_turned_page() {
        let page = linked_page().with_rotation(90);
        let config = RenderConfig {
            resolution: 72.0,
            ..RenderConfig::default()
        };
        let engine = FakeEngine::new(vec![page, FakePage::letter(), FakePage::letter()]);
        let session = RenderSession::new(Arc::new(engine), config);
        session.open(Path::new("/docs/sample.pdf")).unwrap();
        // Native (150, 725) is 67 points below the top edge, which now faces right.
        assert_eq!(session.find_link(0, (792, 612), Point::new(725.0, 150.0)), Some(2));
        assert_eq!(session.find_link(0, (792, 612), Point::new(150.0, 725.0)), None);
    }

    #[test]
    fn find_link_follows_every_rotation_and_origin() {
        for degrees in [0, 90, 180, 270] {
            let page = linked_page().with_bounds(SHIFTED).with_rotation(degrees);
            let geometry = PageGeometry::new(SHIFTED, Rotation::from_degrees(degrees));
            let session = opened(FakeEngine::new(vec![page, FakePage::letter(), FakePage::letter()]));
            let logical = (900, 700);
            let transform = PageTransform::fitted(&geometry, 160.0, logical.0, logical.1).unwrap();
            let inside = transform.page_to_device(Point::new(150.0, 725.0));
            let outside = transform.page_to_device(Point::new(250.0, 725.0));
            assert_eq!(session.find_link(0, logical, inside), Some(2), "at {degrees} degrees");
            assert_eq!(session.find_link(0, logical, outside), None, "at {degrees} degrees");
        }
    }

    #[test]
    fn navigate_during_batch_render_keeps_the_snapshot() {
        let (gate, started, release) = Gate::new();
        let engine = FakeEngine::new(vec![FakePage::letter().with_raster(gate), FakePage::letter()]);
        let session = Arc::new(opened(engine));
        let first = session.navigate(0).unwrap().generation;

        let worker = {
            let session = Arc::clone(&session);
            std::thread::spawn(move || session.render_tiles((612, 792), &[IRect::new(0, 0, 64, 64)]))
        };
        started.recv().unwrap();
        let second = session.navigate(1).unwrap();
        release.send(()).unwrap();

        let batch = worker.join().unwrap().unwrap();
        assert_eq!(
            batch[0].output.status,
            TileStatus::Rendered {
                page: 0,
                generation: first
            }
        );
        assert_eq!(batch[0].pixels[32 * 64 + 32], GATE_COLOR);
        assert_eq!(session.current_page(), Some(1));
        assert!(second.generation > first);
    }

    #[test]
    fn buffer_size_mismatch_is_rejected() {
        let session = opened(FakeEngine::new(vec![FakePage::letter()]));
        session.navigate(0).unwrap();
        let mut pixels = vec![0; 10];
        let err = session
            .render_tile(&TileRequest::new((100, 100), IRect::new(0, 0, 4, 4)), &mut pixels)
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::BufferSize {
                expected: 16,
                actual: 10
            }
        ));
        let err = session
            .render_tile(&TileRequest::new((100, 100), IRect::new(4, 4, 4, 9)), &mut [])
            .unwrap_err();
        assert!(matches!(err, SessionError::EmptyTile { .. }));
    }
}
