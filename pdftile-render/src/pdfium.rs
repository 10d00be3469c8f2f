use std::fmt;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use parking_lot::Mutex;
use pdfium_render::prelude::*;
use pdftile_core::{
    Device, DocumentEngine, EngineDocument, EnginePage, Glyph, Image, LinkTarget, Matrix,
    PageGeometry, PageLink, RasterSource, Rect, Rotation, TextSpan,
};
use tracing::{debug, instrument, warn};

use crate::{backdrop_placement, image_from_rgba};

/// Pdfium-backed [`DocumentEngine`].
pub struct PdfiumEngine {
    pdfium: Arc<Pdfium>,
}

impl PdfiumEngine {
    pub fn new() -> Result<Self> {
        let pdfium = match bind_pdfium_from_build_hint() {
            Some(pdfium) => pdfium,
            None => bind_pdfium_default()?,
        };
        Ok(Self {
            pdfium: Arc::new(pdfium),
        })
    }
}

impl DocumentEngine for PdfiumEngine {
    #[instrument(skip(self, password), fields(path = %path.display()))]
    fn open_document(
        &self,
        path: &Path,
        password: Option<&str>,
    ) -> Result<Box<dyn EngineDocument>> {
        let document = self
            .pdfium
            .load_pdf_from_file(path, password)
            .with_context(|| format!("failed to open {:?}", path))?;
        // SAFETY: the document borrows the bindings owned by `pdfium`. It is
        // stored in `DocumentHandle::document`, which is declared before the
        // `pdfium` handle and therefore dropped first.
        let document = unsafe { mem::transmute::<PdfDocument<'_>, PdfDocument<'static>>(document) };
        let page_count = usize::from(document.pages().len());
        debug!(page_count, "pdfium opened document");
        Ok(Box::new(PdfiumDocument {
            handle: Arc::new(DocumentHandle {
                document: Mutex::new(document),
                pdfium: Arc::clone(&self.pdfium),
                path: path.to_path_buf(),
            }),
            page_count,
        }))
    }
}

/// Shared by the document and every backdrop recorded from it, so a display
/// list keeps its document alive.
struct DocumentHandle {
    document: Mutex<PdfDocument<'static>>,
    #[allow(dead_code)]
    pdfium: Arc<Pdfium>,
    path: PathBuf,
}

impl DocumentHandle {
    fn with_page<R>(&self, index: usize, f: impl FnOnce(&PdfPage<'_>) -> Result<R>) -> Result<R> {
        let page_index: PdfPageIndex = index
            .try_into()
            .map_err(|_| anyhow!("page {} is out of supported range", index))?;
        let document = self.document.lock();
        let page = document
            .pages()
            .get(page_index)
            .with_context(|| format!("page {} out of range", index))?;
        f(&page)
    }
}

struct PdfiumDocument {
    handle: Arc<DocumentHandle>,
    page_count: usize,
}

impl EngineDocument for PdfiumDocument {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn load_page(&self, index: usize) -> Result<Box<dyn EnginePage + '_>> {
        let geometry = self.handle.with_page(index, |page| Ok(page_geometry(page)))?;
        Ok(Box::new(PdfiumPage {
            handle: &self.handle,
            index,
            geometry,
        }))
    }
}

struct PdfiumPage<'a> {
    handle: &'a Arc<DocumentHandle>,
    index: usize,
    geometry: PageGeometry,
}

impl EnginePage for PdfiumPage<'_> {
    fn bounds(&self) -> Rect {
        self.geometry.bounds
    }

    fn rotation_degrees(&self) -> i32 {
        self.geometry.rotation.degrees()
    }

    fn geometry(&self) -> PageGeometry {
        self.geometry
    }

    fn links(&self) -> Result<Vec<PageLink>> {
        self.handle.with_page(self.index, |page| {
            let mut links = Vec::new();
            for link in page.links().iter() {
                let rect = match link.rect() {
                    Ok(rect) => rect,
                    Err(err) => {
                        warn!(
                            ?err,
                            page = self.index,
                            path = %self.handle.path.display(),
                            "failed to resolve link rectangle"
                        );
                        continue;
                    }
                };
                let Some(target) = link_target(&link) else {
                    continue;
                };
                links.push(PageLink {
                    rect: to_rect(&rect),
                    target,
                });
            }
            Ok(links)
        })
    }

    #[instrument(level = "debug", skip(self, device, ctm), fields(page = self.index))]
    fn run(&self, device: &mut dyn Device, ctm: &Matrix) -> Result<()> {
        let placement = backdrop_placement(&self.geometry)?;
        let backdrop: Arc<dyn RasterSource> = Arc::new(PageBackdrop {
            handle: Arc::clone(self.handle),
            index: self.index,
            cache: Mutex::new(None),
        });
        device.fill_raster(&backdrop, &placement.concat(ctm));

        match self.handle.with_page(self.index, text_span) {
            Ok(span) => device.ignore_text(&span, ctm),
            Err(err) => warn!(?err, page = self.index, "page has no usable text layer"),
        }
        Ok(())
    }
}

/// Pdfium's rendering of one page, redone whenever a replay asks for a new
/// pixel size. The last size is kept.
struct PageBackdrop {
    handle: Arc<DocumentHandle>,
    index: usize,
    cache: Mutex<Option<(u32, u32, Arc<Image>)>>,
}

impl fmt::Debug for PageBackdrop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageBackdrop")
            .field("path", &self.handle.path)
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl RasterSource for PageBackdrop {
    fn render(&self, width: u32, height: u32) -> Result<Arc<Image>> {
        let mut cache = self.cache.lock();
        if let Some((w, h, image)) = cache.as_ref() {
            if (*w, *h) == (width, height) {
                return Ok(Arc::clone(image));
            }
        }
        debug!(page = self.index, width, height, "rendering page backdrop");
        let target_width = i32::try_from(width).context("backdrop too wide")?;
        let target_height = i32::try_from(height).context("backdrop too tall")?;
        let image = self.handle.with_page(self.index, |page| {
            let config = PdfRenderConfig::new()
                .set_target_width(target_width)
                .set_target_height(target_height);
            let bitmap = page
                .render_with_config(&config)
                .with_context(|| format!("failed to render page {}", self.index))?;
            image_from_rgba(
                bitmap.width() as u32,
                bitmap.height() as u32,
                &bitmap.as_rgba_bytes(),
            )
        })?;
        let image = Arc::new(image);
        *cache = Some((width, height, Arc::clone(&image)));
        Ok(image)
    }
}

/// The crop box clipped to the media box, which is the area Pdfium renders.
fn page_geometry(page: &PdfPage<'_>) -> PageGeometry {
    let boundaries = page.boundaries();
    let media = boundaries.media().ok().map(|boundary| to_rect(&boundary.bounds));
    let crop = boundaries.crop().ok().map(|boundary| to_rect(&boundary.bounds));
    let bounds = match (crop, media) {
        (Some(crop), Some(media)) => {
            let visible = crop.intersect(&media);
            if visible.is_empty() {
                media
            } else {
                visible
            }
        }
        (Some(rect), None) | (None, Some(rect)) => rect,
        (None, None) => Rect::new(0.0, 0.0, page.width().value, page.height().value),
    };
    let rotation = match page.rotation() {
        Ok(PdfPageRenderRotation::Degrees90) => 90,
        Ok(PdfPageRenderRotation::Degrees180) => 180,
        Ok(PdfPageRenderRotation::Degrees270) => 270,
        _ => 0,
    };
    PageGeometry::new(bounds, Rotation::from_degrees(rotation))
}

fn to_rect(rect: &PdfRect) -> Rect {
    Rect::new(
        rect.left().value,
        rect.bottom().value,
        rect.right().value,
        rect.top().value,
    )
}

/// Pdfium's characters in reading order. Line breaks are dropped; the text
/// collector derives lines from glyph positions.
fn text_span(page: &PdfPage<'_>) -> Result<TextSpan> {
    let text = page.text().context("failed to load text layer")?;
    let glyphs = text
        .chars()
        .iter()
        .filter_map(|ch| {
            let unicode = ch.unicode_char()?;
            if unicode == '\r' || unicode == '\n' {
                return None;
            }
            let bounds = ch.loose_bounds().ok()?;
            Some(Glyph::new(unicode, to_rect(&bounds)))
        })
        .collect();
    Ok(TextSpan::new(glyphs))
}

fn link_target(link: &PdfLink<'_>) -> Option<LinkTarget> {
    if let Some(action) = link.action() {
        match action.action_type() {
            PdfActionType::GoToDestinationInSameDocument => {
                let index = action
                    .as_local_destination_action()
                    .and_then(|local| local.destination().ok())
                    .and_then(|destination| destination.page_index().ok());
                if let Some(index) = index {
                    return Some(LinkTarget::Page {
                        index: usize::from(index),
                    });
                }
            }
            PdfActionType::Uri => {
                let uri = action
                    .as_uri_action()
                    .and_then(|uri_action| uri_action.uri().ok())
                    .filter(|uri| !uri.is_empty());
                if let Some(uri) = uri {
                    return Some(LinkTarget::Uri { uri });
                }
            }
            _ => {}
        }
    }

    link.destination()
        .and_then(|destination| destination.page_index().ok())
        .map(|index| LinkTarget::Page {
            index: usize::from(index),
        })
}

fn bind_pdfium_from_build_hint() -> Option<Pdfium> {
    match option_env!("PDFTILE_PDFIUM_LIBRARY_PATH") {
        Some(path) if !path.is_empty() => match Pdfium::bind_to_library(path) {
            Ok(bindings) => Some(Pdfium::new(bindings)),
            Err(err) => {
                warn!(?err, path, "failed to load Pdfium from build-provided path");
                None
            }
        },
        _ => None,
    }
}

fn bind_pdfium_default() -> Result<Pdfium> {
    let beside = Pdfium::pdfium_platform_library_name_at_path("./");
    let local_error = match Pdfium::bind_to_library(&beside) {
        Ok(bindings) => return Ok(Pdfium::new(bindings)),
        Err(err) => err,
    };
    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|err| {
            anyhow!(
                "failed to bind to a pdfium library ({}: {local_error}; system: {err})",
                beside.display()
            )
        })
}
