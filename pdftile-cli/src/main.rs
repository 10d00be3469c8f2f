use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use image::RgbaImage;
use pdftile_core::{
    document_id_for_path, CropBox, FileStateStore, IRect, PageLayout, Point, RenderConfig,
    RenderSession, StateStore, TileRequest, ViewState,
};
use pdftile_render::PdfiumEngine;
use serde_json::json;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(
    name = "pdftile",
    version,
    about = "Render PDF pages as tiles and inspect their text and links"
)]
struct Args {
    /// Config file (defaults to config.toml in the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured rendering resolution in dpi
    #[arg(long, global = true)]
    resolution: Option<f32>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Page count and the natural raster size of every page
    Info { file: PathBuf },
    /// Render one tile of a page to a PNG file
    Tile {
        file: PathBuf,
        #[command(flatten)]
        view: ViewArgs,
        #[arg(short, long)]
        output: PathBuf,
        /// Also print the tile's text and glyph boxes as JSON
        #[arg(long)]
        text: bool,
    },
    /// Print the text lines of a tile with their bounds
    Text {
        file: PathBuf,
        #[command(flatten)]
        view: ViewArgs,
    },
    /// Resolve the link under a device point
    Link {
        file: PathBuf,
        #[arg(short, long, default_value_t = 0)]
        page: usize,
        /// Page size in device pixels (defaults to the natural size)
        #[arg(long)]
        size: Option<Size>,
        /// Device point, `X,Y`
        #[arg(long)]
        at: PointArg,
    },
    /// Fit a page onto a screen using the remembered crop
    Fit {
        file: PathBuf,
        /// Page to show (defaults to the remembered page)
        #[arg(short, long)]
        page: Option<usize>,
        #[arg(long)]
        screen: Size,
        #[arg(long, default_value_t = 0)]
        border: i32,
        /// Crop in natural raster pixels, `LEFT,TOP,RIGHT,BOTTOM`
        #[arg(long)]
        crop: Option<Quad>,
        /// Resolve the link under a point of the displayed tile, `X,Y`
        #[arg(long)]
        tap: Option<PointArg>,
        /// Remember the crop and page for this document
        #[arg(long)]
        save: bool,
        /// Render the fitted view to a PNG file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, clap::Args)]
struct ViewArgs {
    #[arg(short, long, default_value_t = 0)]
    page: usize,
    /// Page size in device pixels, `WxH` (defaults to the natural size)
    #[arg(long)]
    size: Option<Size>,
    /// Tile rectangle, `X,Y,W,H` (defaults to the whole page)
    #[arg(long)]
    tile: Option<TileArg>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Size {
    width: i32,
    height: i32,
}

impl FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WxH, got {s:?}"))?;
        let width = parse_positive(w)?;
        let height = parse_positive(h)?;
        Ok(Self { width, height })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Quad([i32; 4]);

impl FromStr for Quad {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<i32>()
                    .map_err(|err| format!("{part:?}: {err}"))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let values: [i32; 4] = parts
            .try_into()
            .map_err(|_| format!("expected four comma-separated integers, got {s:?}"))?;
        Ok(Self(values))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TileArg(IRect);

impl FromStr for TileArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Quad([x, y, w, h]) = s.parse()?;
        IRect::checked_from_origin_size(x, y, w, h)
            .map(Self)
            .ok_or_else(|| format!("tile {s:?} extends past the integer range"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PointArg(Point);

impl FromStr for PointArg {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("expected X,Y, got {s:?}"))?;
        let parse = |v: &str| v.trim().parse::<f32>().map_err(|err| format!("{v:?}: {err}"));
        Ok(Self(Point::new(parse(x)?, parse(y)?)))
    }
}

fn parse_positive(value: &str) -> Result<i32, String> {
    match value.trim().parse::<i32>() {
        Ok(v) if v > 0 => Ok(v),
        Ok(v) => Err(format!("{v} is not positive")),
        Err(err) => Err(format!("{value:?}: {err}")),
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let project_dirs = ProjectDirs::from("net", "pdftile", "pdftile")
        .ok_or_else(|| anyhow!("unable to resolve platform data directories"))?;
    let _log_guard = init_logging(&project_dirs)?;

    let mut config = load_config(args.config.as_deref(), &project_dirs)?;
    if let Some(resolution) = args.resolution {
        config.resolution = resolution;
        config.validate()?;
    }
    let engine = PdfiumEngine::new()?;
    let session = RenderSession::new(Arc::new(engine), config);

    match args.command {
        Command::Info { file } => info_command(&session, &file),
        Command::Tile {
            file,
            view,
            output,
            text,
        } => tile_command(&session, &file, &view, &output, text),
        Command::Text { file, view } => text_command(&session, &file, &view),
        Command::Link {
            file,
            page,
            size,
            at,
        } => link_command(&session, &file, page, size, at.0),
        Command::Fit {
            file,
            page,
            screen,
            border,
            crop,
            tap,
            save,
            output,
        } => {
            let store = FileStateStore::new(project_dirs.data_local_dir().join("state"))?;
            let options = FitOptions {
                page,
                screen,
                border,
                crop: crop.map(|Quad([l, t, r, b])| CropBox::new(l, t, r, b)),
                tap: tap.map(|PointArg(point)| point),
                save,
                output,
            };
            fit_command(&session, &store, &file, options)
        }
    }
}

fn load_config(explicit: Option<&Path>, project_dirs: &ProjectDirs) -> Result<RenderConfig> {
    if let Some(path) = explicit {
        return Ok(RenderConfig::load(path)?);
    }
    let default_path = project_dirs.config_dir().join("config.toml");
    if default_path.exists() {
        info!(path = %default_path.display(), "loading config");
        return Ok(RenderConfig::load(&default_path)?);
    }
    Ok(RenderConfig::default())
}

fn open(session: &RenderSession, file: &Path) -> Result<usize> {
    session
        .open(file)
        .with_context(|| format!("failed to open {:?}", file))
}

/// Navigates to `page` and resolves the page size, defaulting to the natural
/// raster.
fn prepare(
    session: &RenderSession,
    file: &Path,
    page: usize,
    size: Option<Size>,
) -> Result<(usize, (i32, i32))> {
    open(session, file)?;
    let navigation = session.navigate(page)?;
    let logical = match size {
        Some(size) => (size.width, size.height),
        None => navigation.size.to_pixels(),
    };
    Ok((navigation.page, logical))
}

fn tile_rect(tile: Option<TileArg>, logical: (i32, i32)) -> IRect {
    match tile {
        Some(TileArg(rect)) => rect,
        None => IRect::new(0, 0, logical.0, logical.1),
    }
}

fn info_command(session: &RenderSession, file: &Path) -> Result<()> {
    let page_count = open(session, file)?;
    let mut pages = Vec::with_capacity(page_count);
    for page in 0..page_count {
        match session.navigate(page) {
            Ok(navigation) => pages.push(json!({
                "page": page,
                "width": navigation.size.width,
                "height": navigation.size.height,
            })),
            Err(err) => {
                warn!(?err, page, "failed to load page");
                pages.push(json!({ "page": page, "error": format!("{err:#}") }));
            }
        }
    }
    print_json(&json!({
        "path": file,
        "page_count": page_count,
        "resolution": session.config().resolution,
        "pages": pages,
    }))
}

fn tile_command(
    session: &RenderSession,
    file: &Path,
    view: &ViewArgs,
    output: &Path,
    with_text: bool,
) -> Result<()> {
    let (_, logical) = prepare(session, file, view.page, view.size)?;
    let mut request = TileRequest::new(logical, tile_rect(view.tile, logical));
    if with_text {
        request = request.with_text();
    }
    let result = render_png(session, &request, output)?;
    match result.text {
        Some(text) => print_json(&text),
        None => Ok(()),
    }
}

fn render_png(
    session: &RenderSession,
    request: &TileRequest,
    output: &Path,
) -> Result<pdftile_core::TileOutput> {
    let tile = request.tile;
    let mut pixels = vec![0; tile.area()];
    let result = session.render_tile(request, &mut pixels)?;
    if !result.is_rendered() {
        bail!("page is not loaded");
    }
    let image = argb_to_image(tile.width() as u32, tile.height() as u32, &pixels)?;
    image
        .save(output)
        .with_context(|| format!("failed to write {:?}", output))?;
    info!(path = %output.display(), width = tile.width(), height = tile.height(), "wrote tile");
    Ok(result)
}

fn argb_to_image(width: u32, height: u32, pixels: &[u32]) -> Result<RgbaImage> {
    let bytes = pixels
        .iter()
        .flat_map(|&argb| {
            let [a, r, g, b] = argb.to_be_bytes();
            [r, g, b, a]
        })
        .collect();
    RgbaImage::from_raw(width, height, bytes)
        .ok_or_else(|| anyhow!("pixel buffer does not match {width}x{height}"))
}

fn text_command(session: &RenderSession, file: &Path, view: &ViewArgs) -> Result<()> {
    let (page, logical) = prepare(session, file, view.page, view.size)?;
    let tile = tile_rect(view.tile, logical);
    let text = session
        .extract_text(logical, tile)?
        .ok_or_else(|| anyhow!("page {page} is not loaded"))?;
    print_json(&json!({
        "page": page,
        "tile": tile,
        "lines": text.lines(),
    }))
}

fn link_command(
    session: &RenderSession,
    file: &Path,
    page: usize,
    size: Option<Size>,
    at: Point,
) -> Result<()> {
    let (page, logical) = prepare(session, file, page, size)?;
    let link = session.link_at(page, logical, at);
    let destination = session.find_link(page, logical, at);
    print_json(&json!({
        "page": page,
        "point": at,
        "link": link,
        "destination": destination,
    }))
}

struct FitOptions {
    page: Option<usize>,
    screen: Size,
    border: i32,
    crop: Option<CropBox>,
    tap: Option<Point>,
    save: bool,
    output: Option<PathBuf>,
}

impl FitOptions {
    /// Page and crop to show: explicit options win over the remembered view.
    fn resume(&self, saved: &ViewState) -> (usize, Option<CropBox>) {
        (
            self.page.unwrap_or(saved.last_page),
            self.crop.or(saved.crop),
        )
    }
}

fn fit_command(
    session: &RenderSession,
    store: &dyn StateStore,
    file: &Path,
    options: FitOptions,
) -> Result<()> {
    let id = document_id_for_path(file);
    let saved = store.load(id)?.unwrap_or_default();
    let (page, crop) = options.resume(&saved);

    open(session, file)?;
    let navigation = session.navigate(page)?;
    let layout = PageLayout::fit(
        navigation.size,
        crop,
        (options.screen.width, options.screen.height),
        options.border,
    )
    .ok_or_else(|| anyhow!("nothing of the page fits on a {:?} screen", options.screen))?;

    if options.save {
        store.save(
            id,
            &ViewState {
                last_page: navigation.page,
                crop,
            },
        )?;
    }
    if let Some(output) = &options.output {
        render_png(session, &layout.request(), output)?;
    }
    let tap = options.tap.map(|local| {
        let point = layout.device_point(local);
        json!({
            "point": point,
            "link": session.link_at(navigation.page, layout.logical_size(), point),
            "destination": session.find_link(navigation.page, layout.logical_size(), point),
        })
    });
    print_json(&json!({
        "page": navigation.page,
        "crop": crop,
        "scale": layout.scale,
        "logical": layout.logical_size(),
        "tile": layout.tile(),
        "screen_height": layout.screen_height(),
        "tap": tap,
    }))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}

fn init_logging(project_dirs: &ProjectDirs) -> Result<WorkerGuard> {
    let log_dir = project_dirs.data_local_dir().join("logs");
    fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::never(log_dir, "pdftile.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(file_writer);
    // stdout carries JSON results.
    let console_layer = tracing_subscriber::fmt::layer().with_writer(io::stderr);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|err| anyhow!(err))?;

    Ok(guard)
}
