//! Tiled page rendering with co-registered text and link geometry.
//!
//! A [`RenderSession`] drives a [`DocumentEngine`]: it caches the current
//! page as a [`DisplayList`], renders rectangular tiles of it at any logical
//! size, extracts tile-relative glyph boxes with the same transform and hit
//! tests device points against link annotations.

pub mod config;
pub mod display;
pub mod engine;
pub mod error;
pub mod geometry;
pub mod layout;
pub mod raster;
pub mod session;
pub mod state;
pub mod text;
pub mod transform;

#[cfg(test)]
mod test_support;

pub use config::RenderConfig;
pub use display::{
    Color, Device, DisplayList, FillRule, Glyph, Image, ListDevice, Path, PathSegment,
    RasterSource, TextSpan,
};
pub use engine::{DocumentEngine, EngineDocument, EnginePage, LinkTarget, PageLink};
pub use error::{ConfigError, GeometryError, SessionError};
pub use geometry::{IRect, Matrix, Point, Rect};
pub use layout::{CropBox, PageLayout};
pub use session::{Navigation, RenderSession, RenderedTile, TileOutput, TileRequest, TileStatus};
pub use state::{
    document_id_for_path, DocumentId, FileStateStore, MemoryStateStore, StateStore, ViewState,
};
pub use text::{GlyphBox, TileText};
pub use transform::{PageGeometry, PageSize, PageTransform, Rotation, POINTS_PER_INCH};
