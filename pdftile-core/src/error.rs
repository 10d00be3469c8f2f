use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeometryError {
    #[error("resolution must be a positive number of dpi, got {0}")]
    InvalidResolution(f32),
    #[error("requested page size {width}x{height} is not positive")]
    EmptyTarget { width: i32, height: i32 },
    #[error("page transform is not invertible")]
    Singular,
}

/// Failures surfaced by [`crate::RenderSession`]. Engine errors are wrapped
/// here and never escape as raw engine types.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to open {}: {source:#}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("document at {} has no pages", path.display())]
    EmptyDocument { path: PathBuf },
    #[error("failed to load page {page}: {source:#}")]
    Load {
        page: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("no document is open")]
    Closed,
    #[error("pixel buffer holds {actual} pixels but the tile needs {expected}")]
    BufferSize { expected: usize, actual: usize },
    #[error("tile {width}x{height} is empty")]
    EmptyTile { width: i32, height: i32 },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
