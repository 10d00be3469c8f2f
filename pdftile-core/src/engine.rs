//! Document engine collaborator interface.
//!
//! The core never parses documents. A concrete engine opens files, exposes
//! page bounds, rotation and link annotations, and plays page content into a
//! [`Device`]. Engine failures are plain `anyhow` errors; the session converts
//! them into [`crate::SessionError`].

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::display::Device;
use crate::geometry::{Matrix, Rect};
use crate::transform::{PageGeometry, Rotation};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkTarget {
    Page { index: usize },
    Named { name: String },
    Uri { uri: String },
}

/// Link annotation in native page space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageLink {
    pub rect: Rect,
    pub target: LinkTarget,
}

pub trait DocumentEngine: Send + Sync {
    fn open_document(&self, path: &Path, password: Option<&str>)
        -> Result<Box<dyn EngineDocument>>;
}

pub trait EngineDocument: Send + Sync {
    fn page_count(&self) -> usize;

    fn load_page(&self, index: usize) -> Result<Box<dyn EnginePage + '_>>;

    /// Page index of a link destination, if it lands inside this document.
    fn resolve_link(&self, target: &LinkTarget) -> Option<usize> {
        match target {
            LinkTarget::Page { index } if *index < self.page_count() => Some(*index),
            _ => None,
        }
    }
}

pub trait EnginePage {
    /// Visible page area in native space: the crop box where the document
    /// has one.
    fn bounds(&self) -> Rect;

    fn rotation_degrees(&self) -> i32;

    fn geometry(&self) -> PageGeometry {
        PageGeometry::new(self.bounds(), Rotation::from_degrees(self.rotation_degrees()))
    }

    fn links(&self) -> Result<Vec<PageLink>>;

    /// Plays the page's drawing operations into `device` through `ctm`.
    fn run(&self, device: &mut dyn Device, ctm: &Matrix) -> Result<()>;
}
