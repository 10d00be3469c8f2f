use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::layout::CropBox;

pub type DocumentId = Uuid;

static DOCUMENT_NAMESPACE: Lazy<Uuid> = Lazy::new(|| {
    Uuid::new_v5(&Uuid::NAMESPACE_URL, b"pdftile:document")
});

/// Stable id for a document path; relative paths resolve against the
/// working directory when the file cannot be canonicalized.
pub fn document_id_for_path(path: &Path) -> DocumentId {
    let resolved = path
        .canonicalize()
        .or_else(|_| {
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                std::env::current_dir().map(|cwd| cwd.join(path))
            }
        })
        .unwrap_or_else(|_| path.to_path_buf());
    Uuid::new_v5(&DOCUMENT_NAMESPACE, resolved.to_string_lossy().as_bytes())
}

/// What the viewer remembers about a document between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    #[serde(default)]
    pub last_page: usize,
    #[serde(default)]
    pub crop: Option<CropBox>,
}

pub trait StateStore: Send + Sync {
    fn load(&self, id: DocumentId) -> Result<Option<ViewState>>;
    fn save(&self, id: DocumentId, state: &ViewState) -> Result<()>;
}

pub struct FileStateStore {
    root: PathBuf,
}

impl FileStateStore {
    pub fn new(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("failed to create state directory at {:?}", root))?;
        Ok(Self { root })
    }

    fn state_path(&self, id: DocumentId) -> PathBuf {
        self.root.join(format!("{id}.json"))
    }
}

impl StateStore for FileStateStore {
    fn load(&self, id: DocumentId) -> Result<Option<ViewState>> {
        let path = self.state_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let mut file =
            File::open(&path).with_context(|| format!("failed to open state file {:?}", path))?;
        let mut buf = String::new();
        file.read_to_string(&mut buf)?;
        let state = serde_json::from_str(&buf)
            .with_context(|| format!("failed to decode state file {:?}", path))?;
        Ok(Some(state))
    }

    fn save(&self, id: DocumentId, state: &ViewState) -> Result<()> {
        let path = self.state_path(id);
        let tmp = path.with_extension("json.tmp");
        let payload = serde_json::to_string_pretty(state)?;
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to open temp state file {:?}", tmp))?;
        file.write_all(payload.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to replace state file {:?}", path))?;
        debug!(%id, "saved view state");
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    inner: Mutex<HashMap<DocumentId, ViewState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, id: DocumentId) -> Result<Option<ViewState>> {
        Ok(self.inner.lock().get(&id).cloned())
    }

    fn save(&self, id: DocumentId, state: &ViewState) -> Result<()> {
        self.inner.lock().insert(id, state.clone());
        Ok(())
    }
}
