use std::path::PathBuf;

/// A single video in the catalog, as supplied by the external scanner/store.
///
/// The grid treats this as a read-only projection: it never mutates an item,
/// it only lays it out and hands its path to a playback surface.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogItem {
    pub id: String,
    pub path: PathBuf,
    /// Duration in seconds, when the catalog already knows it.
    pub duration: Option<f64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub size: u64,
    pub folder: Option<String>,
    /// Modification time, unix milliseconds.
    pub last_modified: u64,
}

impl CatalogItem {
    /// Create an item with just the identity fields set.
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            path: path.into(),
            duration: None,
            width: None,
            height: None,
            size: 0,
            folder: None,
            last_modified: 0,
        }
    }

    pub fn with_folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration = Some(seconds);
        self
    }

    pub fn with_last_modified(mut self, last_modified: u64) -> Self {
        self.last_modified = last_modified;
        self
    }
}
