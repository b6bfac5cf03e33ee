//! Directory plan builder.
//!
//! Walks a source tree and produces a `Plan` of moves into a destination
//! root. The walk is recursive and deterministic (entries sorted by name),
//! skips hidden entries, well-known system folders and symlinks, and never
//! descends into the destination root when it lies inside the source.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::EngineError;
use crate::model::{FileMoveItem, MoveKind, Plan};

/// Folder names (lowercase) that are never walked.
pub const DEFAULT_SKIP_DIRS: &[&str] = &[
    "$recycle.bin",
    "system volume information",
    "appdata",
    "__pycache__",
    "autobackup",
    "auto back up",
];

/// Where a file lands relative to the destination root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Keep the path relative to the source root
    #[default]
    Mirror,
    /// Put every file directly in the destination root
    Flatten,
}

impl std::str::FromStr for Layout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mirror" => Ok(Layout::Mirror),
            "flatten" => Ok(Layout::Flatten),
            other => Err(format!(
                "Invalid layout '{}'. Must be 'mirror' or 'flatten'",
                other
            )),
        }
    }
}

/// Builds a `Plan` from a directory walk.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    source_root: PathBuf,
    destination_root: PathBuf,
    layout: Layout,
    extensions: Option<HashSet<String>>,
    kind: MoveKind,
    reason: Option<String>,
}

impl PlanBuilder {
    pub fn new(source_root: impl Into<PathBuf>, destination_root: impl Into<PathBuf>) -> Self {
        PlanBuilder {
            source_root: source_root.into(),
            destination_root: destination_root.into(),
            layout: Layout::default(),
            extensions: None,
            kind: MoveKind::Other,
            reason: None,
        }
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Only include files with one of these extensions (case-insensitive,
    /// with or without the leading dot).
    pub fn extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: HashSet<String> = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        self.extensions = if set.is_empty() { None } else { Some(set) };
        self
    }

    pub fn kind(mut self, kind: MoveKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Walk the source tree.
    ///
    /// # Errors
    /// `EnumerationFailed` if the source root or any directory below it
    /// cannot be read.
    pub fn build(&self) -> Result<Plan, EngineError> {
        let mut items = Vec::new();
        self.walk(&self.source_root, Path::new(""), &mut items)?;

        debug!(
            source = %self.source_root.display(),
            items = items.len(),
            "plan built"
        );
        Ok(Plan::new(&self.source_root, items).with_destination_root(&self.destination_root))
    }

    fn walk(&self, dir: &Path, rel_dir: &Path, items: &mut Vec<FileMoveItem>) -> Result<(), EngineError> {
        let enumeration_error = |e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        };

        let mut entries = fs::read_dir(dir)
            .map_err(enumeration_error)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(enumeration_error)?;
        entries.sort_by_key(|entry| entry.file_name());

        for entry in entries {
            let file_name = entry.file_name();
            let name = file_name.to_string_lossy();
            if name.starts_with('.') {
                continue;
            }

            let path = entry.path();
            let rel_path = rel_dir.join(&file_name);
            // Symlinks are reported as such and never followed.
            let file_type = entry.file_type().map_err(enumeration_error)?;

            if file_type.is_dir() {
                if path.starts_with(&self.destination_root)
                    || DEFAULT_SKIP_DIRS.contains(&name.to_lowercase().as_str())
                {
                    continue;
                }
                self.walk(&path, &rel_path, items)?;
            } else if file_type.is_file() && self.accepts(&path) {
                let size = entry.metadata().map_err(enumeration_error)?.len();
                let destination = match self.layout {
                    Layout::Mirror => self.destination_root.join(&rel_path),
                    Layout::Flatten => self.destination_root.join(&file_name),
                };

                let mut item = FileMoveItem::new(path, destination, self.kind).with_size_hint(size);
                if let Some(reason) = &self.reason {
                    item = item.with_reason(reason.clone());
                }
                items.push(item);
            }
        }

        Ok(())
    }

    fn accepts(&self, path: &Path) -> bool {
        let Some(allowed) = &self.extensions else {
            return true;
        };
        path.extension()
            .map(|ext| allowed.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }
}
