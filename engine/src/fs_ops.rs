//! Filesystem operations module.
//!
//! The engine never calls `std::fs` directly while executing a job. It goes
//! through the `FileSystem` trait so a registry can be pointed at the local
//! disk (`LocalFs`) or at a test double that injects failures.
//!
//! This module also provides:
//! - Creating directories recursively with typed errors
//! - Collision-free destination naming

use std::collections::HashSet;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use crate::error::EngineError;

/// The filesystem surface consumed by the transfer engine.
pub trait FileSystem: Send + Sync {
    /// Returns true if anything, including a dangling symlink, exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Returns true if `path` is an existing directory.
    fn is_dir(&self, path: &Path) -> bool;

    /// Returns true if `path` is an existing regular file.
    fn is_file(&self, path: &Path) -> bool;

    /// Open a file for streaming reads.
    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>>;

    /// Create a new file, failing if it already exists.
    ///
    /// `flush` on the returned writer must make the data durable.
    fn create_new(&self, path: &Path) -> io::Result<Box<dyn Write + Send>>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Copy the modification time of `from` onto `to`.
    fn copy_mtime(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// `FileSystem` backed by the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFs;

/// A file whose `flush` syncs contents to disk.
struct SyncedFile(fs::File);

impl Write for SyncedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.sync_all()
    }
}

impl FileSystem for LocalFs {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn is_dir(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false)
    }

    fn is_file(&self, path: &Path) -> bool {
        fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(fs::File::open(path)?))
    }

    fn create_new(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
        Ok(Box::new(SyncedFile(file)))
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn copy_mtime(&self, from: &Path, to: &Path) -> io::Result<()> {
        let mtime = fs::metadata(from)?.modified()?;
        filetime::set_file_mtime(to, filetime::FileTime::from_system_time(mtime))
    }
}

/// Ensure the parent directory of a path exists, creating it if necessary.
///
/// # Errors
/// Returns `DirectoryCreationFailed` if the parent exists but is not a
/// directory, or if creation fails.
pub fn ensure_parent_dir_exists(fs: &dyn FileSystem, path: &Path) -> Result<(), EngineError> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    // Relative root
    if parent.as_os_str().is_empty() || fs.is_dir(parent) {
        return Ok(());
    }

    if fs.exists(parent) {
        return Err(EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Parent path exists but is not a directory",
            ),
        });
    }

    fs.create_dir_all(parent)
        .map_err(|e| EngineError::DirectoryCreationFailed {
            path: parent.to_path_buf(),
            source: e,
        })
}

/// Pick a destination that neither exists on disk nor was claimed earlier.
///
/// Appends `_1`, `_2`, ... before the extension until a free name is found:
/// `IMG_0001.jpg` becomes `IMG_0001_1.jpg`.
pub fn unique_destination(fs: &dyn FileSystem, desired: &Path, claimed: &HashSet<PathBuf>) -> PathBuf {
    let is_taken = |candidate: &Path| claimed.contains(candidate) || fs.exists(candidate);

    if !is_taken(desired) {
        return desired.to_path_buf();
    }

    let stem = desired
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = desired.extension().map(|e| e.to_string_lossy().into_owned());

    let mut counter: u64 = 1;
    loop {
        let name = match &extension {
            Some(ext) => format!("{}_{}.{}", stem, counter, ext),
            None => format!("{}_{}", stem, counter),
        };
        let candidate = desired.with_file_name(name);
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}
