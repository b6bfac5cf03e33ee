//! Safe transfer engine.
//!
//! Executes a single `FileMoveItem` and classifies the result as a
//! `TransferOutcome`. Two strategies exist:
//!
//! - **standard**: one rename (falling back to copy + delete across devices)
//! - **safe**: copy to a staging file next to the destination, compare the
//!   digests of source and copy, and only then rename into place and delete
//!   the source
//!
//! A safe move that fails at any point before the source deletion leaves the
//! source untouched and removes the staging file. Errors never escape as
//! panics or `Err`: they become `error` outcomes for the job's detail log.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::checksums::{compute_reader_checksum, ChecksumAlgorithm, ChecksumValue};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::fs_ops::{ensure_parent_dir_exists, unique_destination, FileSystem};
use crate::model::{FileMoveItem, TransferOptions, TransferOutcome};

#[cfg(unix)]
pub(crate) const CROSS_DEVICE_ERROR: i32 = 18; // EXDEV
#[cfg(windows)]
pub(crate) const CROSS_DEVICE_ERROR: i32 = 17; // ERROR_NOT_SAME_DEVICE
#[cfg(not(any(unix, windows)))]
pub(crate) const CROSS_DEVICE_ERROR: i32 = -1;

/// Moves files according to a job's `TransferOptions`.
pub struct TransferEngine {
    fs: Arc<dyn FileSystem>,
    algorithm: ChecksumAlgorithm,
    buffer_size: usize,
}

impl TransferEngine {
    pub fn new(fs: Arc<dyn FileSystem>, config: &EngineConfig) -> Self {
        TransferEngine {
            fs,
            algorithm: config.checksum_algorithm,
            buffer_size: config.copy_buffer_size.max(1),
        }
    }

    /// Execute one item.
    ///
    /// `claimed` holds the destinations already used by earlier items of the
    /// same job; the resolved destination is added to it whenever a file lands
    /// there (or would, in a dry run), so no two items share a destination.
    pub fn transfer(
        &self,
        item: &FileMoveItem,
        options: TransferOptions,
        claimed: &mut HashSet<PathBuf>,
    ) -> TransferOutcome {
        let source = item.source.as_path();

        if !self.fs.exists(source) {
            debug!(source = %source.display(), "source not found, skipping");
            return TransferOutcome::skipped(source, "source not found");
        }
        if !self.fs.is_file(source) {
            debug!(source = %source.display(), "source is not a regular file, skipping");
            return TransferOutcome::skipped(source, "not a regular file");
        }
        if item.source == item.destination {
            return TransferOutcome::skipped(source, "already at destination");
        }

        let destination = unique_destination(self.fs.as_ref(), &item.destination, claimed);
        let reason = item.describe();

        if options.dry_run {
            debug!(
                source = %source.display(),
                destination = %destination.display(),
                "dry run"
            );
            claimed.insert(destination.clone());
            return TransferOutcome::dry_run(source, destination, reason);
        }

        let result = if options.safe_mode {
            self.move_verified(source, &destination).map(Some)
        } else {
            self.move_standard(source, &destination).map(|()| None)
        };

        match result {
            Ok(digest) => {
                debug!(
                    source = %source.display(),
                    destination = %destination.display(),
                    "moved"
                );
                claimed.insert(destination.clone());
                TransferOutcome::moved(source, destination, reason, digest)
            }
            Err(e @ EngineError::DeleteFailed { .. }) => {
                // The copy is already in place at the destination.
                warn!(source = %source.display(), error = %e, "copied but source was kept");
                claimed.insert(destination.clone());
                TransferOutcome::error(
                    source,
                    Some(destination),
                    format!("copied but source could not be removed: {}", e),
                )
            }
            Err(e) => {
                warn!(source = %source.display(), error = %e, "transfer failed");
                TransferOutcome::error(source, Some(destination), e.to_string())
            }
        }
    }

    /// Compute the digest of a file through the engine's filesystem.
    pub fn digest(&self, path: &Path) -> Result<ChecksumValue, EngineError> {
        let read_error = |e| EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        };
        let mut reader = self.fs.open_read(path).map_err(read_error)?;
        compute_reader_checksum(&mut reader, self.algorithm).map_err(read_error)
    }

    fn move_standard(&self, source: &Path, destination: &Path) -> Result<(), EngineError> {
        ensure_parent_dir_exists(self.fs.as_ref(), destination)?;

        match self.fs.rename(source, destination) {
            Ok(()) => Ok(()),
            Err(e) if e.raw_os_error() == Some(CROSS_DEVICE_ERROR) => {
                debug!(source = %source.display(), "rename crosses devices, copying instead");
                let staged = self.stage_copy(source, destination)?;
                self.commit(&staged, destination)?;
                self.fs
                    .remove_file(source)
                    .map_err(|e| EngineError::DeleteFailed {
                        path: source.to_path_buf(),
                        source: e,
                    })
            }
            Err(e) => Err(EngineError::RenameFailed {
                from: source.to_path_buf(),
                to: destination.to_path_buf(),
                source: e,
            }),
        }
    }

    fn move_verified(&self, source: &Path, destination: &Path) -> Result<ChecksumValue, EngineError> {
        ensure_parent_dir_exists(self.fs.as_ref(), destination)?;

        let expected = self.digest(source)?;
        let staged = self.stage_copy(source, destination)?;

        let actual = match self.digest(&staged) {
            Ok(actual) => actual,
            Err(e) => {
                self.discard(&staged);
                return Err(e);
            }
        };

        if actual != expected {
            self.discard(&staged);
            warn!(
                source = %source.display(),
                expected = %expected,
                actual = %actual,
                "integrity verification failed"
            );
            return Err(EngineError::IntegrityMismatch {
                path: destination.to_path_buf(),
                expected: expected.hex().to_string(),
                actual: actual.hex().to_string(),
            });
        }

        self.commit(&staged, destination)?;
        self.fs
            .remove_file(source)
            .map_err(|e| EngineError::DeleteFailed {
                path: source.to_path_buf(),
                source: e,
            })?;

        Ok(expected)
    }

    /// Copy `source` to a hidden staging file beside `destination`.
    fn stage_copy(&self, source: &Path, destination: &Path) -> Result<PathBuf, EngineError> {
        let staged = staging_path(destination);
        self.copy_contents(source, &staged)?;

        if let Err(e) = self.fs.copy_mtime(source, &staged) {
            debug!(path = %staged.display(), error = %e, "could not preserve modification time");
        }
        Ok(staged)
    }

    fn copy_contents(&self, source: &Path, staged: &Path) -> Result<u64, EngineError> {
        let mut reader = self.fs.open_read(source).map_err(|e| EngineError::ReadError {
            path: source.to_path_buf(),
            source: e,
        })?;
        let mut writer = self.fs.create_new(staged).map_err(|e| EngineError::WriteError {
            path: staged.to_path_buf(),
            source: e,
        })?;

        let result = self.pump(&mut reader, &mut writer, source, staged);
        drop(writer);
        if result.is_err() {
            self.discard(staged);
        }
        result
    }

    fn pump(
        &self,
        reader: &mut dyn Read,
        writer: &mut dyn Write,
        source: &Path,
        staged: &Path,
    ) -> Result<u64, EngineError> {
        let write_error = |e| EngineError::WriteError {
            path: staged.to_path_buf(),
            source: e,
        };
        let mut buffer = vec![0u8; self.buffer_size];
        let mut copied: u64 = 0;

        loop {
            let n = match reader.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(EngineError::ReadError {
                        path: source.to_path_buf(),
                        source: e,
                    })
                }
            };
            writer.write_all(&buffer[..n]).map_err(write_error)?;
            copied += n as u64;
        }

        writer.flush().map_err(write_error)?;
        Ok(copied)
    }

    /// Rename a staged copy to its final name without clobbering.
    fn commit(&self, staged: &Path, destination: &Path) -> Result<(), EngineError> {
        let rename_error = |source| EngineError::RenameFailed {
            from: staged.to_path_buf(),
            to: destination.to_path_buf(),
            source,
        };

        if self.fs.exists(destination) {
            self.discard(staged);
            return Err(rename_error(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "destination appeared during transfer",
            )));
        }

        self.fs.rename(staged, destination).map_err(|e| {
            self.discard(staged);
            rename_error(e)
        })
    }

    fn discard(&self, staged: &Path) {
        if let Err(e) = self.fs.remove_file(staged) {
            warn!(path = %staged.display(), error = %e, "failed to remove staging file");
        }
    }
}

fn staging_path(destination: &Path) -> PathBuf {
    let name = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    destination.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()))
}
