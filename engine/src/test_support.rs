//! Test doubles shared by the engine's unit tests.

use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use crate::fs_ops::{FileSystem, LocalFs};
use crate::transfer::CROSS_DEVICE_ERROR;

/// Bytes a broken reader yields before it fails.
const BYTES_BEFORE_READ_FAILURE: usize = 4;

/// Pauses the worker the first time a given source is renamed or deleted.
struct Gate {
    path: PathBuf,
    reached: Sender<()>,
    release: Receiver<()>,
}

/// A `LocalFs` wrapper that injects failures on demand.
#[derive(Default)]
pub(crate) struct FaultyFs {
    inner: LocalFs,
    unreadable: Mutex<HashSet<PathBuf>>,
    undeletable: Mutex<HashSet<PathBuf>>,
    missing: Mutex<HashSet<PathBuf>>,
    panicking: Mutex<HashSet<PathBuf>>,
    cross_device: Mutex<HashSet<PathBuf>>,
    /// Path -> opens that still read cleanly before reads start breaking
    broken_reads: Mutex<HashMap<PathBuf, usize>>,
    break_staged_reads: AtomicBool,
    write_budget: Mutex<Option<usize>>,
    corrupt_writes: AtomicBool,
    gate: Mutex<Option<Gate>>,
}

impl FaultyFs {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every later `open_read` of `path` fails with PermissionDenied.
    pub(crate) fn make_unreadable(&self, path: &Path) {
        self.unreadable
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf());
    }

    /// Every later `remove_file` of `path` fails with PermissionDenied.
    pub(crate) fn make_undeletable(&self, path: &Path) {
        self.undeletable
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf());
    }

    /// `exists`, `is_dir` and `is_file` report `path` as absent.
    pub(crate) fn make_missing(&self, path: &Path) {
        self.missing
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf());
    }

    /// Opening `path` for reading panics.
    pub(crate) fn panic_on_read(&self, path: &Path) {
        self.panicking
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf());
    }

    /// Renaming `path` fails as if the destination were on another device.
    pub(crate) fn make_cross_device(&self, path: &Path) {
        self.cross_device
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf());
    }

    /// After `clean_opens` successful opens, readers of `path` yield a few
    /// bytes and then fail.
    pub(crate) fn break_reads_after(&self, path: &Path, clean_opens: usize) {
        self.broken_reads
            .lock()
            .expect("lock poisoned")
            .insert(path.to_path_buf(), clean_opens);
    }

    /// Readers of staging files (`*.part`) yield a few bytes and then fail.
    pub(crate) fn break_staged_reads(&self) {
        self.break_staged_reads.store(true, Ordering::SeqCst);
    }

    /// Writers created from now on fail once `bytes` have been written.
    pub(crate) fn fail_writes_after(&self, bytes: usize) {
        *self.write_budget.lock().expect("lock poisoned") = Some(bytes);
    }

    /// Files created from now on get their first byte flipped.
    pub(crate) fn corrupt_writes(&self) {
        self.corrupt_writes.store(true, Ordering::SeqCst);
    }

    /// Block the first rename/delete of `path`.
    ///
    /// Returns a receiver signalled when the gate is reached and a sender
    /// that lets the blocked call continue.
    pub(crate) fn gate_on(&self, path: &Path) -> (Receiver<()>, Sender<()>) {
        let (reached_tx, reached_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        *self.gate.lock().expect("lock poisoned") = Some(Gate {
            path: path.to_path_buf(),
            reached: reached_tx,
            release: release_rx,
        });
        (reached_rx, release_tx)
    }

    fn pass_gate(&self, path: &Path) {
        let gate = {
            let mut slot = self.gate.lock().expect("lock poisoned");
            match slot.as_ref() {
                Some(gate) if gate.path == path => slot.take(),
                _ => None,
            }
        };
        if let Some(gate) = gate {
            let _ = gate.reached.send(());
            let _ = gate.release.recv();
        }
    }

    fn is_missing(&self, path: &Path) -> bool {
        self.missing.lock().expect("lock poisoned").contains(path)
    }

    fn reads_break(&self, path: &Path) -> bool {
        let staged = path
            .extension()
            .map(|ext| ext == "part")
            .unwrap_or(false);
        if staged && self.break_staged_reads.load(Ordering::SeqCst) {
            return true;
        }

        let mut broken = self.broken_reads.lock().expect("lock poisoned");
        match broken.get_mut(path) {
            Some(0) => true,
            Some(clean_opens) => {
                *clean_opens -= 1;
                false
            }
            None => false,
        }
    }
}

/// Reader that yields a few bytes and then fails.
struct BrokenReader {
    inner: Box<dyn Read + Send>,
    remaining: usize,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "injected mid-stream read failure"));
        }
        let limit = buf.len().min(self.remaining);
        let n = self.inner.read(&mut buf[..limit])?;
        self.remaining -= n;
        if n == 0 {
            self.remaining = 0;
        }
        Ok(n)
    }
}

/// Writer that fails once its byte budget is spent.
struct FailingWriter {
    inner: Box<dyn Write + Send>,
    remaining: usize,
}

impl Write for FailingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.remaining == 0 {
            return Err(io::Error::new(io::ErrorKind::Other, "injected write failure"));
        }
        let limit = buf.len().min(self.remaining);
        let n = self.inner.write(&buf[..limit])?;
        self.remaining -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writer that flips the first byte it sees.
struct CorruptingWriter {
    inner: Box<dyn Write + Send>,
    flipped: bool,
}

impl Write for CorruptingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if !self.flipped && !buf.is_empty() {
            self.flipped = true;
            let mut altered = buf.to_vec();
            altered[0] ^= 0xff;
            self.inner.write_all(&altered)?;
            return Ok(buf.len());
        }
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl FileSystem for FaultyFs {
    fn exists(&self, path: &Path) -> bool {
        !self.is_missing(path) && self.inner.exists(path)
    }

    fn is_dir(&self, path: &Path) -> bool {
        !self.is_missing(path) && self.inner.is_dir(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        !self.is_missing(path) && self.inner.is_file(path)
    }

    fn open_read(&self, path: &Path) -> io::Result<Box<dyn Read + Send>> {
        let panics = self.panicking.lock().expect("lock poisoned").contains(path);
        if panics {
            panic!("injected panic reading {}", path.display());
        }
        if self.unreadable.lock().expect("lock poisoned").contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected read failure"));
        }

        let reader = self.inner.open_read(path)?;
        if self.reads_break(path) {
            return Ok(Box::new(BrokenReader {
                inner: reader,
                remaining: BYTES_BEFORE_READ_FAILURE,
            }));
        }
        Ok(reader)
    }

    fn create_new(&self, path: &Path) -> io::Result<Box<dyn Write + Send>> {
        let writer = self.inner.create_new(path)?;
        if let Some(budget) = *self.write_budget.lock().expect("lock poisoned") {
            return Ok(Box::new(FailingWriter {
                inner: writer,
                remaining: budget,
            }));
        }
        if self.corrupt_writes.load(Ordering::SeqCst) {
            return Ok(Box::new(CorruptingWriter {
                inner: writer,
                flipped: false,
            }));
        }
        Ok(writer)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        self.inner.create_dir_all(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.pass_gate(from);
        if self.cross_device.lock().expect("lock poisoned").contains(from) {
            return Err(io::Error::from_raw_os_error(CROSS_DEVICE_ERROR));
        }
        self.inner.rename(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        self.pass_gate(path);
        if self.undeletable.lock().expect("lock poisoned").contains(path) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "injected delete failure"));
        }
        self.inner.remove_file(path)
    }

    fn copy_mtime(&self, from: &Path, to: &Path) -> io::Result<()> {
        self.inner.copy_mtime(from, to)
    }
}

/// Names of every entry directly inside `dir`, sorted.
pub(crate) fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .expect("Failed to read dir")
        .map(|entry| {
            entry
                .expect("Failed to read entry")
                .file_name()
                .to_string_lossy()
                .into_owned()
        })
        .collect();
    names.sort();
    names
}
