//! Size-rotated daemon log file
//!
//! The background daemon writes through `tracing-appender`'s non-blocking
//! worker into a [`RotatingFileAppender`], which keeps `daemon.log` plus a
//! single `daemon.log.old` backup.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

/// Log file writer that rotates once the file reaches a size limit.
///
/// A file removed from disk while the daemon runs is re-created on the next
/// write. New files are created with mode 0600 on Unix.
pub struct RotatingFileAppender {
    path: PathBuf,
    backup_path: PathBuf,
    max_size_bytes: u64,
    file: Mutex<Option<File>>,
}

impl RotatingFileAppender {
    pub fn new(dir: impl Into<PathBuf>, filename: &str, max_size_bytes: u64) -> Self {
        let dir = dir.into();
        Self {
            path: dir.join(filename),
            backup_path: dir.join(format!("{filename}.old")),
            max_size_bytes,
            file: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    fn open(path: &Path, append: bool) -> io::Result<File> {
        let mut options = fs::OpenOptions::new();
        options.create(true).write(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        #[cfg(unix)]
        options.mode(0o600);
        options.open(path)
    }

    /// Current file, opened (or re-opened after external deletion) on demand
    fn current<'a>(&self, slot: &'a mut Option<File>) -> io::Result<&'a mut File> {
        if !self.path.exists() {
            *slot = None;
        }
        if slot.is_none() {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            *slot = Some(Self::open(&self.path, true)?);
        }
        slot.as_mut()
            .ok_or_else(|| io::Error::other("log file not open"))
    }

    /// current → backup, then start an empty current file
    fn rotate(&self, slot: &mut Option<File>) -> io::Result<()> {
        *slot = None;
        if self.path.exists() {
            fs::rename(&self.path, &self.backup_path)?;
        }
        *slot = Some(Self::open(&self.path, false)?);
        Ok(())
    }
}

impl Write for RotatingFileAppender {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;

        let size = match self.current(&mut slot) {
            Ok(f) => f.metadata()?.len(),
            Err(_) => 0,
        };

        if size >= self.max_size_bytes
            && let Err(e) = self.rotate(&mut slot)
        {
            eprintln!("Failed to rotate log file: {e}");
        }

        self.current(&mut slot)?.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut slot = self
            .file
            .lock()
            .map_err(|e| io::Error::other(format!("Log mutex poisoned: {e}")))?;
        if let Some(file) = slot.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}
