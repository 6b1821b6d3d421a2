//! Atomic file operations for the shared local cache.
//!
//! Every write is staged into a temp file collocated with the target (same
//! directory, so the final rename never crosses a filesystem boundary) and
//! moved into place atomically. Readers therefore never observe a partially
//! written cache file.

use std::io::{self, Read, Write};
use std::path::Path;

use filetime::FileTime;
use tempfile::NamedTempFile;
use tracing::debug;

const COPY_BUFFER_SIZE: usize = 32 * 1024;

/// Receives byte counts while a copy is in flight.
pub trait ProgressListener {
    fn progressed(&self, transferred: u64);
}

/// Atomic write/copy/move with collocated temp files.
///
/// Stateless; shared freely across threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathProcessor;

impl PathProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Atomically replaces `target` with `data`.
    pub fn write(&self, target: &Path, data: &[u8]) -> io::Result<()> {
        let mut staged = self.stage_for(target)?;
        staged.write_all(data)?;
        self.commit(staged, target)
    }

    /// Atomically replaces `target` with the bytes of `source`, returning the
    /// number of bytes copied. The target's last-modified time is set to the
    /// source's.
    pub fn copy(&self, source: &Path, target: &Path) -> io::Result<u64> {
        self.copy_with_progress(source, target, None)
    }

    /// Like [`Self::copy`], reporting progress after each chunk.
    pub fn copy_with_progress(
        &self,
        source: &Path,
        target: &Path,
        listener: Option<&dyn ProgressListener>,
    ) -> io::Result<u64> {
        let mut reader = fs_err::File::open(source)?;
        let source_mtime = FileTime::from_last_modification_time(&reader.metadata()?);

        let mut staged = self.stage_for(target)?;
        let mut buffer = vec![0u8; COPY_BUFFER_SIZE];
        let mut transferred = 0u64;
        loop {
            let read = reader.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            staged.write_all(&buffer[..read])?;
            transferred += read as u64;
            if let Some(listener) = listener {
                listener.progressed(transferred);
            }
        }
        self.commit(staged, target)?;
        filetime::set_file_mtime(target, source_mtime)?;
        debug!("copied {} -> {} ({transferred} bytes)", source.display(), target.display());
        Ok(transferred)
    }

    /// Moves `source` onto `target`, replacing it atomically. Falls back to
    /// copy-then-delete when a plain rename fails (e.g. across filesystems).
    pub fn move_file(&self, source: &Path, target: &Path) -> io::Result<()> {
        if let Some(parent) = target.parent() {
            fs_err::create_dir_all(parent)?;
        }
        match fs_err::rename(source, target) {
            Ok(()) => Ok(()),
            Err(_) => {
                self.copy(source, target)?;
                fs_err::remove_file(source)
            }
        }
    }

    /// Aligns `target`'s last-modified time with `source`'s.
    pub fn propagate_mtime(&self, source: &Path, target: &Path) -> io::Result<()> {
        let metadata = fs_err::metadata(source)?;
        filetime::set_file_mtime(target, FileTime::from_last_modification_time(&metadata))?;
        Ok(())
    }

    fn stage_for(&self, target: &Path) -> io::Result<NamedTempFile> {
        let parent = target.parent().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("target {} has no parent directory", target.display()),
            )
        })?;
        fs_err::create_dir_all(parent)?;
        NamedTempFile::new_in(parent)
    }

    fn commit(&self, staged: NamedTempFile, target: &Path) -> io::Result<()> {
        staged.as_file().sync_all()?;
        staged.persist(target).map_err(|err| err.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use anyhow::Result;

    use super::*;

    #[test]
    fn write_creates_parents() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("a/b/file.bin");
        PathProcessor::new().write(&target, b"payload")?;
        assert_eq!(fs_err::read(&target)?, b"payload");
        Ok(())
    }

    #[test]
    fn write_replaces_existing() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("file.bin");
        let processor = PathProcessor::new();
        processor.write(&target, b"old")?;
        processor.write(&target, b"new")?;
        assert_eq!(fs_err::read(&target)?, b"new");
        Ok(())
    }

    #[test]
    fn copy_preserves_mtime_and_reports_progress() -> Result<()> {
        struct Counter(AtomicU64);
        impl ProgressListener for Counter {
            fn progressed(&self, transferred: u64) {
                self.0.store(transferred, Ordering::SeqCst);
            }
        }

        let dir = tempfile::tempdir()?;
        let source = dir.path().join("source.bin");
        let target = dir.path().join("target.bin");
        fs_err::write(&source, vec![7u8; 100_000])?;
        let stamp = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&source, stamp)?;

        let counter = Counter(AtomicU64::new(0));
        let copied = PathProcessor::new().copy_with_progress(&source, &target, Some(&counter))?;

        assert_eq!(copied, 100_000);
        assert_eq!(counter.0.load(Ordering::SeqCst), 100_000);
        let target_mtime =
            FileTime::from_last_modification_time(&fs_err::metadata(&target)?);
        assert_eq!(target_mtime.unix_seconds(), stamp.unix_seconds());
        Ok(())
    }

    #[test]
    fn move_file_removes_source() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let source = dir.path().join("source.bin");
        let target = dir.path().join("nested/target.bin");
        fs_err::write(&source, b"bytes")?;
        PathProcessor::new().move_file(&source, &target)?;
        assert!(!source.exists());
        assert_eq!(fs_err::read(&target)?, b"bytes");
        Ok(())
    }

    #[test]
    fn no_stray_temp_files_after_commit() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let target = dir.path().join("file.bin");
        PathProcessor::new().write(&target, b"payload")?;
        let entries: Vec<_> = fs_err::read_dir(dir.path())?
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("file.bin")]);
        Ok(())
    }
}
