//! The properties-style sidecar file recording artifact origins and
//! update-check outcomes.
//!
//! One tracking file lives next to the artifacts it describes. Readers take a
//! shared OS lock, writers an exclusive one; a write rewrites the whole file
//! region under the exclusive lock, so concurrent readers observe either the
//! pre-write or the post-write state, never a mix.

use std::collections::BTreeMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use fs2::FileExt;
use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

const LOCK_RETRIES: usize = 8;
const LOCK_RETRY_SLEEP: Duration = Duration::from_millis(50);

/// Process-wide pool of per-path monitors guarding intra-process access to
/// tracking files. Weak entries keep the pool from growing with the cache.
static MONITORS: Lazy<Mutex<FxHashMap<PathBuf, Weak<Mutex<()>>>>> =
    Lazy::new(|| Mutex::new(FxHashMap::default()));

fn monitor_for(path: &Path) -> Arc<Mutex<()>> {
    let key = canonical_key(path);
    let mut monitors = MONITORS
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(existing) = monitors.get(&key).and_then(Weak::upgrade) {
        return existing;
    }
    monitors.retain(|_, weak| weak.strong_count() > 0);
    let monitor = Arc::new(Mutex::new(()));
    monitors.insert(key, Arc::downgrade(&monitor));
    monitor
}

/// Canonicalizes the parent (the file itself may not exist yet) so aliased
/// spellings of one tracking file share a monitor.
fn canonical_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => match fs_err::canonicalize(parent) {
            Ok(parent) => parent.join(name),
            Err(_) => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

/// Reads and atomically merges tracking files.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackingFileManager;

impl TrackingFileManager {
    pub fn new() -> Self {
        Self
    }

    /// Reads the tracking file, returning an empty map when it is absent.
    pub fn read(&self, path: &Path) -> io::Result<BTreeMap<String, String>> {
        let monitor = monitor_for(path);
        let _guard = monitor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut file = match fs_err::OpenOptions::new().read(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(err) => return Err(err),
        };
        lock_with_retry(&file, false)?;
        let mut content = String::new();
        let result = file.read_to_string(&mut content);
        let _ = file.file().unlock();
        result?;
        Ok(parse(&content))
    }

    /// Merges `updates` into the tracking file and returns the merged map.
    /// A `None` value removes the key. The file (and its parents) are created
    /// on demand.
    pub fn update(
        &self,
        path: &Path,
        updates: &BTreeMap<String, Option<String>>,
    ) -> io::Result<BTreeMap<String, String>> {
        if let Some(parent) = path.parent() {
            fs_err::create_dir_all(parent)?;
        }
        let monitor = monitor_for(path);
        let _guard = monitor
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);

        let mut file = fs_err::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        lock_with_retry(&file, true)?;
        let result = Self::merge_locked(&mut file, updates);
        let _ = file.file().unlock();
        if result.is_ok() {
            debug!("updated tracking file {}", path.display());
        }
        result
    }

    fn merge_locked(
        file: &mut fs_err::File,
        updates: &BTreeMap<String, Option<String>>,
    ) -> io::Result<BTreeMap<String, String>> {
        let mut content = String::new();
        file.read_to_string(&mut content)?;
        let mut entries = parse(&content);
        for (key, value) in updates {
            match value {
                Some(value) => {
                    entries.insert(key.clone(), value.clone());
                }
                None => {
                    entries.remove(key);
                }
            }
        }
        let serialized = serialize(&entries);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(serialized.as_bytes())?;
        file.file().set_len(serialized.len() as u64)?;
        file.file().sync_all()?;
        Ok(entries)
    }
}

/// Takes the OS lock, retrying a bounded number of times when another handle
/// in this process still holds a conflicting lock, then falling back to a
/// blocking acquisition for inter-process contention.
fn lock_with_retry(file: &fs_err::File, exclusive: bool) -> io::Result<()> {
    for attempt in 0..LOCK_RETRIES {
        let result = if exclusive {
            file.file().try_lock_exclusive()
        } else {
            fs2::FileExt::try_lock_shared(file.file())
        };
        match result {
            Ok(()) => return Ok(()),
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                if attempt + 1 == LOCK_RETRIES {
                    break;
                }
                std::thread::sleep(LOCK_RETRY_SLEEP);
            }
            Err(err) => return Err(err),
        }
    }
    warn!("tracking file still contended after {LOCK_RETRIES} attempts, blocking");
    if exclusive {
        file.file().lock_exclusive()
    } else {
        file.file().lock_shared()
    }
}

fn parse(content: &str) -> BTreeMap<String, String> {
    let mut entries = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some(separator) = find_separator(line) else {
            entries.insert(unescape(line), String::new());
            continue;
        };
        let key = unescape(&line[..separator]);
        let value = unescape(&line[separator + 1..]);
        entries.insert(key, value);
    }
    entries
}

fn serialize(entries: &BTreeMap<String, String>) -> String {
    let mut out = String::from("#tracking file, managed by the local repository\n");
    for (key, value) in entries {
        out.push_str(&escape(key));
        out.push('=');
        out.push_str(&escape(value));
        out.push('\n');
    }
    out
}

/// First `=` not preceded by a backslash.
fn find_separator(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut escaped = false;
    for (index, byte) in bytes.iter().enumerate() {
        match byte {
            b'\\' if !escaped => escaped = true,
            b'=' if !escaped => return Some(index),
            _ => escaped = false,
        }
    }
    None
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '=' => out.push_str("\\="),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '#' => out.push_str("\\#"),
            _ => out.push(c),
        }
    }
    out
}

fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
