//! Per-tab storage slots. A slot survives a reload of its scope but is not a
//! durable profile: `MemorySlot` lives as long as the process and `FileSlot` is
//! meant for a runtime directory (tmpfs). Slot operations cannot fail from the
//! caller's point of view; I/O problems are logged and the value is dropped.

use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, PoisonError},
};
use tracing::{debug, warn};
use uuid::Uuid;

pub trait SessionSlot: Send + Sync + fmt::Debug {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, key: &str, value: &str);
    fn remove(&self, key: &str);
}

/// In-process slot. Clones share the same entries, so a new `CredentialStore`
/// built over a clone sees what a previous one wrote (a "reload").
#[derive(Clone, Default)]
pub struct MemorySlot {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySlot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_entry(key: &str, value: &str) -> Self {
        let slot = Self::new();
        slot.write(key, value);
        slot
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl SessionSlot for MemorySlot {
    fn read(&self, key: &str) -> Option<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn write(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
    }

    fn remove(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

impl fmt::Debug for MemorySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let keys: Vec<&String> = entries.keys().collect();
        f.debug_struct("MemorySlot").field("keys", &keys).finish()
    }
}

/// File-backed slot: one file per key inside `dir`.
#[derive(Clone, Debug)]
pub struct FileSlot {
    dir: PathBuf,
}

impl FileSlot {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        // Keys are plain names; anything that would escape `dir` is refused.
        let name = Path::new(key).file_name()?;
        if name != std::ffi::OsStr::new(key) {
            return None;
        }
        Some(self.dir.join(name))
    }
}

impl SessionSlot for FileSlot {
    fn read(&self, key: &str) -> Option<String> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(value) => {
                let value = value.trim().to_string();
                (!value.is_empty()).then_some(value)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
            Err(err) => {
                warn!("Failed to read session slot {}: {err}", path.display());
                None
            }
        }
    }

    fn write(&self, key: &str, value: &str) {
        let Some(path) = self.path_for(key) else {
            warn!("Refusing to write session slot with invalid key");
            return;
        };
        if let Err(err) = create_private_dir(&self.dir) {
            warn!("Failed to create session dir {}: {err}", self.dir.display());
            return;
        }
        if let Err(err) = replace_file(&self.dir, &path, value) {
            warn!("Failed to write session slot {}: {err}", path.display());
            return;
        }
        debug!("session slot written: {}", path.display());
    }

    fn remove(&self, key: &str) {
        let Some(path) = self.path_for(key) else {
            return;
        };
        match fs::remove_file(&path) {
            Ok(()) => debug!("session slot removed: {}", path.display()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!("Failed to remove session slot {}: {err}", path.display()),
        }
    }
}

fn create_private_dir(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(dir)
}

/// Writes `value` to a fresh owner-only temp file in `dir` and renames it over
/// `path`. Whatever sat at `path` before (a stale file, a symlink) is replaced,
/// never written through.
fn replace_file(dir: &Path, path: &Path, value: &str) -> io::Result<()> {
    let tmp_path = dir.join(format!(".slot.{}.tmp", Uuid::new_v4().simple()));

    let result = (|| -> io::Result<()> {
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
