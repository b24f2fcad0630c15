//! File-backed key/value store for project records.
//!
//! The whole store is one JSON object on disk. Every mutation is a
//! read-modify-write performed while holding both an in-process mutex and an
//! exclusive advisory lock on a sidecar `<file>.lock`, so a CLI invocation and
//! a running API server never interleave writes. New contents are written to
//! a temp file in the same directory and renamed over the old file.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use fs2::FileExt;
use serde_json::{Map, Value};

use crate::errors::StoreError;

pub type Document = Map<String, Value>;

#[derive(Debug)]
pub struct ProjectStore {
    path: PathBuf,
    lock_path: PathBuf,
    guard: Mutex<()>,
}

impl ProjectStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut lock_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            guard: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored value for `key`, if any.
    pub fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.list()?.remove(key))
    }

    /// Stored value for `key`, or `default` when absent.
    pub fn get_or(&self, key: &str, default: Value) -> Result<Value, StoreError> {
        Ok(self.get(key)?.unwrap_or(default))
    }

    /// Write or overwrite the full value for `key`.
    pub fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.modify(|doc| {
            doc.insert(key.to_string(), value);
            Ok::<_, StoreError>(())
        })
    }

    /// Delete `key`, reporting whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool, StoreError> {
        self.modify(|doc| Ok::<_, StoreError>(doc.remove(key).is_some()))
    }

    /// The full key to value mapping.
    pub fn list(&self) -> Result<Document, StoreError> {
        let _inproc = self.guard.lock().map_err(|_| StoreError::LockPoisoned)?;
        let lock = self.open_lock_file()?;
        lock.lock_shared().map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;
        let result = self.read_document();
        let _ = FileExt::unlock(&lock);
        result
    }

    /// Run a read-modify-write transaction.
    ///
    /// The document is only written back when `f` returns `Ok`, so a rejected
    /// mutation leaves the file untouched.
    pub fn modify<R, E, F>(&self, f: F) -> Result<R, E>
    where
        F: FnOnce(&mut Document) -> Result<R, E>,
        E: From<StoreError>,
    {
        let _inproc = self.guard.lock().map_err(|_| StoreError::LockPoisoned)?;
        let lock = self.open_lock_file()?;
        lock.lock_exclusive().map_err(|source| StoreError::Lock {
            path: self.lock_path.clone(),
            source,
        })?;

        let result: Result<R, E> = (|| {
            let mut doc = self.read_document()?;
            let out = f(&mut doc)?;
            self.write_document(&doc)?;
            Ok(out)
        })();

        let _ = FileExt::unlock(&lock);
        result
    }

    fn open_lock_file(&self) -> Result<File, StoreError> {
        if let Some(parent) = self.lock_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| StoreError::Lock {
                path: self.lock_path.clone(),
                source,
            })
    }

    fn read_document(&self) -> Result<Document, StoreError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::new()),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        if content.trim().is_empty() {
            return Ok(Document::new());
        }
        let value: Value = serde_json::from_str(&content).map_err(|source| StoreError::Corrupt {
            path: self.path.clone(),
            source,
        })?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(StoreError::NotAnObject {
                path: self.path.clone(),
            }),
        }
    }

    fn write_document(&self, doc: &Document) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc).map_err(StoreError::Serialize)?;
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let io_err = |source| StoreError::Io {
            path: self.path.clone(),
            source,
        };
        let mut temp = tempfile::Builder::new()
            .prefix(".tmp-")
            .tempfile_in(parent)
            .map_err(io_err)?;
        temp.write_all(&bytes).map_err(io_err)?;
        temp.as_file().sync_all().map_err(io_err)?;
        temp.into_temp_path()
            .persist(&self.path)
            .map_err(|e| StoreError::Persist {
                path: self.path.clone(),
                source: e.error,
            })?;
        Ok(())
    }
}
