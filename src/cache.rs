//! JSON cache for query results.
//!
//! Entries live at `<root>/<namespace>/<key>.json`. Each query takes
//! [`CacheFlags`] deciding whether it may read a cached answer, write a
//! fresh one, or both.

use serde_json::Value;
use std::fs;
use std::io;
use std::ops::BitOr;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from reading or writing cache entries.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cache entry {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("no cache directory available on this platform")]
    NoCacheDir,
}

/// Which side of the cache a call participates in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CacheFlags(u8);

impl CacheFlags {
    pub const NONE: Self = Self(0);
    /// Answer from the cache when an entry exists.
    pub const LOAD: Self = Self(1);
    /// Store a freshly fetched answer.
    pub const SAVE: Self = Self(2);
    pub const ALL: Self = Self(3);

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub const fn load(self) -> bool {
        self.contains(Self::LOAD)
    }

    #[must_use]
    pub const fn save(self) -> bool {
        self.contains(Self::SAVE)
    }
}

impl BitOr for CacheFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Storage for cached query results.
pub trait Cache: Send + Sync {
    fn is_cached(&self, namespace: &str, key: &str) -> bool;

    /// `Ok(None)` when there is no entry.
    fn get_json(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError>;

    fn save_json(&self, namespace: &str, key: &str, value: &Value) -> Result<(), CacheError>;
}

/// A [`Cache`] backed by one JSON file per entry.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    root: PathBuf,
}

impl JsonFileCache {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<user cache dir>/steamshell`, e.g. `~/.cache/steamshell` on Linux.
    pub fn user_default() -> Result<Self, CacheError> {
        dirs::cache_dir()
            .map(|dir| Self::new(dir.join("steamshell")))
            .ok_or(CacheError::NoCacheDir)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, namespace: &str, key: &str) -> PathBuf {
        self.root
            .join(sanitize(namespace))
            .join(format!("{}.json", sanitize(key)))
    }
}

/// Keep keys from escaping their namespace directory.
fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '_' } else { c })
        .collect::<String>()
        .trim_start_matches('.')
        .to_string()
}

impl Cache for JsonFileCache {
    fn is_cached(&self, namespace: &str, key: &str) -> bool {
        self.path(namespace, key).is_file()
    }

    fn get_json(&self, namespace: &str, key: &str) -> Result<Option<Value>, CacheError> {
        let path = self.path(namespace, key);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        debug!(path = %path.display(), "Cache hit");
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| CacheError::Json { path, source })
    }

    fn save_json(&self, namespace: &str, key: &str, value: &Value) -> Result<(), CacheError> {
        let path = self.path(namespace, key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|source| CacheError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let text = serde_json::to_string_pretty(value).map_err(|source| CacheError::Json {
            path: path.clone(),
            source,
        })?;

        // Write then rename so a crash never leaves half an entry behind.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, text).map_err(|source| CacheError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, &path).map_err(|source| {
            warn!(path = %path.display(), "Failed to store cache entry");
            CacheError::Io { path, source }
        })
    }
}
