//! On-disk layout for the local backend
//!
//! ```text
//! <root>/[<namespace>/]<workspace>/<session>/
//!   .lock
//!   session.json
//!   parameters.json
//!   logs/logs.jsonl
//!   tracks/<safe(track_name)>/{metadata.json, data.msgpack}
//!   files/{.files_metadata.json, <prefix_segments>/<file_id>/<filename>}
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::SessionHandle;
use crate::error::Result;
use crate::files::prefix_segments;

/// Path helpers for one session directory
#[derive(Debug, Clone)]
pub struct SessionPaths {
    dir: PathBuf,
}

impl SessionPaths {
    pub fn new(root: &Path, handle: &SessionHandle) -> Self {
        let mut dir = root.to_path_buf();
        if let Some(namespace) = &handle.namespace {
            dir.push(namespace);
        }
        dir.push(&handle.workspace);
        dir.push(&handle.name);
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.dir.join(".lock")
    }

    #[must_use]
    pub fn session_file(&self) -> PathBuf {
        self.dir.join("session.json")
    }

    #[must_use]
    pub fn parameters_file(&self) -> PathBuf {
        self.dir.join("parameters.json")
    }

    #[must_use]
    pub fn logs_file(&self) -> PathBuf {
        self.dir.join("logs").join("logs.jsonl")
    }

    #[must_use]
    pub fn tracks_dir(&self) -> PathBuf {
        self.dir.join("tracks")
    }

    #[must_use]
    pub fn track_dir(&self, track_name: &str) -> PathBuf {
        self.tracks_dir().join(safe_track_name(track_name))
    }

    #[must_use]
    pub fn track_metadata_file(&self, track_name: &str) -> PathBuf {
        self.track_dir(track_name).join("metadata.json")
    }

    #[must_use]
    pub fn track_data_file(&self, track_name: &str) -> PathBuf {
        self.track_dir(track_name).join("data.msgpack")
    }

    #[must_use]
    pub fn files_dir(&self) -> PathBuf {
        self.dir.join("files")
    }

    #[must_use]
    pub fn files_metadata_file(&self) -> PathBuf {
        self.files_dir().join(".files_metadata.json")
    }

    /// Destination directory for one uploaded file
    #[must_use]
    pub fn file_dir(&self, prefix: &str, file_id: &str) -> PathBuf {
        let mut dir = self.files_dir();
        for segment in prefix_segments(prefix) {
            dir.push(segment);
        }
        dir.push(file_id);
        dir
    }
}

/// Filesystem-safe directory name for a hierarchical track name.
///
/// The logical name keeps its slashes in `metadata.json`; on disk the
/// separators become `__` so the track stays a single directory.
#[must_use]
pub fn safe_track_name(name: &str) -> String {
    name.replace(['/', '\\'], "__")
}

/// Write JSON to `path` atomically: serialize to `<path>.tmp`, then rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(value)?;
    let mut file = fs::File::create(&tmp)?;
    file.write_all(body.as_bytes())?;
    file.write_all(b"\n")?;
    drop(file);
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a JSON file, returning `None` when it does not exist
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let body = fs::read_to_string(path)?;
    Ok(Some(serde_json::from_str(&body)?))
}
