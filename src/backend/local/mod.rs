//! Local filesystem backend
//!
//! Persists a session as a deterministic directory tree. Log records are
//! append-only JSON lines, parameter and metadata files are replaced
//! atomically (temp file + rename), track data is a stream of concatenated
//! MessagePack records, and uploaded files are stored content-addressed
//! under a fresh id with a streamed SHA-256 checksum.

mod layout;


use std::collections::VecDeque;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::{
    AppendResult, Backend, IndexedPoint, OpenedSession, RangeRead, SessionHandle, SessionSpec,
    TimeQuery, TimeRead, TrackMetadata, TrackSummary,
};
use crate::error::{DreamlakeError, Result};
use crate::files::{validate_prefix, FileArtifact, FileFilter, FileUploadRequest,
    MAX_FILE_SIZE_BYTES};
use crate::logs::LogRecord;
use crate::params::FlatMap;
use crate::track::encoding::EncodedRecord;
use crate::value::{point_ts, FieldMap};

use layout::{read_json_opt, write_json_atomic, SessionPaths};

pub use layout::safe_track_name;

const COPY_BUF_SIZE: usize = 64 * 1024;

/// `session.json` contents
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionFile {
    name: String,
    workspace: String,
    namespace: Option<String>,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    folder: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Backend writing a local directory tree rooted at `root`
#[derive(Debug)]
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn paths(&self, handle: &SessionHandle) -> SessionPaths {
        SessionPaths::new(&self.root, handle)
    }

    /// Take the per-session lock. A leftover lock from a crashed process
    /// must be removed manually before the session can be reopened.
    fn acquire_lock(&self, paths: &SessionPaths) -> Result<()> {
        let lock = paths.lock_file();
        match fs::OpenOptions::new().write(true).create_new(true).open(&lock) {
            Ok(mut file) => {
                let _ = write!(file, "{}", std::process::id());
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(DreamlakeError::Conflict(format!(
                    "session lock already held: {}",
                    lock.display()
                )))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Recover the next log sequence number from the tail of `logs.jsonl`
    fn next_log_sequence(&self, paths: &SessionPaths) -> Result<u64> {
        let path = paths.logs_file();
        if !path.exists() {
            return Ok(0);
        }
        let body = fs::read_to_string(&path)?;
        let Some(last) = body.lines().rev().find(|l| !l.trim().is_empty()) else {
            return Ok(0);
        };
        let record: LogRecord = serde_json::from_str(last).map_err(|e| {
            DreamlakeError::Corrupt(format!("malformed tail of {}: {e}", path.display()))
        })?;
        Ok(record.sequence_number + 1)
    }

    fn track_summary(&self, paths: &SessionPaths, track_name: &str) -> Result<TrackSummary> {
        read_json_opt(&paths.track_metadata_file(track_name))?
            .ok_or_else(|| DreamlakeError::NotFound(format!("track {track_name}")))
    }

    /// Walk every logical point in a track's stream in append order.
    ///
    /// The visitor receives the running logical index and the expanded point
    /// and returns `false` to stop early.
    fn scan_points<F>(&self, data_file: &Path, mut visit: F) -> Result<()>
    where
        F: FnMut(u64, FieldMap) -> Result<bool>,
    {
        if !data_file.exists() {
            return Ok(());
        }
        let bytes = fs::read(data_file)?;
        let len = bytes.len() as u64;
        let mut cursor = std::io::Cursor::new(bytes);
        let mut index: u64 = 0;
        while cursor.position() < len {
            let offset = cursor.position();
            let mut de = rmp_serde::Deserializer::new(&mut cursor);
            let raw = serde_json::Value::deserialize(&mut de).map_err(|e| {
                DreamlakeError::Corrupt(format!(
                    "track stream {} at byte {offset}: {e}",
                    data_file.display()
                ))
            })?;
            let serde_json::Value::Object(map) = raw else {
                return Err(DreamlakeError::Corrupt(format!(
                    "track stream {} at byte {offset}: record is not a map",
                    data_file.display()
                )));
            };
            for point in EncodedRecord::classify(map)?.expand()? {
                if !visit(index, point)? {
                    return Ok(());
                }
                index += 1;
            }
        }
        Ok(())
    }
}

impl LocalBackend {
    fn upsert_contents(
        &self,
        paths: &SessionPaths,
        spec: &SessionSpec,
        handle: &SessionHandle,
    ) -> Result<OpenedSession> {
        let now = Utc::now();
        let created_at = read_json_opt::<SessionFile>(&paths.session_file())?
            .map_or(now, |existing| existing.created_at);
        write_json_atomic(
            &paths.session_file(),
            &SessionFile {
                name: spec.name.clone(),
                workspace: spec.workspace.clone(),
                namespace: spec.namespace.clone(),
                description: spec.description.clone(),
                tags: spec.tags.clone(),
                folder: spec.folder.clone(),
                created_at,
                updated_at: now,
            },
        )?;
        fs::create_dir_all(paths.tracks_dir())?;
        fs::create_dir_all(paths.files_dir())?;

        let parameters: FlatMap =
            read_json_opt(&paths.parameters_file())?.unwrap_or_default();
        let next_log_sequence = self.next_log_sequence(paths)?;

        Ok(OpenedSession {
            handle: handle.clone(),
            parameters,
            next_log_sequence,
        })
    }
}

impl Backend for LocalBackend {
    fn upsert_session(&mut self, spec: &SessionSpec) -> Result<OpenedSession> {
        let handle = SessionHandle {
            namespace: spec.namespace.clone(),
            workspace: spec.workspace.clone(),
            name: spec.name.clone(),
            remote_id: None,
        };
        let paths = self.paths(&handle);
        fs::create_dir_all(paths.dir())?;
        self.acquire_lock(&paths)?;

        let opened = self.upsert_contents(&paths, spec, &handle);
        if opened.is_err() {
            // Do not leave a lock behind for a session that never opened
            let _ = fs::remove_file(paths.lock_file());
        }
        opened
    }

    fn append_logs(&mut self, handle: &SessionHandle, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let path = self.paths(handle).logs_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut body = String::new();
        for record in records {
            body.push_str(&serde_json::to_string(record)?);
            body.push('\n');
        }
        let mut file = fs::OpenOptions::new().append(true).create(true).open(path)?;
        file.write_all(body.as_bytes())?;
        Ok(())
    }

    fn replace_parameters(&mut self, handle: &SessionHandle, map: &FlatMap) -> Result<()> {
        write_json_atomic(&self.paths(handle).parameters_file(), map)
    }

    fn ensure_track(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        meta: &TrackMetadata,
    ) -> Result<()> {
        let paths = self.paths(handle);
        fs::create_dir_all(paths.track_dir(track_name))?;
        let metadata_file = paths.track_metadata_file(track_name);
        let now = Utc::now();
        let mut summary = read_json_opt::<TrackSummary>(&metadata_file)?.unwrap_or(TrackSummary {
            name: track_name.to_string(),
            display_name: None,
            description: None,
            tags: Vec::new(),
            metadata: std::collections::HashMap::new(),
            total_data_points: 0,
            created_at: now,
            updated_at: now,
        });
        if meta.display_name.is_some() {
            summary.display_name = meta.display_name.clone();
        }
        if meta.description.is_some() {
            summary.description = meta.description.clone();
        }
        if !meta.tags.is_empty() {
            summary.tags = meta.tags.clone();
        }
        if !meta.metadata.is_empty() {
            summary.metadata = meta.metadata.clone();
        }
        summary.updated_at = now;
        write_json_atomic(&metadata_file, &summary)
    }

    fn write_track_records(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        records: &[EncodedRecord],
    ) -> Result<AppendResult> {
        let paths = self.paths(handle);
        let mut summary = self.track_summary(&paths, track_name)?;

        let mut count: u64 = 0;
        for record in records {
            count += record.len()? as u64;
        }

        let data_file = paths.track_data_file(track_name);
        let mut file = fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(&data_file)?;
        // One write per record: a crash can drop trailing records but never
        // tear one.
        for record in records {
            let bytes = rmp_serde::to_vec(&serde_json::Value::Object(record.as_map().clone()))?;
            file.write_all(&bytes)?;
        }

        let start_index = summary.total_data_points;
        summary.total_data_points += count;
        summary.updated_at = Utc::now();
        write_json_atomic(&paths.track_metadata_file(track_name), &summary)?;

        Ok(AppendResult { start_index, count })
    }

    fn read_track_range(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        start_index: u64,
        limit: usize,
    ) -> Result<RangeRead> {
        let paths = self.paths(handle);
        let summary = self.track_summary(&paths, track_name)?;
        let end_index = start_index.saturating_add(limit as u64);

        let mut items = Vec::new();
        self.scan_points(&paths.track_data_file(track_name), |index, data| {
            if index >= end_index {
                return Ok(false);
            }
            if index >= start_index {
                items.push(IndexedPoint { index, data });
            }
            Ok(true)
        })?;

        Ok(RangeRead {
            total: items.len(),
            has_more: summary.total_data_points > end_index,
            items,
        })
    }

    fn read_track_time(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        query: &TimeQuery,
    ) -> Result<TimeRead> {
        let paths = self.paths(handle);
        // Surfaces NotFound for tracks that were never created
        self.track_summary(&paths, track_name)?;

        let limit = query.effective_limit();
        if limit == 0 {
            return Ok(TimeRead { items: Vec::new() });
        }
        let mut window: VecDeque<IndexedPoint> = VecDeque::new();
        self.scan_points(&paths.track_data_file(track_name), |index, data| {
            let Some(ts) = point_ts(&data).ok().flatten() else {
                return Err(DreamlakeError::Corrupt(format!(
                    "point {index} in track {track_name} has no numeric _ts"
                )));
            };
            if !query.contains(ts) {
                return Ok(true);
            }
            window.push_back(IndexedPoint { index, data });
            if query.reverse {
                // Keep only the most recent `limit` matches
                if window.len() > limit {
                    window.pop_front();
                }
                Ok(true)
            } else {
                Ok(window.len() < limit)
            }
        })?;

        let items: Vec<IndexedPoint> = if query.reverse {
            window.into_iter().rev().collect()
        } else {
            window.into_iter().collect()
        };
        Ok(TimeRead { items })
    }

    fn list_tracks(&mut self, handle: &SessionHandle) -> Result<Vec<TrackSummary>> {
        let tracks_dir = self.paths(handle).tracks_dir();
        if !tracks_dir.exists() {
            return Ok(Vec::new());
        }
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&tracks_dir)? {
            let metadata_file = entry?.path().join("metadata.json");
            if let Some(summary) = read_json_opt::<TrackSummary>(&metadata_file)? {
                summaries.push(summary);
            }
        }
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }

    fn upload_file(
        &mut self,
        handle: &SessionHandle,
        source: &Path,
        request: &FileUploadRequest,
    ) -> Result<FileArtifact> {
        let prefix = validate_prefix(&request.prefix)?;
        let filename = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                DreamlakeError::BadInput(format!("source has no filename: {}", source.display()))
            })?
            .to_string();
        let source_size = fs::metadata(source)
            .map_err(|_| DreamlakeError::NotFound(format!("source file {}", source.display())))?
            .len();
        if source_size > MAX_FILE_SIZE_BYTES {
            return Err(DreamlakeError::BadInput(format!(
                "file exceeds 5 GiB limit: {source_size} bytes"
            )));
        }

        let paths = self.paths(handle);
        let file_id = Uuid::new_v4().to_string();
        let dest_dir = paths.file_dir(&prefix, &file_id);
        fs::create_dir_all(&dest_dir)?;
        let dest = dest_dir.join(&filename);

        // Stream-copy while hashing
        let mut reader = fs::File::open(source)?;
        let mut writer = fs::File::create(&dest)?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        let mut size_bytes: u64 = 0;
        loop {
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            writer.write_all(&buf[..n])?;
            size_bytes += n as u64;
        }
        let checksum = hex::encode(hasher.finalize());

        let artifact = FileArtifact {
            id: file_id,
            filename,
            prefix,
            size_bytes,
            checksum,
            description: request.description.clone(),
            tags: request.tags.clone(),
            metadata: request.metadata.clone(),
            created_at: Utc::now(),
        };

        let sidecar = paths.files_metadata_file();
        let mut artifacts: Vec<FileArtifact> = read_json_opt(&sidecar)?.unwrap_or_default();
        artifacts.push(artifact.clone());
        write_json_atomic(&sidecar, &artifacts)?;

        Ok(artifact)
    }

    fn list_files(
        &mut self,
        handle: &SessionHandle,
        filter: &FileFilter,
    ) -> Result<Vec<FileArtifact>> {
        let sidecar = self.paths(handle).files_metadata_file();
        let artifacts: Vec<FileArtifact> = read_json_opt(&sidecar)?.unwrap_or_default();
        Ok(artifacts.into_iter().filter(|a| filter.matches(a)).collect())
    }

    fn close_session(&mut self, handle: &SessionHandle) -> Result<()> {
        let paths = self.paths(handle);
        if let Some(mut session) = read_json_opt::<SessionFile>(&paths.session_file())? {
            session.updated_at = Utc::now();
            write_json_atomic(&paths.session_file(), &session)?;
        }
        let lock = paths.lock_file();
        if lock.exists() {
            fs::remove_file(lock)?;
        }
        Ok(())
    }
}
