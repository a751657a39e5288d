//! Session lifecycle, log sequencing, and the global timestamp policy
//!
//! A [`Session`] owns one backend plus all in-memory state: the per-track
//! pending buffers, the merged parameter map, the log sequence counter, and
//! the global `last_timestamp` that `_ts = -1` inherits from. One mutex
//! guards all of it, so parallel threads sharing a session observe a single
//! total order of appends.


use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;

use crate::backend::{
    AppendResult, Backend, RangeRead, SessionHandle, TimeQuery, TimeRead, TrackMetadata,
    TrackSummary,
};
use crate::config::SessionOptions;
use crate::error::{DreamlakeError, Result};
use crate::files::{FileArtifact, FileFilter, FileUploadRequest};
use crate::logs::{LogLevel, LogRecord};
use crate::params::{flatten, merge_into, unflatten, FlatMap};
use crate::track::buffer::TrackBuffer;
use crate::track::encoding::EncodedRecord;
use crate::track::{TrackHandle, Timestamp};
use crate::value::{into_fields, ts_value, FieldMap, TS_FIELD};

/// Track used by [`TracksHandle::append`] when no name is given
pub const DEFAULT_TRACK: &str = "default";

/// An open experiment session
///
/// Obtained from [`SessionOptions::open`]. Dropping the session closes it,
/// flushing every pending track buffer, so telemetry survives early returns
/// and panics in the recording scope.
pub struct Session {
    workspace: String,
    name: String,
    namespace: Option<String>,
    inner: Mutex<Inner>,
}

pub(crate) struct Inner {
    backend: Box<dyn Backend>,
    handle: SessionHandle,
    closed: bool,
    parameters: FlatMap,
    next_log_sequence: u64,
    last_timestamp: Option<f64>,
    last_auto_timestamp: f64,
    buffers: HashMap<String, TrackBuffer>,
    track_meta: HashMap<String, TrackMetadata>,
    ensured_tracks: HashSet<String>,
    flush_threshold: usize,
}

fn now_epoch_secs() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

impl Session {
    /// Open a session: build the backend and upsert backing state
    pub fn open(options: SessionOptions) -> Result<Self> {
        let mut backend = options.build_backend()?;
        let spec = options.session_spec();
        let opened = backend.upsert_session(&spec)?;
        Ok(Self {
            workspace: spec.workspace,
            name: spec.name,
            namespace: spec.namespace,
            inner: Mutex::new(Inner {
                backend,
                handle: opened.handle,
                closed: false,
                parameters: opened.parameters,
                next_log_sequence: opened.next_log_sequence,
                last_timestamp: None,
                last_auto_timestamp: 0.0,
                buffers: HashMap::new(),
                track_meta: HashMap::new(),
                ensured_tracks: HashSet::new(),
                flush_threshold: options.flush_threshold,
            }),
        })
    }

    #[must_use]
    pub fn workspace(&self) -> &str {
        &self.workspace
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Append a log record at `info` level
    pub fn log(&self, message: &str) -> Result<()> {
        self.log_with(LogLevel::Info, message, None)
    }

    /// Append a log record with an explicit level and optional metadata
    pub fn log_with(
        &self,
        level: LogLevel,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<()> {
        self.lock().write_log(level, message, metadata)?;
        Ok(())
    }

    /// Handle for parameter operations
    #[must_use]
    pub fn params(&self) -> ParamsHandle<'_> {
        ParamsHandle { session: self }
    }

    /// Alias for [`params`](Self::params)
    #[must_use]
    pub fn parameters(&self) -> ParamsHandle<'_> {
        self.params()
    }

    /// Handle bound to the named track. Two handles for the same name share
    /// one backing buffer.
    #[must_use]
    pub fn track(&self, name: impl Into<String>) -> TrackHandle<'_> {
        TrackHandle::new(self, name.into())
    }

    /// Handle for whole-session track operations and the default track
    #[must_use]
    pub fn tracks(&self) -> TracksHandle<'_> {
        TracksHandle { session: self }
    }

    /// Handle for file artifact operations
    #[must_use]
    pub fn files(&self) -> FilesHandle<'_> {
        FilesHandle { session: self }
    }

    /// Flush every pending track buffer
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.lock();
        inner.ensure_open()?;
        inner.flush_all_tracks()
    }

    /// Close the session: flush all tracks, write final metadata, release
    /// backend resources. Idempotent.
    ///
    /// A `Transient` flush failure here is demoted to a warning so the
    /// session still closes; any other error is surfaced after the close
    /// completes.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Ok(());
        }

        let mut first_err: Option<DreamlakeError> = None;
        let pending: Vec<String> = inner
            .buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        for name in pending {
            match inner.flush_track(&name) {
                Ok(()) => {}
                Err(DreamlakeError::Transient(msg)) => {
                    tracing::warn!(track = %name, "flush failed during close: {msg}");
                }
                Err(other) => {
                    if first_err.is_none() {
                        first_err = Some(other);
                    }
                }
            }
        }

        let close_result = inner.release_backend();
        inner.closed = true;
        tracing::debug!(workspace = %self.workspace, session = %self.name, "session closed");
        match first_err {
            Some(err) => Err(err),
            None => close_result,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!("session close during drop failed: {err}");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("workspace", &self.workspace)
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl Inner {
    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(DreamlakeError::SessionClosed);
        }
        Ok(())
    }

    fn release_backend(&mut self) -> Result<()> {
        self.backend.close_session(&self.handle)
    }

    // ----- logs ------------------------------------------------------------

    fn write_log(
        &mut self,
        level: LogLevel,
        message: &str,
        metadata: Option<Value>,
    ) -> Result<u64> {
        self.ensure_open()?;
        let sequence = self.next_log_sequence;
        let record = LogRecord::new(level, message, metadata, sequence);
        self.backend.append_logs(&self.handle, &[record])?;
        // Only advance after a successful write so a retry reuses the number
        self.next_log_sequence = sequence + 1;
        Ok(sequence)
    }

    // ----- parameters ------------------------------------------------------

    fn set_parameters(&mut self, updates: Value) -> Result<()> {
        self.ensure_open()?;
        let nested = into_fields(updates)?;
        merge_into(&mut self.parameters, flatten(&nested));
        self.backend.replace_parameters(&self.handle, &self.parameters)
    }

    // ----- timestamp policy -------------------------------------------------

    /// Resolve an incoming timestamp under the session lock and record it as
    /// the most recent one. `-1` and [`Timestamp::Inherit`] copy the last
    /// resolved `_ts` across any track.
    fn resolve_timestamp(&mut self, ts: Timestamp) -> Result<f64> {
        let resolved = match ts {
            Timestamp::Auto => self.next_auto_timestamp(),
            Timestamp::Inherit => self.inherited_timestamp()?,
            Timestamp::At(value) if value == -1.0 => self.inherited_timestamp()?,
            Timestamp::At(value) => {
                if !value.is_finite() {
                    return Err(DreamlakeError::BadInput(
                        "_ts must be a finite number".to_string(),
                    ));
                }
                value
            }
        };
        self.last_timestamp = Some(resolved);
        Ok(resolved)
    }

    fn inherited_timestamp(&self) -> Result<f64> {
        self.last_timestamp.ok_or_else(|| {
            DreamlakeError::BadInput("no previous timestamp to inherit".to_string())
        })
    }

    /// Wall-clock seconds, bumped by 1µs when two reads collide so auto
    /// points stay unique
    fn next_auto_timestamp(&mut self) -> f64 {
        let mut ts = now_epoch_secs();
        if ts <= self.last_auto_timestamp {
            ts = self.last_auto_timestamp + 1e-6;
        }
        self.last_auto_timestamp = ts;
        ts
    }

    // ----- track appends ----------------------------------------------------

    pub(crate) fn append_point(
        &mut self,
        track: &str,
        mut fields: FieldMap,
        ts: Timestamp,
    ) -> Result<()> {
        self.ensure_open()?;
        let resolved = self.resolve_timestamp(ts)?;
        fields.insert(TS_FIELD.to_string(), ts_value(resolved));
        self.buffers
            .entry(track.to_string())
            .or_default()
            .push(fields);

        let len = self.buffers.get(track).map_or(0, TrackBuffer::len);
        if len >= self.flush_threshold {
            self.flush_track(track)?;
        }
        Ok(())
    }

    pub(crate) fn append_batch(
        &mut self,
        track: &str,
        points: Vec<Value>,
    ) -> Result<AppendResult> {
        self.ensure_open()?;
        if points.is_empty() {
            return Err(DreamlakeError::BadInput(
                "data_points cannot be empty".to_string(),
            ));
        }

        let mut resolved_points = Vec::with_capacity(points.len());
        for point in points {
            let mut fields = into_fields(point)?;
            let ts = Timestamp::from_fields(&mut fields)?;
            let resolved = self.resolve_timestamp(ts)?;
            fields.insert(TS_FIELD.to_string(), ts_value(resolved));
            resolved_points.push(fields);
        }

        // Pending single appends must land first so persisted order equals
        // the order the lock was taken in.
        self.flush_track(track)?;
        self.register_track(track)?;
        let count = resolved_points.len();
        let record = EncodedRecord::from_points(resolved_points)?;
        let result = self
            .backend
            .write_track_records(&self.handle, track, &[record])?;
        tracing::debug!(track, count, "appended batch");
        Ok(result)
    }

    // ----- flush ------------------------------------------------------------

    pub(crate) fn flush_track(&mut self, name: &str) -> Result<()> {
        let merged = match self.buffers.get_mut(name) {
            Some(buffer) if !buffer.is_empty() => buffer.drain_merged(),
            _ => return Ok(()),
        };
        if let Err(err) = self.persist_merged(name, merged.clone()) {
            // Keep the points for a retry
            if let Some(buffer) = self.buffers.get_mut(name) {
                buffer.restore(merged);
            }
            return Err(err);
        }
        Ok(())
    }

    fn persist_merged(&mut self, name: &str, merged: Vec<FieldMap>) -> Result<()> {
        self.register_track(name)?;
        let count = merged.len();
        let record = EncodedRecord::from_points(merged)?;
        self.backend
            .write_track_records(&self.handle, name, &[record])?;
        tracing::debug!(track = name, count, "flushed track buffer");
        Ok(())
    }

    pub(crate) fn flush_all_tracks(&mut self) -> Result<()> {
        let pending: Vec<String> = self
            .buffers
            .iter()
            .filter(|(_, b)| !b.is_empty())
            .map(|(name, _)| name.clone())
            .collect();
        let mut first_err = None;
        for name in pending {
            if let Err(err) = self.flush_track(&name) {
                if first_err.is_none() {
                    first_err = Some(err);
                }
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn register_track(&mut self, name: &str) -> Result<()> {
        if self.ensured_tracks.contains(name) {
            return Ok(());
        }
        let meta = self.track_meta.get(name).cloned().unwrap_or_default();
        self.backend.ensure_track(&self.handle, name, &meta)?;
        self.ensured_tracks.insert(name.to_string());
        Ok(())
    }

    pub(crate) fn configure_track(&mut self, name: &str, meta: TrackMetadata) -> Result<()> {
        self.ensure_open()?;
        self.backend.ensure_track(&self.handle, name, &meta)?;
        self.track_meta.insert(name.to_string(), meta);
        self.ensured_tracks.insert(name.to_string());
        Ok(())
    }

    // ----- reads ------------------------------------------------------------

    pub(crate) fn read_range(
        &mut self,
        track: &str,
        start_index: u64,
        limit: usize,
    ) -> Result<RangeRead> {
        self.ensure_open()?;
        self.flush_track(track)?;
        self.backend
            .read_track_range(&self.handle, track, start_index, limit)
    }

    pub(crate) fn read_time(&mut self, track: &str, query: &TimeQuery) -> Result<TimeRead> {
        self.ensure_open()?;
        self.flush_track(track)?;
        self.backend.read_track_time(&self.handle, track, query)
    }

    pub(crate) fn track_stats(&mut self, track: &str) -> Result<TrackSummary> {
        self.ensure_open()?;
        self.flush_track(track)?;
        self.backend
            .list_tracks(&self.handle)?
            .into_iter()
            .find(|t| t.name == track)
            .ok_or_else(|| DreamlakeError::NotFound(format!("track {track}")))
    }

    fn list_tracks(&mut self) -> Result<Vec<TrackSummary>> {
        self.ensure_open()?;
        self.flush_all_tracks()?;
        self.backend.list_tracks(&self.handle)
    }

    // ----- files ------------------------------------------------------------

    fn upload_file(&mut self, source: &Path, request: &FileUploadRequest) -> Result<FileArtifact> {
        self.ensure_open()?;
        let artifact = self.backend.upload_file(&self.handle, source, request)?;
        tracing::debug!(
            file = %artifact.filename,
            size = artifact.size_bytes,
            "uploaded file"
        );
        Ok(artifact)
    }

    fn list_files(&mut self, filter: &FileFilter) -> Result<Vec<FileArtifact>> {
        self.ensure_open()?;
        self.backend.list_files(&self.handle, filter)
    }
}

/// Parameter operations for one session
#[derive(Debug, Clone, Copy)]
pub struct ParamsHandle<'a> {
    session: &'a Session,
}

impl ParamsHandle<'_> {
    /// Merge updates (flat or nested) into the parameter map and persist the
    /// whole map atomically
    pub fn set(&self, updates: Value) -> Result<()> {
        self.session.lock().set_parameters(updates)
    }

    /// The current flat dotted-key map
    pub fn get(&self) -> Result<FlatMap> {
        let inner = self.session.lock();
        inner.ensure_open()?;
        Ok(inner.parameters.clone())
    }

    /// The current map, reconstructed as a nested object
    pub fn get_nested(&self) -> Result<Value> {
        let inner = self.session.lock();
        inner.ensure_open()?;
        Ok(Value::Object(unflatten(&inner.parameters)))
    }
}

/// Whole-session track operations, plus the implicit default track
#[derive(Debug, Clone, Copy)]
pub struct TracksHandle<'a> {
    session: &'a Session,
}

impl<'a> TracksHandle<'a> {
    /// Handle for a named track
    #[must_use]
    pub fn track(&self, name: impl Into<String>) -> TrackHandle<'a> {
        TrackHandle::new(self.session, name.into())
    }

    /// Append to the default track
    pub fn append(&self, fields: Value) -> Result<()> {
        let mut map = into_fields(fields)?;
        let ts = Timestamp::from_fields(&mut map)?;
        self.session.lock().append_point(DEFAULT_TRACK, map, ts)
    }

    /// Flush every pending track buffer
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.session.lock();
        inner.ensure_open()?;
        inner.flush_all_tracks()
    }

    /// List all tracks in the session, flushing pending buffers first
    pub fn list(&self) -> Result<Vec<TrackSummary>> {
        self.session.lock().list_tracks()
    }
}

/// File artifact operations for one session
#[derive(Debug, Clone, Copy)]
pub struct FilesHandle<'a> {
    session: &'a Session,
}

impl FilesHandle<'_> {
    /// Upload a file under the given logical prefix (`/models`, …)
    pub fn upload(&self, source: impl AsRef<Path>, prefix: &str) -> Result<FileArtifact> {
        self.upload_with(
            source,
            FileUploadRequest {
                prefix: prefix.to_string(),
                ..FileUploadRequest::default()
            },
        )
    }

    /// Upload with full metadata control
    pub fn upload_with(
        &self,
        source: impl AsRef<Path>,
        request: FileUploadRequest,
    ) -> Result<FileArtifact> {
        self.session.lock().upload_file(source.as_ref(), &request)
    }

    /// List all uploaded files
    pub fn list(&self) -> Result<Vec<FileArtifact>> {
        self.list_with(FileFilter::default())
    }

    /// List uploaded files matching the filter
    pub fn list_with(&self, filter: FileFilter) -> Result<Vec<FileArtifact>> {
        self.session.lock().list_files(&filter)
    }
}
