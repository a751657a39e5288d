//! Storage backend abstraction
//!
//! A [`Backend`] persists everything a session emits. Two implementations
//! exist: [`local::LocalBackend`] writes a directory tree,
//! [`remote::RemoteBackend`] talks to the DreamLake HTTP service. The
//! session owns buffering and sequencing; backends only persist.

pub mod local;
pub mod remote;

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::files::{FileArtifact, FileFilter, FileUploadRequest};
use crate::logs::LogRecord;
use crate::params::FlatMap;
use crate::track::encoding::EncodedRecord;
use crate::value::FieldMap;

/// Identity and metadata supplied when opening a session
#[derive(Debug, Clone, Default)]
pub struct SessionSpec {
    pub namespace: Option<String>,
    pub workspace: String,
    pub name: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub folder: Option<String>,
}

/// Handle to an upserted session, passed back into every backend call
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub namespace: Option<String>,
    pub workspace: String,
    pub name: String,
    /// Server-assigned id (remote mode only)
    pub remote_id: Option<String>,
}

/// State recovered while upserting, so a resumed session continues where it
/// left off
#[derive(Debug)]
pub struct OpenedSession {
    pub handle: SessionHandle,
    /// Existing flat parameter map, empty for a fresh session
    pub parameters: FlatMap,
    /// Next log sequence number (0 for a fresh session)
    pub next_log_sequence: u64,
}

/// Caller-facing metadata for one track
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackMetadata {
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Persisted summary of a track
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSummary {
    /// Hierarchical logical name (slashes preserved)
    pub name: String,
    pub display_name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Total logical points ever appended
    pub total_data_points: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Result of appending records to a track
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResult {
    /// Logical index of the first appended point
    pub start_index: u64,
    /// Number of logical points appended
    pub count: u64,
}

/// One logical point with its index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedPoint {
    pub index: u64,
    pub data: FieldMap,
}

/// Result of an index-range read
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RangeRead {
    /// Number of items returned by this call
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub items: Vec<IndexedPoint>,
    /// Whether points exist beyond `start + limit`
    #[serde(default)]
    pub has_more: bool,
}

/// Time-range query parameters
#[derive(Debug, Clone)]
pub struct TimeQuery {
    /// Inclusive lower `_ts` bound, or unbounded
    pub start_ts: Option<f64>,
    /// Exclusive upper `_ts` bound, or unbounded
    pub end_ts: Option<f64>,
    pub limit: usize,
    /// Most-recent-first when set
    pub reverse: bool,
}

impl TimeQuery {
    pub const DEFAULT_LIMIT: usize = 1000;
    pub const MAX_LIMIT: usize = 10_000;

    /// Limit clamped to the contract cap
    #[must_use]
    pub fn effective_limit(&self) -> usize {
        self.limit.min(Self::MAX_LIMIT)
    }

    /// Does a timestamp fall within `[start_ts, end_ts)`?
    #[must_use]
    pub fn contains(&self, ts: f64) -> bool {
        self.start_ts.map_or(true, |s| ts >= s) && self.end_ts.map_or(true, |e| ts < e)
    }
}

impl Default for TimeQuery {
    fn default() -> Self {
        Self {
            start_ts: None,
            end_ts: None,
            limit: Self::DEFAULT_LIMIT,
            reverse: false,
        }
    }
}

/// Result of a time-range read
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeRead {
    #[serde(default)]
    pub items: Vec<IndexedPoint>,
}

/// Persistence driver for one session
///
/// All operations may fail with transport or I/O errors. Implementations do
/// not buffer; the session has already merged and sequenced everything it
/// hands over.
pub trait Backend: Send {
    /// Create the backing session state or reattach to existing state
    fn upsert_session(&mut self, spec: &SessionSpec) -> Result<OpenedSession>;

    /// Append already-sequenced log records
    fn append_logs(&mut self, handle: &SessionHandle, records: &[LogRecord]) -> Result<()>;

    /// Replace the stored flat parameter map wholesale
    fn replace_parameters(&mut self, handle: &SessionHandle, map: &FlatMap) -> Result<()>;

    /// Create the track if absent and record its metadata
    fn ensure_track(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        meta: &TrackMetadata,
    ) -> Result<()>;

    /// Append encoded records to a track's stream
    fn write_track_records(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        records: &[EncodedRecord],
    ) -> Result<AppendResult>;

    /// Read logical points by index range
    fn read_track_range(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        start_index: u64,
        limit: usize,
    ) -> Result<RangeRead>;

    /// Read logical points by `_ts` range
    fn read_track_time(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        query: &TimeQuery,
    ) -> Result<TimeRead>;

    /// Summaries of every track in the session
    fn list_tracks(&mut self, handle: &SessionHandle) -> Result<Vec<TrackSummary>>;

    /// Store a file with content addressing and return its artifact record
    fn upload_file(
        &mut self,
        handle: &SessionHandle,
        source: &Path,
        request: &FileUploadRequest,
    ) -> Result<FileArtifact>;

    /// List uploaded files, optionally filtered
    fn list_files(&mut self, handle: &SessionHandle, filter: &FileFilter)
        -> Result<Vec<FileArtifact>>;

    /// Release per-session resources (local lockfile, final metadata write).
    fn close_session(&mut self, handle: &SessionHandle) -> Result<()> {
        let _ = handle;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_query_defaults() {
        let query = TimeQuery::default();
        assert_eq!(query.limit, 1000);
        assert!(!query.reverse);
        assert!(query.contains(0.0));
        assert!(query.contains(1e12));
    }

    #[test]
    fn test_time_query_half_open_bounds() {
        let query = TimeQuery {
            start_ts: Some(0.3),
            end_ts: Some(0.6),
            ..TimeQuery::default()
        };
        assert!(query.contains(0.3));
        assert!(query.contains(0.5));
        assert!(!query.contains(0.6));
        assert!(!query.contains(0.2));
    }

    #[test]
    fn test_time_query_limit_cap() {
        let query = TimeQuery {
            limit: 50_000,
            ..TimeQuery::default()
        };
        assert_eq!(query.effective_limit(), TimeQuery::MAX_LIMIT);
    }

    #[test]
    fn test_backend_is_object_safe() {
        fn assert_object_safe(_: &dyn Backend) {}
        let _ = assert_object_safe;
    }
}
