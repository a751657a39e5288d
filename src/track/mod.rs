//! Track API: timestamped multi-modal data streams
//!
//! A track is a named, ordered stream of JSON data points, each carrying a
//! `_ts` timestamp (seconds since the Unix epoch). Appends are buffered in
//! the session and merged by exact `_ts` equality at flush time; reads span
//! row and columnar storage encodings transparently.

pub mod buffer;
pub mod encoding;


use serde_json::Value;

use crate::backend::{AppendResult, RangeRead, TimeQuery, TimeRead, TrackMetadata, TrackSummary};
use crate::error::Result;
use crate::session::Session;
use crate::value::{into_fields, point_ts, FieldMap, TS_FIELD};

/// Timestamp directive for an append
///
/// The wire sentinel `_ts = -1` and [`Timestamp::Inherit`] are equivalent:
/// both copy the session's most recently resolved timestamp, across any
/// track.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Timestamp {
    /// Assign the current wall clock
    Auto,
    /// Use this value (seconds since epoch); `-1.0` means inherit
    At(f64),
    /// Copy the session's most recent resolved `_ts`
    Inherit,
}

impl Timestamp {
    /// Extract the timestamp directive from a point's fields, removing the
    /// `_ts` key so the resolved value can be written back.
    pub(crate) fn from_fields(fields: &mut FieldMap) -> Result<Self> {
        match point_ts(fields)? {
            None => Ok(Timestamp::Auto),
            Some(ts) => {
                fields.remove(TS_FIELD);
                if ts == -1.0 {
                    Ok(Timestamp::Inherit)
                } else {
                    Ok(Timestamp::At(ts))
                }
            }
        }
    }
}

/// Handle bound to one track of a session
///
/// Created by [`Session::track`]. Handles are cheap; two handles for the
/// same name share the same backing buffer.
#[derive(Debug)]
pub struct TrackHandle<'a> {
    session: &'a Session,
    name: String,
}

impl<'a> TrackHandle<'a> {
    pub(crate) fn new(session: &'a Session, name: String) -> Self {
        Self { session, name }
    }

    /// Logical track name (slashes preserved)
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append one data point (buffered until the next flush).
    ///
    /// `fields` must be a JSON object. A `_ts` key inside it follows the
    /// timestamp table: absent means auto-assign, a number is used as-is,
    /// and `-1` inherits the session's most recent timestamp.
    pub fn append(&self, fields: Value) -> Result<&Self> {
        let mut map = into_fields(fields)?;
        let ts = Timestamp::from_fields(&mut map)?;
        self.session.lock().append_point(&self.name, map, ts)?;
        Ok(self)
    }

    /// Append one data point with an explicit timestamp directive.
    ///
    /// A `_ts` key inside `fields` is ignored in favor of `ts`.
    pub fn append_at(&self, ts: Timestamp, fields: Value) -> Result<&Self> {
        let mut map = into_fields(fields)?;
        map.remove(TS_FIELD);
        self.session.lock().append_point(&self.name, map, ts)?;
        Ok(self)
    }

    /// Append a batch of points. Two or more points are written as a single
    /// columnar block; pending buffered appends for this track are flushed
    /// first so persisted order matches append order.
    pub fn append_batch(&self, points: Vec<Value>) -> Result<AppendResult> {
        self.session.lock().append_batch(&self.name, points)
    }

    /// Flush this track's pending buffer, merging points that share a `_ts`
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.session.lock();
        inner.ensure_open()?;
        inner.flush_track(&self.name)
    }

    /// Read points by logical index range (flushes first)
    pub fn read(&self, start_index: u64, limit: usize) -> Result<RangeRead> {
        self.session.lock().read_range(&self.name, start_index, limit)
    }

    /// Read points whose `_ts` falls in the query window (flushes first)
    pub fn read_by_time(&self, query: TimeQuery) -> Result<TimeRead> {
        self.session.lock().read_time(&self.name, &query)
    }

    /// Track summary with total point count (flushes first)
    pub fn stats(&self) -> Result<TrackSummary> {
        self.session.lock().track_stats(&self.name)
    }

    /// Record display metadata for this track, creating it if needed
    pub fn configure(&self, meta: TrackMetadata) -> Result<&Self> {
        self.session.lock().configure_track(&self.name, meta)?;
        Ok(self)
    }
}
