//! Remote HTTP backend
//!
//! Maps each backend operation to one request against the DreamLake service,
//! which persists to MongoDB plus object storage server-side. Transport
//! failures surface as `Transient` so callers may retry externally.

pub mod auth;

use std::path::Path;

use reqwest::blocking::multipart;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;

use crate::backend::{
    AppendResult, Backend, OpenedSession, RangeRead, SessionHandle, SessionSpec, TimeQuery,
    TimeRead, TrackMetadata, TrackSummary,
};
use crate::error::{DreamlakeError, Result};
use crate::files::{validate_prefix, FileArtifact, FileFilter, FileUploadRequest,
    MAX_FILE_SIZE_BYTES};
use crate::logs::LogRecord;
use crate::params::FlatMap;
use crate::track::encoding::EncodedRecord;

const USER_AGENT: &str = concat!("dreamlake/", env!("CARGO_PKG_VERSION"));

/// Backend talking to a DreamLake server over HTTP
#[derive(Debug)]
pub struct RemoteBackend {
    base_url: String,
    token: String,
    client: reqwest::blocking::Client,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteSession {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    session: RemoteSession,
    /// Existing flat parameter map, present when the session is resumed
    #[serde(default)]
    parameters: Option<FlatMap>,
    /// Next log sequence number for a resumed session
    #[serde(default)]
    next_sequence_number: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoteAppendResponse {
    #[serde(default)]
    start_index: u64,
    #[serde(default)]
    count: u64,
}

impl RemoteBackend {
    /// Create a client for `base_url` authenticated with a bearer token
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DreamlakeError::Transient(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            client,
        })
    }

    /// Create a client authenticated with a development token derived from
    /// `user_name` (see [`auth::dev_token_now`]; development only)
    pub fn with_user_name(base_url: impl Into<String>, user_name: &str) -> Result<Self> {
        let token = auth::dev_token_now(user_name)?;
        Self::new(base_url, token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn session_id<'a>(&self, handle: &'a SessionHandle) -> Result<&'a str> {
        handle.remote_id.as_deref().ok_or_else(|| {
            DreamlakeError::BadInput("session handle has no remote id".to_string())
        })
    }

    fn post_json<T: serde::Serialize>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .json(body)
            .send()?;
        check_status(response)
    }

    fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<reqwest::blocking::Response> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()?;
        check_status(response)
    }
}

/// Map an HTTP status to the SDK error kinds; pass successes through
fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().unwrap_or_default();
    Err(status_error(status, &body))
}

fn status_error(status: StatusCode, body: &str) -> DreamlakeError {
    let detail = format!("HTTP {status}: {body}");
    match status {
        StatusCode::BAD_REQUEST => DreamlakeError::BadInput(detail),
        StatusCode::NOT_FOUND => DreamlakeError::NotFound(detail),
        StatusCode::CONFLICT => DreamlakeError::Conflict(detail),
        _ => DreamlakeError::Transient(detail),
    }
}

impl Backend for RemoteBackend {
    fn upsert_session(&mut self, spec: &SessionSpec) -> Result<OpenedSession> {
        let response = self.post_json(
            &format!("/workspaces/{}/sessions", spec.workspace),
            &json!({
                "name": spec.name,
                "namespace": spec.namespace,
                "description": spec.description,
                "tags": spec.tags,
                "folder": spec.folder,
            }),
        )?;
        let upsert: UpsertResponse = response.json()?;
        Ok(OpenedSession {
            handle: SessionHandle {
                namespace: spec.namespace.clone(),
                workspace: spec.workspace.clone(),
                name: spec.name.clone(),
                remote_id: Some(upsert.session.id),
            },
            parameters: upsert.parameters.unwrap_or_default(),
            next_log_sequence: upsert.next_sequence_number.unwrap_or(0),
        })
    }

    fn append_logs(&mut self, handle: &SessionHandle, records: &[LogRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let id = self.session_id(handle)?;
        self.post_json(&format!("/sessions/{id}/logs"), &json!({ "logs": records }))?;
        Ok(())
    }

    fn replace_parameters(&mut self, handle: &SessionHandle, map: &FlatMap) -> Result<()> {
        let id = self.session_id(handle)?;
        self.post_json(
            &format!("/sessions/{id}/parameters"),
            &json!({ "parameters": map }),
        )?;
        Ok(())
    }

    fn ensure_track(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        meta: &TrackMetadata,
    ) -> Result<()> {
        let id = self.session_id(handle)?;
        self.post_json(
            &format!("/sessions/{id}/tracks/{track_name}"),
            &json!({ "metadata": meta }),
        )?;
        Ok(())
    }

    fn write_track_records(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        records: &[EncodedRecord],
    ) -> Result<AppendResult> {
        let id = self.session_id(handle)?.to_string();
        let mut start_index: Option<u64> = None;
        let mut count: u64 = 0;
        for record in records {
            let path = match record {
                EncodedRecord::Row(_) => format!("/sessions/{id}/tracks/{track_name}"),
                EncodedRecord::Block(_) => format!("/sessions/{id}/tracks/{track_name}/batch"),
            };
            let response = self.post_json(&path, &json!({ "data": record.as_map() }))?;
            let appended: RemoteAppendResponse = response.json()?;
            start_index.get_or_insert(appended.start_index);
            count += appended.count;
        }
        Ok(AppendResult {
            start_index: start_index.unwrap_or(0),
            count,
        })
    }

    fn read_track_range(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        start_index: u64,
        limit: usize,
    ) -> Result<RangeRead> {
        let id = self.session_id(handle)?.to_string();
        let response = self.get(
            &format!("/sessions/{id}/tracks/{track_name}"),
            &[
                ("start", start_index.to_string()),
                ("limit", limit.to_string()),
            ],
        )?;
        Ok(response.json()?)
    }

    fn read_track_time(
        &mut self,
        handle: &SessionHandle,
        track_name: &str,
        query: &TimeQuery,
    ) -> Result<TimeRead> {
        let id = self.session_id(handle)?.to_string();
        let mut params: Vec<(&str, String)> = vec![
            ("limit", query.effective_limit().to_string()),
            ("reverse", query.reverse.to_string()),
        ];
        if let Some(start_ts) = query.start_ts {
            params.push(("startTs", start_ts.to_string()));
        }
        if let Some(end_ts) = query.end_ts {
            params.push(("endTs", end_ts.to_string()));
        }
        let response = self.get(&format!("/sessions/{id}/tracks/{track_name}"), &params)?;
        Ok(response.json()?)
    }

    fn list_tracks(&mut self, handle: &SessionHandle) -> Result<Vec<TrackSummary>> {
        let id = self.session_id(handle)?.to_string();
        let response = self.get(&format!("/sessions/{id}/tracks"), &[])?;
        Ok(response.json()?)
    }

    fn upload_file(
        &mut self,
        handle: &SessionHandle,
        source: &Path,
        request: &FileUploadRequest,
    ) -> Result<FileArtifact> {
        validate_prefix(&request.prefix)?;
        let size = std::fs::metadata(source)
            .map_err(|_| DreamlakeError::NotFound(format!("source file {}", source.display())))?
            .len();
        if size > MAX_FILE_SIZE_BYTES {
            return Err(DreamlakeError::BadInput(format!(
                "file exceeds 5 GiB limit: {size} bytes"
            )));
        }

        let id = self.session_id(handle)?.to_string();
        let form = multipart::Form::new()
            .text("metadata", serde_json::to_string(request)?)
            .file("file", source)?;
        let response = self
            .client
            .post(self.url(&format!("/sessions/{id}/files")))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()?;
        let response = check_status(response)?;
        Ok(response.json()?)
    }

    fn list_files(
        &mut self,
        handle: &SessionHandle,
        filter: &FileFilter,
    ) -> Result<Vec<FileArtifact>> {
        let id = self.session_id(handle)?.to_string();
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(prefix) = &filter.prefix {
            params.push(("prefix", prefix.clone()));
        }
        if !filter.tags.is_empty() {
            params.push(("tags", filter.tags.join(",")));
        }
        let response = self.get(&format!("/sessions/{id}/files"), &params)?;
        Ok(response.json()?)
    }
}
