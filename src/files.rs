//! File artifact records and upload validation

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DreamlakeError, Result};

/// Maximum accepted source size for an upload (5 GiB)
pub const MAX_FILE_SIZE_BYTES: u64 = 5 * 1024 * 1024 * 1024;

/// Metadata record for one uploaded file
///
/// The `id` is an opaque token used as a directory component, so two uploads
/// of the same filename never collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileArtifact {
    /// Opaque unique id
    pub id: String,
    /// Original filename (basename of the source)
    pub filename: String,
    /// Logical path prefix, always starting with `/`
    pub prefix: String,
    /// Size of the stored bytes
    pub size_bytes: u64,
    /// SHA-256 of the stored bytes, lowercase hex
    pub checksum: String,
    /// Optional human description
    pub description: Option<String>,
    /// Tag set
    #[serde(default)]
    pub tags: Vec<String>,
    /// Custom metadata
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Upload time
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied upload attributes
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileUploadRequest {
    pub prefix: String,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Optional filters for listing files
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    /// Keep artifacts whose prefix starts with this segment-aligned prefix
    pub prefix: Option<String>,
    /// Keep artifacts carrying every one of these tags
    pub tags: Vec<String>,
}

impl FileFilter {
    /// Does the artifact pass this filter?
    #[must_use]
    pub fn matches(&self, artifact: &FileArtifact) -> bool {
        if let Some(prefix) = &self.prefix {
            if !prefix_matches(prefix, &artifact.prefix) {
                return false;
            }
        }
        self.tags.iter().all(|t| artifact.tags.contains(t))
    }
}

fn prefix_matches(filter: &str, candidate: &str) -> bool {
    let filter = filter.trim_end_matches('/');
    candidate == filter
        || candidate
            .strip_prefix(filter)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Validate a logical path prefix and return it normalized
/// (leading `/`, no trailing `/`, non-empty segments, no `.` or `..`).
pub fn validate_prefix(prefix: &str) -> Result<String> {
    if !prefix.starts_with('/') {
        return Err(DreamlakeError::BadInput(format!(
            "prefix must start with '/', got {prefix:?}"
        )));
    }
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        // "/" is the root prefix
        return Ok("/".to_string());
    }
    for segment in trimmed[1..].split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(DreamlakeError::BadInput(format!(
                "prefix contains invalid segment: {prefix:?}"
            )));
        }
    }
    Ok(trimmed.to_string())
}

/// Path segments of a normalized prefix (empty for the root prefix)
#[must_use]
pub fn prefix_segments(prefix: &str) -> Vec<&str> {
    prefix
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect()
}
