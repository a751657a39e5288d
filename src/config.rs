//! Session construction options
//!
//! Exactly one storage mode must be selected: a local root directory or a
//! remote service URL. Environment variables supply defaults when the caller
//! sets neither explicitly.

use std::path::PathBuf;

use crate::backend::local::LocalBackend;
use crate::backend::remote::RemoteBackend;
use crate::backend::{Backend, SessionSpec};
use crate::error::{DreamlakeError, Result};
use crate::session::Session;

/// Default local root, read when no mode is chosen explicitly
pub const ENV_LOCAL_PATH: &str = "DREAMLAKE_LOCAL_PATH";
/// Default remote URL, read when no mode is chosen explicitly
pub const ENV_API_URL: &str = "DREAMLAKE_API_URL";
/// Default bearer token for remote mode
pub const ENV_API_KEY: &str = "DREAMLAKE_API_KEY";

/// Buffered points per track before an implicit flush
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

/// Options for opening a [`Session`]
///
/// ```no_run
/// use dreamlake::SessionOptions;
///
/// # fn main() -> dreamlake::Result<()> {
/// let session = SessionOptions::new("my-workspace", "my-experiment")
///     .local_path(".dreamlake")
///     .description("baseline run")
///     .tag("v1")
///     .open()?;
/// session.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub(crate) workspace: String,
    pub(crate) name: String,
    pub(crate) namespace: Option<String>,
    pub(crate) local_path: Option<PathBuf>,
    pub(crate) remote_url: Option<String>,
    pub(crate) api_key: Option<String>,
    pub(crate) user_name: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) tags: Vec<String>,
    pub(crate) folder: Option<String>,
    pub(crate) flush_threshold: usize,
}

impl SessionOptions {
    /// Start options for the session identified by `(workspace, name)`
    pub fn new(workspace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            workspace: workspace.into(),
            name: name.into(),
            namespace: None,
            local_path: None,
            remote_url: None,
            api_key: None,
            user_name: None,
            description: None,
            tags: Vec::new(),
            folder: None,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
        }
    }

    /// Optional grouping above the workspace
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Persist to a local directory tree rooted here
    #[must_use]
    pub fn local_path(mut self, root: impl Into<PathBuf>) -> Self {
        self.local_path = Some(root.into());
        self
    }

    /// Alias for [`local_path`](Self::local_path)
    #[must_use]
    pub fn root(self, root: impl Into<PathBuf>) -> Self {
        self.local_path(root)
    }

    /// Persist through the remote service at this base URL
    #[must_use]
    pub fn remote_url(mut self, url: impl Into<String>) -> Self {
        self.remote_url = Some(url.into());
        self
    }

    /// Explicit bearer token for remote mode
    #[must_use]
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Derive a development token from this user name (remote mode,
    /// development only)
    #[must_use]
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }

    /// Human-readable session description
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add one tag
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Replace the tag set
    #[must_use]
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Logical folder path stored with the session
    #[must_use]
    pub fn folder(mut self, folder: impl Into<String>) -> Self {
        self.folder = Some(folder.into());
        self
    }

    /// Buffered points per track before an implicit flush
    #[must_use]
    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    /// Open the session (upserts backing state)
    pub fn open(self) -> Result<Session> {
        Session::open(self)
    }

    pub(crate) fn session_spec(&self) -> SessionSpec {
        SessionSpec {
            namespace: self.namespace.clone(),
            workspace: self.workspace.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            tags: self.tags.clone(),
            folder: self.folder.clone(),
        }
    }

    /// Pick the storage mode and build its backend.
    ///
    /// Explicit options win; environment variables only fill in when neither
    /// mode was chosen in code. Exactly one mode must result.
    pub(crate) fn build_backend(&self) -> Result<Box<dyn Backend>> {
        if self.workspace.is_empty() {
            return Err(DreamlakeError::BadInput("workspace is required".to_string()));
        }
        if self.name.is_empty() {
            return Err(DreamlakeError::BadInput("name is required".to_string()));
        }
        if self.local_path.is_some() && self.remote_url.is_some() {
            return Err(DreamlakeError::BadInput(
                "supply either local_path or remote_url, not both".to_string(),
            ));
        }

        let mut local = self.local_path.clone();
        let mut remote = self.remote_url.clone();
        if local.is_none() && remote.is_none() {
            local = std::env::var(ENV_LOCAL_PATH).ok().map(PathBuf::from);
            remote = std::env::var(ENV_API_URL).ok();
            if local.is_some() && remote.is_some() {
                return Err(DreamlakeError::BadInput(format!(
                    "both {ENV_LOCAL_PATH} and {ENV_API_URL} are set; choose a mode explicitly"
                )));
            }
        }

        if let Some(root) = local {
            return Ok(Box::new(LocalBackend::new(root)));
        }
        if let Some(url) = remote {
            let api_key = self
                .api_key
                .clone()
                .or_else(|| std::env::var(ENV_API_KEY).ok());
            let backend = match (api_key, &self.user_name) {
                (Some(key), _) => RemoteBackend::new(url, key)?,
                (None, Some(user)) => RemoteBackend::with_user_name(url, user)?,
                (None, None) => {
                    return Err(DreamlakeError::BadInput(
                        "remote mode requires api_key or user_name".to_string(),
                    ))
                }
            };
            return Ok(Box::new(backend));
        }
        Err(DreamlakeError::BadInput(
            "supply local_path or remote_url (or set DREAMLAKE_LOCAL_PATH / DREAMLAKE_API_URL)"
                .to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_modes_rejected() {
        let result = SessionOptions::new("ws", "s")
            .local_path("/tmp/x")
            .remote_url("http://localhost:3000")
            .build_backend();
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, DreamlakeError::BadInput(_)));
    }

    #[test]
    fn test_missing_identity_rejected() {
        let result = SessionOptions::new("", "s")
            .local_path("/tmp/x")
            .build_backend();
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, DreamlakeError::BadInput(_)));
        let result = SessionOptions::new("ws", "")
            .local_path("/tmp/x")
            .build_backend();
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, DreamlakeError::BadInput(_)));
    }

    #[test]
    fn test_local_mode_builds() {
        let backend = SessionOptions::new("ws", "s")
            .local_path("/tmp/dreamlake-test")
            .build_backend();
        assert!(backend.is_ok());
    }

    #[test]
    fn test_remote_requires_credentials() {
        let result = SessionOptions::new("ws", "s")
            .remote_url("http://localhost:3000")
            .build_backend();
        let err = match result {
            Err(e) => e,
            Ok(_) => panic!("expected error"),
        };
        assert!(matches!(err, DreamlakeError::BadInput(_)));
    }

    #[test]
    fn test_remote_with_api_key_builds() {
        let backend = SessionOptions::new("ws", "s")
            .remote_url("http://localhost:3000")
            .api_key("token")
            .build_backend();
        assert!(backend.is_ok());
    }

    #[test]
    fn test_remote_with_user_name_builds() {
        let backend = SessionOptions::new("ws", "s")
            .remote_url("http://localhost:3000")
            .user_name("alice")
            .build_backend();
        assert!(backend.is_ok());
    }

    #[test]
    fn test_session_spec_carries_metadata() {
        let spec = SessionOptions::new("ws", "s")
            .namespace("team")
            .description("d")
            .tags(["a", "b"])
            .folder("/exp")
            .session_spec();
        assert_eq!(spec.namespace.as_deref(), Some("team"));
        assert_eq!(spec.tags, vec!["a", "b"]);
        assert_eq!(spec.folder.as_deref(), Some("/exp"));
    }

    #[test]
    fn test_flush_threshold_floor() {
        let options = SessionOptions::new("ws", "s").flush_threshold(0);
        assert_eq!(options.flush_threshold, 1);
    }
}
