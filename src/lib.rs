//! DreamLake: experiment telemetry recording SDK
//!
//! Records ML and robotics experiment telemetry from a single process:
//! structured logs, a flat parameter map, named tracks of timestamped data
//! points, and content-addressed file artifacts. Everything hangs off a
//! [`Session`] scoped to a `(namespace, workspace, name)` triple and
//! persists either to a local directory tree or to a remote HTTP service.
//!
//! # Architecture
//!
//! - **[`Session`]**: lifecycle, log sequencing, the global timestamp that
//!   `_ts = -1` inherits, and one pending buffer per track
//! - **[`TrackHandle`]**: append / batch-append / flush / indexed and
//!   time-range reads over row and columnar storage encodings
//! - **[`Backend`](backend::Backend)**: pluggable persistence
//!   ([`LocalBackend`](backend::local::LocalBackend) directory tree,
//!   [`RemoteBackend`](backend::remote::RemoteBackend) HTTP client)
//!
//! # Example
//!
//! ```no_run
//! use dreamlake::SessionOptions;
//! use serde_json::json;
//!
//! # fn main() -> dreamlake::Result<()> {
//! let session = SessionOptions::new("demo", "run-1")
//!     .local_path(".dreamlake")
//!     .open()?;
//!
//! session.log("training started")?;
//! session.params().set(json!({"model": {"lr": 0.001, "layers": [256, 128]}}))?;
//!
//! // Multi-modal points recorded at the same instant
//! session.track("robot/pose").append(json!({"position": [1.0, 2.0, 3.0]}))?;
//! session.track("camera").append(json!({"width": 640, "_ts": -1}))?;
//!
//! let loss = session.track("loss");
//! loss.append(json!({"value": 0.5, "epoch": 1}))?;
//! let points = loss.read(0, 100)?;
//! assert_eq!(points.total, 1);
//!
//! session.close()?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod files;
pub mod logs;
pub mod params;
pub mod session;
pub mod track;
pub mod value;

pub use backend::{
    AppendResult, IndexedPoint, RangeRead, TimeQuery, TimeRead, TrackMetadata, TrackSummary,
};
pub use config::SessionOptions;
pub use error::{DreamlakeError, Result};
pub use files::{FileArtifact, FileFilter, FileUploadRequest};
pub use logs::{LogLevel, LogRecord};
pub use session::{FilesHandle, ParamsHandle, Session, TracksHandle};
pub use track::{Timestamp, TrackHandle};
