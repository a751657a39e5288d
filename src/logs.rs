//! Log levels and the append-only log record wire format

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DreamlakeError, Result};

/// Severity level of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Parse a level from its lowercase wire name
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(DreamlakeError::BadInput(format!(
                "invalid log level: {other}"
            ))),
        }
    }

    /// Wire name of the level
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

/// One line of `logs/logs.jsonl`
///
/// Records are append-only; the sequence number is unique and strictly
/// increasing within a session, starting at 0.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogRecord {
    /// Wall-clock time the record was created (ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,
    /// Severity level
    pub level: LogLevel,
    /// Free-form message text
    pub message: String,
    /// Arbitrary structured context, or null
    pub metadata: Option<serde_json::Value>,
    /// Monotonic position within the session's log stream
    pub sequence_number: u64,
}

impl LogRecord {
    /// Create a record stamped `now`
    pub fn new(
        level: LogLevel,
        message: impl Into<String>,
        metadata: Option<serde_json::Value>,
        sequence_number: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            message: message.into(),
            metadata,
            sequence_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_parse_roundtrip() {
        for level in [
            LogLevel::Debug,
            LogLevel::Info,
            LogLevel::Warn,
            LogLevel::Error,
            LogLevel::Fatal,
        ] {
            assert_eq!(LogLevel::parse(level.as_str()).unwrap(), level);
        }
    }

    #[test]
    fn test_level_parse_invalid() {
        let err = LogLevel::parse("critical").unwrap_err();
        assert!(matches!(err, DreamlakeError::BadInput(_)));
    }

    #[test]
    fn test_record_wire_shape() {
        let record = LogRecord::new(
            LogLevel::Warn,
            "disk nearly full",
            Some(serde_json::json!({"freeBytes": 1024})),
            7,
        );
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["level"], "warn");
        assert_eq!(json["message"], "disk nearly full");
        assert_eq!(json["sequenceNumber"], 7);
        assert_eq!(json["metadata"]["freeBytes"], 1024);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_record_null_metadata() {
        let record = LogRecord::new(LogLevel::Info, "hello", None, 0);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["metadata"].is_null());
    }

    #[test]
    fn test_record_jsonl_roundtrip() {
        let record = LogRecord::new(LogLevel::Error, "boom", None, 3);
        let line = serde_json::to_string(&record).unwrap();
        let parsed: LogRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.sequence_number, 3);
        assert_eq!(parsed.level, LogLevel::Error);
        assert_eq!(parsed.message, "boom");
    }
}
