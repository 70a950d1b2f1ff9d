//! Worker replies

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;

const DEFAULT_ERROR_CODE: u16 = 500;

/// Outcome of one job, discriminated by `status` on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Reply {
    Ok { file_url: String },
    Error { code: u16, detail: String },
}

impl Reply {
    pub fn ok(file_url: impl Into<String>) -> Self {
        Reply::Ok {
            file_url: file_url.into(),
        }
    }

    pub fn error(code: u16, detail: impl Into<String>) -> Self {
        Reply::Error {
            code,
            detail: detail.into(),
        }
    }

    /// Error reply carrying the status the error maps to
    pub fn from_error(err: &AppError) -> Self {
        Reply::error(err.status_code().as_u16(), err.to_string())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).unwrap_or_else(|_| {
            br#"{"status":"error","code":500,"detail":"reply encoding failed"}"#.to_vec()
        })
    }

    /// Interpret whatever came back on the reply destination.
    ///
    /// Only `ok` with a non-empty `file_url` is a success. Every other shape
    /// becomes an error, taking `code` and `detail` when present.
    pub fn decode_lenient(bytes: &[u8]) -> Reply {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(value) => value,
            Err(_) => return Reply::error(DEFAULT_ERROR_CODE, "Undecodable worker reply"),
        };

        if value.get("status").and_then(Value::as_str) == Some("ok") {
            return match value.get("file_url").and_then(Value::as_str) {
                Some(url) if !url.is_empty() => Reply::ok(url),
                _ => Reply::error(DEFAULT_ERROR_CODE, "Empty reply from worker"),
            };
        }

        let code = match value.get("code") {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
            _ => None,
        }
        .filter(|code| *code > 0)
        .and_then(|code| u16::try_from(code).ok())
        .unwrap_or(DEFAULT_ERROR_CODE);

        let detail = value
            .get("detail")
            .and_then(Value::as_str)
            .filter(|d| !d.is_empty())
            .unwrap_or("Worker error");

        Reply::error(code, detail)
    }
}
