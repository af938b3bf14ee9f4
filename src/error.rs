//! Error types for anime1-dl
//!
//! Every failure inside a download task is one of five kinds (fetch, parse,
//! partial write, remux, filesystem). They are recorded in the task's
//! [`Outcome`](crate::types::Outcome) and never abort sibling tasks. The only
//! run-level error is [`Error::Config`].

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for anime1-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for anime1-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_root")
        key: Option<String>,
    },

    /// Network or transport failure (after the retry budget is spent)
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Unexpected or missing structure in a fetched page, API response or manifest
    #[error("parse error: {0}")]
    Parse(String),

    /// A completed download does not match its declared size
    #[error("partial write at {path}: expected {expected} bytes, wrote {actual}")]
    PartialWrite {
        /// The temporary file that was written
        path: PathBuf,
        /// Size announced by the server
        expected: u64,
        /// Size found on disk
        actual: u64,
    },

    /// A finished download is smaller than the configured minimum
    ///
    /// Usually an error page or stub body served with a success status.
    #[error("download at {path} is only {actual} bytes (minimum {minimum})")]
    Undersized {
        /// The file that was checked
        path: PathBuf,
        /// Size found on disk
        actual: u64,
        /// Configured `min_file_size`
        minimum: u64,
    },

    /// The external remux tool failed or produced no usable output
    #[error("remux error: {0}")]
    Remux(String),

    /// Directory creation, file write or move failed
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// The path the operation was acting on
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A file already exists at the destination and the collision policy is `skip`
    #[error("destination already exists: {0}")]
    AlreadyExists(PathBuf),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Transport-level failures
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request exceeded the configured timeout
    #[error("timed out fetching {url}")]
    Timeout {
        /// The requested URL
        url: String,
    },

    /// Connection could not be established or was reset
    #[error("connection failed for {url}: {reason}")]
    Connect {
        /// The requested URL
        url: String,
        /// The transport error message
        reason: String,
    },

    /// Server answered with a non-success status
    #[error("HTTP {status} from {url}")]
    Status {
        /// The requested URL
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Response body could not be read to the end
    #[error("failed to read body from {url}: {reason}")]
    Body {
        /// The requested URL
        url: String,
        /// The transport error message
        reason: String,
    },

    /// Any other transport error (invalid request, redirect loop, ...)
    #[error("request to {url} failed: {reason}")]
    Request {
        /// The requested URL
        url: String,
        /// The transport error message
        reason: String,
    },
}

impl FetchError {
    /// Classify a reqwest error raised while sending a request
    pub fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else if e.is_connect() {
            FetchError::Connect {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else if e.is_body() || e.is_decode() {
            FetchError::Body {
                url: url.to_string(),
                reason: e.to_string(),
            }
        } else if let Some(status) = e.status() {
            FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
        } else {
            FetchError::Request {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    }

    /// Whether the server status is worth another attempt
    pub fn is_transient_status(status: u16) -> bool {
        matches!(status, 408 | 425 | 429) || (500..=599).contains(&status)
    }
}

/// Coarse error kind recorded in a task outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network/transport failure
    Fetch,
    /// Page, API or manifest structure problem
    Parse,
    /// Size mismatch or undersized file on a finished download
    PartialWrite,
    /// External assembly tool failure
    Remux,
    /// Path creation or move failure
    Filesystem,
    /// Invalid configuration
    Config,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Fetch => "FetchError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::PartialWrite => "PartialWriteError",
            ErrorKind::Remux => "RemuxError",
            ErrorKind::Filesystem => "FilesystemError",
            ErrorKind::Config => "ConfigError",
        };
        f.write_str(name)
    }
}

impl Error {
    /// The coarse kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config { .. } => ErrorKind::Config,
            Error::Fetch(_) => ErrorKind::Fetch,
            Error::Parse(_) | Error::Serialization(_) => ErrorKind::Parse,
            Error::PartialWrite { .. } | Error::Undersized { .. } => ErrorKind::PartialWrite,
            Error::Remux(_) => ErrorKind::Remux,
            Error::Filesystem { .. } | Error::AlreadyExists(_) => ErrorKind::Filesystem,
        }
    }

    /// Shorthand for a configuration error tied to a key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Shorthand for wrapping an I/O error with the path it concerns
    pub fn fs(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_maps_to_its_kind() {
        let cases = [
            (Error::config("bad", "max_workers"), ErrorKind::Config),
            (
                Error::Fetch(FetchError::Timeout {
                    url: "http://x".into(),
                }),
                ErrorKind::Fetch,
            ),
            (Error::Parse("no video".into()), ErrorKind::Parse),
            (
                Error::PartialWrite {
                    path: "/tmp/a".into(),
                    expected: 10,
                    actual: 5,
                },
                ErrorKind::PartialWrite,
            ),
            (
                Error::Undersized {
                    path: "/tmp/a".into(),
                    actual: 512,
                    minimum: 1024,
                },
                ErrorKind::PartialWrite,
            ),
            (Error::Remux("exit 1".into()), ErrorKind::Remux),
            (
                Error::fs("/tmp/a", std::io::Error::other("denied")),
                ErrorKind::Filesystem,
            ),
            (Error::AlreadyExists("/tmp/a".into()), ErrorKind::Filesystem),
        ];

        for (error, expected) in cases {
            assert_eq!(error.kind(), expected, "{error} should map to {expected}");
        }
    }

    #[test]
    fn kind_display_uses_error_names() {
        assert_eq!(ErrorKind::Fetch.to_string(), "FetchError");
        assert_eq!(ErrorKind::PartialWrite.to_string(), "PartialWriteError");
        assert_eq!(ErrorKind::Filesystem.to_string(), "FilesystemError");
    }

    #[test]
    fn transient_statuses() {
        for status in [408, 425, 429, 500, 502, 503, 504] {
            assert!(FetchError::is_transient_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 410] {
            assert!(!FetchError::is_transient_status(status), "{status}");
        }
    }

    #[test]
    fn partial_write_message_names_sizes() {
        let e = Error::PartialWrite {
            path: "/tmp/media.part".into(),
            expected: 100,
            actual: 40,
        };
        let msg = e.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("40"));
    }
}
