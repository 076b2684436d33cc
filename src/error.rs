//! Error taxonomy and process exit codes.

use std::fmt;
use std::path::PathBuf;

use crate::keys::Format;

/// Exit code for invalid invocations.
pub const EXIT_USAGE: i32 = 255;

/// Exit code for every other fatal condition.
pub const EXIT_FAILURE: i32 = 1;

/// Where a parse failure happened inside a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {} column {}", self.line, self.column)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("usage: {0}")]
    Usage(String),

    #[error("{}: {source}", path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source_name}: invalid {format}{}: {message}", location.map(|l| format!(" at {}", l)).unwrap_or_default())]
    Parse {
        source_name: String,
        format: Format,
        location: Option<Location>,
        message: String,
    },

    #[error("{failed} of {attempted} sync operations failed")]
    Sync { attempted: usize, failed: usize },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("config {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("decode: {0}")]
    Decode(String),
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn access(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Access {
            path: path.into(),
            source,
        }
    }

    pub fn config(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self::Config {
            path: path.into(),
            message: message.to_string(),
        }
    }

    /// Build a parse error from a `serde_json` failure.
    pub fn json_parse(source_name: impl Into<String>, err: &serde_json::Error) -> Self {
        let location = (err.line() > 0).then(|| Location {
            line: err.line(),
            column: err.column(),
        });
        Self::Parse {
            source_name: source_name.into(),
            format: Format::Json,
            location,
            message: without_location(err.to_string()),
        }
    }

    /// Build a parse error from a `serde_yaml` failure.
    pub fn yaml_parse(source_name: impl Into<String>, err: &serde_yaml::Error) -> Self {
        let location = err.location().map(|l| Location {
            line: l.line(),
            column: l.column(),
        });
        Self::Parse {
            source_name: source_name.into(),
            format: Format::Yaml,
            location,
            message: without_location(err.to_string()),
        }
    }

    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => EXIT_USAGE,
            _ => EXIT_FAILURE,
        }
    }
}

/// Drop a trailing ` at line N column M`; the location is rendered separately.
fn without_location(message: String) -> String {
    const MARKER: &str = " at line ";
    let Some(at) = message.rfind(MARKER) else {
        return message;
    };
    let is_location = message[at + MARKER.len()..]
        .split_once(" column ")
        .is_some_and(|(line, column)| line.parse::<usize>().is_ok() && column.parse::<usize>().is_ok());
    if is_location {
        message[..at].to_string()
    } else {
        message
    }
}

/// Failure talking to the remote key-value store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("request failed: {0}")]
    Transport(String),

    #[error("{method} {key} returned {status}: {body}")]
    Status {
        method: &'static str,
        key: String,
        status: u16,
        body: String,
    },

    #[error("malformed response: {0}")]
    Decode(String),
}

pub type Result<T> = std::result::Result<T, Error>;
