//! Error taxonomy for the ingestion pipeline and the query path
//!
//! Granularity decides propagation: parse and scan errors skip one file,
//! store errors skip one session unless they are fatal, query errors go
//! back to the caller.

use std::path::{Path, PathBuf};

use rusqlite::ErrorCode;
use thiserror::Error;

/// A transcript that cannot be turned into a session at all.
/// Individual malformed lines are not errors; they are counted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("transcript is not valid UTF-8 (valid up to byte {valid_up_to})")]
    InvalidEncoding { valid_up_to: usize },

    #[error("transcript contains no records")]
    Empty,

    #[error("transcript contains no valid records ({malformed} malformed lines)")]
    NoValidRecords { malformed: usize },
}

/// Unreadable file or directory encountered while scanning
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("directory walk failed: {source}")]
    Walk {
        #[from]
        source: walkdir::Error,
    },

    #[error("modification time of {} predates the epoch", path.display())]
    Time { path: PathBuf },
}

impl ScanError {
    pub fn path(&self) -> Option<&Path> {
        match self {
            ScanError::Io { path, .. } | ScanError::Time { path } => Some(path),
            ScanError::Walk { source } => source.path(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cannot create store directory {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    /// Whether the store itself is unusable, as opposed to one failed write.
    /// Fatal errors abort the whole rescan cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            StoreError::Io { .. } => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseCorrupt
                    | ErrorCode::NotADatabase
                    | ErrorCode::CannotOpen
                    | ErrorCode::DiskFull
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::ReadOnly
            ),
            StoreError::Sqlite(_) => false,
        }
    }
}

/// Malformed request parameters, or a store failure while answering
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid date '{0}', expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("date range is inverted: {start} is after {end}")]
    InvertedRange { start: String, end: String },

    #[error("invalid sort key '{0}', expected 'start' or 'last'")]
    InvalidSort(String),

    #[error("unknown source '{0}', expected 'codex' or 'claude'")]
    InvalidSource(String),

    #[error("unknown role '{0}'")]
    InvalidRole(String),

    #[error("invalid limit '{0}', expected a positive integer")]
    InvalidLimit(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl QueryError {
    /// True for errors caused by the request rather than the store
    pub fn is_user_error(&self) -> bool {
        !matches!(self, QueryError::Store(_))
    }
}

/// Conditions that abort a whole rescan cycle
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("rescan task aborted: {0}")]
    Aborted(String),
}
