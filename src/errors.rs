use std::fmt;
use thiserror::Error;

/// Step of the spreadsheet update protocol that was running when a write failed.
///
/// The remote service offers no atomic replace, so an update is a clear
/// followed by a rewrite. A failure in `Write` means the worksheet was already
/// cleared and is left empty or partially populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStage {
    Locate,
    Clear,
    Write,
    Metadata,
}

impl WriteStage {
    pub fn left_sheet_cleared(self) -> bool {
        matches!(self, WriteStage::Write)
    }
}

impl fmt::Display for WriteStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteStage::Locate => "locate",
            WriteStage::Clear => "clear",
            WriteStage::Write => "write",
            WriteStage::Metadata => "metadata",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Spreadsheet credential rejected: {0}")]
    Auth(String),

    #[error("Spreadsheet {stage} step failed: {message}")]
    Write { stage: WriteStage, message: String },

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },
}

/// Classification of a [`SyncError`], cheap to copy into results and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connection,
    Query,
    Auth,
    Write,
    Timeout,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Connection => "ConnectionError",
            ErrorKind::Query => "QueryError",
            ErrorKind::Auth => "AuthError",
            ErrorKind::Write => "WriteError",
            ErrorKind::Timeout => "TimeoutError",
        };
        f.write_str(name)
    }
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Connection(_) => ErrorKind::Connection,
            SyncError::Query(_) => ErrorKind::Query,
            SyncError::Auth(_) => ErrorKind::Auth,
            SyncError::Write { .. } => ErrorKind::Write,
            SyncError::Timeout { .. } => ErrorKind::Timeout,
        }
    }

    /// An expired or revoked credential will fail every later pass the same
    /// way until an operator refreshes it.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SyncError::Auth(_))
    }

    pub fn write(stage: WriteStage, message: impl Into<String>) -> Self {
        SyncError::Write {
            stage,
            message: message.into(),
        }
    }

    /// True when the failure happened after the worksheet had been cleared.
    pub fn left_sheet_cleared(&self) -> bool {
        match self {
            SyncError::Write { stage, .. } => stage.left_sheet_cleared(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
