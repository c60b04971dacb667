use rusqlite::ErrorCode;
use thiserror::Error;

/// Failure classes for a single document on its way into the store.
///
/// Extraction never produces one of these: a field the extractor cannot find
/// is simply absent. Errors only arise once a record is validated and written.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("record failed validation: {0}")]
    Validation(String),

    #[error("database connection failed")]
    Connection(#[source] rusqlite::Error),

    #[error("database rejected record")]
    Storage(#[source] rusqlite::Error),
}

impl PipelineError {
    /// Connection failures are environmental and worth retrying; validation
    /// and storage failures are terminal for the document.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Connection(_))
    }
}

/// Sort a SQLite error into the taxonomy. Open/busy/locked/IO failures mean
/// the store itself is unreachable or contended; everything else means the
/// store rejected this particular record.
pub fn classify_sqlite(err: rusqlite::Error) -> PipelineError {
    let code = match &err {
        rusqlite::Error::SqliteFailure(f, _) => Some(f.code),
        _ => None,
    };
    match code {
        Some(
            ErrorCode::CannotOpen
            | ErrorCode::DatabaseBusy
            | ErrorCode::DatabaseLocked
            | ErrorCode::PermissionDenied
            | ErrorCode::NotADatabase
            | ErrorCode::SystemIoFailure,
        ) => PipelineError::Connection(err),
        _ => PipelineError::Storage(err),
    }
}
