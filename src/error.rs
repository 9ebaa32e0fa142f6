use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = EtlError> = std::result::Result<T, E>;

/// Failures the schema definer and loaders can report.
///
/// Source-format problems are detected before any write. Store failures are
/// split into connectivity (the store could not be opened) and constraint
/// violations (a key collided despite deduplication).
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("source column '{column}' is missing from {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("line {line}: column '{column}': {message}")]
    SourceFormat {
        line: u64,
        column: String,
        message: String,
    },

    #[error("cannot open store '{uri}': {source}")]
    Connectivity {
        uri: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("constraint violated: {0}")]
    Constraint(#[source] rusqlite::Error),

    #[error("load aborted after {rows_committed} committed rows")]
    PartialBatch {
        rows_committed: usize,
        #[source]
        source: Box<EtlError>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Polars(#[from] polars::prelude::PolarsError),

    #[error(transparent)]
    Sql(rusqlite::Error),
}

impl From<rusqlite::Error> for EtlError {
    fn from(err: rusqlite::Error) -> Self {
        if err.sqlite_error_code() == Some(rusqlite::ErrorCode::ConstraintViolation) {
            EtlError::Constraint(err)
        } else {
            EtlError::Sql(err)
        }
    }
}

impl EtlError {
    pub fn config(message: impl Into<String>) -> Self {
        EtlError::Config(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constraint_failures_are_classified() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();

        let err: EtlError = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap_err()
            .into();

        assert!(matches!(err, EtlError::Constraint(_)));
    }

    #[test]
    fn other_sql_failures_stay_generic() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: EtlError = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .unwrap_err()
            .into();

        assert!(matches!(err, EtlError::Sql(_)));
    }
}
