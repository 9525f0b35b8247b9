//! Error types for metadata catalog operations.

use std::fmt;

use thiserror::Error;

/// Structured classification for catalog/database failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// `SQLite` returned busy/locked under concurrent access.
    BusyOrLocked,
    /// Constraint failure (unique/foreign-key/check/not-null).
    ConstraintViolation,
    /// Connection pool timed out waiting for a free connection.
    PoolTimeout,
    /// Connection pool is closed.
    PoolClosed,
    /// Expected row was not found.
    RowNotFound,
    /// Filesystem or transport IO failure.
    Io,
    /// SQL protocol/driver error.
    Protocol,
    /// Unclassified database failure.
    Other,
}

impl DbErrorKind {
    #[must_use]
    pub fn from_sqlx(error: &sqlx::Error) -> Self {
        match error {
            sqlx::Error::PoolTimedOut => Self::PoolTimeout,
            sqlx::Error::PoolClosed => Self::PoolClosed,
            sqlx::Error::RowNotFound => Self::RowNotFound,
            sqlx::Error::Io(_) => Self::Io,
            sqlx::Error::Protocol(_) => Self::Protocol,
            sqlx::Error::Database(database_error) => classify_database_error(database_error.as_ref()),
            _ => Self::Other,
        }
    }
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::BusyOrLocked => "busy_or_locked",
            Self::ConstraintViolation => "constraint_violation",
            Self::PoolTimeout => "pool_timeout",
            Self::PoolClosed => "pool_closed",
            Self::RowNotFound => "row_not_found",
            Self::Io => "io",
            Self::Protocol => "protocol",
            Self::Other => "other",
        };
        write!(f, "{label}")
    }
}

fn classify_database_error(database_error: &(dyn sqlx::error::DatabaseError + 'static)) -> DbErrorKind {
    let code = database_error.code();
    if matches!(code.as_deref(), Some("SQLITE_BUSY" | "SQLITE_LOCKED" | "5" | "6")) {
        return DbErrorKind::BusyOrLocked;
    }

    if database_error.is_unique_violation()
        || database_error.is_foreign_key_violation()
        || database_error.is_check_violation()
        || code.as_deref().is_some_and(|value| value.starts_with("SQLITE_CONSTRAINT"))
    {
        return DbErrorKind::ConstraintViolation;
    }

    let message = database_error.message().to_ascii_lowercase();
    if message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("database is busy")
    {
        return DbErrorKind::BusyOrLocked;
    }

    DbErrorKind::Other
}

/// Errors that can occur during metadata catalog operations.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Database operation failed.
    #[error("database error ({kind}): {message}")]
    Database {
        /// Typed classification used for failure handling and retry policy.
        kind: DbErrorKind,
        /// Human-readable database error text.
        message: String,
    },

    /// File record not found for the given hash.
    #[error("file not found: {hash}")]
    FileNotFound {
        /// The hash that was not found.
        hash: String,
    },

    /// Reference record not found for the given id.
    #[error("reference not found: {id}")]
    ReferenceNotFound {
        /// The reference id that was not found.
        id: String,
    },

    /// `CreateFile` raced with a concurrent writer for the same hash; the
    /// first write wins and this one no-ops. The caller should treat it as
    /// a dedup hit.
    #[error("file already exists: {hash}")]
    FileAlreadyExists {
        /// The hash that already has a file record.
        hash: String,
    },
}

impl From<sqlx::Error> for CatalogError {
    fn from(err: sqlx::Error) -> Self {
        if matches!(err, sqlx::Error::RowNotFound) {
            return Self::Database {
                kind: DbErrorKind::RowNotFound,
                message: err.to_string(),
            };
        }
        Self::Database {
            kind: DbErrorKind::from_sqlx(&err),
            message: err.to_string(),
        }
    }
}

impl CatalogError {
    /// Returns the typed database error kind, when this is a database error.
    #[must_use]
    pub fn database_kind(&self) -> Option<DbErrorKind> {
        match self {
            Self::Database { kind, .. } => Some(*kind),
            Self::FileNotFound { .. } | Self::ReferenceNotFound { .. } | Self::FileAlreadyExists { .. } => None,
        }
    }

    /// Returns true when this error is a database busy/locked condition
    /// (a transient failure safe to retry).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self.database_kind(),
            Some(DbErrorKind::BusyOrLocked | DbErrorKind::PoolTimeout)
        )
    }
}
