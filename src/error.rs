use rusqlite::Error as RusqliteError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::migrator::MigrationPhase;

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Backup to '{}' failed: {source}", path.display())]
    Backup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Backup file '{}' already exists", .0.display())]
    BackupExists(PathBuf),

    #[error("Backup verification failed: source digest {source_digest}, backup digest {backup_digest}")]
    BackupMismatch {
        source_digest: String,
        backup_digest: String,
    },

    #[error("Table '{0}' does not exist")]
    MissingTable(String),

    #[error("Schema mismatch: missing columns [{}], unexpected columns [{}]", missing.join(", "), unexpected.join(", "))]
    SchemaMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("Column order mismatch: expected [{}], found [{}]", expected.join(", "), found.join(", "))]
    ColumnOrderMismatch {
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Table '{0}' already has the migrated schema")]
    AlreadyMigrated(String),

    #[error("Row count mismatch after copy: expected {expected}, copied {actual}")]
    RowCountMismatch { expected: i64, actual: i64 },

    #[error("{phase} failed: {source}")]
    Phase {
        phase: MigrationPhase,
        #[source]
        source: RusqliteError,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl MigrateError {
    /// Tags a database error with the migration phase it came from.
    pub fn in_phase(phase: MigrationPhase) -> impl FnOnce(RusqliteError) -> Self {
        move |source| MigrateError::Phase { phase, source }
    }
}

impl From<figment::Error> for MigrateError {
    fn from(err: figment::Error) -> Self {
        MigrateError::Config(err.to_string())
    }
}

impl From<flexi_logger::FlexiLoggerError> for MigrateError {
    fn from(err: flexi_logger::FlexiLoggerError) -> Self {
        MigrateError::Error(format!("Failed to start logger: {}", err))
    }
}
