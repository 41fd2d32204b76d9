use std::path::PathBuf;

use log::{error, info, warn, Level};
use logging_timer::timer;
use rusqlite::{Connection, OpenFlags};
use strum::{Display, EnumIter};

use crate::backup;
use crate::clock::{Clock, SystemClock};
use crate::config::MigrationConfig;
use crate::error::MigrateError;
use crate::schema::{self, PLAYER_NEW_TABLE, PLAYER_TABLE};

/// Steps of the transactional part of the migration. Database errors are
/// tagged with the step that raised them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum MigrationPhase {
    #[strum(to_string = "Begin transaction")]
    Begin,
    #[strum(to_string = "Schema validation")]
    Validate,
    #[strum(to_string = "Create table")]
    CreateTable,
    #[strum(to_string = "Copy rows")]
    CopyRows,
    #[strum(to_string = "Drop table")]
    DropTable,
    #[strum(to_string = "Rename table")]
    RenameTable,
    #[strum(to_string = "Recreate indexes")]
    RecreateIndexes,
    #[strum(to_string = "Recreate triggers")]
    RecreateTriggers,
    #[strum(to_string = "Commit")]
    Commit,
}

/// Summary of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub backup_path: PathBuf,
    pub rows_before: i64,
    pub rows_copied: i64,
    pub indexes_recreated: usize,
    pub triggers_recreated: usize,
}

struct RebuildStats {
    rows_before: i64,
    rows_copied: i64,
    indexes_recreated: usize,
    triggers_recreated: usize,
}

pub struct Migrator<C: Clock = SystemClock> {
    settings: MigrationConfig,
    clock: C,
}

impl Migrator<SystemClock> {
    pub fn with_system_clock(settings: MigrationConfig) -> Self {
        Self::new(settings, SystemClock)
    }
}

impl<C: Clock> Migrator<C> {
    pub fn new(settings: MigrationConfig, clock: C) -> Self {
        Self { settings, clock }
    }

    /// Backs up the database, then rebuilds `player` with widened text
    /// columns inside a single transaction.
    ///
    /// The backup is always taken before the database is opened. Any failure
    /// after the transaction begins rolls it back, so the table is either
    /// fully migrated or untouched. The backup file is left in place either
    /// way.
    pub fn migrate(&self) -> Result<MigrationReport, MigrateError> {
        let source = &self.settings.source_path;
        let backup_path = backup::backup_path(
            source,
            self.settings.backup_directory.as_deref(),
            self.clock.now(),
        );

        println!("Creating backup: {}", backup_path.display());
        backup::create_backup(source, &backup_path)?;

        if self.settings.verify_backup {
            backup::verify_backup(source, &backup_path)?;
            info!("Backup integrity verified");
        }

        // Never create the database: a missing file must stay an error
        let mut conn = Connection::open_with_flags(
            source,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Database opened at: {}", source.display());

        match Self::rebuild_player_table(&mut conn) {
            Ok(stats) => {
                println!("Migration completed successfully!");
                println!("Backup created at: {}", backup_path.display());
                info!(
                    "Migrated {} of {} rows, recreated {} index(es) and {} trigger(s)",
                    stats.rows_copied,
                    stats.rows_before,
                    stats.indexes_recreated,
                    stats.triggers_recreated
                );

                // The transaction is already committed; a close failure can't undo it
                close_connection(conn);

                Ok(MigrationReport {
                    backup_path,
                    rows_before: stats.rows_before,
                    rows_copied: stats.rows_copied,
                    indexes_recreated: stats.indexes_recreated,
                    triggers_recreated: stats.triggers_recreated,
                })
            }
            Err(e) => {
                error!("Migration failed: {}", e);
                println!("Migration failed: {}", e);
                println!("Database has been rolled back to original state.");
                Err(e)
            }
        }
    }

    fn rebuild_player_table(conn: &mut Connection) -> Result<RebuildStats, MigrateError> {
        // Table reconstruction: foreign keys must be off before the transaction starts
        conn.execute_batch("PRAGMA foreign_keys = OFF;")
            .map_err(MigrateError::in_phase(MigrationPhase::Begin))?;

        let tx = conn
            .transaction()
            .map_err(MigrateError::in_phase(MigrationPhase::Begin))?;

        match Self::run_phases(&tx) {
            Ok(stats) => {
                tx.commit()
                    .map_err(MigrateError::in_phase(MigrationPhase::Commit))?;
                Ok(stats)
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback() {
                    error!("Rollback failed: {}", rollback_err);
                }
                Err(e)
            }
        }
    }

    fn run_phases(conn: &Connection) -> Result<RebuildStats, MigrateError> {
        schema::validate_source(conn).map_err(|e| match e {
            MigrateError::DatabaseError(source) => MigrateError::Phase {
                phase: MigrationPhase::Validate,
                source,
            },
            other => other,
        })?;

        let rows_before = schema::row_count(conn, PLAYER_TABLE)
            .map_err(MigrateError::in_phase(MigrationPhase::Validate))?;
        let indexes = schema::index_definitions(conn, PLAYER_TABLE)
            .map_err(MigrateError::in_phase(MigrationPhase::Validate))?;
        let triggers = schema::trigger_definitions(conn, PLAYER_TABLE)
            .map_err(MigrateError::in_phase(MigrationPhase::Validate))?;

        conn.execute_batch(schema::CREATE_PLAYER_NEW_SQL)
            .map_err(MigrateError::in_phase(MigrationPhase::CreateTable))?;

        let rows_copied = {
            let _tmr = timer!(Level::Debug; "copy player rows");
            conn.execute_batch(schema::COPY_PLAYER_ROWS_SQL)
                .map_err(MigrateError::in_phase(MigrationPhase::CopyRows))?;
            schema::row_count(conn, PLAYER_NEW_TABLE)
                .map_err(MigrateError::in_phase(MigrationPhase::CopyRows))?
        };

        if rows_copied != rows_before {
            return Err(MigrateError::RowCountMismatch {
                expected: rows_before,
                actual: rows_copied,
            });
        }

        conn.execute_batch(schema::DROP_PLAYER_SQL)
            .map_err(MigrateError::in_phase(MigrationPhase::DropTable))?;

        conn.execute_batch(schema::RENAME_PLAYER_NEW_SQL)
            .map_err(MigrateError::in_phase(MigrationPhase::RenameTable))?;

        for index_sql in &indexes {
            conn.execute_batch(index_sql)
                .map_err(MigrateError::in_phase(MigrationPhase::RecreateIndexes))?;
        }

        for trigger_sql in &triggers {
            conn.execute_batch(trigger_sql)
                .map_err(MigrateError::in_phase(MigrationPhase::RecreateTriggers))?;
        }

        Ok(RebuildStats {
            rows_before,
            rows_copied,
            indexes_recreated: indexes.len(),
            triggers_recreated: triggers.len(),
        })
    }
}

/// Closes the connection, logging rather than returning a failure.
fn close_connection(conn: Connection) {
    if let Err((_, e)) = conn.close() {
        warn!("Failed to close database connection cleanly: {}", e);
    }
}
