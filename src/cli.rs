use std::path::PathBuf;

use clap::Parser;
use log::{debug, info};

use crate::config::Config;
use crate::error::MigrateError;
use crate::logging;
use crate::migrator::Migrator;

/// Rebuilds the `player` table with unbounded TEXT columns after backing up
/// the database file. Run it once, with the game server stopped.
#[derive(Parser, Debug)]
#[command(name = "player-migrate", version, about)]
pub struct Cli {
    /// Configuration file (default: ./player-migrate.toml if present)
    #[arg(long = "config", short = 'c')]
    pub config: Option<PathBuf>,

    /// Database file to migrate (default: instance/cardwarskingdom.db)
    #[arg(long = "db", short = 'd')]
    pub db: Option<PathBuf>,

    /// Directory for the backup file (default: the database's directory)
    #[arg(long = "backup-dir", short = 'b')]
    pub backup_dir: Option<PathBuf>,

    /// Verify the backup's SHA-256 digest before touching the database
    #[arg(long = "verify-backup", default_value_t = false)]
    pub verify_backup: bool,

    /// Log level: off, error, warn, info, debug or trace
    #[arg(long = "log-level")]
    pub log_level: Option<String>,
}

impl Cli {
    pub fn handle_command_line() -> Result<(), MigrateError> {
        let args = Cli::parse();
        let config = args.resolve_config()?;

        // Keep the handle alive so buffered log lines are flushed on exit
        let _logger = logging::init(&config.logging)?;
        debug!("Resolved configuration: {:?}", config);

        let report = Migrator::with_system_clock(config.migration).migrate()?;
        info!(
            "Done: {}/{} row(s) migrated, {} index(es) and {} trigger(s) recreated, backup at {}",
            report.rows_copied,
            report.rows_before,
            report.indexes_recreated,
            report.triggers_recreated,
            report.backup_path.display()
        );

        Ok(())
    }

    /// Loads the layered configuration and applies command-line overrides on top.
    pub fn resolve_config(&self) -> Result<Config, MigrateError> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(db) = &self.db {
            config.migration.source_path = db.clone();
        }
        if let Some(dir) = &self.backup_dir {
            config.migration.backup_directory = Some(dir.clone());
        }
        if self.verify_backup {
            config.migration.verify_backup = true;
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
            config.ensure_valid();
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_parsing_no_arguments() {
        let result = Cli::try_parse_from(["player-migrate"]);
        assert!(result.is_ok(), "Should accept no arguments");

        let cli = result.unwrap();
        assert!(cli.config.is_none());
        assert!(cli.db.is_none());
        assert!(cli.backup_dir.is_none());
        assert!(!cli.verify_backup);
        assert!(cli.log_level.is_none());
    }

    #[test]
    fn test_cli_parsing_all_overrides() {
        let cli = Cli::try_parse_from([
            "player-migrate",
            "--db",
            "game.db",
            "-b",
            "/tmp/backups",
            "--verify-backup",
            "--log-level",
            "debug",
        ])
        .unwrap();

        assert_eq!(cli.db, Some(PathBuf::from("game.db")));
        assert_eq!(cli.backup_dir, Some(PathBuf::from("/tmp/backups")));
        assert!(cli.verify_backup);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_cli_parsing_invalid_arguments() {
        let result = Cli::try_parse_from(["player-migrate", "--invalid-flag"]);
        assert!(result.is_err(), "Should reject unknown flags");

        let result = Cli::try_parse_from(["player-migrate", "extra"]);
        assert!(result.is_err(), "Should reject positional arguments");
    }

    #[test]
    fn test_overrides_win_over_config() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "player-migrate.toml",
                r#"
                [migration]
                source_path = "from_file.db"
                backup_directory = "file_backups"
                "#,
            )?;

            let cli = Cli::try_parse_from([
                "player-migrate",
                "--db",
                "from_cli.db",
                "--verify-backup",
                "--log-level",
                "WARN",
            ])
            .unwrap();
            let config = cli.resolve_config().expect("config should resolve");

            assert_eq!(config.migration.source_path, PathBuf::from("from_cli.db"));
            assert_eq!(
                config.migration.backup_directory,
                Some(PathBuf::from("file_backups"))
            );
            assert!(config.migration.verify_backup);
            assert_eq!(config.logging.level, "warn");
            Ok(())
        });
    }
}
