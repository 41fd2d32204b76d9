use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::MigrateError;

pub const DEFAULT_CONFIG_FILE: &str = "player-migrate.toml";
pub const ENV_PREFIX: &str = "PLAYER_MIGRATE_";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 6] = ["off", "error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";

    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_string(),
        }
    }

    fn ensure_valid(&mut self) {
        let str_original = self.level.clone();
        self.level = self.level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&self.level.as_str()) {
            eprintln!(
                "Config error: log level of '{}' is invalid - using default of '{}'",
                str_original,
                Self::DEFAULT_LEVEL
            );
            self.level = Self::DEFAULT_LEVEL.to_owned();
        }
    }
}

/// Where the live database is and where its backup goes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MigrationConfig {
    pub source_path: PathBuf,
    /// Defaults to the directory holding `source_path`.
    #[serde(default)]
    pub backup_directory: Option<PathBuf>,
    /// Compare SHA-256 digests of the database and its backup before mutating.
    #[serde(default)]
    pub verify_backup: bool,
}

impl MigrationConfig {
    const SOURCE_PATH: &str = "instance/cardwarskingdom.db";

    fn default() -> Self {
        MigrationConfig {
            source_path: PathBuf::from(Self::SOURCE_PATH),
            backup_directory: None,
            verify_backup: false,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub migration: MigrationConfig,
    pub logging: LoggingConfig,
}

impl Config {
    fn default() -> Self {
        Config {
            migration: MigrationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Layers defaults, a TOML file and `PLAYER_MIGRATE_*` environment
    /// variables (`__` separates sections, e.g.
    /// `PLAYER_MIGRATE_MIGRATION__SOURCE_PATH`).
    ///
    /// An explicitly named config file must exist. Without one,
    /// `player-migrate.toml` in the working directory is merged if present.
    pub fn load(config_file: Option<&Path>) -> Result<Self, MigrateError> {
        let toml = match config_file {
            Some(path) => {
                if !path.is_file() {
                    return Err(MigrateError::Config(format!(
                        "config file '{}' not found",
                        path.display()
                    )));
                }
                Toml::file(path)
            }
            None => Toml::file(DEFAULT_CONFIG_FILE),
        };

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(toml)
            .merge(Env::prefixed(ENV_PREFIX).split("__"));

        let mut config: Config = figment.extract()?;
        config.ensure_valid();

        Ok(config)
    }

    pub(crate) fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
    }
}
