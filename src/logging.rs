use flexi_logger::{Logger, LoggerHandle};

use crate::config::LoggingConfig;
use crate::error::MigrateError;

/// Starts logging to stderr at the configured level. `RUST_LOG`, when set,
/// takes precedence. Stdout is left to the migration's progress lines.
pub fn init(config: &LoggingConfig) -> Result<LoggerHandle, MigrateError> {
    let handle = Logger::try_with_env_or_str(&config.level)?
        .log_to_stderr()
        .format(flexi_logger::detailed_format)
        .start()?;

    Ok(handle)
}
