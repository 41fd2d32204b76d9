use std::fs::{self, File};
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use hex::encode;
use log::{debug, info, warn, Level};
use logging_timer::timer;
use sha2::{Digest, Sha256};

use crate::error::MigrateError;

pub const BACKUP_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";
const DEFAULT_EXTENSION: &str = "db";

/// Builds `<stem>_backup_<timestamp>.<ext>` next to the source, or inside
/// `backup_dir` when one is given.
pub fn backup_path(
    source: &Path,
    backup_dir: Option<&Path>,
    timestamp: NaiveDateTime,
) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "database".to_owned());
    let ext = source
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_owned());

    let file_name = format!(
        "{}_backup_{}.{}",
        stem,
        timestamp.format(BACKUP_TIMESTAMP_FORMAT),
        ext
    );

    let dir = match backup_dir {
        Some(dir) => dir.to_path_buf(),
        None => source
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default(),
    };

    dir.join(file_name)
}

/// Copies `source` to `dest` byte for byte.
///
/// The destination is created with `create_new`, so an existing file is never
/// overwritten, even if it appears between the name being chosen and the copy.
/// Permission bits and the modification time are restored afterwards on a
/// best-effort basis. If the copy fails part way the truncated destination is
/// removed so it can't be mistaken for a usable backup.
pub fn create_backup(source: &Path, dest: &Path) -> Result<u64, MigrateError> {
    let _tmr = timer!(Level::Debug; "create_backup");

    let mut reader = match File::open(source) {
        Ok(f) if f.metadata().map(|m| m.is_file()).unwrap_or(false) => f,
        Ok(_) => {
            return Err(MigrateError::Backup {
                path: dest.to_path_buf(),
                source: io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("'{}' is not a regular file", source.display()),
                ),
            })
        }
        Err(e) => {
            return Err(MigrateError::Backup {
                path: dest.to_path_buf(),
                source: io::Error::new(
                    e.kind(),
                    format!("database file '{}': {}", source.display(), e),
                ),
            })
        }
    };

    let mut writer = match File::options().write(true).create_new(true).open(dest) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
            return Err(MigrateError::BackupExists(dest.to_path_buf()));
        }
        Err(e) => {
            return Err(MigrateError::Backup {
                path: dest.to_path_buf(),
                source: e,
            })
        }
    };

    let copied = copy_and_sync(&mut reader, &mut writer);
    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(e) => {
            drop(writer);
            if let Err(remove_err) = fs::remove_file(dest) {
                warn!(
                    "Failed to remove partial backup {}: {}",
                    dest.display(),
                    remove_err
                );
            }
            return Err(MigrateError::Backup {
                path: dest.to_path_buf(),
                source: e,
            });
        }
    };

    if let Err(e) = preserve_metadata(&reader, &writer) {
        debug!(
            "Could not preserve file metadata on {}: {}",
            dest.display(),
            e
        );
    }

    info!(
        "Copied {} bytes from {} to {}",
        bytes,
        source.display(),
        dest.display()
    );

    Ok(bytes)
}

fn copy_and_sync(reader: &mut File, writer: &mut File) -> io::Result<u64> {
    let bytes = io::copy(reader, writer)?;
    writer.sync_all()?;
    Ok(bytes)
}

fn preserve_metadata(source: &File, dest: &File) -> io::Result<()> {
    let metadata = source.metadata()?;
    dest.set_permissions(metadata.permissions())?;
    dest.set_modified(metadata.modified()?)
}

/// Hex-encoded SHA-256 of the file's contents.
pub fn file_digest(path: &Path) -> Result<String, MigrateError> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(encode(hasher.finalize()))
}

/// Confirms that the backup is an exact copy of the source.
pub fn verify_backup(source: &Path, backup: &Path) -> Result<(), MigrateError> {
    let _tmr = timer!(Level::Debug; "verify_backup");

    let source_digest = file_digest(source)?;
    let backup_digest = file_digest(backup)?;

    if source_digest != backup_digest {
        return Err(MigrateError::BackupMismatch {
            source_digest,
            backup_digest,
        });
    }

    debug!("Backup verified: sha256 {}", backup_digest);
    Ok(())
}
