//! Exit-time log rotation.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use chrono::{Local, NaiveDateTime};
use tracing::{info, warn};

use crate::stream::StreamSpec;

/// Timestamp inserted between a log's base name and its extension.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Archive name for `path` at time `at`: `<base>-<timestamp>.<ext>`.
///
/// Only the file name is split, at its last `.`. A name without an extension
/// (or a dot file such as `.log`) gets the timestamp appended instead.
pub fn rotated_path(path: &Path, at: &NaiveDateTime) -> Option<PathBuf> {
    let name = path.file_name()?.to_string_lossy();
    let stamp = at.format(TIMESTAMP_FORMAT);
    let rotated = match name.rsplit_once('.') {
        Some((base, extension)) if !base.is_empty() => format!("{base}-{stamp}.{extension}"),
        _ => format!("{name}-{stamp}"),
    };
    Some(path.with_file_name(rotated))
}

/// Renames `path` to its archive name. A missing source is not an error and yields `None`.
pub fn rotate_file(path: &Path, at: &NaiveDateTime) -> io::Result<Option<PathBuf>> {
    let Some(target) = rotated_path(path, at) else {
        return Ok(None);
    };
    match fs::rename(path, &target) {
        Ok(()) => Ok(Some(target)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Rotates every configured destination using the current local time.
pub fn rotate_logs(specs: &[StreamSpec]) -> Vec<PathBuf> {
    rotate_logs_at(specs, &Local::now().naive_local())
}

/// Rotates every configured destination with a single timestamp.
///
/// Failures are logged and skipped. Returns the archive paths that were created.
pub fn rotate_logs_at(specs: &[StreamSpec], at: &NaiveDateTime) -> Vec<PathBuf> {
    let mut rotated = Vec::new();
    for path in specs.iter().filter_map(|spec| spec.destination.as_deref()) {
        match rotate_file(path, at) {
            Ok(Some(target)) => {
                info!(from = %path.display(), to = %target.display(), "rotated log");
                rotated.push(target);
            }
            Ok(None) => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to rotate log"),
        }
    }
    rotated
}
