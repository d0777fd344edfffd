// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Destination directory preparation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{DownloadError, DownloadResult};

/// Create `path` and any missing parents. Existing directories are fine.
///
/// Returns the path unchanged.
pub fn ensure_dir(path: &Path) -> io::Result<PathBuf> {
    fs::create_dir_all(path)?;
    Ok(path.to_path_buf())
}

/// Pick the destination for a start request and make it absolute.
///
/// A missing or blank `folder` falls back to `default_dir`. Relative paths
/// are resolved against the current working directory.
pub fn resolve_destination(folder: Option<&str>, default_dir: &Path) -> io::Result<PathBuf> {
    std::path::absolute(choose_destination(folder, default_dir))
}

fn choose_destination(folder: Option<&str>, default_dir: &Path) -> PathBuf {
    match folder.map(str::trim) {
        Some(f) if !f.is_empty() => PathBuf::from(f),
        _ => default_dir.to_path_buf(),
    }
}

/// Resolve and create the destination in one step.
///
/// Failures carry the path that was attempted.
pub fn prepare_destination(folder: Option<&str>, default_dir: &Path) -> DownloadResult<PathBuf> {
    let chosen = choose_destination(folder, default_dir);
    let resolved = std::path::absolute(&chosen).map_err(|e| DownloadError::directory(&chosen, &e))?;
    ensure_dir(&resolved).map_err(|e| DownloadError::directory(&resolved, &e))
}
