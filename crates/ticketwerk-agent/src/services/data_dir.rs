// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Data directory resolution.

use std::path::{Path, PathBuf};

use ticketwerk_core::Result;

/// Environment variable that pins the data directory.
pub const DATA_DIR_ENV: &str = "TICKETWERK_DATA_DIR";

/// Return the agent data directory, creating it if needed.
///
/// Precedence: the `--data-dir` flag, `TICKETWERK_DATA_DIR`, then the XDG
/// data home, then `~/.local/share`.
pub fn data_dir(flag: Option<&Path>) -> Result<PathBuf> {
    let dir = resolve(flag, |key| std::env::var(key).ok());
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

fn resolve(flag: Option<&Path>, env: impl Fn(&str) -> Option<String>) -> PathBuf {
    if let Some(dir) = flag {
        return dir.to_path_buf();
    }
    let set = |key: &str| env(key).filter(|value| !value.trim().is_empty());
    if let Some(dir) = set(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    let base = if let Some(xdg) = set("XDG_DATA_HOME") {
        PathBuf::from(xdg)
    } else if let Some(home) = set("HOME") {
        PathBuf::from(home).join(".local").join("share")
    } else {
        // Last resort
        PathBuf::from("/tmp")
    };
    base.join("ticketwerk")
}
