//! Enumeration of on-disk account directories.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use common::{Result, SweepError};

/// An account directory found under the accounts root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Directory base name, compared against account identifiers.
    pub identifier: String,
    pub path: PathBuf,
}

/// List the immediate subdirectories of `root`, keyed by identifier.
///
/// Symbolic links are never reported, even when they point at a directory,
/// so a disposal can only ever act on a real child of `root`. Names that are
/// not valid UTF-8 cannot match an account and are skipped.
pub fn list_directories(root: &Path) -> Result<BTreeMap<String, DirectoryEntry>> {
    let inventory_error = |source| SweepError::Inventory {
        path: root.to_path_buf(),
        source,
    };

    let mut entries = BTreeMap::new();
    for entry in fs::read_dir(root).map_err(inventory_error)? {
        let entry = entry.map_err(inventory_error)?;
        let file_type = entry.file_type().map_err(inventory_error)?;
        if !file_type.is_dir() {
            continue;
        }

        let Ok(identifier) = entry.file_name().into_string() else {
            tracing::warn!(
                path = %entry.path().display(),
                "Skipping directory with a name that is not valid UTF-8"
            );
            continue;
        };

        entries.insert(
            identifier.clone(),
            DirectoryEntry {
                identifier,
                path: entry.path(),
            },
        );
    }

    tracing::debug!(
        root = %root.display(),
        directories = entries.len(),
        "Scanned accounts root"
    );
    Ok(entries)
}
