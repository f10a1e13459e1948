//! The irreversible part: deleting or quarantining one orphan directory.
//!
//! Quarantine destinations are claimed with `create_dir`, which fails if the
//! name is taken, so two disposals can never pick the same destination and
//! nothing that already exists under the quarantine base is overwritten.
//! The source is then renamed onto the claimed (empty) directory. When the
//! base lives on another filesystem the tree is copied and the source removed
//! afterwards.

use std::ffi::OsString;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use serde::Serialize;
use walkdir::WalkDir;

use common::{DisposalPolicy, Result, SweepError};

/// What happened to one orphan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum DisposalOutcome {
    Deleted,
    Quarantined(PathBuf),
    /// Dry run, nothing was touched.
    Skipped,
    Failed(String),
}

impl DisposalOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// Dispose of the directory at `path` according to `policy`.
///
/// `Delete` gives no atomicity guarantee: a failure part-way through leaves
/// whatever could not be removed.
pub fn dispose(path: &Path, policy: &DisposalPolicy) -> Result<DisposalOutcome> {
    match policy {
        DisposalPolicy::Delete => {
            fs::remove_dir_all(path)
                .map_err(|e| SweepError::disposal(path, "recursive removal failed", e))?;
            tracing::info!(path = %path.display(), "Deleted orphan directory");
            Ok(DisposalOutcome::Deleted)
        }
        DisposalPolicy::Quarantine(base) => {
            let destination = quarantine(path, base)?;
            tracing::info!(
                path = %path.display(),
                destination = %destination.display(),
                "Moved orphan directory to quarantine"
            );
            Ok(DisposalOutcome::Quarantined(destination))
        }
    }
}

fn quarantine(path: &Path, base: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| SweepError::Disposal {
        path: path.to_path_buf(),
        message: "path has no final component".to_string(),
        source: None,
    })?;

    // Make sure the source is there before claiming a destination for it
    fs::symlink_metadata(path)
        .map_err(|e| SweepError::disposal(path, "cannot inspect source directory", e))?;

    let destination = claim_destination(base, name)
        .map_err(|e| SweepError::disposal(path, "cannot claim a quarantine destination", e))?;

    move_into(path, &destination)?;
    Ok(destination)
}

/// Create the first free name among `name`, `name1`, `name2`, ... below `base`.
pub fn claim_destination(base: &Path, name: &std::ffi::OsStr) -> io::Result<PathBuf> {
    let mut suffix: u64 = 0;
    loop {
        let mut candidate = OsString::from(name);
        if suffix > 0 {
            candidate.push(suffix.to_string());
        }
        let candidate = base.join(candidate);

        match fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                suffix += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

fn move_into(source: &Path, destination: &Path) -> Result<()> {
    match rename_onto_claim(source, destination) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::CrossesDevices => {
            tracing::debug!(
                source = %source.display(),
                destination = %destination.display(),
                "Quarantine is on another filesystem, copying instead"
            );
            copy_then_remove(source, destination)
        }
        Err(e) => {
            release_claim(destination);
            Err(SweepError::disposal(source, "rename into quarantine failed", e))
        }
    }
}

/// Move `source` into the claimed `destination` without a rename.
///
/// A failed copy releases the claim and leaves the source intact. Once the
/// copy is complete it is the archive and is kept even if the source cannot
/// be removed.
fn copy_then_remove(source: &Path, destination: &Path) -> Result<()> {
    if let Err(e) = copy_tree(source, destination) {
        release_claim(destination);
        return Err(SweepError::disposal(source, "cross-device copy failed", e));
    }
    fs::remove_dir_all(source).map_err(|e| {
        SweepError::disposal(source, "copied to quarantine but removing source failed", e)
    })
}

/// Give a claimed name back after the move failed. The source is intact.
fn release_claim(destination: &Path) {
    match fs::remove_dir_all(destination) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(
            destination = %destination.display(),
            error = %e,
            "Failed to release quarantine destination"
        ),
    }
}

#[cfg(unix)]
fn rename_onto_claim(source: &Path, destination: &Path) -> io::Result<()> {
    // rename(2) replaces an empty target directory atomically
    fs::rename(source, destination)
}

#[cfg(not(unix))]
fn rename_onto_claim(source: &Path, destination: &Path) -> io::Result<()> {
    fs::remove_dir(destination)?;
    fs::rename(source, destination)
}

/// Recreate the tree below `source` inside the existing `destination`.
fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let target = destination.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, target)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> io::Result<()> {
    fs::copy(link, target).map(|_| ())
}
