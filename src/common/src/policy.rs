//! What happens to an orphaned account directory.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::{Result, SweepError};

/// Disposal policy, built and validated once at startup.
///
/// Build a `Quarantine` value through [`DisposalPolicy::quarantine`] or
/// [`DisposalPolicy::from_trash_dir`], which check that the base directory
/// exists and is writable. Disposal trusts the base it is given and never
/// re-checks it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", content = "base", rename_all = "snake_case")]
pub enum DisposalPolicy {
    Delete,
    Quarantine(PathBuf),
}

impl DisposalPolicy {
    /// Builds a policy from the module-style `trashdir` setting, where an
    /// empty value means delete.
    pub fn from_trash_dir(trash_dir: &str) -> Result<Self> {
        if trash_dir.trim().is_empty() {
            Ok(Self::Delete)
        } else {
            Self::quarantine(trash_dir)
        }
    }

    pub fn quarantine(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref();
        let metadata = std::fs::metadata(base).map_err(|e| {
            SweepError::Configuration(format!(
                "The specified trash directory ('{}') cannot be found: {e}",
                base.display()
            ))
        })?;
        if !metadata.is_dir() {
            return Err(SweepError::Configuration(format!(
                "The specified trash directory ('{}') is not a directory",
                base.display()
            )));
        }
        check_access(base)?;

        let base = std::fs::canonicalize(base).map_err(|e| {
            SweepError::Configuration(format!(
                "Failed to resolve trash directory '{}': {e}",
                base.display()
            ))
        })?;
        Ok(Self::Quarantine(base))
    }

    pub fn quarantine_base(&self) -> Option<&Path> {
        match self {
            Self::Delete => None,
            Self::Quarantine(base) => Some(base),
        }
    }
}

impl fmt::Display for DisposalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Delete => write!(f, "delete"),
            Self::Quarantine(base) => write!(f, "quarantine to '{}'", base.display()),
        }
    }
}

#[cfg(unix)]
fn check_access(base: &Path) -> Result<()> {
    use nix::unistd::{AccessFlags, access};

    access(base, AccessFlags::R_OK | AccessFlags::W_OK | AccessFlags::X_OK).map_err(|errno| {
        SweepError::Configuration(format!(
            "The specified trash directory ('{}') doesn't have the correct access rights \
             for the account running dirsweep: {errno}",
            base.display()
        ))
    })
}

#[cfg(not(unix))]
fn check_access(base: &Path) -> Result<()> {
    let metadata = std::fs::metadata(base)
        .map_err(|e| SweepError::Configuration(format!("{}: {e}", base.display())))?;
    if metadata.permissions().readonly() {
        return Err(SweepError::Configuration(format!(
            "The specified trash directory ('{}') is read-only",
            base.display()
        )));
    }
    Ok(())
}
