//! One full reconciliation pass: fetch accounts, then sweep.

use std::fs;
use std::io;
use std::path::Path;

use common::{AccountSource, DisposalPolicy, Result, SweepError};

use crate::reconcile::{DisposalReport, reconcile};

/// Run a reconciliation pass against `root`.
///
/// The accounts root is checked before the bouncer is contacted, and the
/// account listing is complete before anything on disk changes. Any failure
/// up to that point aborts the pass with no filesystem effect. The sweep
/// itself runs on the blocking pool.
pub async fn run_pass(
    source: &dyn AccountSource,
    root: &Path,
    policy: &DisposalPolicy,
    dry_run: bool,
) -> Result<DisposalReport> {
    check_root(root)?;

    let accounts = source.list_accounts().await?;
    log::debug!("Bouncer reported {} accounts", accounts.len());

    let root_dir = root.to_path_buf();
    let policy = policy.clone();
    let report =
        tokio::task::spawn_blocking(move || reconcile(&accounts, &root_dir, &policy, dry_run))
            .await
            .map_err(|e| SweepError::Inventory {
                path: root.to_path_buf(),
                source: io::Error::other(e),
            })??;
    report.log();
    Ok(report)
}

fn check_root(root: &Path) -> Result<()> {
    let inventory_error = |source| SweepError::Inventory {
        path: root.to_path_buf(),
        source,
    };

    let metadata = fs::metadata(root).map_err(inventory_error)?;
    if !metadata.is_dir() {
        return Err(inventory_error(io::Error::new(
            io::ErrorKind::NotADirectory,
            "accounts root is not a directory",
        )));
    }
    fs::read_dir(root).map_err(inventory_error)?;
    Ok(())
}
