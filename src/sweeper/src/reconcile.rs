//! Set difference between on-disk directories and authoritative accounts.

use std::path::Path;

use serde::Serialize;

use common::{AccountSet, DisposalPolicy, Result};

use crate::dispose::{DisposalOutcome, dispose};
use crate::inventory::{DirectoryEntry, list_directories};

/// Outcome of one orphan within a pass.
#[derive(Debug, Clone, Serialize)]
pub struct OrphanDisposal {
    pub identifier: String,
    pub path: std::path::PathBuf,
    #[serde(flatten)]
    pub outcome: DisposalOutcome,
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DisposalReport {
    /// Directories that matched an account and were left alone.
    pub retained: usize,
    /// Every orphan, in the order it was processed.
    pub orphans: Vec<OrphanDisposal>,
}

impl DisposalReport {
    pub fn failures(&self) -> impl Iterator<Item = &OrphanDisposal> {
        self.orphans.iter().filter(|o| o.outcome.is_failure())
    }

    pub fn failed_count(&self) -> usize {
        self.failures().count()
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }

    /// Log a one-line summary, plus one line per failed orphan.
    pub fn log(&self) {
        for failure in self.failures() {
            if let DisposalOutcome::Failed(reason) = &failure.outcome {
                tracing::error!(
                    identifier = %failure.identifier,
                    path = %failure.path.display(),
                    reason = %reason,
                    "Orphan directory was not disposed of"
                );
            }
        }

        tracing::info!(
            retained = self.retained,
            orphans = self.orphans.len(),
            failed = self.failed_count(),
            "Reconciliation pass complete"
        );
    }
}

/// Dispose of every directory under `root` that has no entry in `accounts`.
///
/// Only enumeration failure is returned as an error. Orphans are disposed of
/// one at a time in identifier order; a failed orphan is recorded in the
/// report and the remaining ones are still attempted.
pub fn reconcile(
    accounts: &AccountSet,
    root: &Path,
    policy: &DisposalPolicy,
    dry_run: bool,
) -> Result<DisposalReport> {
    let directories = list_directories(root)?;

    let (retained, orphans): (Vec<DirectoryEntry>, Vec<DirectoryEntry>) = directories
        .into_values()
        .partition(|entry| accounts.contains(&entry.identifier));

    tracing::info!(
        root = %root.display(),
        accounts = accounts.len(),
        retained = retained.len(),
        orphans = orphans.len(),
        policy = %policy,
        dry_run,
        "Computed orphan directories"
    );

    let mut report = DisposalReport {
        retained: retained.len(),
        orphans: Vec::with_capacity(orphans.len()),
    };

    for entry in orphans {
        let outcome = if dry_run {
            tracing::info!(
                identifier = %entry.identifier,
                path = %entry.path.display(),
                policy = %policy,
                "[DRY-RUN] Would dispose of orphan directory"
            );
            DisposalOutcome::Skipped
        } else {
            match dispose(&entry.path, policy) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(
                        identifier = %entry.identifier,
                        error = %e,
                        "Failed to dispose of orphan directory"
                    );
                    DisposalOutcome::Failed(e.to_string())
                }
            }
        };

        report.orphans.push(OrphanDisposal {
            identifier: entry.identifier,
            path: entry.path,
            outcome,
        });
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SweepError;
    use std::fs;
    use tempfile::TempDir;

    fn accounts(names: &[&str]) -> AccountSet {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn users_root(names: &[&str]) -> TempDir {
        let root = TempDir::new().unwrap();
        for name in names {
            fs::create_dir_all(root.path().join(name).join("moddata")).unwrap();
            fs::write(root.path().join(name).join("moddata/seen"), name.as_bytes()).unwrap();
        }
        root
    }

    fn on_disk(root: &Path) -> Vec<String> {
        list_directories(root).unwrap().into_keys().collect()
    }

    #[test]
    fn test_delete_disposes_only_orphans() {
        let root = users_root(&["alice", "bob", "carol"]);

        let report = reconcile(
            &accounts(&["alice", "carol"]),
            root.path(),
            &DisposalPolicy::Delete,
            false,
        )
        .unwrap();

        assert_eq!(report.retained, 2);
        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].identifier, "bob");
        assert_eq!(report.orphans[0].outcome, DisposalOutcome::Deleted);
        assert_eq!(on_disk(root.path()), vec!["alice", "carol"]);
    }

    #[test]
    fn test_quarantine_with_existing_entry() {
        let root = users_root(&["alice", "bob", "carol"]);
        let trash = TempDir::new().unwrap();
        fs::create_dir(trash.path().join("bob")).unwrap();
        fs::write(trash.path().join("bob/older"), b"keep me").unwrap();
        let policy = DisposalPolicy::quarantine(trash.path()).unwrap();
        let base = policy.quarantine_base().unwrap().to_path_buf();

        let report =
            reconcile(&accounts(&["alice", "carol"]), root.path(), &policy, false).unwrap();

        assert_eq!(
            report.orphans[0].outcome,
            DisposalOutcome::Quarantined(base.join("bob1"))
        );
        assert!(!root.path().join("bob").exists());
        assert_eq!(fs::read(base.join("bob1/moddata/seen")).unwrap(), b"bob");
        assert_eq!(fs::read(base.join("bob/older")).unwrap(), b"keep me");
        assert_eq!(on_disk(root.path()), vec!["alice", "carol"]);
    }

    #[test]
    fn test_accounts_without_directories_are_ignored() {
        let root = users_root(&["alice"]);

        let report = reconcile(
            &accounts(&["alice", "dave"]),
            root.path(),
            &DisposalPolicy::Delete,
            false,
        )
        .unwrap();

        assert!(report.orphans.is_empty());
        assert_eq!(on_disk(root.path()), vec!["alice"]);
    }

    #[test]
    fn test_identifiers_compare_exactly() {
        let root = users_root(&["Alice", "alice"]);

        let report = reconcile(&accounts(&["alice"]), root.path(), &DisposalPolicy::Delete, false)
            .unwrap();

        assert_eq!(report.orphans.len(), 1);
        assert_eq!(report.orphans[0].identifier, "Alice");
        assert_eq!(on_disk(root.path()), vec!["alice"]);
    }

    #[test]
    fn test_dry_run_touches_nothing() {
        let root = users_root(&["alice", "bob", "carol"]);

        let report = reconcile(&accounts(&["alice"]), root.path(), &DisposalPolicy::Delete, true)
            .unwrap();

        assert_eq!(report.orphans.len(), 2);
        assert!(
            report
                .orphans
                .iter()
                .all(|o| o.outcome == DisposalOutcome::Skipped)
        );
        assert_eq!(on_disk(root.path()), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_one_failure_does_not_stop_the_rest() {
        let root = users_root(&["alice", "bob", "carol"]);
        let trash = TempDir::new().unwrap();
        let policy = DisposalPolicy::quarantine(trash.path()).unwrap();
        // Removing the base after validation makes every quarantine fail
        let base = policy.quarantine_base().unwrap().to_path_buf();
        fs::remove_dir(&base).unwrap();

        let report = reconcile(&accounts(&[]), root.path(), &policy, false).unwrap();

        assert_eq!(report.orphans.len(), 3);
        assert_eq!(report.failed_count(), 3);
        assert!(report.has_failures());
        assert_eq!(on_disk(root.path()), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_missing_root_is_fatal() {
        let root = TempDir::new().unwrap();
        let err = reconcile(
            &accounts(&["alice"]),
            &root.path().join("missing"),
            &DisposalPolicy::Delete,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, SweepError::Inventory { .. }));
    }

    #[test]
    fn test_report_serializes_outcomes() {
        let root = users_root(&["bob"]);
        let report =
            reconcile(&accounts(&[]), root.path(), &DisposalPolicy::Delete, false).unwrap();

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["orphans"][0]["identifier"], "bob");
        assert_eq!(json["orphans"][0]["outcome"], "deleted");
    }
}
