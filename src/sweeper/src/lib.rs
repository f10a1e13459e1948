//! Orphan account directory cleanup.
//!
//! A directory under the accounts root is an orphan when the bouncer does not
//! list an account with exactly its name. Orphans are either deleted or moved
//! below a quarantine base, as decided by the [`DisposalPolicy`] built at
//! startup.
//!
//! [`DisposalPolicy`]: common::DisposalPolicy

pub mod deferred;
pub mod dispose;
pub mod inventory;
pub mod pass;
pub mod reconcile;

pub use deferred::{DeferredTrigger, LogNotifier, Notifier, PendingSet, ScheduleOutcome};
pub use dispose::{DisposalOutcome, dispose};
pub use inventory::{DirectoryEntry, list_directories};
pub use pass::run_pass;
pub use reconcile::{DisposalReport, OrphanDisposal, reconcile};
