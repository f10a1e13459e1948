use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::Result;

/// Identifiers of the accounts that currently exist on the bouncer.
///
/// Produced fresh for every pass and never persisted.
pub type AccountSet = BTreeSet<String>;

/// The authoritative source of account identifiers.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AccountSource: Send + Sync {
    /// Fetch the current account set.
    ///
    /// Implementations must fail rather than return an empty set when the
    /// response cannot be understood, since an empty set orphans every
    /// directory.
    async fn list_accounts(&self) -> Result<AccountSet>;
}
