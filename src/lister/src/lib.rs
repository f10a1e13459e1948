//! Account listing over the bouncer's administrative control module.
//!
//! Each call to [`BouncerAccountLister::list_accounts`] opens a fresh
//! session, authenticates as administrator, asks the control module for
//! `ListUsers`, and closes the session again. No connection is kept between
//! passes.

pub mod listing;
pub mod session;
pub mod tls;

use async_trait::async_trait;

use common::config::BouncerConfig;
use common::{AccountSet, AccountSource, Result};

pub use listing::parse_user_listing;
pub use session::BouncerSession;

pub struct BouncerAccountLister {
    config: BouncerConfig,
}

impl BouncerAccountLister {
    pub fn new(config: BouncerConfig) -> Self {
        Self { config }
    }

    fn list_users_command(&self) -> String {
        format!("PRIVMSG {} :ListUsers", self.config.control_target)
    }
}

#[async_trait]
impl AccountSource for BouncerAccountLister {
    async fn list_accounts(&self) -> Result<AccountSet> {
        let mut session = BouncerSession::connect(&self.config).await?;

        // Close the session on every path, including parse failures
        let response = match session
            .logon(&self.config.username, &self.config.password)
            .await
        {
            Ok(()) => session.request(&self.list_users_command()).await,
            Err(e) => Err(e),
        };
        session.quit().await;

        let accounts = parse_user_listing(&response?, &self.config.listing_header)?;
        tracing::info!(
            host = %self.config.host,
            port = self.config.port,
            accounts = accounts.len(),
            "Fetched account listing from bouncer"
        );
        Ok(accounts)
    }
}
