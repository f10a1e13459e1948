//! Test configuration builder for creating test setups quickly.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use crate::config::Configuration;

/// Builder for configurations pointing at local fixtures.
///
/// Timeouts default to values short enough for a test suite: a 100ms idle
/// period and a 50ms settle delay.
#[derive(Debug, Clone)]
pub struct TestConfigBuilder {
    config: Configuration,
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        let mut config = Configuration::default();
        config.bouncer.host = "127.0.0.1".to_string();
        config.bouncer.password = "secret".to_string();
        config.bouncer.idle_timeout = Duration::from_millis(100);
        config.bouncer.connect_timeout = Duration::from_secs(2);
        config.deferred.settle_delay = Duration::from_millis(50);
        Self { config }
    }

    /// Point the bouncer connection at a fake server.
    pub fn with_bouncer_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bouncer.host = addr.ip().to_string();
        self.config.bouncer.port = addr.port();
        self
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.config.bouncer.username = username.to_string();
        self.config.bouncer.password = password.to_string();
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.config.bouncer.idle_timeout = idle;
        self
    }

    pub fn with_accounts_root(mut self, root: &Path) -> Self {
        self.config.accounts.root = root.to_path_buf();
        self
    }

    pub fn with_trash_dir(mut self, trash: &Path) -> Self {
        self.config.disposal.trash_dir = trash.to_string_lossy().into_owned();
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.config.disposal.dry_run = true;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.config.deferred.settle_delay = delay;
        self
    }

    pub fn build(self) -> Configuration {
        self.config
    }
}
