use std::path::{Component, Path, PathBuf, is_separator};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::error::{Result, SweepError};
use crate::policy::DisposalPolicy;

pub const DEFAULT_CONFIG_FILE: &str = "dirsweep.toml";
pub const ENV_PREFIX: &str = "DIRSWEEP__";

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    /// Wrap the bouncer connection in TLS
    #[serde(default)]
    pub enabled: bool,
    /// Verify the server certificate against `ca_file`.
    ///
    /// When disabled any certificate is accepted, which is what a local
    /// bouncer with a self-signed certificate needs.
    #[serde(default)]
    pub verify: bool,
    /// PEM bundle with the trusted roots, required when `verify` is set
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
}

/// Connection to the bouncer's administrative control module
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BouncerConfig {
    pub host: String,
    pub port: u16,
    /// Administrator account used to log in
    pub username: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    /// Nick of the module that answers `ListUsers`
    pub control_target: String,
    /// First table record of a valid listing must carry this token
    pub listing_header: String,
    /// Quiet period after the last received byte that ends a response
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(default)]
    pub tls: TlsConfig,
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            host: String::from("localhost"),
            port: 6667,
            username: String::from("admin"),
            password: String::new(),
            control_target: String::from("*controlpanel"),
            listing_header: String::from("Username"),
            idle_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(10),
            tls: TlsConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Directory holding one subdirectory per account
    pub root: PathBuf,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(".znc/users"),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct DisposalConfig {
    /// Empty means delete orphans, otherwise move them below this directory
    #[serde(default)]
    pub trash_dir: String,
    /// Log what would be disposed without touching the filesystem
    #[serde(default)]
    pub dry_run: bool,
}

impl DisposalConfig {
    /// Build and validate the policy. Called once at startup.
    pub fn policy(&self) -> Result<DisposalPolicy> {
        DisposalPolicy::from_trash_dir(&self.trash_dir)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeferredConfig {
    /// Wait between a removal notification and acting on the directory
    #[serde(with = "humantime_serde")]
    pub settle_delay: Duration,
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(4),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Configuration {
    #[serde(default)]
    pub bouncer: BouncerConfig,
    #[serde(default)]
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub disposal: DisposalConfig,
    #[serde(default)]
    pub deferred: DeferredConfig,
}

impl Configuration {
    pub fn load() -> std::result::Result<Self, Box<figment::Error>> {
        Self::figment(Path::new(DEFAULT_CONFIG_FILE))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> std::result::Result<Self, Box<figment::Error>> {
        Self::figment(path).extract().map_err(Box::new)
    }

    fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Directory the bouncer keeps for `account` under the accounts root.
    ///
    /// The identifier has to name a direct child of the root. Empty names,
    /// `.`, `..` and anything with a path separator are rejected.
    pub fn account_dir(&self, account: &str) -> Result<PathBuf> {
        let invalid = || {
            SweepError::Configuration(format!(
                "'{account}' is not a valid account identifier for a directory under {}",
                self.accounts.root.display()
            ))
        };

        let single_component = matches!(
            Path::new(account).components().collect::<Vec<_>>().as_slice(),
            [Component::Normal(_)]
        );
        if account.is_empty()
            || account == "."
            || account == ".."
            || account.contains(is_separator)
            || !single_component
        {
            return Err(invalid());
        }

        let path = self.accounts.root.join(account);
        if path.parent() != Some(self.accounts.root.as_path()) {
            return Err(invalid());
        }
        Ok(path)
    }
}
