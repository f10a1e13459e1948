use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Common CLI arguments shared across dirsweep commands
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that inspect the configuration without touching the bouncer
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Initialize logging based on CLI arguments. `RUST_LOG` wins when set.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("dirsweep configuration:");
            println!("=======================");
            println!(
                "Bouncer: {}:{} (tls: {})",
                config.bouncer.host, config.bouncer.port, config.bouncer.tls.enabled
            );
            println!("Admin user: {}", config.bouncer.username);
            println!("Control target: {}", config.bouncer.control_target);
            println!("Idle timeout: {:?}", config.bouncer.idle_timeout);
            println!("Accounts root: {}", config.accounts.root.display());
            if config.disposal.trash_dir.is_empty() {
                println!("Disposal: delete");
            } else {
                println!("Disposal: move to '{}'", config.disposal.trash_dir);
            }
            println!("Dry run: {}", config.disposal.dry_run);
            println!("Settle delay: {:?}", config.deferred.settle_delay);
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if config.bouncer.host.is_empty() {
            anyhow::bail!("Bouncer host cannot be empty");
        }

        if config.bouncer.port == 0 {
            anyhow::bail!("Bouncer port cannot be zero");
        }

        if config.bouncer.username.is_empty() {
            anyhow::bail!("Bouncer admin username cannot be empty");
        }

        if config.bouncer.idle_timeout.is_zero() {
            anyhow::bail!("Bouncer idle timeout must be positive");
        }

        let tls = &config.bouncer.tls;
        if tls.enabled && tls.verify && tls.ca_file.is_none() {
            anyhow::bail!("TLS verification requires bouncer.tls.ca_file");
        }

        if config.accounts.root.as_os_str().is_empty() {
            anyhow::bail!("Accounts root cannot be empty");
        }

        config
            .disposal
            .policy()
            .context("Invalid disposal configuration")?;

        log::info!("✅ Configuration validation passed");
        Ok(())
    }

    /// Handle commands that don't require contacting the bouncer
    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;
    use std::time::Duration;

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_default_configuration_validates() {
        utils::validate_config(&Configuration::default()).unwrap();
    }

    #[test]
    fn test_validation_rejects_zero_idle_timeout() {
        let mut config = Configuration::default();
        config.bouncer.idle_timeout = Duration::ZERO;
        assert!(utils::validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_tls_verify_without_ca() {
        let mut config = Configuration::default();
        config.bouncer.tls.enabled = true;
        config.bouncer.tls.verify = true;
        assert!(utils::validate_config(&config).is_err());
    }

    #[test]
    fn test_validation_rejects_missing_trash_dir() {
        let mut config = Configuration::default();
        config.disposal.trash_dir = "/definitely/not/here".into();
        assert!(utils::validate_config(&config).is_err());
    }
}
