use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use common::cli::{CommonArgs, CommonCommands, utils};
use common::config::Configuration;
use common::{AccountSource, DisposalPolicy};
use lister::BouncerAccountLister;
use sweeper::{DeferredTrigger, LogNotifier, ScheduleOutcome, run_pass};

#[derive(Parser, Debug)]
#[command(name = "dirsweep")]
#[command(about = "Remove account directories the bouncer no longer knows about")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one reconciliation pass (default)
    Start {
        #[arg(long, help = "Log what would be disposed without touching anything")]
        dry_run: bool,

        #[arg(long, help = "Print the disposal report as JSON")]
        json: bool,
    },
    /// List the accounts the bouncer reports and exit
    Accounts,
    /// Handle an account-removal notification
    Notify {
        /// Identifier of the removed account
        account: String,

        #[arg(long, help = "Account directory (defaults to <accounts.root>/<account>)")]
        path: Option<PathBuf>,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint =
            signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = sigint.recv() => log::info!("Received SIGINT"),
            _ = sigterm.recv() => log::info!("Received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        log::info!("Received Ctrl+C");
    }

    Ok(())
}

async fn start(
    config: &Configuration,
    policy: &DisposalPolicy,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let dry_run = dry_run || config.disposal.dry_run;
    if dry_run {
        log::info!("Dry run enabled, no directory will be touched");
    }

    let lister = BouncerAccountLister::new(config.bouncer.clone());
    let report = run_pass(&lister, &config.accounts.root, policy, dry_run)
        .await
        .context("Reconciliation pass failed")?;

    if json {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize disposal report to JSON")?;
        println!("{json}");
    }

    if report.has_failures() {
        anyhow::bail!(
            "{} of {} orphan directories could not be disposed of",
            report.failed_count(),
            report.orphans.len()
        );
    }
    Ok(())
}

async fn list_accounts(config: &Configuration) -> Result<()> {
    let lister = BouncerAccountLister::new(config.bouncer.clone());
    let accounts = lister
        .list_accounts()
        .await
        .context("Failed to fetch account listing")?;
    for account in accounts {
        println!("{account}");
    }
    Ok(())
}

async fn notify(
    config: &Configuration,
    policy: DisposalPolicy,
    account: &str,
    path: Option<PathBuf>,
) -> Result<()> {
    let path = match path {
        Some(path) => path,
        None => config
            .account_dir(account)
            .context("Refusing to schedule disposal")?,
    };
    let trigger = DeferredTrigger::new(policy, config.deferred.settle_delay, Arc::new(LogNotifier));

    if trigger.on_account_removed(account, &path) == ScheduleOutcome::AlreadyPending {
        return Ok(());
    }

    tokio::select! {
        _ = trigger.wait_idle() => {}
        result = wait_for_shutdown_signal() => {
            result?;
            let cancelled = trigger.shutdown();
            log::info!("Cancelled {cancelled} pending disposal(s)");
            // A disposal that already started runs to completion
            trigger.wait_idle().await;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    if let Some(Command::Common(command)) = &cli.command {
        return utils::handle_common_command(command, &config);
    }

    utils::validate_config(&config)?;
    let policy = config
        .disposal
        .policy()
        .context("Failed to set up disposal policy")?;
    log::info!("Disposal policy: {policy}");

    match cli.command {
        None => start(&config, &policy, false, false).await,
        Some(Command::Start { dry_run, json }) => start(&config, &policy, dry_run, json).await,
        Some(Command::Accounts) => list_accounts(&config).await,
        Some(Command::Notify { account, path }) => notify(&config, policy, &account, path).await,
        Some(Command::Common(_)) => Ok(()),
    }
}
