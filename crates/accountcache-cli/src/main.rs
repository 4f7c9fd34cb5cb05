//! accountcache - check when a VPN account expires.
//!
//! Fetches the account record through the account data cache and prints its
//! expiry. With `--watch` the cache stays alive until Ctrl-C, re-fetching
//! accounts that are expired or about to expire and printing every update.

mod store;

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::Parser;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use accountcache_core::{
    AccountData, AccountDataCache, AccountNumber, ApiClient, ApiError, Config, FetchWatcher,
    RetryAction, SettleReason,
};
use store::AccountStore;

// ============================================================================
// Constants
// ============================================================================

/// Attempts made for a one-shot check before giving up on transient errors
const ONE_SHOT_MAX_ATTEMPTS: u32 = 3;

/// Log file name prefix inside the configured log directory
const LOG_FILE_PREFIX: &str = "accountcache.log";

#[derive(Parser, Debug)]
#[command(name = "accountcache")]
#[command(about = "Check and watch VPN account expiry")]
#[command(version)]
struct Args {
    /// Account number (default: the remembered one, or prompt)
    #[arg(short, long)]
    account: Option<String>,

    /// Keep running and print updates until Ctrl-C
    #[arg(short, long)]
    watch: bool,

    /// Remove the remembered account number and exit
    #[arg(long)]
    forget: bool,

    /// Don't store the account number in the keychain
    #[arg(long)]
    no_remember: bool,

    /// Path to config file (default: $XDG_CONFIG_HOME/accountcache/config.json)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Accounts API base URL, overriding the config file
    #[arg(long)]
    api_url: Option<String>,

    /// Write the effective configuration to the config file and exit
    #[arg(long)]
    save_config: bool,
}

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the log file when dropped.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load_path(path)?,
        None => Config::load()?,
    };
    if let Some(url) = &args.api_url {
        config.api_base_url = url.clone();
    }
    Ok(config)
}

/// Account from the command line, then the keychain, then an interactive prompt.
fn resolve_account(arg: Option<&str>) -> Result<AccountNumber> {
    if let Some(input) = arg {
        return AccountNumber::new(input).context("Invalid account number");
    }

    match AccountStore::load() {
        Ok(Some(account)) => return Ok(account),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Keychain unavailable"),
    }

    let input = rpassword::prompt_password("Account number: ")?;
    AccountNumber::new(&input).context("Invalid account number")
}

fn print_status(account: &AccountNumber, data: &AccountData) {
    let now = Utc::now();
    let expiry = data.expiry.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    if data.is_expired_at(now) {
        println!("{}: expired on {}", account.grouped(), expiry);
    } else {
        println!(
            "{}: expires {} ({} left)",
            account.grouped(),
            expiry,
            data.remaining_display(now)
        );
    }
}

/// Watcher for a one-shot check: transient errors get a few retries.
fn one_shot_retry_policy() -> impl FnMut(&ApiError) -> RetryAction + Send + 'static {
    let mut attempts = 0;
    move |error: &ApiError| {
        attempts += 1;
        eprintln!("Fetching account data failed: {}", error);
        if attempts < ONE_SHOT_MAX_ATTEMPTS {
            RetryAction::for_error(error)
        } else {
            RetryAction::Stop
        }
    }
}

/// Watcher for resident mode: keep retrying transient errors.
fn watch_retry_policy(error: &ApiError) -> RetryAction {
    eprintln!("Fetching account data failed: {}", error);
    RetryAction::for_error(error)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config = load_config(&args)?;
    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!("accountcache starting");

    if args.save_config {
        match &args.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        println!("Configuration saved");
        return Ok(());
    }

    if args.forget {
        if AccountStore::forget()? {
            println!("Forgot the remembered account number");
        } else {
            println!("No account number was remembered");
        }
        return Ok(());
    }

    let account = resolve_account(args.account.as_deref())?;
    let client = ApiClient::from_config(&config).context("Failed to create API client")?;

    let printed_account = account.clone();
    let cache = AccountDataCache::with_options(
        client,
        move |data: &AccountData| print_status(&printed_account, data),
        config.cache_options()?,
    );

    let (watcher, settled) = if args.watch {
        FetchWatcher::channel(watch_retry_policy)
    } else {
        FetchWatcher::channel(one_shot_retry_policy())
    };
    cache.fetch(&account, watcher);

    match settled.await {
        Ok(None) => {}
        Ok(Some(SettleReason::Failed(error))) => {
            bail!("Could not fetch account data: {}", error)
        }
        Ok(Some(reason)) => bail!("Fetch did not complete: {:?}", reason),
        Err(_) => bail!("Account data cache stopped unexpectedly"),
    }

    if !args.no_remember {
        if let Err(e) = AccountStore::remember(&account) {
            warn!(error = %e, "Could not remember account number");
        }
    }

    if args.watch {
        info!(account = %account, "Watching for account updates");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")?;
        cache.shutdown();
        info!("accountcache stopped");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["accountcache", "-a", "1234 5678 9012 3456", "--watch"]);
        assert_eq!(args.account.as_deref(), Some("1234 5678 9012 3456"));
        assert!(args.watch);
        assert!(!args.forget);
        assert!(!args.save_config);
    }

    #[test]
    fn test_api_url_argument_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"api_base_url":"http://from-file"}"#).unwrap();

        let args = Args::parse_from([
            OsStr::new("accountcache"),
            OsStr::new("--config"),
            path.as_os_str(),
            OsStr::new("--api-url"),
            OsStr::new("http://from-args"),
        ]);
        let config = load_config(&args).unwrap();
        assert_eq!(config.api_base_url, "http://from-args");
    }

    #[test]
    fn test_account_argument_is_validated() {
        assert!(resolve_account(Some("12ab")).is_err());
        assert_eq!(
            resolve_account(Some("9876543210")).unwrap().as_str(),
            "9876543210"
        );
    }

    #[test]
    fn test_one_shot_policy_gives_up() {
        let mut policy = one_shot_retry_policy();
        let error = ApiError::RateLimited;
        assert_eq!(policy(&error), RetryAction::Retry);
        assert_eq!(policy(&error), RetryAction::Retry);
        assert_eq!(policy(&error), RetryAction::Stop);

        let mut policy = one_shot_retry_policy();
        assert_eq!(
            policy(&ApiError::InvalidAccount(String::new())),
            RetryAction::Stop
        );
    }
}
