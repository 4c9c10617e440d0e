//! Signet CLI
//!
//! Command-line interface for syncing one email signature everywhere.
//!
//! # Usage
//!
//! ```bash
//! # List the mail client's accounts
//! signet accounts
//!
//! # Sign in to a webmail account and list its send-as identities
//! signet login me@example.com
//! signet identities me@example.com
//!
//! # Push a signature to every binding in the document
//! signet sync work.json
//! ```

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use signet_core::{
    oauth::pkce::PkceFlow, CancelHandle, DispatchOptions, EmbeddedImagePolicy, OutcomeStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use signet_cli::{
    config::{load_config, SignetConfig},
    report, services,
    signature_file::{load_signature, save_signature},
};

#[derive(Parser)]
#[command(name = "signet")]
#[command(about = "Keep one email signature in sync across mail clients")]
#[command(version)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the native mail client's accounts
    Accounts {
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// List the send-as identities of a webmail account
    Identities {
        /// Primary email of the account
        account: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Text)]
        format: Format,
    },

    /// Sign in to a webmail account and store its credential
    Login {
        /// Primary email of the account
        account: String,
    },

    /// Remove a webmail account's stored credential
    Logout {
        /// Primary email of the account
        account: String,
    },

    /// Push a signature document to all of its bindings
    Sync {
        /// Path to the signature JSON document
        signature: PathBuf,

        /// Overwrite stores whose content changed since the last sync
        #[arg(long)]
        force: bool,

        /// Remove embedded images from remote copies instead of refusing
        #[arg(long)]
        strip_images: bool,
    },

    /// Show what each binding last synced
    Status,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    init_logging(&config, cli.verbose);

    match cli.command {
        Commands::Accounts { format } => list_accounts(&config, format).await,
        Commands::Identities { account, format } => {
            list_identities(&config, &account, format).await
        }
        Commands::Login { account } => login(&config, &account).await,
        Commands::Logout { account } => logout(&config, &account).await,
        Commands::Sync {
            signature,
            force,
            strip_images,
        } => sync(&config, &signature, force, strip_images).await,
        Commands::Status => status(&config),
    }
}

fn init_logging(config: &SignetConfig, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    };

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn list_accounts(config: &SignetConfig, format: Format) -> Result<()> {
    let native = services::native_store(config)?;
    let accounts = native.discover_accounts().await.map_err(with_remediation)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&accounts)?),
        Format::Text => {
            println!("Mail accounts:");
            for account in &accounts {
                let cloud = if account.is_managed_cloud { " (iCloud)" } else { "" };
                println!(
                    "  {}  {} <{}>{}",
                    account.id, account.display_name, account.email, cloud
                );
            }
        }
    }
    Ok(())
}

async fn list_identities(config: &SignetConfig, account: &str, format: Format) -> Result<()> {
    let remote = services::remote_store(config, services::vault(config)?)?;
    let identities = remote
        .list_identities(account)
        .await
        .map_err(with_remediation)?;

    match format {
        Format::Json => println!("{}", serde_json::to_string_pretty(&identities)?),
        Format::Text => {
            println!("Identities of {}:", account);
            for identity in &identities {
                let role = if identity.is_primary { "primary" } else { "alias" };
                println!("  {:<40} {:<8} {}", identity.email, role, identity.display_name);
            }
        }
    }
    Ok(())
}

async fn login(config: &SignetConfig, account: &str) -> Result<()> {
    let vault = services::vault(config)?;
    let flow = PkceFlow::new(
        config.provider(),
        config.client_credentials()?,
        config.oauth.redirect_port,
    );

    let (auth_url, state) = flow.build_authorization_url(Some(account))?;
    println!("Open this URL in your browser to authorize Signet:\n\n  {}\n", auth_url);
    println!("Waiting for the redirect on {} ...", flow.redirect_uri());

    let code = flow.listen_for_callback(&state).await?;
    let credential = flow.exchange_code(code).await?;
    vault.store(account, &credential).await?;
    info!("Stored credential for {}", account);

    // Confirm the grant covers the settings API before declaring success.
    let remote = services::remote_store(config, vault.clone())?;
    let identities = remote
        .list_identities(account)
        .await
        .map_err(with_remediation)?;

    println!(
        "Signed in as {} ({} send-as identit{})",
        account,
        identities.len(),
        if identities.len() == 1 { "y" } else { "ies" }
    );
    Ok(())
}

async fn logout(config: &SignetConfig, account: &str) -> Result<()> {
    let vault = services::removal_vault(config);
    vault
        .clear(account)
        .await
        .with_context(|| format!("Failed to remove credential for {}", account))?;
    println!("Removed credential for {}", account);
    Ok(())
}

async fn sync(config: &SignetConfig, path: &Path, force: bool, strip_images: bool) -> Result<()> {
    let mut signature = load_signature(path)?;
    let ledger = services::ledger(config)?;
    let coordinator = Arc::new(services::coordinator(config, ledger.clone())?);

    let options = DispatchOptions {
        force,
        embedded_images: if strip_images {
            EmbeddedImagePolicy::Strip
        } else {
            EmbeddedImagePolicy::Reject
        },
    };

    let cancel = CancelHandle::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; finishing writes already in progress");
            on_interrupt.cancel();
        }
    });

    let (events, mut progress) = tokio::sync::mpsc::unbounded_channel::<signet_core::coordinator::SyncEvent>();
    let progress_log = tokio::spawn(async move {
        while let Some(event) = progress.recv().await {
            tracing::debug!(binding = %event.key, phase = ?event.phase, "Sync progress");
        }
    });

    let report = coordinator
        .dispatch(&signature, options, &cancel, Some(events))
        .await?;
    let _ = progress_log.await;

    for outcome in &report.outcomes {
        if let OutcomeStatus::Conflict { detail } = &outcome.status {
            ledger.flag_conflict(&outcome.key, detail.clone());
        }
    }
    ledger
        .save()
        .with_context(|| format!("Failed to save ledger to {:?}", ledger.path()))?;

    signature.bindings = report.bindings.clone();
    save_signature(path, &signature)?;

    for line in report::render_report(&report) {
        println!("{}", line);
    }

    let unsynced = report.outcomes.len() - report.recorded();
    if unsynced > 0 {
        bail!("{} binding(s) did not sync", unsynced);
    }
    Ok(())
}

fn status(config: &SignetConfig) -> Result<()> {
    let ledger = services::ledger(config)?;
    let entries = ledger.entries();

    if entries.is_empty() {
        println!("Nothing synced yet");
        return Ok(());
    }

    println!("Last sync per binding:");
    for entry in &entries {
        println!("{}", report::render_ledger_entry(entry));
    }
    Ok(())
}

/// Attach the remediation hint to a sync error.
fn with_remediation(error: signet_core::SyncError) -> anyhow::Error {
    let hint = error.remediation();
    anyhow::Error::new(error).context(hint)
}

