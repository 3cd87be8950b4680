//! Pulsewire CLI - one-time local setup for the Pulsewire SDK
//!
//! ## Commands
//!
//! - `config`: prompt for credentials, validate them with the service and
//!   write `.pulsewire.json` (also adds it to `.gitignore`)
//! - `info`: show the local configuration and the service-side status
//! - `reset`: notify the service and delete the local configuration
//! - `version`: print the SDK version
//!
//! ## Configuration
//!
//! - `PULSEWIRE_API_URL`: REST API base URL (default: https://api.pulsewire.io)
//! - `PULSEWIRE_REQUEST_TIMEOUT_SECS`: HTTP request timeout (default: 15)
//! - `RUST_LOG`: Logging level filter (default: info)
//!
//! Exit code is 0 on success and 1 on any handled failure.

use std::process::ExitCode;

use anyhow::{bail, ensure, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pulsewire::client::{Credentials, ValidationClient};
use pulsewire::config::{Config, SDK_VERSION};
use pulsewire::config_store::{ConfigStore, StoredConfig, CONFIG_FILE_NAME};
use pulsewire::session::{API_KEY_ENV, INSTANCE_ID_ENV};

/// Filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Parser)]
#[command(name = "pulsewire", author, version, about = "Set up the Pulsewire SDK for this project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate credentials and write the local config file
    Config {
        /// Pulsewire API key (prompted for when omitted)
        #[arg(short = 'k', long, env = API_KEY_ENV, hide_env_values = true)]
        api_key: Option<String>,

        /// Identifier of this reporting instance (prompted for when omitted)
        #[arg(short, long, env = INSTANCE_ID_ENV)]
        instance_id: Option<String>,
    },

    /// Show the local configuration and the instance status
    Info,

    /// Notify the service and delete the local configuration
    Reset,

    /// Print the SDK version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_tracing();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Initialize the tracing subscriber with environment-based filtering.
///
/// Diagnostics go to stderr so they never mix with command output.
fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Config {
            api_key,
            instance_id,
        } => configure(api_key, instance_id).await,
        Commands::Info => show_info().await,
        Commands::Reset => reset().await,
        Commands::Version => {
            println!("pulsewire {}", SDK_VERSION);
            Ok(())
        }
    }
}

fn load_config() -> Result<Config> {
    Config::from_env().context("Invalid environment configuration")
}

async fn configure(api_key: Option<String>, instance_id: Option<String>) -> Result<()> {
    let config = load_config()?;

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let api_key = match api_key {
        Some(key) => key,
        None => prompt(&mut input, "API key").await?,
    };
    let instance_id = match instance_id {
        Some(id) => id,
        None => prompt(&mut input, "Instance ID").await?,
    };
    let api_key = api_key.trim().to_string();
    let instance_id = instance_id.trim().to_string();
    ensure!(!api_key.is_empty(), "API key must not be empty");
    ensure!(!instance_id.is_empty(), "Instance ID must not be empty");

    let client = ValidationClient::new(&config)?;
    let credentials = Credentials::new(api_key, instance_id);
    let entitlement = client
        .validate(&credentials)
        .await
        .context("Could not validate credentials")?;

    let store = ConfigStore::current_dir()?;
    let stored = StoredConfig {
        api_key: credentials.api_key,
        instance_id: credentials.instance_id,
        company_name: entitlement.company_name.clone(),
        created_at: Some(Utc::now()),
        sdk_version: Some(SDK_VERSION.to_string()),
    };
    let path = store.write(&stored)?;

    if store.ensure_gitignore()? {
        info!("Added {} to .gitignore", CONFIG_FILE_NAME);
    }

    println!("Configuration saved to {}", path.display());
    if let Some(company) = &entitlement.company_name {
        println!("Company:     {}", company);
    }
    println!(
        "Plan status: {}",
        entitlement.plan_status.as_deref().unwrap_or("unknown")
    );
    if let Some(expiry) = &entitlement.plan_expiry {
        println!("Plan expiry: {}", expiry);
    }
    Ok(())
}

async fn show_info() -> Result<()> {
    let config = load_config()?;
    let store = ConfigStore::current_dir()?;

    let Some(stored) = store.read_optional()? else {
        bail!("No configuration found. Run `pulsewire config` first.");
    };

    println!("Instance ID: {}", stored.instance_id);
    if let Some(company) = &stored.company_name {
        println!("Company:     {}", company);
    }
    if let Some(created_at) = &stored.created_at {
        println!("Configured:  {}", created_at.to_rfc3339());
    }

    let client = ValidationClient::new(&config)?;
    let status = client
        .check_status(&stored.instance_id, &stored.api_key)
        .await
        .context("Could not fetch instance status")?;

    println!("Status:      {}", status.status);
    if let Some(message) = &status.message {
        println!("Message:     {}", message);
    }
    if let Some(plan_status) = &status.plan_status {
        println!("Plan status: {}", plan_status);
    }
    if let Some(plan_expiry) = &status.plan_expiry {
        println!("Plan expiry: {}", plan_expiry);
    }
    Ok(())
}

async fn reset() -> Result<()> {
    let config = load_config()?;
    let store = ConfigStore::current_dir()?;

    let Some(stored) = store.read_optional()? else {
        bail!("No configuration found, nothing to reset.");
    };

    let client = ValidationClient::new(&config)?;
    if let Err(e) = client
        .notify_reset(&stored.instance_id, &stored.api_key)
        .await
    {
        warn!(error = %e, "Could not notify the service about the reset");
        eprintln!("Warning: {}", e);
    }

    store.remove()?;
    println!("Removed {}", store.path().display());
    Ok(())
}

/// Ask for one line on stdin.
async fn prompt(input: &mut Lines<BufReader<Stdin>>, label: &str) -> Result<String> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{}: ", label).as_bytes()).await?;
    stdout.flush().await?;

    match input.next_line().await? {
        Some(line) => Ok(line),
        None => bail!("No input provided for {}", label),
    }
}
