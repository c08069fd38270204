//! # Deployer Configuration Validator
//!
//! Loads the layered configuration (defaults, TOML file, `DEPLOYER_*`
//! environment variables), validates it and prints the result with
//! credentials masked.
//!
//! ```bash
//! config-validator                               # validate DEPLOYER_CONFIG_PATH or config/deployer.toml
//! config-validator -c path/to/deployer.toml validate
//! config-validator -e production show provisioning
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use deployer_core::config::ConfigManager;
use deployer_core::constants::env;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "config-validator")]
#[command(about = "Validate deployer configuration files")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment name exported as DEPLOYER_ENV before loading
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration file (default: DEPLOYER_CONFIG_PATH or config/deployer.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate the configuration
    Validate,

    /// Print the effective configuration, optionally one section only
    Show {
        /// service, backoff, executor or provisioning
        section: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init();

    let result = match &cli.command {
        Some(Commands::Validate) | None => validate(&cli),
        Some(Commands::Show { section }) => show(&cli, section.as_deref()),
    };

    match result {
        Ok(()) => info!("Configuration validation completed successfully"),
        Err(e) => {
            error!(error = %format!("{e:#}"), "Configuration validation failed");
            eprintln!("❌ {e:#}");
            process::exit(1);
        }
    }
}

fn load(cli: &Cli) -> anyhow::Result<Arc<ConfigManager>> {
    if let Some(environment) = &cli.environment {
        std::env::set_var(env::ENVIRONMENT, environment);
    }
    match &cli.config {
        Some(path) => ConfigManager::load_from_path(Some(path.clone()))
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => ConfigManager::load().context("loading configuration"),
    }
}

fn validate(cli: &Cli) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let config = manager.config();

    match cli.format {
        OutputFormat::Json => {
            let summary = serde_json::json!({
                "valid": true,
                "environment": manager.environment(),
                "config_file": manager.config_file().map(|path| path.display().to_string()),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        OutputFormat::Table => {
            println!("🔧 Validating deployer configuration");
            println!("Environment: {}", manager.environment());
            match manager.config_file() {
                Some(path) => println!("Config file: {}", path.display()),
                None => println!("Config file: (none, defaults and environment only)"),
            }
            println!();
            println!("  service.base_url            {}", config.service.base_url);
            println!("  provisioning.max_workers    {}", config.provisioning.max_workers);
            println!(
                "  provisioning.wait_timeout   {}s",
                config.provisioning.effective_wait_timeout().as_secs()
            );
            println!(
                "  executor.poll_intervals     {}ms / {}ms",
                config.executor.poll_interval_short_ms, config.executor.poll_interval_long_ms
            );
            println!();
            println!("✅ Configuration is valid");
        }
    }
    Ok(())
}

fn show(cli: &Cli, section: Option<&str>) -> anyhow::Result<()> {
    let manager = load(cli)?;
    let rendered = manager.debug_config();
    let value = match section {
        Some(name) => match rendered.get(name) {
            Some(value) => value.clone(),
            None => bail!("unknown configuration section '{name}'"),
        },
        None => rendered,
    };

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&value)?),
        OutputFormat::Table => match value.as_object() {
            Some(entries) => {
                for (key, entry) in entries {
                    println!("  {key:<28}{entry}");
                }
            }
            None => println!("{value}"),
        },
    }
    Ok(())
}
