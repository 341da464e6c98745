//! KeyLoom command-line interface for inspecting encryption capabilities.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyloom_core::{logging, FdeConfig, KeyloomConfig, SysconfigFile, SystemRunner, DEFAULT_CONFIG_PATH};
use keyloom_securekey::{secure_key_support, Adapter, ZkeyCommand};
use keyloom_strategies::{availability_report, StrategyEnv};
use log::warn;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::PathBuf;
use std::sync::Arc;

/// Top-level command-line options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(
    name = "keyloom",
    version,
    about = "Inspection utilities for KeyLoom encryption strategies."
)]
struct Cli {
    /// Path to the KeyLoom configuration file.
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List crypto coprocessor adapters and their master-key fingerprints.
    Adapters,

    /// List secure keys and the volumes they protect.
    Keys,

    /// Report per-method availability on this host.
    Methods,

    /// Show the persisted full-disk-encryption configuration.
    FdeStatus,

    /// Print the JSON schema of the tool configuration.
    Schema,
}

fn load_cli_config(path: &PathBuf) -> Result<KeyloomConfig> {
    let config = KeyloomConfig::load_or_bootstrap(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;

    for issue in config.validate() {
        warn!("configuration issue: {issue}");
    }

    Ok(config)
}

fn main() -> Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    let config = Arc::new(load_cli_config(&cli.config)?);
    let runner = Arc::new(SystemRunner::new(config.command_timeout()));

    match cli.command {
        Commands::Adapters => {
            let adapters = Adapter::scan_all(runner.as_ref(), &config.lszcrypt_binary());
            if adapters.is_empty() {
                println!("No crypto coprocessor adapters found.");
                return Ok(());
            }
            println!("{:<10} {:<8} {:<12} {:<8} MASTER KEY", "ID", "TYPE", "MODE", "STATUS");
            for adapter in adapters {
                println!(
                    "{:<10} {:<8} {:<12} {:<8} {}",
                    adapter.id(),
                    adapter.kind,
                    adapter.mode,
                    adapter.status,
                    adapter.mkvp.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Keys => {
            let zkey = ZkeyCommand::from_config(&config, runner);
            let keys = zkey.list_all();
            if keys.is_empty() {
                println!("No secure keys registered.");
                return Ok(());
            }
            for key in keys {
                println!("{}", key.name());
                for volume in key.volumes() {
                    println!("    {volume}");
                }
            }
        }
        Commands::Methods => {
            let support = secure_key_support(runner.as_ref(), &config.lszcrypt_binary());
            println!(
                "Secure key support: {}",
                if support.is_ready() { "yes" } else { "no" }
            );

            let env = StrategyEnv::new(config.clone(), runner);
            for (method, readiness) in availability_report(&env) {
                println!(
                    "{:<16} {}",
                    method.as_str(),
                    if readiness.is_ready() {
                        "available"
                    } else {
                        "unavailable"
                    }
                );
            }
        }
        Commands::FdeStatus => {
            let store = Arc::new(SysconfigFile::new(config.fde_sysconfig_path()));
            let fde = FdeConfig::new(store);
            let devices = fde.devices().context("failed to read FDE device list")?;
            if devices.is_empty() {
                println!("No devices registered for TPM-backed FDE.");
            } else {
                println!("Devices: {}", devices.join(" "));
            }
            match fde.pbkdf().context("failed to read FDE PBKDF")? {
                Some(pbkdf) => println!("PBKDF: {pbkdf}"),
                None => println!("PBKDF: (default)"),
            }
        }
        Commands::Schema => {
            let schema = schema_for!(KeyloomConfig);
            println!("{}", to_string_pretty(&schema)?);
        }
    }

    Ok(())
}
