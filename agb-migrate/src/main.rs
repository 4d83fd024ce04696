use std::path::PathBuf;

use agb_compat::{LegacySnapshot, inspect_legacy, open_legacy};
use agb_core::{MigrateConfig, load_config, open_destination, run_migration};
use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "agb-migrate",
    version,
    about = "Copy AlphaGameBot stats and users from the legacy database into the new schema"
)]
struct Cli {
    /// Path to the migration config (TOML). Missing files fall back to defaults.
    #[arg(
        long,
        global = true,
        env = "AGB_MIGRATE_CONFIG",
        default_value = "config/migrate.toml"
    )]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the migration (default).
    Migrate,
    /// Print the effective config as JSON, passwords redacted.
    PrintConfig,
    /// Count rows in the legacy tables without touching the destination.
    InspectLegacy,
}

#[derive(Serialize)]
struct LegacyInspectResponse {
    legacy: String,
    snapshot: LegacySnapshot,
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Command::Migrate) {
        Command::Migrate => migrate(&config),
        Command::PrintConfig => print_config(&config),
        Command::InspectLegacy => inspect(&config),
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn migrate(config: &MigrateConfig) -> anyhow::Result<()> {
    // Both connections must be up before the first legacy row is read.
    let mut legacy = open_legacy(&config.legacy).context("failed to connect to legacy store")?;
    let mut destination = open_destination(&config.destination)
        .context("failed to connect to destination store")?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let report = run_migration(legacy.as_mut(), destination.as_mut(), Utc::now, &mut out)?;

    legacy.close().context("failed to close legacy store")?;
    destination
        .close()
        .context("failed to close destination store")?;

    info!(
        user_stats = report.user_stats,
        guild_user_stats = report.guild_user_stats,
        users = report.users,
        "migration finished"
    );
    Ok(())
}

fn print_config(config: &MigrateConfig) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(&config.redacted())?);
    Ok(())
}

fn inspect(config: &MigrateConfig) -> anyhow::Result<()> {
    let mut legacy = open_legacy(&config.legacy).context("failed to connect to legacy store")?;
    let snapshot = inspect_legacy(legacy.as_mut())?;
    legacy.close().context("failed to close legacy store")?;

    let response = LegacyInspectResponse {
        legacy: config.legacy.describe(),
        snapshot,
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}
