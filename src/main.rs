use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use ev_load_balancing::Config;
use ev_load_balancing::chargers::build_charger;
use ev_load_balancing::config::{CONFIG_PATH_ENV, PhasesConfig};
use ev_load_balancing::host::Host;
use ev_load_balancing::host::rest::HomeAssistantClient;
use ev_load_balancing::logging;
use ev_load_balancing::mains::{Mains, build_mains};
use ev_load_balancing::phase_matching::{MatchSettings, PhaseMatcher};
use ev_load_balancing::scheduler::RefreshRequester;
use ev_load_balancing::service::BalancerService;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Per-phase EV charger load balancing
#[derive(Parser, Debug)]
#[command(name = "ev-load-balancing", version = env!("APP_VERSION"))]
struct Cli {
    /// Configuration file; the default locations are searched when omitted
    #[arg(short, long, env = CONFIG_PATH_ENV)]
    config: Option<PathBuf>,

    /// Defaults to `run`
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Default)]
enum Command {
    /// Balance every configured entry until interrupted
    #[default]
    Run,
    /// Probe the charger phases of an entry and print its phase rows
    MatchPhases { entry_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::from_file(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {}", e))?;
    config
        .validate()
        .map_err(|e| anyhow!("Invalid configuration: {}", e))?;

    logging::init_logging(&config.logging)?;
    info!(
        "EV load balancing {} starting with {} entries",
        env!("APP_VERSION"),
        config.entries.len()
    );

    let host: Arc<dyn Host> = Arc::new(HomeAssistantClient::from_config(&config.homeassistant)?);

    match cli.command.unwrap_or_default() {
        Command::Run => {
            let service = BalancerService::new(config, host);
            service
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        error!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutdown requested");
                })
                .await;
            info!("Service shutdown complete");
            Ok(())
        }
        Command::MatchPhases { entry_id } => match_phases(&config, host, &entry_id).await,
    }
}

/// Probe the charger phases of an entry and print the discovered rows
async fn match_phases(config: &Config, host: Arc<dyn Host>, entry_id: &str) -> Result<()> {
    let entry = config
        .entry(entry_id)
        .ok_or_else(|| anyhow!("No entry with id '{}'", entry_id))?;

    let mut mains = build_mains(
        &entry.id,
        &entry.mains_backend()?,
        host.clone(),
        RefreshRequester::detached(),
        config.statistics.history_policy(),
    )
    .await?;
    let mut charger = build_charger(
        &entry.id,
        &entry.charger_backend()?,
        host,
        RefreshRequester::detached(),
    )
    .await?;

    info!("Starting phase matching for entry {}", entry.id);
    let matcher = PhaseMatcher::new(MatchSettings::from(&config.auto_match));
    let result = matcher.match_phases(&mains, charger.as_ref()).await;
    mains.cleanup();
    charger.cleanup();

    let mapping = result?;
    info!("Matching found, add these rows to the entry's phases section");
    print!("{}", serde_yaml::to_string(&PhasesConfig::from_mapping(&mapping))?);
    Ok(())
}
