//! `shopee-bot` command line entry point

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use shopee_realtime_bot::application::{Agent, AccountRunner, AgentSettings, Supervisor, SupervisorSettings};
use shopee_realtime_bot::companion::{
    CompanionHost, CompanionScraper, HostCommand, Relay, RelayHandle, StateStore, SystemClock, http_transport_factory,
};
use shopee_realtime_bot::domain::ConnectedAccount;
use shopee_realtime_bot::infrastructure::logging;
use shopee_realtime_bot::infrastructure::{
    ChromiumLauncher, Diagnostics, FleetConfig, IngestionClient, IngestionConfig, JsonRoster, PageCatalog,
    PageExtractor, SessionManager, SessionSettings,
};

/// Profile directory name used by the companion's own browser
const COMPANION_PROFILE: &str = "companion";
const TAB_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "shopee-bot", version, about = "Shopee realtime bot")]
struct Cli {
    /// Configuration file (JSON, TOML or YAML)
    #[arg(short, long, global = true, env = "SHOPEE_BOT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the fleet supervisor until interrupted
    Run,

    /// Run a single agent once and print its report
    Scrape {
        #[arg(long)]
        account: String,
    },

    /// List the roster
    Roster,

    /// Watch an operator-driven browser and sync what it shows
    Companion,

    /// Set the account the companion syncs for
    Connect {
        #[arg(long)]
        account: String,
        #[arg(long)]
        shop: String,
    },

    /// Forget the companion's connected account
    Disconnect,

    /// Show the companion's daily sync state for an account
    Status {
        #[arg(long)]
        account: String,
    },

    /// Show or change companion settings
    Settings {
        #[arg(long)]
        endpoint: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        auto_sync: Option<bool>,
        #[arg(long)]
        request_timeout_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = FleetConfig::load(cli.config.as_deref()).context("loading configuration")?;
    logging::init_logging_with_config(&config.logging)?;
    logging::log_system_info();
    config.log_summary();

    match cli.command {
        Command::Run => run_fleet(&config).await,
        Command::Scrape { account } => scrape_once(&config, &account).await,
        Command::Roster => print_roster(&config).await,
        Command::Companion => run_companion(&config).await,
        Command::Connect { account, shop } => {
            let (relay, task) = start_relay(&config).await?;
            relay.connect(ConnectedAccount::new(account, shop)).await?;
            println!("Connected.");
            stop_relay(relay, task).await
        }
        Command::Disconnect => {
            let (relay, task) = start_relay(&config).await?;
            relay.disconnect().await?;
            println!("Disconnected.");
            stop_relay(relay, task).await
        }
        Command::Status { account } => {
            let (relay, task) = start_relay(&config).await?;
            let state = relay.status(&account).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
            stop_relay(relay, task).await
        }
        Command::Settings { endpoint, api_key, auto_sync, request_timeout_ms } => {
            let (relay, task) = start_relay(&config).await?;
            let mut settings = relay.settings().await?;
            let changed = endpoint.is_some() || api_key.is_some() || auto_sync.is_some() || request_timeout_ms.is_some();
            if let Some(endpoint) = endpoint {
                settings.api_endpoint = endpoint;
            }
            if let Some(api_key) = api_key {
                settings.sync_api_key = api_key;
            }
            if let Some(auto_sync) = auto_sync {
                settings.auto_sync = auto_sync;
            }
            if let Some(ms) = request_timeout_ms {
                settings.request_timeout_ms = ms;
            }
            if changed {
                relay.update_settings(settings.clone()).await?;
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
            stop_relay(relay, task).await
        }
    }
}

async fn load_extractor(config: &FleetConfig) -> Result<Arc<PageExtractor>> {
    let catalog = PageCatalog::load(config.selectors_file.as_deref()).await.context("loading probe tables")?;
    Ok(Arc::new(PageExtractor::new(catalog)?))
}

fn session_manager(config: &FleetConfig, settings: SessionSettings) -> Arc<SessionManager> {
    let launcher = Arc::new(ChromiumLauncher::new(config.chrome_executable.clone(), config.navigation_timeout()));
    Arc::new(SessionManager::new(settings, launcher))
}

async fn build_agent(config: &FleetConfig) -> Result<Agent> {
    let extractor = load_extractor(config).await?;
    let sessions = session_manager(config, SessionSettings::from(config));
    let sink = Arc::new(IngestionClient::new(IngestionConfig::from(config))?);
    Ok(Agent::new(sessions, extractor, sink, Diagnostics::new(&config.screenshots_dir), AgentSettings::from(config)))
}

async fn run_fleet(config: &FleetConfig) -> Result<ExitCode> {
    let roster = Arc::new(JsonRoster::new(&config.roster_path));
    let agent = Arc::new(build_agent(config).await?);
    let supervisor = Arc::new(Supervisor::new(roster, agent, SupervisorSettings::from(config)));

    let mut task = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run().await }
    });

    tokio::select! {
        () = shutdown_signal() => {
            info!("🛑 Shutdown requested, waiting up to {:?} for the current cycle", config.shutdown_grace());
            supervisor.stop();
            match tokio::time::timeout(config.shutdown_grace(), &mut task).await {
                Ok(joined) => {
                    joined.context("supervisor task panicked")??;
                }
                Err(_) => {
                    warn!("Cycle still running after grace period, abandoning it");
                    task.abort();
                    let stats = supervisor.stats().await;
                    info!(
                        "Final stats: cycles={}, success={}, failed={}",
                        stats.total_cycles, stats.success_count, stats.fail_count
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        joined = &mut task => {
            joined.context("supervisor task panicked")??;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn scrape_once(config: &FleetConfig, account_id: &str) -> Result<ExitCode> {
    let roster = JsonRoster::new(&config.roster_path);
    let account = roster
        .load_all()
        .await?
        .into_iter()
        .find(|a| a.shopee_account_id == account_id)
        .ok_or_else(|| anyhow!("account {account_id} is not in {:?}", roster.path()))?;

    let agent = build_agent(config).await?;
    let report = agent.run(&account).await;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(if report.success { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

async fn print_roster(config: &FleetConfig) -> Result<ExitCode> {
    let roster = JsonRoster::new(&config.roster_path);
    let accounts = roster.load_all().await?;
    println!("{:<20} {:<30} {:<8} pages", "account", "shop", "enabled");
    for account in &accounts {
        let pages: Vec<&str> = account.pages.iter().map(|k| k.as_str()).collect();
        println!("{:<20} {:<30} {:<8} {}", account.shopee_account_id, account.shop_name, account.enabled, pages.join(","));
    }
    Ok(ExitCode::SUCCESS)
}

async fn start_relay(config: &FleetConfig) -> Result<(RelayHandle, tokio::task::JoinHandle<()>)> {
    let store = open_store(&config.companion_state_file).await?;
    let relay = Relay::new(store, Arc::new(SystemClock), http_transport_factory()).await?;
    Ok(relay.spawn())
}

async fn open_store(path: &Path) -> Result<Arc<StateStore>> {
    let store = StateStore::open(path).await.with_context(|| format!("opening companion state {path:?}"))?;
    Ok(Arc::new(store))
}

async fn stop_relay(relay: RelayHandle, task: tokio::task::JoinHandle<()>) -> Result<ExitCode> {
    drop(relay);
    task.await.context("relay task panicked")?;
    Ok(ExitCode::SUCCESS)
}

async fn run_companion(config: &FleetConfig) -> Result<ExitCode> {
    let (relay, relay_task) = start_relay(config).await?;
    let settings = relay.settings().await?;
    if relay.connected_account().await?.is_none() {
        warn!("No account connected yet; run `shopee-bot connect --account <id> --shop <name>` first");
    }

    let sessions = session_manager(config, SessionSettings { headless: false, ..SessionSettings::from(config) });
    let mut session = sessions.acquire(COMPANION_PROFILE).await?;
    let page = session.new_page().await?;

    let (notice_tx, mut notice_rx) = mpsc::unbounded_channel();
    let scraper = CompanionScraper::new(relay.clone(), load_extractor(config).await?, settings.settle_delay());
    let host = CompanionHost::new(scraper, TAB_POLL_INTERVAL, settings.sync_interval(), notice_tx);

    let (command_tx, command_rx) = mpsc::channel(8);
    let cancel = CancellationToken::new();
    std::thread::spawn(move || read_operator_commands(&command_tx));
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            println!("{notice}");
        }
    });
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    println!("Companion running. Type `sync` to sync the current page, `quit` to exit.");
    host.run(page.as_ref(), command_rx, cancel).await;

    drop(page);
    session.release().await;
    drop(host);
    stop_relay(relay, relay_task).await
}

/// Blocking stdin loop on its own thread so it never holds up runtime shutdown
fn read_operator_commands(commands: &mpsc::Sender<HostCommand>) {
    for line in std::io::stdin().lines() {
        let Ok(line) = line else { break };
        let command = match line.trim() {
            "sync" | "s" => HostCommand::SyncNow,
            "quit" | "exit" | "q" => HostCommand::Quit,
            "" => continue,
            other => {
                println!("Unknown command {other:?}; use `sync` or `quit`");
                continue;
            }
        };
        if commands.blocking_send(command).is_err() {
            break;
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
