// src/main.rs — wotd CLI entrypoint

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

use wotd::identity_file::NullIdentityFileCodec;
use wotd::net::MockNetworkClient;
use wotd::{
    ChangeReport, Config, DownloadCoordinator, FastDownloader, FetchTransition, GraphStore,
    IdentityId, MaintenanceScheduler, NetworkClient, SlowDownloader, TrustGraph, WotError,
};

const DEFAULT_CONFIG_PATH: &str = "./wotd.toml";

#[derive(Parser)]
#[command(
    name = "wotd",
    version = "0.3.0",
    author = "wot-core@dev",
    about = "wotd — decentralized web-of-trust daemon and control CLI",
    long_about = "wotd maintains a local web-of-trust graph, derives per-owner scores from signed trust assertions, and schedules identity-file fetches by the resulting download eligibility."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the TOML config file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Force JSON log output even on an interactive terminal.
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    Identity {
        #[command(subcommand)]
        action: IdentityAction,
    },
    Trust {
        #[command(subcommand)]
        action: TrustAction,
    },
    Score {
        #[command(subcommand)]
        action: ScoreAction,
    },
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Runs the full daemon: fast/slow downloaders plus the maintenance
    /// scheduler, until interrupted.
    Run,
    Dev {
        #[command(subcommand)]
        action: DevAction,
    },
}

#[derive(Subcommand)]
enum IdentityAction {
    CreateOwn {
        request_key: String,
        insert_key: String,
        #[arg(long)]
        nickname: Option<String>,
        #[arg(long)]
        publishes_trust_list: bool,
    },
    AddRemote {
        id: String,
        request_key: String,
        #[arg(long)]
        nickname: Option<String>,
        #[arg(long, default_value_t = 0)]
        edition: u64,
    },
    Delete {
        id: String,
    },
    Restore {
        id: String,
        insert_key: String,
        #[arg(long, default_value_t = 0)]
        last_inserted_edition: u64,
    },
    Show {
        id: String,
    },
    List,
}

#[derive(Subcommand)]
enum TrustAction {
    Set(TrustSetArgs),
    Remove {
        truster: String,
        trustee: String,
    },
}

#[derive(Args)]
struct TrustSetArgs {
    truster: String,
    trustee: String,
    value: i32,
    #[arg(long, default_value = "")]
    comment: String,
    #[arg(long, default_value_t = 0)]
    edition: u64,
}

#[derive(Subcommand)]
enum ScoreAction {
    Show { owner: String, subject: String },
    VerifyAll,
}

#[derive(Subcommand)]
enum MaintenanceAction {
    TriggerVerification,
    TriggerDefrag,
}

#[derive(Subcommand)]
enum ConfigAction {
    View,
    Set { key: String, value: String },
}

#[derive(Subcommand)]
enum DevAction {
    /// Seeds the in-memory mock transport with a trivial two-hop chain and
    /// exercises a fetch/apply cycle, for demoing without real network access.
    MockChain,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load config {}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = wotd::logging::init(config.log_level, cli.json_logs) {
        eprintln!("failed to install logging: {e}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, config: Config) -> Result<(), WotError> {
    let store = Arc::new(GraphStore::load(&config.data_dir)?);
    let trust_graph = Arc::new(TrustGraph::new(config.use_legacy_reference_implementation));

    match cli.command {
        Commands::Identity { action } => run_identity(&store, &trust_graph, action)?,
        Commands::Trust { action } => run_trust(&store, &trust_graph, action)?,
        Commands::Score { action } => run_score(&store, action)?,
        Commands::Maintenance { action } => run_maintenance(Arc::clone(&store), &config, action),
        Commands::Config { action } => run_config(&cli.config, &config, action)?,
        Commands::Dev { action } => run_dev(&store, &trust_graph, action).await?,
        Commands::Run => run_daemon(store, trust_graph, config).await?,
    }

    Ok(())
}

fn parse_id(s: &str) -> Result<IdentityId, WotError> {
    IdentityId::parse(s.to_string())
}

fn run_identity(
    store: &GraphStore,
    trust_graph: &TrustGraph,
    action: IdentityAction,
) -> Result<(), WotError> {
    match action {
        IdentityAction::CreateOwn {
            request_key,
            insert_key,
            nickname,
            publishes_trust_list,
        } => {
            let id = trust_graph.create_own_identity(
                store,
                request_key,
                insert_key,
                nickname,
                publishes_trust_list,
            )?;
            println!("{id}");
        }
        IdentityAction::AddRemote {
            id,
            request_key,
            nickname,
            edition,
        } => {
            let id = parse_id(&id)?;
            trust_graph.add_identity_from_uri(store, id, request_key, nickname, edition)?;
        }
        IdentityAction::Delete { id } => {
            let id = parse_id(&id)?;
            trust_graph.delete_identity(store, &id)?;
        }
        IdentityAction::Restore {
            id,
            insert_key,
            last_inserted_edition,
        } => {
            let id = parse_id(&id)?;
            trust_graph.restore_own_identity(store, &id, insert_key, last_inserted_edition)?;
        }
        IdentityAction::Show { id } => {
            let id = parse_id(&id)?;
            let snapshot = store.snapshot();
            match snapshot.identity(&id) {
                Some(identity) => println!("{identity:#?}"),
                None => println!("no such identity"),
            }
        }
        IdentityAction::List => {
            let snapshot = store.snapshot();
            for identity in snapshot.identities() {
                println!("{} {:?} own={}", identity.id, identity.fetch_state, identity.is_own());
            }
        }
    }
    Ok(())
}

fn run_trust(store: &GraphStore, trust_graph: &TrustGraph, action: TrustAction) -> Result<(), WotError> {
    match action {
        TrustAction::Set(args) => {
            let truster = parse_id(&args.truster)?;
            let trustee = parse_id(&args.trustee)?;
            let report =
                trust_graph.set_trust(store, &truster, &trustee, args.value, args.comment, args.edition)?;
            info!(touched = report.touched.len(), "trust set");
        }
        TrustAction::Remove { truster, trustee } => {
            let truster = parse_id(&truster)?;
            let trustee = parse_id(&trustee)?;
            let report = trust_graph.remove_trust(store, &truster, &trustee)?;
            info!(touched = report.touched.len(), "trust removed");
        }
    }
    Ok(())
}

fn run_score(store: &GraphStore, action: ScoreAction) -> Result<(), WotError> {
    match action {
        ScoreAction::Show { owner, subject } => {
            let owner = parse_id(&owner)?;
            let subject = parse_id(&subject)?;
            match store.snapshot().score(&owner, &subject) {
                Some(score) => println!("{score:?}"),
                None => println!("unreachable"),
            }
        }
        ScoreAction::VerifyAll => {
            let mut tx = store.begin();
            let corrections = wotd::score_engine::verify_and_correct_stored_scores(tx.data_mut());
            tx.commit();
            println!("{corrections} corrections applied");
        }
    }
    Ok(())
}

fn run_maintenance(store: Arc<GraphStore>, config: &Config, action: MaintenanceAction) {
    let scheduler = MaintenanceScheduler::new(store, config);
    match action {
        MaintenanceAction::TriggerVerification => scheduler.trigger_verification(std::time::Duration::ZERO),
        MaintenanceAction::TriggerDefrag => scheduler.trigger_defrag(std::time::Duration::ZERO),
    }
    std::thread::sleep(std::time::Duration::from_millis(200));
    scheduler.terminate_all();
}

fn run_config(path: &Path, config: &Config, action: ConfigAction) -> Result<(), WotError> {
    match action {
        ConfigAction::View => println!("{}", toml::to_string_pretty(config).unwrap_or_default()),
        ConfigAction::Set { key, value } => {
            let mut config = config.clone();
            match key.as_str() {
                "data_dir" => config.data_dir = value,
                "max_concurrent_slow_fetches" => {
                    config.max_concurrent_slow_fetches = value.parse().map_err(|_| {
                        WotError::InvalidParameter("max_concurrent_slow_fetches must be a number".into())
                    })?;
                }
                "use_legacy_reference_implementation" => {
                    config.use_legacy_reference_implementation = value.parse().map_err(|_| {
                        WotError::InvalidParameter(
                            "use_legacy_reference_implementation must be true/false".into(),
                        )
                    })?;
                }
                other => {
                    return Err(WotError::InvalidParameter(format!("unknown config key {other:?}")));
                }
            }
            config.save(path)?;
        }
    }
    Ok(())
}

async fn run_dev(
    store: &GraphStore,
    trust_graph: &TrustGraph,
    action: DevAction,
) -> Result<(), WotError> {
    match action {
        DevAction::MockChain => {
            let owner = trust_graph.create_own_identity(
                store,
                "USK@.../owner/0".into(),
                "SSK@.../owner/0".into(),
                Some("owner".into()),
                false,
            )?;
            let a = IdentityId::from_public_bytes(b"dev-a");
            trust_graph.add_identity_from_uri(store, a.clone(), "USK@.../a/0".into(), Some("alice".into()), 0)?;
            trust_graph.set_trust(store, &owner, &a, 100, "trusted tester".into(), 0)?;

            let transport = MockNetworkClient::new();
            transport.seed_document("USK@.../a/0", 1, b"{}".to_vec());
            let _ = transport.fetch("USK@.../a/0", 1).await?;

            println!("seeded owner={owner} trustee={a}");
        }
    }
    Ok(())
}

/// Runs the Fast/Slow downloaders and the maintenance scheduler together
/// until the process receives an interrupt (spec §2's steady-state loop).
async fn run_daemon(
    store: Arc<GraphStore>,
    trust_graph: Arc<TrustGraph>,
    config: Config,
) -> Result<(), WotError> {
    let transport: Arc<dyn NetworkClient> = Arc::new(MockNetworkClient::new());
    let codec: Arc<dyn wotd::identity_file::IdentityFileCodec> = Arc::new(NullIdentityFileCodec);

    let fast = Arc::new(FastDownloader::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        codec.clone(),
        Arc::clone(&trust_graph),
    ));
    let slow = Arc::new(SlowDownloader::new(
        Arc::clone(&store),
        Arc::clone(&transport),
        codec,
        Arc::clone(&trust_graph),
        config.max_concurrent_slow_fetches,
    ));
    let scheduler = MaintenanceScheduler::new(Arc::clone(&store), &config);
    let mut coordinator = DownloadCoordinator::new();

    info!("wotd daemon started; press ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(5)) => {
                reconcile_and_drive_fast(&store, &fast, &mut coordinator).await;

                slow.tick(|id| {
                    let snapshot = store.snapshot();
                    snapshot.identity(id).map(|identity| identity.request_key.clone())
                }).await;
            }
        }
    }

    scheduler.terminate_all();
    store.persist()?;
    Ok(())
}

/// Re-evaluates every `OwnIdentity`'s scores against the tracked Fast/Slow
/// partition and drives C5's subscriptions accordingly (spec §4.4's
/// `startFetch`/`abortFetch` signalling, §4.5's continuous-subscription
/// duty), then drains one pending event per Fast-managed identity.
async fn reconcile_and_drive_fast(
    store: &GraphStore,
    fast: &FastDownloader,
    coordinator: &mut DownloadCoordinator,
) {
    let snapshot = store.snapshot();
    let touched: Vec<(IdentityId, IdentityId)> = snapshot
        .own_identity_ids()
        .flat_map(|owner| {
            snapshot
                .scores_for_owner(owner)
                .map(move |(subject, _)| (owner.clone(), subject.clone()))
        })
        .collect();
    let report = ChangeReport { touched };

    for transition in coordinator.reconcile(&snapshot, &report) {
        match transition {
            FetchTransition::StartFast(id) => {
                if let Some(request_key) = snapshot.identity(&id).map(|i| i.request_key.clone()) {
                    fast.start_fetch(&id, &request_key).await;
                }
            }
            FetchTransition::AbortFast(id) => fast.abort_fetch(&id).await,
            FetchTransition::AbortSlow(id) => wotd::downloader::slow::abort_fetch(store, &id),
            FetchTransition::StartSlow(_) => {}
        }
    }

    for identity in snapshot.identities() {
        if coordinator.is_fast_managed(&identity.id) {
            fast.poll_once(&identity.id).await;
        }
    }
}
