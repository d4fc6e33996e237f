use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use shipwright::config::AppConfig;
use shipwright::gate::{FsEvidenceProvider, GateValidator};
use shipwright::release::git::Git2Backend;
use shipwright::release::github::GitHubReleaseSource;
use shipwright::release::ReleaseSynchronizer;
use shipwright::report::RunReportStore;
use shipwright::runner::ScriptTestRunner;
use shipwright::server::{create_router, AppState};
use shipwright::shutdown::{wait_for_shutdown, ShutdownSignal};
use shipwright::workflow::{EngineSettings, RunOptions, WorkflowEngine};

#[derive(Parser)]
#[command(name = "shipwright", about = "Release, verify, test and publish a working tree")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve webhooks and poll for releases until interrupted
    Serve,
    /// Run the release cycle once and print the report
    Run {
        /// Sync this release tag instead of the latest one
        #[arg(long)]
        tag: Option<String>,
        #[arg(long)]
        skip_publish: bool,
        /// Commit message used if the run publishes
        #[arg(long)]
        message: Option<String>,
    },
    /// Print the latest run report of a plan
    Latest {
        /// Defaults to the configured plan name
        #[arg(long)]
        plan: Option<String>,
    },
    /// Restore the working tree from the retained snapshot
    Rollback,
}

fn init_tracing(json: bool) {
    let fmt_layer = if json {
        tracing_subscriber::fmt::layer().json().boxed()
    } else {
        tracing_subscriber::fmt::layer().boxed()
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt_layer)
        .init();
}

fn build_synchronizer(config: &AppConfig) -> anyhow::Result<Arc<ReleaseSynchronizer>> {
    let source = GitHubReleaseSource::new(&config.release)?;
    let vcs = Git2Backend::new(&config.workspace, config.release_token());
    Ok(Arc::new(ReleaseSynchronizer::new(
        &config.workspace,
        Arc::new(source),
        Arc::new(vcs),
    )))
}

fn build_engine(config: &AppConfig, synchronizer: Arc<ReleaseSynchronizer>) -> Arc<WorkflowEngine> {
    Arc::new(WorkflowEngine::new(
        EngineSettings::from_config(config),
        synchronizer,
        GateValidator::new(config.gates.clone()),
        Arc::new(FsEvidenceProvider::new(&config.gates)),
        Arc::new(ScriptTestRunner::new(&config.workspace.working_tree, &config.tests)),
        RunReportStore::new(config.reports.dir.clone()),
    ))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    init_tracing(config.logging.json);

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Run {
            tag,
            skip_publish,
            message,
        } => {
            let engine = build_engine(&config, build_synchronizer(&config)?);
            let options = RunOptions {
                revision: tag,
                skip_publish,
                publish_message: message,
                timeout: None,
            };
            match engine.run(options).await {
                Ok(report) => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                    Ok(())
                }
                Err(e) => {
                    if let Some(report) = e.report() {
                        println!("{}", serde_json::to_string_pretty(report)?);
                    }
                    Err(e.into())
                }
            }
        }
        Command::Latest { plan } => {
            let plan = plan.unwrap_or_else(|| config.reports.plan_name.clone());
            let store = RunReportStore::new(config.reports.dir.clone());
            match store.latest(&plan).await? {
                Some(report) => println!("{}", serde_json::to_string_pretty(&report)?),
                None => anyhow::bail!("no run report for plan {plan}"),
            }
            Ok(())
        }
        Command::Rollback => {
            let synchronizer = build_synchronizer(&config)?;
            let snapshot = synchronizer.rollback().await?;
            tracing::info!(
                snapshot = %snapshot.path.display(),
                created_at = %snapshot.created_at,
                "Rolled back working tree"
            );
            Ok(())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    tracing::info!(
        host = %config.server.host,
        port = %config.server.port,
        repo = %format!("{}/{}", config.release.owner, config.release.repo),
        "Starting Shipwright server"
    );
    if config.webhook_secret().is_none() {
        tracing::warn!("No webhook secret configured, webhook deliveries will be rejected");
    }

    let synchronizer = build_synchronizer(&config)?;
    let engine = build_engine(&config, Arc::clone(&synchronizer));
    let (events_tx, events_rx) = shipwright::queue::channel();
    let shutdown = ShutdownSignal::new();

    let poller = tokio::spawn(shipwright::queue::run_poller(
        synchronizer,
        Duration::from_secs(config.release.poll_interval_secs),
        events_tx.clone(),
        shutdown.subscribe(),
    ));
    let consumer = tokio::spawn(shipwright::queue::run_consumer(
        Arc::clone(&engine),
        events_rx,
        shutdown.subscribe(),
    ));

    let state = Arc::new(AppState::new(&config, engine, events_tx));
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(format!(
        "{}:{}",
        config.server.host, config.server.port
    ))
    .await?;

    tracing::info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    // A run in progress finishes before the consumer exits
    shutdown.trigger();
    for (name, task) in [("poller", poller), ("consumer", consumer)] {
        if let Err(e) = task.await {
            tracing::warn!(task = name, error = %e, "Background task ended abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
