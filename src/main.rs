//! Extruder condition-monitoring binary.
//!
//! Loads `MonitorConfig`, opens the sled-backed store, spawns one
//! [`poller::Poller`] task per machine under a `JoinSet` supervisor, and
//! watches the config file for hot reload until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use extruder_monitor::baseline::BaselineLearner;
use extruder_monitor::config::defaults::service::SHUTDOWN_GRACE_PERIOD;
use extruder_monitor::config::{self, watcher, HistorianConfig, MonitorConfig};
use extruder_monitor::historian::{HistorianClient, TcpHistorianClient};
use extruder_monitor::ml_client::{AnomalyScorer, DisabledAnomalyScorer, HttpAnomalyScorer};
use extruder_monitor::poller::Poller;
use extruder_monitor::profiles::ProfileRegistry;
use extruder_monitor::sink::{EventSink, LoggingEventSink};
use extruder_monitor::storage::Store;

#[derive(Parser, Debug)]
#[command(name = "extruder-monitor")]
#[command(about = "Condition-monitoring core for a plastics extruder")]
#[command(version)]
struct CliArgs {
    /// Path to monitor_config.toml. Overrides $EXTRUDER_CONFIG and the
    /// default search in the current working directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Machine ids to poll, comma-separated (e.g. "extruder-1,extruder-2").
    #[arg(long, value_delimiter = ',', required = true)]
    machines: Vec<String>,

    /// Directory for the sled-backed profile/baseline/log store.
    #[arg(long, default_value = "./data/extruder-monitor")]
    data_dir: PathBuf,

    /// Emit structured JSON logs instead of the default text format.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: Option<LogFormat>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match format {
        Some(LogFormat::Json) => {
            tracing_subscriber::fmt().json().with_env_filter(filter).init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_target(false)
                .with_env_filter(filter)
                .init();
        }
    }
}

fn build_historian(config: &HistorianConfig) -> Result<Arc<dyn HistorianClient>> {
    if !config.enabled {
        anyhow::bail!(
            "historian.enabled = false — nothing to poll; set [historian] in monitor_config.toml"
        );
    }
    Ok(Arc::new(TcpHistorianClient::new(
        config,
        extruder_monitor::config::defaults::poll::HISTORIAN_FETCH_DEADLINE,
    )))
}

fn build_scorer(config: &MonitorConfig) -> Arc<dyn AnomalyScorer> {
    if config.ml.enabled {
        Arc::new(HttpAnomalyScorer::new(config.ml.endpoint.clone()))
    } else {
        Arc::new(DisabledAnomalyScorer)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_format);

    let config_path = config_file_path(&args);
    let monitor_config = match &config_path {
        Some(path) => MonitorConfig::load_from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => MonitorConfig::default(),
    };
    config::init_from_path(monitor_config, config_path.clone());

    info!("extruder-monitor starting, machines: {:?}", args.machines);

    std::fs::create_dir_all(&args.data_dir)
        .with_context(|| format!("failed to create data dir {}", args.data_dir.display()))?;
    let store = Arc::new(
        Store::open(&args.data_dir)
            .with_context(|| format!("failed to open store at {}", args.data_dir.display()))?,
    );
    let profiles = Arc::new(ProfileRegistry::new(store.clone()));
    let min_samples = config::get().baseline.min_samples_for_finalize;
    let baseline = Arc::new(BaselineLearner::new(store, profiles.clone(), min_samples));

    let historian = build_historian(&config::get().historian)?;
    let scorer = build_scorer(&config::get());
    let sink: Arc<dyn EventSink> = Arc::new(LoggingEventSink::new());

    let cancel = CancellationToken::new();
    let shutdown_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown_cancel.cancel();
        }
    });

    let mut tasks: JoinSet<(String, Result<()>)> = JoinSet::new();

    for machine_id in &args.machines {
        let poller = Poller::new(
            machine_id.clone(),
            historian.clone(),
            profiles.clone(),
            baseline.clone(),
            sink.clone(),
            scorer.clone(),
            chrono::Utc::now(),
        );
        let task_cancel = cancel.clone();
        let task_machine = machine_id.clone();
        tasks.spawn(async move {
            poller.run(task_cancel).await;
            (task_machine, Ok(()))
        });
    }

    if let Some(path) = config_path {
        let (watcher_tx, mut watcher_rx) = mpsc::channel(8);
        let watcher_cancel = cancel.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = watcher::run_config_watcher(path, watcher_tx) => {}
                _ = watcher_cancel.cancelled() => {}
            }
            ("config-watcher".to_string(), Ok(()))
        });
        tokio::spawn(async move {
            while let Some(event) = watcher_rx.recv().await {
                match event {
                    config::watcher::ConfigEvent::Reloaded(changes) => {
                        for change in changes {
                            info!(field = %change.field, old = %change.old, new = %change.new, "config reloaded");
                        }
                    }
                    config::watcher::ConfigEvent::Error(err) => {
                        warn!(error = %err, "config reload failed, keeping previous config");
                    }
                }
            }
        });
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("supervisor: shutdown signal received, waiting up to {:?} for tasks", SHUTDOWN_GRACE_PERIOD);
                break;
            }
            result = tasks.join_next() => {
                match result {
                    Some(Ok((name, Ok(())))) => info!(task = %name, "task completed"),
                    Some(Ok((name, Err(e)))) => error!(task = %name, error = %e, "task failed"),
                    Some(Err(e)) => error!(error = %e, "task panicked"),
                    None => {
                        info!("supervisor: no tasks running, exiting");
                        return Ok(());
                    }
                }
            }
        }
    }

    let drain = tokio::time::timeout(SHUTDOWN_GRACE_PERIOD, async {
        while tasks.join_next().await.is_some() {}
    });
    if drain.await.is_err() {
        warn!("shutdown grace period elapsed with tasks still running, aborting");
        tasks.abort_all();
    }

    info!("extruder-monitor shutdown complete");
    Ok(())
}

fn config_file_path(args: &CliArgs) -> Option<PathBuf> {
    if let Some(path) = &args.config {
        return Some(path.clone());
    }
    if let Ok(path) = std::env::var("EXTRUDER_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let local = PathBuf::from("monitor_config.toml");
    local.exists().then_some(local)
}
