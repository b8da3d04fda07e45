use anyhow::Context;
use clap::{Parser, ValueEnum};
use pkg_constants::limits::{
    CPU_LIMIT_MAX, CPU_LIMIT_MIN, EPHEMERAL_STORAGE_MAX, EPHEMERAL_STORAGE_MIN, MEM_LIMIT_MAX,
    MEM_LIMIT_MIN,
};
use pkg_constants::paths::DEFAULT_CONFIG_PATH;
use pkg_constants::watch::EVENT_CHANNEL_CAPACITY;
use pkg_controllers::exclusion::ExclusionFilter;
use pkg_controllers::limitrange::LimitRangeReconciler;
use pkg_controllers::namespace::NamespaceController;
use pkg_state::client::KubeClient;
use pkg_state::watch::NamespaceWatcher;
use pkg_types::config::{ControllerConfigFile, load_config_file};
use pkg_types::limits::LimitPolicy;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(
    name = "limitwarden",
    version,
    about = "Applies a default LimitRange to every new namespace"
)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, short, env = "LIMITWARDEN_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Pod CPU floor (e.g. 100m)
    #[arg(long, env = "CPU_LIMIT_MIN")]
    cpu_limit_min: Option<String>,

    /// Pod CPU ceiling (e.g. 2)
    #[arg(long, env = "CPU_LIMIT_MAX")]
    cpu_limit_max: Option<String>,

    /// Pod memory floor (e.g. 128Mi)
    #[arg(long, env = "MEM_LIMIT_MIN")]
    mem_limit_min: Option<String>,

    /// Pod memory ceiling (e.g. 4Gi)
    #[arg(long, env = "MEM_LIMIT_MAX")]
    mem_limit_max: Option<String>,

    /// Pod ephemeral-storage floor
    #[arg(long, env = "EPHEMERAL_STORAGE_MIN")]
    ephemeral_storage_min: Option<String>,

    /// Pod ephemeral-storage ceiling
    #[arg(long, env = "EPHEMERAL_STORAGE_MAX")]
    ephemeral_storage_max: Option<String>,

    /// Extra namespaces to leave alone, comma-separated
    #[arg(long, env = "EXCLUDED_NAMESPACES")]
    excluded_namespaces: Option<String>,

    /// Re-establish the namespace watch when it ends (default: true)
    #[arg(long, env = "WATCH_RESUBSCRIBE")]
    resubscribe: Option<bool>,

    /// Capacity of the event channel between watch and controller
    #[arg(long, env = "EVENT_BUFFER")]
    event_buffer: Option<usize>,

    /// Log output format
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Merge: CLI args / environment > config file.
fn limit_values(cli: &Cli, file_cfg: &ControllerConfigFile) -> HashMap<&'static str, String> {
    [
        (CPU_LIMIT_MIN, &cli.cpu_limit_min, &file_cfg.cpu_limit_min),
        (CPU_LIMIT_MAX, &cli.cpu_limit_max, &file_cfg.cpu_limit_max),
        (MEM_LIMIT_MIN, &cli.mem_limit_min, &file_cfg.mem_limit_min),
        (MEM_LIMIT_MAX, &cli.mem_limit_max, &file_cfg.mem_limit_max),
        (
            EPHEMERAL_STORAGE_MIN,
            &cli.ephemeral_storage_min,
            &file_cfg.ephemeral_storage_min,
        ),
        (
            EPHEMERAL_STORAGE_MAX,
            &cli.ephemeral_storage_max,
            &file_cfg.ephemeral_storage_max,
        ),
    ]
    .into_iter()
    .filter_map(|(key, flag, file)| flag.clone().or_else(|| file.clone()).map(|v| (key, v)))
    .collect()
}

/// Config-file entries plus the comma-separated CLI / environment list.
fn exclusion_filter(cli: &Cli, file_cfg: &ControllerConfigFile) -> ExclusionFilter {
    let extra = cli
        .excluded_namespaces
        .iter()
        .flat_map(|list| list.split(','))
        .chain(file_cfg.excluded_namespaces.iter().map(String::as_str));
    ExclusionFilter::new(extra)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    // Load config file (returns defaults if file not found)
    let file_cfg: ControllerConfigFile = load_config_file(&cli.config)
        .with_context(|| format!("failed to read config file {}", cli.config))
        .inspect_err(|e| error!("{:#}", e))?;
    info!("Config file: {}", cli.config);

    let values = limit_values(&cli, &file_cfg);
    let policy = LimitPolicy::load(|key| values.get(key).cloned())
        .inspect_err(|e| error!("Invalid limit configuration: {}", e))?;
    let filter = exclusion_filter(&cli, &file_cfg);
    let resubscribe = cli.resubscribe.or(file_cfg.resubscribe).unwrap_or(true);
    let event_buffer = cli
        .event_buffer
        .or(file_cfg.event_buffer)
        .unwrap_or(EVENT_CHANNEL_CAPACITY);
    anyhow::ensure!(event_buffer > 0, "event buffer must be at least 1");

    info!("Starting limitwarden v{}", env!("CARGO_PKG_VERSION"));
    info!("  Resubscribe:   {}", resubscribe);
    info!("  Event buffer:  {}", event_buffer);

    let client = Arc::new(
        KubeClient::connect()
            .await
            .inspect_err(|e| error!("{}", e))?,
    );

    let watcher = NamespaceWatcher::new(client.clone()).with_resubscribe(resubscribe);
    let subscription = watcher
        .subscribe()
        .await
        .inspect_err(|e| error!("{}", e))?;

    let (tx, rx) = mpsc::channel(event_buffer);
    let mut watch_handle = watcher.start(subscription, tx);
    let controller = NamespaceController::new(
        LimitRangeReconciler::new(client, Arc::new(policy)),
        filter,
    );
    let controller_handle = controller.start(rx);

    let outcome = tokio::select! {
        result = &mut watch_handle => match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("{}", e);
                Err(anyhow::Error::from(e))
            }
            Err(e) => Err(anyhow::anyhow!("namespace watch task failed: {}", e)),
        },
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            watch_handle.abort();
            Ok(())
        }
    };

    // The watch has stopped and dropped its sender; let the controller drain.
    let stats = controller_handle.await?;
    info!("limitwarden stopped ({})", stats);

    outcome
}
