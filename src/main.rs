use anyhow::{Context, Result};
use azmon_metrics::azure::http::{AzureHttpClient, REQUEST_TIMEOUT};
use azmon_metrics::checkpoint::CheckpointStore;
use azmon_metrics::collector::{get_metrics_for_subscription, Collector};
use azmon_metrics::config::{InputDefinition, InputStanza};
use azmon_metrics::credentials::{
    get_or_store_secrets, FileCredentialStore, FileInputConfigStore, InputConfigStore,
    ReadOnlyInputConfig,
};
use azmon_metrics::fanout::DEFAULT_FAN_OUT_LIMIT;
use azmon_metrics::sink::JsonLinesSink;
use clap::{Parser, ValueEnum};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{Instrument, Level};
use tracing_subscriber::EnvFilter;

/// Pull Azure Monitor metrics for a subscription and write them as events
#[derive(Parser, Debug)]
#[command(name = "azmon", version = azmon_metrics::VERSION, about, long_about = None)]
struct Args {
    /// Input definition file, or `-` to read it from stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Credential store file
    #[arg(long)]
    credential_store: Option<PathBuf>,

    /// Checkpoint directory (overrides the input definition)
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Concurrent resource group workers
    #[arg(long, default_value_t = DEFAULT_FAN_OUT_LIMIT)]
    workers: usize,

    /// Per-request timeout in seconds
    #[arg(long, default_value_t = REQUEST_TIMEOUT.as_secs())]
    timeout: u64,

    /// Log level
    #[arg(long, value_enum, default_value = "info")]
    log_level: LogLevel,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

/// Logs go to stderr, which the scheduler captures, unless a file is given.
/// RUST_LOG overrides the level.
fn setup_logging(
    level: LogLevel,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let Some(tracing_level) = level.to_tracing_level() else {
        return Ok(None);
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false);

    let Some(log_path) = log_file else {
        builder.with_writer(std::io::stderr).init();
        return Ok(None);
    };

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .with_context(|| format!("Failed to open log file {:?}", log_path))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    builder
        .with_writer(non_blocking)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("Log file: {:?}", log_path);

    Ok(Some(guard))
}

fn read_definition(input: &Path) -> Result<InputDefinition> {
    if input == Path::new("-") {
        let mut content = String::new();
        std::io::stdin()
            .read_to_string(&mut content)
            .context("Failed to read input definition from stdin")?;
        return InputDefinition::parse(&content);
    }
    InputDefinition::load(input)
}

/// Resolve clear-text credentials; an unusable store leaves them empty
fn resolve_credentials(
    name: &str,
    stanza: &InputStanza,
    store_path: &Path,
    config_store: &dyn InputConfigStore,
) -> InputStanza {
    match FileCredentialStore::open(store_path) {
        Ok(store) => get_or_store_secrets(name, stanza, &store, config_store),
        Err(e) => {
            tracing::error!("Error caught in get_or_store_secrets: {}", e);
            let mut working = stanza.clone();
            if stanza.application_id_field().is_stored() {
                working.application_id.clear();
                working.application_key.clear();
            }
            working
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level, args.log_file.as_deref())?;

    let input_path = args
        .input
        .clone()
        .or_else(InputDefinition::default_path)
        .context("No input definition given and no config directory available")?;
    let definition = read_definition(&input_path)?;
    let (name, stanza) = definition.single_input()?;

    let config_store: Box<dyn InputConfigStore> = if input_path == Path::new("-") {
        Box::new(ReadOnlyInputConfig)
    } else {
        Box::new(FileInputConfigStore::new(&input_path))
    };

    let store_path = args
        .credential_store
        .clone()
        .or_else(FileCredentialStore::default_path)
        .context("No credential store given and no data directory available")?;

    let working = resolve_credentials(name, stanza, &store_path, config_store.as_ref());

    let checkpoint_dir = args
        .checkpoint_dir
        .clone()
        .or_else(|| definition.checkpoint_dir.clone())
        .or_else(|| dirs::data_dir().map(|p| p.join("azmon").join("checkpoints")))
        .context("No checkpoint directory available")?;
    let checkpoints = CheckpointStore::new(checkpoint_dir);

    let sink = JsonLinesSink::stdout(name, &working.index, &working.sourcetype)
        .with_host(definition.server_host.as_deref().unwrap_or_default());

    let http = AzureHttpClient::with_timeout(Duration::from_secs(args.timeout))?;
    let collector =
        Collector::new(http, name, &working, &checkpoints, &sink).with_workers(args.workers);

    let span = tracing::info_span!("invocation", id = %uuid::Uuid::new_v4(), input = name);
    get_metrics_for_subscription(&collector)
        .instrument(span)
        .await;

    Ok(())
}
