//! nanoKONTROL2 Remap
//!
//! Remaps nanoKONTROL2 CCs onto a virtual MIDI port with LED feedback and
//! hotplug recovery.

use anyhow::Result;
use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nanokontrol_remap::app::App;
use nanokontrol_remap::cli;
use nanokontrol_remap::config::AppConfig;
use nanokontrol_remap::device::MidirBackend;
use nanokontrol_remap::mapping::{MappingConfig, MappingWatcher};
use nanokontrol_remap::paths::AppPaths;
use nanokontrol_remap::sniffer;
use nanokontrol_remap::CLIENT_NAME;

/// nanoKONTROL2 Remap - CC remapper with LED feedback and hotplug recovery
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults to the platform config directory)
    #[arg(short, long, env = "NANOKONTROL_REMAP_CONFIG")]
    config: Option<PathBuf>,

    /// Mapping preset (JSON or YAML), overrides the config file
    #[arg(short, long)]
    mapping: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also write a daily-rotated log file
    #[arg(long)]
    log_file: bool,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Print incoming device messages with their control names
    #[arg(long)]
    monitor: bool,

    /// Run without the interactive command prompt
    #[arg(long)]
    no_repl: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let paths = AppPaths::detect();
    let config_path = args.config.clone().unwrap_or_else(|| paths.config.clone());

    let log_dir = if args.log_file {
        paths.ensure_logs_dir()?;
        Some(paths.logs_dir.clone())
    } else {
        None
    };
    let _log_guard = init_logging(&args.log_level, log_dir.as_deref())?;

    info!("Starting nanoKONTROL2 Remap v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path.display());

    let config = AppConfig::load_or_default(&config_path).await?;

    if args.list_ports {
        sniffer::list_ports_formatted(&config.device.name, &config.virtual_port.name);
        return Ok(());
    }

    let mapping_path = args.mapping.clone().or_else(|| config.mapping_path(&config_path));
    let watch = config.watch_mapping && !args.monitor;
    let (mapping, watcher) = load_mapping(mapping_path, watch).await?;

    if args.monitor {
        sniffer::run_monitor(&config.device.name, &mapping).await?;
        return Ok(());
    }

    let app = App::new(MidirBackend::new(CLIENT_NAME), &config, mapping)?;

    let commands = if args.no_repl {
        None
    } else {
        let (tx, rx) = mpsc::unbounded_channel();
        cli::spawn_repl(tx);
        Some(rx)
    };

    app.run(commands, watcher).await?;

    info!("nanoKONTROL2 Remap shutdown complete");
    Ok(())
}

async fn load_mapping(path: Option<PathBuf>, watch: bool) -> Result<(MappingConfig, Option<MappingWatcher>)> {
    match path {
        None => {
            info!("No mapping preset configured, using the factory layout");
            Ok((MappingConfig::factory_default(), None))
        }
        Some(path) if watch => {
            let (watcher, mapping) = MappingWatcher::new(&path).await?;
            info!("Mapping loaded from {} with hot-reload enabled", path.display());
            Ok((mapping, Some(watcher)))
        }
        Some(path) => {
            let mapping = MappingConfig::load(&path).await?;
            info!("Mapping loaded from {}", path.display());
            Ok((mapping, None))
        }
    }
}

fn init_logging(level: &str, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "nanokontrol-remap.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(file_layer)
        .try_init()?;

    Ok(guard)
}
