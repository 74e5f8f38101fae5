mod settings;

use std::{sync::Arc, time::Duration};

use {
    clap::Parser,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    charla_config::{ConfigCache, ConfigStore, MemoryConfigStore},
    charla_dispatch::DispatchPipeline,
    charla_modules::{ModuleRegistry, SupportModule},
    charla_session::{SessionConfig, SessionManager, sidecar::SidecarTransport},
};

#[derive(Parser)]
#[command(name = "charla", about = "WhatsApp chatbot gateway")]
struct Cli {
    /// Path to charla.toml (defaults to ./charla.toml when present).
    #[arg(long, env = "CHARLA_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Sidecar WebSocket port (overrides config value).
    #[arg(long, env = "CHARLA_SIDECAR_PORT")]
    sidecar_port: Option<u16>,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = settings::load(cli.config.as_deref())?;

    let store = Arc::new(MemoryConfigStore::new());
    let cache = Arc::new(ConfigCache::with_ttl(
        store as Arc<dyn ConfigStore>,
        Duration::from_secs(config.cache.ttl_secs),
    ));

    let mut registry = ModuleRegistry::new();
    registry.register(Arc::new(SupportModule))?;

    let pipeline = Arc::new(
        DispatchPipeline::new(cache, Arc::new(registry)).with_timestamp_tolerance(
            Duration::from_secs(config.dispatch.timestamp_tolerance_secs),
        ),
    );

    let port = cli.sidecar_port.unwrap_or(config.session.sidecar_port);
    let transport = Arc::new(SidecarTransport::new(port));
    let manager = Arc::new(SessionManager::new(transport, pipeline, SessionConfig {
        auth_dir: config.session.auth_dir.clone(),
        qr_png_path: config.session.qr_png_path.clone(),
        max_qr_attempts: config.session.max_qr_attempts,
        retry_budget: config.session.retry_budget,
    }));

    manager.connect().await?;
    info!(port, "charla running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    manager.close().await?;

    Ok(())
}
