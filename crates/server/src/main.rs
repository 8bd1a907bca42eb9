use awgbot_common::codec::SystemResolver;
use awgbot_server::db::{PeerStore, TrafficAccountant};
use awgbot_server::notifications::{AdminNotifier, PeerEvent};
use awgbot_server::registry::{AwgCliRegistry, PeerRegistry};
use awgbot_server::scheduler::{ExpiryJobs, ExpiryScheduler};
use awgbot_server::server::config::ServerConfig;
use awgbot_server::services::LifecycleManager;
use awgbot_server::version::VERSION;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(author, version = VERSION, about = "AmneziaWG peer lifecycle engine")]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // JSON to a daily-rotated file
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let loaded = ServerConfig::load(args.config.as_deref());
    let log_dir = loaded
        .as_ref()
        .map(|config| config.log_dir.clone())
        .unwrap_or_else(|_| "logs".to_string());
    init_logging(&log_dir);
    info!("Starting awgbot server, version: {}", VERSION);

    let config = match loaded {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Failed to load server configuration: {}", e);
            return Err(e.into());
        }
    };

    let store = PeerStore::new(config.data_path());
    store.init().await?;
    let accountant = TrafficAccountant::new(config.data_path());
    let notifier = AdminNotifier::from_config(&config)?;
    let registry: Arc<dyn PeerRegistry> = Arc::new(AwgCliRegistry::new(&config));

    if let Err(e) = registry.verify_environment().await {
        error!(error = %e, container = %config.docker_container, "Control plane is not ready.");
        notifier
            .notify(PeerEvent::EnvironmentFailure {
                error: e.to_string(),
            })
            .await;
        return Err(e.into());
    }
    info!(
        container = %config.docker_container,
        interface = %config.interface_name(),
        "Control plane verified."
    );

    let (jobs, fired_rx) = ExpiryJobs::new();
    let lifecycle = Arc::new(LifecycleManager::new(
        store,
        accountant,
        registry,
        jobs,
        notifier,
        Arc::new(SystemResolver),
    ));

    let mut scheduler = ExpiryScheduler::new(
        lifecycle,
        fired_rx,
        config.sweep_interval(),
        config.command_timeout(),
    );
    scheduler.start().await?;

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    scheduler.stop();
    Ok(())
}
