use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::future::Future;
use std::io::BufRead;
use std::sync::Arc;
use std::{fmt::Debug, path::PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pushboard::config;
use pushboard::metrics;
use pushboard::notifications::{
    DomainEvent, NoOpPushProvider, NotificationPayload, NotificationService, PushProvider,
    RelayPushProvider,
};
use pushboard::push_subscriptions::{NewPushSubscription, SqlitePushSubscriptionStore};

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite push subscription database.
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_path)]
    pub db_path: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 0)]
    pub metrics_port: u16,

    /// URL of the Web Push relay. Without it notifications are only logged.
    #[clap(long)]
    pub relay_url: Option<String>,

    /// Timeout in seconds for relay requests.
    #[clap(long)]
    pub relay_timeout_sec: Option<u64>,

    #[clap(long, env = "VAPID_PUBLIC_KEY")]
    pub vapid_public_key: Option<String>,

    #[clap(long, env = "VAPID_PRIVATE_KEY", hide_env_values = true)]
    pub vapid_private_key: Option<String>,

    /// Contact URL sent to push services, e.g. mailto:admin@example.org.
    #[clap(long, env = "VAPID_SUBJECT")]
    pub vapid_subject: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Starts the service and sends a notification for every JSON domain event
    /// read from stdin, one per line, until EOF or Ctrl+C.
    Run,

    /// Registers (or refreshes) a browser subscription.
    Subscribe {
        endpoint: String,
        p256dh: String,
        auth: String,
        #[clap(long)]
        owner: Option<String>,
    },

    /// Removes a subscription, or every subscription of a user.
    Unsubscribe {
        #[clap(required_unless_present = "owner", conflicts_with = "owner")]
        endpoint: Option<String>,
        #[clap(long)]
        owner: Option<String>,
    },

    /// Shows subscription counters and the circuit breaker state.
    Stats,

    /// Prints the VAPID public key browsers subscribe with.
    PublicKey,

    /// Sends a test notification to everyone, or to one user's devices.
    SendTest {
        #[clap(long, default_value = "Test notification")]
        title: String,
        #[clap(long, default_value = "Push notifications are working")]
        body: String,
        #[clap(long)]
        owner: Option<String>,
    },
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_path: args.db_path.clone(),
            metrics_port: args.metrics_port,
            relay_url: args.relay_url.clone(),
            relay_timeout_sec: args.relay_timeout_sec,
            vapid_public_key: args.vapid_public_key.clone(),
            vapid_private_key: args.vapid_private_key.clone(),
            vapid_subject: args.vapid_subject.clone(),
        }
    }
}

fn build_provider(app_config: &config::AppConfig) -> Result<Arc<dyn PushProvider>> {
    match &app_config.push.relay_url {
        Some(url) => {
            let credentials = app_config
                .vapid_credentials()
                .context("VAPID keys are required to use a push relay")?;
            info!("Push relay configured at {}", url);
            Ok(Arc::new(RelayPushProvider::new(
                url.clone(),
                app_config.push.relay_timeout_sec,
                credentials,
            )?))
        }
        None => {
            warn!("No push relay configured, notifications will only be logged");
            Ok(Arc::new(NoOpPushProvider))
        }
    }
}

fn spawn_metrics_server(port: u16, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind metrics port {}: {}", port, e);
                return;
            }
        };
        info!("Metrics available at port {}!", port);
        if let Err(e) = axum::serve(listener, metrics::metrics_router())
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            error!("Metrics server stopped: {}", e);
        }
    })
}

/// Reads stdin line by line on a detached thread.
///
/// A blocking read cannot be cancelled, so it must stay off the runtime's
/// blocking pool or shutdown would wait for the next line.
fn spawn_stdin_reader() -> Result<mpsc::Receiver<std::io::Result<String>>> {
    let (tx, rx) = mpsc::channel(64);
    std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;
    Ok(rx)
}

/// Dispatches a notification for every event line until the input closes.
async fn read_events(
    service: Arc<NotificationService>,
    mut lines: mpsc::Receiver<std::io::Result<String>>,
) -> Result<()> {
    let mut pending = Vec::new();

    while let Some(line) = lines.recv().await {
        let line = line.context("Failed to read from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<DomainEvent>(line) {
            Ok(event) => pending.push(service.notify_in_background(event)),
            Err(e) => warn!("Ignoring malformed event: {}", e),
        }
    }

    info!("Input closed, waiting for {} notifications", pending.len());
    futures::future::join_all(pending).await;
    Ok(())
}

async fn run(
    service: NotificationService,
    metrics_port: u16,
    events: mpsc::Receiver<std::io::Result<String>>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    let shutdown_token = CancellationToken::new();
    let monitor = service.start(shutdown_token.child_token()).await;
    let metrics_server = (metrics_port > 0)
        .then(|| spawn_metrics_server(metrics_port, shutdown_token.child_token()));

    let service = Arc::new(service);
    let result = tokio::select! {
        result = read_events(Arc::clone(&service), events) => result,
        _ = shutdown => Ok(()),
    };

    shutdown_token.cancel();
    let _ = monitor.await;
    if let Some(server) = metrics_server {
        let _ = server.await;
    }
    result
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, initiating graceful shutdown");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    metrics::init_metrics();

    info!(
        "Opening push subscription database at {:?}...",
        app_config.db_path
    );
    let store = Arc::new(SqlitePushSubscriptionStore::new(&app_config.db_path)?);
    let provider = build_provider(&app_config)?;
    let service = NotificationService::new(store, provider, app_config.notification_config());

    match cli_args.command {
        Command::Run => {
            let events = spawn_stdin_reader()?;
            run(service, app_config.metrics_port, events, ctrl_c()).await?
        }
        Command::Subscribe {
            endpoint,
            p256dh,
            auth,
            owner,
        } => {
            let record = service
                .add_subscription(NewPushSubscription {
                    endpoint,
                    p256dh,
                    auth,
                    owner_id: owner,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Command::Unsubscribe { endpoint, owner } => {
            if let Some(owner) = owner {
                let removed = service.remove_subscriptions_for_owner(&owner).await?;
                println!("Removed {} subscriptions of {}", removed, owner);
            } else if let Some(endpoint) = endpoint {
                if service.remove_subscription(&endpoint).await? {
                    println!("Removed {}", endpoint);
                } else {
                    println!("{} was not subscribed", endpoint);
                }
            }
        }
        Command::Stats => {
            service.cache().ensure_loaded().await;
            let breaker = service.breaker().snapshot();
            println!("{}", serde_json::to_string_pretty(&service.stats())?);
            println!(
                "circuit breaker: {} (failures: {}, successes: {})",
                breaker.status, breaker.consecutive_failures, breaker.consecutive_successes
            );
        }
        Command::PublicKey => {
            if service.public_key().is_empty() {
                anyhow::bail!("No VAPID public key configured");
            }
            println!("{}", service.public_key());
        }
        Command::SendTest { title, body, owner } => {
            let payload = NotificationPayload::new(title, body).with_tag("test");
            let result = match owner {
                Some(owner) => service.send_to_owner(&owner, &payload).await?,
                None => service.send_to_all(&payload).await?,
            };
            println!("sent: {}, failed: {}", result.sent, result.failed);
        }
    }

    Ok(())
}
