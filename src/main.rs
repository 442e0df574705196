//! AMR operator console - main entry point

use amr_console::auth::cognito::CognitoConfig;
use amr_console::auth::{CognitoIdentityExchange, CredentialBroker, IdentityProof};
use amr_console::clock::{Clock, SystemClock};
use amr_console::config::ConsoleConfig;
use amr_console::console;
use amr_console::error::ConsoleError;
use amr_console::observability::{init_default_logging, init_logging, LogFormat};
use amr_console::session::{dispatcher::random_suffix, ConnectionOrchestrator};
use amr_console::signing::{RequestSigner, SigningParams};
use amr_console::transport::mqtt::MqttConnector;
use amr_console::transport::{ConnectOptions, TransportSession};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn, Level};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Operator console for an autonomous mobile robot
#[derive(Parser)]
#[command(name = "amr-console")]
#[command(about = "Connection and liveness manager for an AMR operator console")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "AMR_CONSOLE_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the robot and serve the operator console
    Run,
    /// Validate configuration
    Config {
        /// Print the validated configuration
        #[arg(long)]
        show: bool,
    },
    /// Obtain credentials, sign, connect once and disconnect
    Check,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.verbose {
        0 => init_default_logging(),
        n => {
            let level = if n == 1 { Level::DEBUG } else { Level::TRACE };
            let format = LogFormat::parse(
                &std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
            );
            init_logging(level, format, true);
        }
    }

    info!("Starting amr-console v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_console(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
        Commands::Check => run_check(config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ConsoleConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ConsoleConfig::load_from_file(path)?);
    }

    for path_str in ["amr-console.toml", "config/amr-console.toml"] {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ConsoleConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create amr-console.toml".into())
}

fn handle_config_command(config: &ConsoleConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }
    info!("Configuration validation complete");
    Ok(())
}

fn identity_exchange(
    config: &ConsoleConfig,
) -> Result<Arc<CognitoIdentityExchange>, Box<dyn std::error::Error>> {
    let cognito = CognitoConfig::from_sections(&config.iot.region, &config.identity);
    Ok(Arc::new(CognitoIdentityExchange::new(cognito)?))
}

async fn run_console(config: Arc<ConsoleConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let bind: SocketAddr = config.console.bind.parse()?;

    let proof = match config.get_id_token() {
        Ok(token) => Some(IdentityProof::new(token)),
        Err(e) => {
            warn!("{}; waiting for POST /sign-in", e);
            None
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (orchestrator, events) = ConnectionOrchestrator::new(
        config.clone(),
        clock,
        identity_exchange(&config)?,
        proof,
        Arc::new(MqttConnector::new()),
    );
    let (handle, task) = orchestrator.spawn(events);

    let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
    let http_handle = handle.clone();
    let http_task = tokio::spawn(async move {
        let shutdown = async {
            let _ = http_shutdown_rx.await;
        };
        if let Err(e) = console::serve(http_handle, bind, shutdown).await {
            error!("Console HTTP surface failed: {}", e);
        }
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!(thing = %config.iot.thing_name, %bind, "Console running");

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, signing out"),
        _ = sigterm.recv() => info!("Received SIGTERM, signing out"),
    }

    if let Err(e) = handle.sign_out().await {
        warn!("Sign-out during shutdown failed: {}", e);
    }

    let _ = http_shutdown_tx.send(());
    let _ = timeout(SHUTDOWN_TIMEOUT, http_task).await;

    drop(handle);
    if timeout(SHUTDOWN_TIMEOUT, task).await.is_err() {
        warn!("Orchestrator did not stop within {:?}", SHUTDOWN_TIMEOUT);
    }
    Ok(())
}

/// One-shot connectivity diagnostic
async fn run_check(config: Arc<ConsoleConfig>) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let proof = IdentityProof::new(config.get_id_token()?);

    let mut broker = CredentialBroker::new(
        identity_exchange(&config)?,
        clock.clone(),
        Some(proof),
        config.refresh_skew(),
    );
    let credentials = broker
        .obtain()
        .await
        .map_err(|e| ConsoleError::from(e).operator_message())?;
    info!(
        access_key_id = %credentials.access_key_id,
        expires_at = %credentials.expires_at,
        "Credentials obtained"
    );

    let signer = RequestSigner::new(SigningParams::from_iot(&config.iot), clock);
    let descriptor = signer
        .sign(&credentials)
        .map_err(|e| ConsoleError::from(e).operator_message())?;
    info!(
        host = %descriptor.host,
        amz_date = %descriptor.amz_date(),
        has_session_token = descriptor.has_session_token(),
        "Connection URL signed"
    );

    let identity = credentials.identity_id.as_deref().unwrap_or("anon");
    let options = ConnectOptions {
        client_id: format!("{identity}-{}", random_suffix(6)),
        keep_alive: std::time::Duration::from_secs(config.transport.keep_alive_secs),
        connect_timeout: std::time::Duration::from_secs(config.transport.connect_timeout_secs),
        clean_session: config.transport.clean_session,
    };

    let (events_tx, _events_rx) = mpsc::unbounded_channel();
    let mut session = TransportSession::new(Arc::new(MqttConnector::new()), events_tx);
    match session.connect(&descriptor, &options).await {
        Ok(connection_id) => {
            info!(connection_id, client_id = %options.client_id, "Handshake succeeded");
            session.disconnect().await;
            println!("OK: connected to {} as {}", descriptor.host, options.client_id);
            Ok(())
        }
        Err(e) => {
            let err = ConsoleError::from(e);
            println!("FAILED: {}", err.operator_message());
            Err(err.status_label().into())
        }
    }
}
