//! Decision Engine Binary
//!
//! Starts the Quorum decision engine.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin decision-engine
//! ```
//!
//! # Environment Variables
//!
//! - `QUORUM_CONFIG`: Path to the YAML configuration (default: config.yaml)
//! - `QUORUM_MODE`: once | continuous (default: continuous)
//! - `QUORUM_INSTRUMENTS`: Comma-separated instrument override
//! - `ALPACA_API_KEY` / `ALPACA_API_SECRET`: interpolated into the broker
//!   section of the configuration when the Alpaca adapter is selected
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use decision_engine::broker::{AlpacaBroker, BrokerAdapter, PaperBroker};
use decision_engine::config::{BrokerKind, Config, ServerConfig};
use decision_engine::engine::Engine;
use decision_engine::journal::{Journal, JsonlJournal, MemoryJournal};
use decision_engine::load_config;
use decision_engine::marketdata::{MarketData, StaticMarketData};
use decision_engine::notify::build_notifier;
use decision_engine::server::create_router;

/// How the binary runs: a single decision cycle, or a long-lived
/// service with the scheduler, monitor and control API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Once,
    Continuous,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();
    init_tracing();

    tracing::info!("Starting Quorum Decision Engine");

    let config_path = std::env::var("QUORUM_CONFIG").ok();
    let mut config = load_config(config_path.as_deref())?;
    apply_instrument_override(&mut config);

    let mode = parse_mode()?;
    log_config(&config, mode);

    // Broker selection picks the concrete engine type; everything past
    // this point is generic over the adapter.
    match config.broker.kind {
        BrokerKind::Paper => {
            let broker = Arc::new(PaperBroker::new(config.broker.starting_cash));
            run(config, broker, mode).await
        }
        BrokerKind::Alpaca => {
            let broker = Arc::new(AlpacaBroker::new(&config.broker)?);
            run(config, broker, mode).await
        }
    }
}

async fn run<B: BrokerAdapter + 'static>(
    config: Config,
    broker: Arc<B>,
    mode: RunMode,
) -> Result<(), Box<dyn std::error::Error>> {
    let journal: Arc<dyn Journal> = match &config.journal.path {
        Some(path) => {
            tracing::info!(path, "Journaling to file");
            Arc::new(JsonlJournal::open(path)?)
        }
        None => {
            tracing::info!("Journaling to memory only");
            Arc::new(MemoryJournal::new())
        }
    };
    let notifier = build_notifier(&config.notifications);
    let data: Arc<dyn MarketData> = Arc::new(StaticMarketData::from_config(&config.market_data));

    let server_config = config.server.clone();
    let shutdown = CancellationToken::new();
    let engine = Arc::new(Engine::new(
        config,
        broker,
        data,
        journal,
        notifier,
        shutdown.clone(),
    )?);

    match mode {
        RunMode::Once => {
            let report = engine.run_once().await?;
            tracing::info!(
                run_id = %report.run_id,
                outcome = ?report.outcome,
                decisions = report.results.len(),
                "Run complete"
            );
            std::process::exit(report.outcome.exit_code());
        }
        RunMode::Continuous => {
            let monitor = engine.monitor();
            let monitor_shutdown = shutdown.clone();
            let monitor_handle = tokio::spawn(async move {
                monitor.run(monitor_shutdown).await;
            });

            let scheduler = Arc::clone(&engine);
            let scheduler_handle = tokio::spawn(async move {
                scheduler.run_continuous().await;
            });

            tracing::info!("Decision engine ready");

            serve_http(&server_config, engine, shutdown.clone()).await?;

            // The signal handler cancelled the token; wait for the
            // background loops to drain.
            shutdown.cancel();
            let _ = scheduler_handle.await;
            let _ = monitor_handle.await;

            tracing::info!("Decision engine stopped");
            Ok(())
        }
    }
}

/// Load .env from the current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Initialize the tracing subscriber with environment filter.
///
/// Uses static directive strings that are compile-time constants guaranteed to parse.
#[allow(clippy::expect_used)]
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "decision_engine=info"
                    .parse()
                    .expect("static directive 'decision_engine=info' is valid"),
            ),
        )
        .init();
}

/// Parse the run mode from `QUORUM_MODE`.
fn parse_mode() -> Result<RunMode, Box<dyn std::error::Error>> {
    let mode = std::env::var("QUORUM_MODE").unwrap_or_else(|_| "continuous".to_string());
    match mode.to_lowercase().as_str() {
        "once" => Ok(RunMode::Once),
        "continuous" => Ok(RunMode::Continuous),
        other => Err(format!("unknown QUORUM_MODE '{other}' (expected once or continuous)").into()),
    }
}

/// Replace the configured instrument set from `QUORUM_INSTRUMENTS`.
fn apply_instrument_override(config: &mut Config) {
    if let Ok(raw) = std::env::var("QUORUM_INSTRUMENTS") {
        let instruments: Vec<String> = raw
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if !instruments.is_empty() {
            config.scheduler.instruments = instruments;
        }
    }
}

/// Log the effective configuration.
fn log_config(config: &Config, mode: RunMode) {
    tracing::info!(
        ?mode,
        broker = ?config.broker.kind,
        environment = %config.broker.environment,
        initial_level = %config.safety.initial_level,
        instruments = ?config.scheduler.instruments,
        run_interval_secs = config.scheduler.run_interval_secs,
        "Configuration loaded"
    );
}

/// Serve the control API until a shutdown signal arrives.
async fn serve_http<B: BrokerAdapter + 'static>(
    config: &ServerConfig,
    engine: Arc<Engine<B>>,
    shutdown: CancellationToken,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = create_router(engine);
    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.http_port).parse()?;

    tracing::info!(%addr, "Control API starting");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  GET  /api/v1/status");
    tracing::info!("  POST /api/v1/run");
    tracing::info!("  POST /api/v1/safety/escalate");
    tracing::info!("  POST /api/v1/safety/de-escalate");
    tracing::info!("  POST /api/v1/safety/clear-halt");
    tracing::info!("  POST /api/v1/emergency-stop");
    tracing::info!("  POST /api/v1/approvals");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT), then cancel the token
/// so the scheduler and monitor loops stop with the server.
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals should fail fast at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown.cancel();
}
