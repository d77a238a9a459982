//! `SpaceBook` Server
//!
//! Serves the booking and web push HTTP API and runs the penalization
//! monitor that expires reservations left unconfirmed.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use spacebook_core::config::{Config, load_config};
use spacebook_server::booking::{
    BookingPolicy, PenalizationMonitor, ReservationStateMachine, SlotLedger,
};
use spacebook_server::http::{AppState, build_router};
use spacebook_server::notifications::{
    NotificationDispatcher, SubscriptionRegistry, WebPushClient,
};
use spacebook_server::storage::SpacebookDatabase;

#[derive(Parser, Debug)]
#[command(name = "spacebook-server")]
#[command(version, about = "SpaceBook server - space reservations with web push")]
struct Args {
    /// TCP bind address (overrides config)
    #[arg(long, env = "SPACEBOOK_ADDR")]
    addr: Option<String>,

    /// Database file path (overrides config)
    #[arg(long, env = "SPACEBOOK_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Explicit JSON configuration file, layered over the global settings
    #[arg(long, env = "SPACEBOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Seconds a pending reservation may wait for confirmation
    #[arg(long, env = "SPACEBOOK_CONFIRMATION_DEADLINE_SECS")]
    confirmation_deadline_secs: Option<u64>,

    /// Seconds between penalization monitor sweeps
    #[arg(long, env = "SPACEBOOK_MONITOR_INTERVAL_SECS")]
    monitor_interval_secs: Option<u64>,

    /// Log level filter for the server (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "SPACEBOOK_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "SPACEBOOK_LOG_JSON")]
    log_json: bool,
}

impl Args {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = &self.addr {
            config.server.addr.clone_from(addr);
        }
        if let Some(path) = &self.db_path {
            config.server.database_path = Some(path.clone());
        }
        if let Some(secs) = self.confirmation_deadline_secs {
            config.booking.confirmation_deadline_secs = secs;
        }
        if let Some(secs) = self.monitor_interval_secs {
            config.booking.monitor_interval_secs = secs.max(1);
        }
        if self.log_json {
            config.server.log_json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = load_config(args.config.as_deref())?;
    args.apply(&mut config);

    let log_filter = format!("spacebook_server={}", args.log_level);
    spacebook_core::tracing_init::init_tracing(&log_filter, config.server.log_json)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.server.addr,
        confirmation_deadline_secs = config.booking.confirmation_deadline_secs,
        push_enabled = config.push.is_enabled(),
        "Starting spacebook-server"
    );

    // Initialize database
    let db_path = match &config.server.database_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!(path = %db_path.display(), "Opening database");
    let db = SpacebookDatabase::open(&db_path, config.server.max_connections).await?;

    // Notifications
    let registry = SubscriptionRegistry::new(db.clone());
    let transport = Arc::new(WebPushClient::from_config(&config.push)?);
    let dispatcher =
        NotificationDispatcher::new(Arc::new(registry.clone()), transport, &config.push);

    // Booking
    let ledger = SlotLedger::new(Arc::new(db.clone()), config.booking.release_attempts);
    let machine = Arc::new(ReservationStateMachine::new(
        db.clone(),
        ledger,
        dispatcher.clone(),
        BookingPolicy::from_config(&config.booking),
    ));

    let monitor = PenalizationMonitor::new(
        Arc::clone(&machine),
        db.clone(),
        config.booking.monitor_interval(),
    )
    .spawn();

    let app = build_router(AppState {
        db,
        registry,
        dispatcher,
        machine,
    });
    let listener = tokio::net::TcpListener::bind(&config.server.addr).await?;
    info!(addr = %listener.local_addr()?, "HTTP server ready");

    // In-flight requests finish before the monitor stops.
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;
    monitor.stop().await;
    served?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C, shutting down"),
        () = terminate => info!("Received SIGTERM, shutting down"),
    }
}

/// Default database path: `$XDG_CONFIG_HOME/spacebook/spacebook.db`, falling
/// back to `~/.spacebook/spacebook.db`.
fn default_db_path() -> anyhow::Result<PathBuf> {
    if let Some(path) = spacebook_core::config::database_path() {
        return Ok(path);
    }
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".spacebook").join("spacebook.db"))
}
