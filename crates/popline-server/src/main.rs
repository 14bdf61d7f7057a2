//! Popline server binary: the phone line's entry point.
//!
//! Starts an axum HTTP server with structured logging, database initialization,
//! provider clients, the call session sweep, and graceful shutdown on
//! SIGTERM/SIGINT.

use popline_agent::{AnthropicProvider, ConversationAgent};
use popline_facility::{PoolSettings, SqliteFacility};
use popline_server::{app, config, session, AppState};
use popline_voice::{DeepgramRecognizer, ElevenLabsSynthesizer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("POPLINE_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration; the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Initialize database
    let pool = popline_facility::create_pool(
        &config.database.path,
        PoolSettings {
            busy_timeout_ms: config.database.busy_timeout_ms,
            max_size: config.database.pool_max_size,
        },
    )
    .expect("failed to create database pool; check database.path in config");

    {
        let conn = pool
            .get()
            .expect("failed to get database connection for migrations");
        let applied =
            popline_facility::run_migrations(&conn).expect("failed to run database migrations");
        if applied > 0 {
            tracing::info!(count = applied, "applied database migrations");
        }
    }

    // Providers
    let facility = SqliteFacility::new(pool).into_shared();
    let recognizer = Arc::new(DeepgramRecognizer::new(config.recognizer.clone()));
    let synthesizer = Arc::new(
        ElevenLabsSynthesizer::new(config.synthesizer.clone())
            .expect("failed to build speech synthesis client"),
    );
    let reasoning = Arc::new(
        AnthropicProvider::new(config.reasoning.clone())
            .expect("failed to build reasoning provider client"),
    );
    let agent = Arc::new(ConversationAgent::new(
        reasoning,
        facility.clone(),
        config.reasoning.max_tool_rounds,
    ));

    let sessions = Arc::new(session::SessionRegistry::new());
    let sweep = session::start_sweep_task(
        sessions.clone(),
        config.sessions.sweep_interval(),
        config.sessions.idle_timeout(),
    );

    // Build application
    let app = app(AppState {
        sessions,
        facility,
        recognizer,
        synthesizer,
        agent,
        call: config.call_settings(),
        public_url: config.server.public_url.clone(),
    });
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting popline server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address; is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    sweep.abort();
    tracing::info!("popline server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
