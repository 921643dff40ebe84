//! Agent relay daemon.
//!
//! Run with: cargo run -p agent-relay-server -- relay.toml
//!
//! The config path may also come from `AGENT_RELAY_CONFIG`. Clients connect to
//! `/ws` for requests and replayed events, `/events` for a read-only SSE feed
//! and `/health` for a status snapshot.

use std::sync::Arc;

use agent_relay_cdp::{
    ActionRunner, Capability, ConnectionManager, ContextEvaluator, ContextProber,
    ScriptCapability, WsConnector,
};
use agent_relay_core::{
    EventBus, RelayConfig, StateHandle, config::capability, storage::JsonFileStore,
};
use agent_relay_dispatch::{ActionQueue, AgentMonitor, DelegationSupervisor};
use agent_relay_transport::{RelayState, websocket::create_ws_router};
use anyhow::Context;
use axum::{
    Json, Router,
    extract::State,
    response::{
        IntoResponse,
        sse::{KeepAlive, Sse},
    },
    routing::get,
};
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "relay.toml";

/// Application state shared across the plain HTTP handlers.
#[derive(Clone)]
struct AppState {
    connection: Arc<ConnectionManager>,
    relay: RelayState,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("AGENT_RELAY_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());
    let config = RelayConfig::load_from_path(&config_path)
        .with_context(|| format!("Failed to load config from {config_path}"))?;

    let bus = Arc::new(EventBus::new());
    let store = Arc::new(JsonFileStore::new(&config.state_path));
    let state = Arc::new(
        StateHandle::load(store)
            .await
            .with_context(|| format!("Failed to load state from {}", config.state_path.display()))?,
    );

    let connection = ConnectionManager::new(
        Arc::new(WsConnector::new(config.discovery.clone())),
        config.discovery.clone(),
        config.connection.clone(),
        Arc::clone(&bus),
    );
    let prober: Arc<dyn ActionRunner> = Arc::new(ContextProber::new(
        connection.clone(),
        config.prober.clone(),
    ));
    let script = |name: &str| -> Arc<dyn Capability> {
        Arc::new(ScriptCapability::from_config(name, &config))
    };

    let agent = Arc::new(AgentMonitor::new(Arc::clone(&state), Arc::clone(&bus)));
    let queue = Arc::new(ActionQueue::new(
        Arc::clone(&state),
        Arc::clone(&bus),
        Arc::clone(&agent),
        Arc::clone(&prober),
        script(capability::SEND_MESSAGE),
    ));
    let delegations = Arc::new(DelegationSupervisor::new(
        state,
        Arc::clone(&bus),
        prober,
        script(capability::FOCUS_TARGET),
        script(capability::SWITCH_MODEL),
        Arc::clone(&queue),
        config.delegation.clone(),
    ));

    if !connection.connect().await {
        tracing::warn!("Host not reachable yet; retrying in the background");
    }
    let queue_task = Arc::clone(&queue).spawn(config.tick_interval());

    let relay = RelayState {
        bus,
        queue,
        agent,
        delegations,
    };
    let app_state = AppState {
        connection: Arc::clone(&connection),
        relay: relay.clone(),
    };

    // Build router
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/events", get(events_handler))
        .with_state(app_state)
        .merge(create_ws_router(relay))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        );

    // Start server
    let addr = config.server.bind;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    tracing::info!("Relay listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    queue_task.abort();
    connection.shutdown();
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "connected": state.connection.is_connected(),
        "target": state.connection.current_target(),
        "contexts": state.connection.contexts().len(),
        "queue": state.relay.queue.pending().await,
        "busy": state.relay.agent.is_busy().await,
    }))
}

async fn events_handler(State(state): State<AppState>) -> impl IntoResponse {
    Sse::new(state.relay.bus.sse_stream()).keep_alive(KeepAlive::default())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
