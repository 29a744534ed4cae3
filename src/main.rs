use std::sync::Arc;

use nudge_engine::config::{GatewayConfig, NudgeConfig};
use nudge_engine::gateway::{HttpReminderGateway, ReminderGateway};
use nudge_engine::nudge::{NudgeEngine, NudgeRouteState, nudge_routes};
use nudge_engine::progress::{ProgressRouteState, default_questions, progress_routes};
use nudge_engine::store::{LibSqlStore, Store};
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let nudge_config = NudgeConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let gateway_config = GatewayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export NUDGE_GATEWAY_URL=http://localhost:9090");
        std::process::exit(1);
    });

    let port: u16 = std::env::var("NUDGE_PORT")
        .unwrap_or_else(|_| "8000".to_string())
        .parse()
        .unwrap_or(8000);

    eprintln!("⏰ Nudge Engine v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   API: http://0.0.0.0:{port}");
    eprintln!("   Gateway: {}", gateway_config.endpoint);
    eprintln!(
        "   Policy: up to {} nudges, {}min initial delay, x{} backoff, {}min cap",
        nudge_config.max_nudges,
        nudge_config.initial_delay_minutes,
        nudge_config.exponential_multiplier,
        nudge_config.delay_cap_minutes,
    );

    // ── Database ─────────────────────────────────────────────────────────
    let db_path =
        std::env::var("NUDGE_DB_PATH").unwrap_or_else(|_| "./data/nudge-engine.db".to_string());

    let store = LibSqlStore::new_local(std::path::Path::new(&db_path))
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: Failed to open database at {db_path}: {e}");
            std::process::exit(1);
        });
    let store: Arc<dyn Store> = Arc::new(store);

    eprintln!("   Database: {db_path}");

    let seeded = store.seed_questions(&default_questions()).await?;
    if seeded > 0 {
        eprintln!("   Seeded {seeded} questions");
    }

    // ── Engine ───────────────────────────────────────────────────────────
    let gateway: Arc<dyn ReminderGateway> = Arc::new(HttpReminderGateway::new(gateway_config));
    let engine = Arc::new(NudgeEngine::new(
        nudge_config,
        Arc::clone(&store),
        gateway,
    ));

    // ── HTTP server ──────────────────────────────────────────────────────
    let app = nudge_routes(NudgeRouteState {
        engine: Arc::clone(&engine),
    })
    .merge(progress_routes(ProgressRouteState { store, engine }))
    .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    tracing::info!(port, "Nudge engine listening");
    axum::serve(listener, app).await?;

    Ok(())
}
