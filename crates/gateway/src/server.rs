use std::time::Duration;

use {
    axum::{
        Json, Router,
        middleware::from_fn_with_state,
        response::IntoResponse,
        routing::get,
    },
    sqlx::sqlite::SqlitePoolOptions,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{info, warn},
};

use {
    timetable_config::{MetricsConfig, TimetableConfig},
    timetable_metrics::{MetricsRecorderConfig, init_metrics},
};

use crate::{
    cache::{SCHEDULE_CACHE, ScheduleCache},
    metrics_middleware::{HttpMetrics, http_metrics_middleware},
    metrics_routes::prometheus_metrics_handler,
    state::AppState,
    store::TimetableStore,
    timetable_routes::timetable_router,
};

// ── Server startup ───────────────────────────────────────────────────────────

/// Build the router (shared between production startup and tests).
///
/// The metrics middleware wraps every route and the fallback, so unmatched
/// requests are counted too. It is left out entirely when metrics are
/// disabled.
pub fn build_app(state: AppState, metrics: &MetricsConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let http_metrics = HttpMetrics::new(state.metrics.clone(), metrics.unmatched_routes);
    let enabled = state.metrics.is_enabled();

    let mut router = Router::new()
        .route("/api/health", get(health_handler))
        .route(&metrics.path, get(prometheus_metrics_handler))
        .merge(timetable_router())
        .fallback(not_found_handler)
        .with_state(state);

    if enabled {
        router = router.layer(from_fn_with_state(http_metrics, http_metrics_middleware));
    }

    router.layer(TraceLayer::new_for_http()).layer(cors)
}

/// Connect the database, initialize metrics and serve until Ctrl-C.
pub async fn start_gateway(config: TimetableConfig) -> anyhow::Result<()> {
    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
    })?;

    let pool = SqlitePoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await?;
    let store = TimetableStore::new(pool, metrics.clone());
    store.init().await?;
    info!(url = %config.database.url, "database ready");

    let cache = ScheduleCache::new(
        SCHEDULE_CACHE,
        config.metrics.schedule_cache_capacity,
        metrics.events(),
    );
    let state = AppState::new(store, cache, metrics);
    let app = build_app(state, &config.metrics);

    let listener =
        tokio::net::TcpListener::bind((config.server.bind.as_str(), config.server.port)).await?;
    info!(
        addr = %listener.local_addr()?,
        metrics = %config.metrics.path,
        "timetable server listening"
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> impl IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "error": "not found" })),
    )
}
