use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use field_ops_api::config;
use field_ops_api::dashboard;
use field_ops_api::database::manager::DatabaseManager;
use field_ops_api::geo::{GeoProvider, RadarClient};
use field_ops_api::resource::{AppState, EndpointFactory};
use field_ops_api::resources;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up DATABASE_URL, GEO_SECRET_KEY, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "field_ops_api=info,tower_http=info".into()),
        )
        .init();

    let config = config::config();
    info!("Starting field ops API in {:?} mode", config.environment);

    let pool = DatabaseManager::connect().await?;

    // The service still boots without geo credentials; only gated creates
    // differ, and those reject rather than silently pass.
    let geo: Option<Arc<dyn GeoProvider>> = match RadarClient::from_env() {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            warn!("Geo provider disabled: {}", e);
            None
        }
    };

    let state = AppState { pool: pool.clone(), geo };

    let mut factory = EndpointFactory::new(state.clone());
    for descriptor in resources::descriptors() {
        factory.register(descriptor)?;
    }
    let descriptors = factory.descriptors().to_vec();

    let mut app = Router::new()
        .route("/", get(root))
        .route("/health", get(move || health(pool)))
        .merge(factory.into_router())
        .merge(dashboard::router(state, descriptors))
        .layer(TraceLayer::new_for_http());

    if config.server.enable_cors {
        app = app.layer(CorsLayer::permissive());
    }

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Field ops API listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "Field Ops API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Field operations backend: geofence-gated visit reports, attendance and dealer registry",
            "endpoints": {
                "home": "/",
                "health": "/health",
                "visits": "/visits, /visits/owner/:owner_id, /visits/:id",
                "attendance": "/attendance, /attendance/owner/:owner_id, /attendance/:id",
                "dealers": "/dealers, /dealers/owner/:owner_id, /dealers/:id",
                "dashboard": "/dashboard/summary"
            }
        }
    }))
}

async fn health(pool: PgPool) -> impl axum::response::IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check(&pool).await {
        Ok(_) => (
            axum::http::StatusCode::OK,
            Json(json!({
                "success": true,
                "data": { "status": "ok", "timestamp": now, "database": "ok" }
            })),
        ),
        Err(e) => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "database unavailable",
                "data": { "status": "degraded", "timestamp": now, "database": e.to_string() }
            })),
        ),
    }
}
