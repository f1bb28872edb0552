use std::sync::Arc;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use fleetwatch::api;
use fleetwatch::config::Config;
use fleetwatch::detect::DetectionEngine;
use fleetwatch::ingest::FeedPoller;
use fleetwatch::models;

#[derive(OpenApi)]
#[openapi(
    info(title = "Fleet Watch API", version = "0.1.0"),
    paths(
        api::alerts::get_alerts,
        api::vehicles::list_vehicles,
        api::vehicles::get_route_stats,
    ),
    components(schemas(
        models::Snapshot,
        models::Alert,
        models::AlertKind,
        models::Severity,
        models::AlertDetails,
        models::Solution,
        api::vehicles::TrackedVehicle,
        api::vehicles::VehicleListResponse,
        api::vehicles::RouteStats,
        api::vehicles::RouteStatsResponse,
    )),
    tags(
        (name = "alerts", description = "Detected service anomalies and remediation suggestions"),
        (name = "vehicles", description = "Live vehicle tracking")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    tracing::info!(
        feed = %config.feed.vehicle_positions_url,
        tick_period_secs = config.detection.tick_period_secs,
        "Loaded configuration"
    );

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::OPTIONS])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Start the detection engine and its fixed-period scheduler
    let engine = Arc::new(DetectionEngine::new(config.detection.clone()));
    engine.start().await;

    // Start the feed poller in the background
    let poller = FeedPoller::new(config.feed.clone(), engine.clone());
    tokio::spawn(async move {
        poller.run().await;
    });

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(engine))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to {}: {e}", config.listen_addr));

    tracing::info!("Server running on http://{}", config.listen_addr);
    tracing::info!("Swagger UI: http://{}/swagger-ui", config.listen_addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Fleet Watch API"
}
