use actix_web::{web, App, HttpResponse, HttpServer, Responder};
use serde_json::{json, Value};
use std::sync::Arc;

use super::RepositoryMetrics;

/// Serve `/metrics` and `/health` for a repository's metrics.
/// Runs until the server stops; give it its own thread/runtime.
pub async fn start_metrics_server(metrics: Arc<RepositoryMetrics>, port: u16) -> std::io::Result<()> {
    tracing::info!(port = port, "Starting metrics server on /metrics");

    let metrics = web::Data::from(metrics);
    HttpServer::new(move || {
        App::new()
            .app_data(metrics.clone())
            .route("/metrics", web::get().to(metrics_handler))
            .route("/health", web::get().to(health_handler))
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

async fn metrics_handler(metrics: web::Data<RepositoryMetrics>) -> impl Responder {
    match metrics.encode() {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            HttpResponse::InternalServerError().finish()
        }
    }
}

async fn health_handler() -> impl Responder {
    HttpResponse::Ok().json(health_report())
}

fn health_report() -> Value {
    json!({
        "status": "healthy",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    })
}
