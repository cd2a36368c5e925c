//! Prometheus metrics HTTP server.
//!
//! Serves every collector of a [`Registry`] at `/metrics` in the Prometheus
//! text format.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use podmetrics::metrics::{context, server};
//!
//! let ctx = context::init_global(&conf.metrics)?;
//! tokio::spawn(server::start_metrics_server(
//!     conf.metrics.clone(),
//!     ctx.registry().clone(),
//!     shutdown_tx.subscribe(),
//! ));
//! ```

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use prometheus::Registry;
use tokio::{net::TcpListener, sync::broadcast};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::metrics::{error::MetricsError, opts::MetricsOptions};

/// Handler for the `/metrics` endpoint.
async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match tokio::task::spawn_blocking(move || {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = registry.gather();
        encoder.encode_to_string(&metric_families)
    })
    .await
    {
        Ok(Ok(body)) => (StatusCode::OK, body),
        Ok(Err(e)) => {
            tracing::error!(
                event.name = "metrics.encode_failed",
                error.message = %e,
                "failed to encode metrics"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
        }
        Err(e) => {
            tracing::error!(
                event.name = "metrics.gather_failed",
                error.message = %e,
                "metrics gathering task panicked"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to gather metrics".to_string(),
            )
        }
    }
}

/// Create the metrics HTTP router.
pub fn create_metrics_router(registry: Registry) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves metrics at `<listen_address>:<port>/metrics` until `shutdown_rx`
/// fires or the server fails. Returns immediately when the server is disabled.
pub async fn start_metrics_server(
    config: MetricsOptions,
    registry: Registry,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), MetricsError> {
    if !config.enabled {
        info!(
            event.name = "metrics.disabled",
            "metrics server is disabled in configuration"
        );
        return Ok(());
    }

    let app = create_metrics_router(registry);

    let bind_address = format!("{}:{}", config.listen_address, config.port);
    let listener = TcpListener::bind(&bind_address)
        .await
        .map_err(|e| MetricsError::bind_address(&bind_address, e))?;

    info!(
        event.name = "metrics.started",
        net.listen.address = %bind_address,
        "metrics server started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .map_err(MetricsError::ServeError)?;

    info!(event.name = "metrics.stopped", "metrics server stopped");

    Ok(())
}
