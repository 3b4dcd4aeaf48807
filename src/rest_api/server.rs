//! Axum HTTP server for health and metrics

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::controller::{AssignerState, Supervisor};
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct AssignerSummary {
    name: String,
    state: AssignerState,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    assigners: Vec<AssignerSummary>,
}

/// Healthy unless a registered assigner loop has exited on its own
async fn health(
    State(supervisor): State<Arc<Supervisor>>,
) -> (StatusCode, Json<HealthResponse>) {
    let assigners: Vec<AssignerSummary> = supervisor
        .assigners()
        .await
        .into_iter()
        .map(|(name, state)| AssignerSummary { name, state })
        .collect();

    let degraded = assigners.iter().any(|a| a.state == AssignerState::Stopped);
    let (code, status) = if degraded {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    (code, Json(HealthResponse { status, assigners }))
}

/// Metrics endpoint handler
async fn metrics_handler() -> (StatusCode, String) {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    match encode(&mut buffer, &crate::controller::metrics::REGISTRY) {
        Ok(()) => (StatusCode::OK, buffer),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

pub fn router(supervisor: Arc<Supervisor>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(supervisor)
}

/// Run the health and metrics server
pub async fn run_server(addr: SocketAddr, supervisor: Arc<Supervisor>) -> Result<()> {
    let app = router(supervisor);
    info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::ConfigError(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .await
        .map_err(|e| Error::ConfigError(format!("Server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::test_support::{
        context, floating_ip, pool_node, pool_spec, FakeCluster, FakeProvider, FirstSelector,
    };

    #[tokio::test]
    async fn test_healthz_lists_assigners_and_metrics_are_served() {
        let provider = FakeProvider::new();
        provider.add_address(1, "203.0.113.10", None);
        provider.add_instance(11, "node-a");
        let supervisor = Arc::new(Supervisor::new(context(
            provider,
            FakeCluster::with_nodes(vec![pool_node("node-a", true)]),
            Arc::new(FirstSelector),
        )));
        supervisor
            .ensure(&floating_ip("ingress", pool_spec("203.0.113.10", 3600)))
            .await;
        crate::controller::metrics::inc_convergence("server-test", "assigned");

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(supervisor.clone());
        tokio::spawn(async move { axum::serve(listener, app).await });

        let response = reqwest::get(format!("http://{}/healthz", addr)).await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let health: serde_json::Value = response.json().await.unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(
            health["assigners"],
            serde_json::json!([{ "name": "ingress", "state": "running" }])
        );

        let metrics = reqwest::get(format!("http://{}/metrics", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(metrics.contains("floating_ip_convergence_total"));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_is_returned() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let supervisor = Arc::new(Supervisor::new(context(
            FakeProvider::new(),
            FakeCluster::with_nodes(vec![]),
            Arc::new(FirstSelector),
        )));

        let result = run_server(addr, supervisor).await;

        assert!(matches!(result, Err(Error::ConfigError(_))));
    }
}
