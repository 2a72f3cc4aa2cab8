use std::sync::Arc;

use axum::response::IntoResponse;
use axum::Json;

use crate::pipeline::Exchange;
use crate::router::{RouteError, RouteOptions, RouteTable};
use crate::state::ServerStats;

/// A group of routes. Controllers register everything they serve before the
/// server starts; the framework never calls back into them afterwards.
pub trait Controller: Send + Sync {
    fn register(&self, routes: &mut RouteTable) -> Result<(), RouteError>;
}

/// Built-in liveness surface: `GET /api/v1/health`, no auth.
pub struct HealthController;

impl Controller for HealthController {
    fn register(&self, routes: &mut RouteTable) -> Result<(), RouteError> {
        routes.register(
            "GET",
            "health",
            RouteOptions::public(),
            Arc::new(|exchange: Exchange| {
                Box::pin(async move {
                    let uptime = exchange
                        .extensions
                        .get::<Arc<ServerStats>>()
                        .map(|stats| stats.snapshot().uptime_seconds)
                        .unwrap_or(0);
                    let body = serde_json::json!({ "status": "ok", "uptimeSeconds": uptime });
                    Ok(Json(body).into_response())
                })
            }),
        )
    }
}
