pub mod agents;
pub mod credits;
pub mod health;
pub mod me;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router, mounted under `/api`
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        .route("/agents/pricing", get(agents::get_pricing))
        // Protected routes
        .route("/me", get(me::get_me))
        // Agent workflows
        .route("/agents/execute", post(agents::execute_workflow))
        .route("/agents/executions", get(agents::list_executions))
        .route("/agents/executions/:execution_id", get(agents::get_execution))
        .route(
            "/agents/executions/:execution_id/stream",
            get(agents::stream_execution),
        )
        // Credits
        .route("/credits/balance", get(credits::get_balance))
        .route("/credits/transactions", get(credits::list_transactions))
}
