use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub services: ServiceHealth,
}

#[derive(Serialize)]
pub struct ServiceHealth {
    pub database: String,
    pub redis: String,
    pub llm: String,
}

/// Health check endpoint - public
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let redis = async {
        match &state.cache {
            Some(cache) => Some(cache.health_check().await.is_ok()),
            None => None,
        }
    };
    let llm = async {
        match &state.llm_client {
            Some(client) => Some(client.health_check().await.is_ok()),
            None => None,
        }
    };

    let (db_ok, redis_ok, llm_ok) = tokio::join!(state.store.health_check(), redis, llm);

    let label = |probe: Option<bool>| match probe {
        Some(true) => "ok",
        Some(false) => "error",
        None => "disabled",
    };

    // The store is critical, the rest only degrade the service
    let status = if !db_ok {
        "unhealthy"
    } else if redis_ok == Some(false) || llm_ok == Some(false) {
        "degraded"
    } else {
        "healthy"
    };

    let status_code = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            services: ServiceHealth {
                database: label(Some(db_ok)).to_string(),
                redis: label(redis_ok).to_string(),
                llm: label(llm_ok).to_string(),
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::app::testing::TestApp;
    use crate::test_support::StubModel;

    #[tokio::test]
    async fn in_memory_service_is_healthy() {
        let app = TestApp::new(StubModel::new());
        let req = Request::get("/api/health").body(Body::empty()).unwrap();

        let response = app.router.clone().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["services"]["redis"], "disabled");
    }
}
