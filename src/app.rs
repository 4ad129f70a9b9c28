use axum::{http::HeaderValue, Router};
use std::sync::Arc;
use tower_http::{
    cors::{AllowHeaders, AllowMethods, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

use crate::auth::JwtVerifier;
use crate::config::Settings;
use crate::middleware::request_id_layer;
use crate::routes;
use crate::services::{LlmClient, RedisCache, WorkflowRunner};
use crate::services::store::AgentStore;

/// Shared application state
pub struct AppState {
    pub settings: Settings,
    pub store: Arc<dyn AgentStore>,
    pub runner: WorkflowRunner,
    pub jwt: JwtVerifier,
    /// Finished-execution cache, absent when Redis is not configured
    pub cache: Option<RedisCache>,
    /// Probed by the health endpoint
    pub llm_client: Option<LlmClient>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        store: Arc<dyn AgentStore>,
        runner: WorkflowRunner,
        cache: Option<RedisCache>,
        llm_client: Option<LlmClient>,
    ) -> Arc<Self> {
        let jwt = JwtVerifier::new(&settings.jwt_secret, settings.jwt_issuer.clone());
        Arc::new(Self {
            settings,
            store,
            runner,
            jwt,
            cache,
            llm_client,
        })
    }
}

/// Build the complete application with all middleware
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(&state.settings);

    // Spans at DEBUG keep INFO logs quiet
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
        .on_response(DefaultOnResponse::new().level(Level::DEBUG));

    let (set_request_id, propagate_request_id) = request_id_layer();

    Router::new()
        .nest("/api", routes::api_router())
        // Middleware stack (applied bottom-up)
        .layer(propagate_request_id)
        .layer(trace_layer)
        .layer(set_request_id)
        .layer(cors)
        .with_state(state)
}

fn build_cors_layer(settings: &Settings) -> CorsLayer {
    let origins: Vec<HeaderValue> = settings
        .cors_allow_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let max_age = if settings.env.is_dev() {
        std::time::Duration::from_secs(86400)
    } else {
        std::time::Duration::from_secs(3600)
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(AllowMethods::list([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::OPTIONS,
        ]))
        .allow_headers(AllowHeaders::list([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::header::ACCEPT,
            axum::http::header::CACHE_CONTROL,
            axum::http::HeaderName::from_static("x-request-id"),
        ]))
        .allow_credentials(true)
        .max_age(max_age)
}
