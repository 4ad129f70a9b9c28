mod agents;
mod app;
mod auth;
mod config;
mod db;
mod domain;
mod error;
mod logging;
mod middleware;
mod orchestrator;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use anyhow::Result;
use std::sync::Arc;

use orchestrator::AgentOrchestrator;
use services::llm_client::ChatModel;
use services::store::{AgentStore, MemoryStore, PgStore};
use services::{LlmClient, RedisCache, WorkflowRunner};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = config::Settings::from_env()?;

    // Initialize logging
    logging::init_logging(&settings.env);

    tracing::info!(
        env = ?settings.env,
        server_addr = %settings.server_addr,
        reasoning_model = %settings.models.reasoning,
        fast_model = %settings.models.fast,
        "Starting HexaBid agent service"
    );

    // Store: Postgres when configured, otherwise process memory
    let store: Arc<dyn AgentStore> = match &settings.database_url {
        Some(url) => {
            let pool = db::create_pool(url, settings.database_max_connections).await?;
            let store = PgStore::new(pool);
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // Redis cache for finished executions (optional)
    let cache = match &settings.redis_url {
        Some(url) => Some(RedisCache::new(url, settings.redis_cache_ttl_seconds).await?),
        None => None,
    };

    // LLM client
    let llm_client = LlmClient::new(
        &settings.llm_api_url,
        &settings.llm_api_key,
        settings.llm_timeout_seconds,
        settings.llm_max_retries,
    )?;

    // Check LLM reachability without blocking startup
    tokio::spawn({
        let llm_client = llm_client.clone();
        async move {
            match llm_client.health_check().await {
                Ok(()) => tracing::info!("LLM service is reachable"),
                Err(e) => tracing::warn!(error = %e, "LLM service health check failed"),
            }
        }
    });

    let llm: Arc<dyn ChatModel> = Arc::new(llm_client.clone());
    let orchestrator = AgentOrchestrator::new(llm, settings.models.clone());
    let runner = WorkflowRunner::new(store.clone(), orchestrator, cache.clone());

    // Create application state
    let state = app::AppState::new(settings.clone(), store, runner, cache, Some(llm_client));

    // Build application
    let app = app::create_app(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&settings.server_addr).await?;
    tracing::info!("Listening on {}", settings.server_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
