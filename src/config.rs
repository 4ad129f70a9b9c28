use anyhow::{Context, Result};
use std::env;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }
}

/// Models used by the agents, split by workload.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Extraction, pricing, risk and decision agents
    pub reasoning: String,
    /// Document assembly and the chat assistant
    pub fast: String,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            reasoning: "gpt-5".to_string(),
            fast: "gpt-4o-mini".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // Database (in-memory store when unset)
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Redis (execution cache disabled when unset)
    pub redis_url: Option<String>,
    pub redis_cache_ttl_seconds: u64,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Auth
    pub jwt_secret: String,
    pub jwt_issuer: Option<String>,

    // LLM service
    pub llm_api_url: String,
    pub llm_api_key: String,
    pub llm_timeout_seconds: u64,
    pub llm_max_retries: u32,
    pub models: ModelConfig,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8001".to_string());

        // Database
        let database_url = env::var("DATABASE_URL").ok().filter(|s| !s.is_empty());
        let database_max_connections = parse_var("DATABASE_MAX_CONNECTIONS", 10);

        // Redis
        let redis_url = env::var("REDIS_URL").ok().filter(|s| !s.is_empty());
        let redis_cache_ttl_seconds = parse_var("REDIS_CACHE_TTL_SECONDS", 3600);

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Auth
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").ok().filter(|s| !s.is_empty());

        // LLM service
        let llm_api_url =
            env::var("LLM_API_URL").unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        Url::parse(&llm_api_url).context("LLM_API_URL is not a valid URL")?;
        let llm_api_key = env::var("LLM_API_KEY").context("LLM_API_KEY must be set")?;
        let llm_timeout_seconds = parse_var("LLM_TIMEOUT_SECONDS", 120); // 2 minutes for LLM calls
        let llm_max_retries = parse_var("LLM_MAX_RETRIES", 2);

        let defaults = ModelConfig::default();
        let models = ModelConfig {
            reasoning: env::var("LLM_REASONING_MODEL").unwrap_or(defaults.reasoning),
            fast: env::var("LLM_FAST_MODEL").unwrap_or(defaults.fast),
        };

        Ok(Settings {
            env,
            server_addr,
            database_url,
            database_max_connections,
            redis_url,
            redis_cache_ttl_seconds,
            cors_allow_origins,
            jwt_secret,
            jwt_issuer,
            llm_api_url,
            llm_api_key,
            llm_timeout_seconds,
            llm_max_retries,
            models,
        })
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
impl Settings {
    pub fn for_tests() -> Self {
        Self {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".to_string(),
            database_url: None,
            database_max_connections: 1,
            redis_url: None,
            redis_cache_ttl_seconds: 60,
            cors_allow_origins: vec!["http://localhost:3000".to_string()],
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: None,
            llm_api_url: "http://localhost:9".to_string(),
            llm_api_key: "test-key".to_string(),
            llm_timeout_seconds: 5,
            llm_max_retries: 0,
            models: ModelConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn environment_parsing_is_lenient() {
        assert_eq!(Environment::from_str("PRODUCTION"), Environment::Prod);
        assert_eq!(Environment::from_str("staging"), Environment::Staging);
        assert_eq!(Environment::from_str("anything"), Environment::Dev);
    }
}
