//! Service layer: the LLM client, persistence, the execution cache and the
//! background workflow runner.

pub mod cache;
pub mod llm_client;
pub mod store;
pub mod workflow_runner;

pub use cache::RedisCache;
pub use llm_client::LlmClient;
pub use workflow_runner::WorkflowRunner;
